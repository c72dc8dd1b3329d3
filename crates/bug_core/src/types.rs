//! Definição dos eventos produzidos pelo Bug.
//!
//! Um evento é um intervalo de tempo limitado em que o sinal monitorado
//! ficou acima do threshold. Os structs abaixo derivam serde apenas para o
//! decoder do servidor: a ordem dos campos é a ordem das words no frame.

use serde::{Deserialize, Serialize};

/// Timestamp em segundos (RTC do device, sincronizado via SNTP).
pub type Timestamp = u32;

// ──────────────────────────────────────────────
// Intervalo
// ──────────────────────────────────────────────

/// Intervalo aberto-fechado de um evento físico.
///
/// `started_at` é definido quando o intervalo abre e `ended_at` quando fecha.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
}

impl TimeRange {
    /// Duração do intervalo em segundos (0 se ainda não fechado).
    pub fn duration_secs(&self) -> u32 {
        self.ended_at.saturating_sub(self.started_at)
    }
}

// ──────────────────────────────────────────────
// Payloads
// ──────────────────────────────────────────────

/// Amostra inteira de 3 eixos, usada como deslocamento em ponto fixo.
///
/// Valores negativos trafegam em complemento de dois (reinterprete como `i32`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct XYZ {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl XYZ {
    pub const ZERO: XYZ = XYZ { x: 0, y: 0, z: 0 };

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Soma com wrap por eixo (aritmética de ponto fixo em complemento de dois).
    pub fn wrapping_add(self, rhs: XYZ) -> XYZ {
        XYZ {
            x: self.x.wrapping_add(rhs.x),
            y: self.y.wrapping_add(rhs.y),
            z: self.z.wrapping_add(rhs.z),
        }
    }

    /// Reinterpreta os eixos como valores com sinal.
    pub fn signed(&self) -> [i32; 3] {
        [self.x as i32, self.y as i32, self.z as i32]
    }
}

/// Evento de posição.
///
/// `from` é o deslocamento na abertura do intervalo; `to` é a soma corrente
/// de todos os deslocamentos registrados durante o intervalo.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub from: XYZ,
    pub to: XYZ,
}

/// Evento de luminosidade (faixa escalar simples).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Luminosity {
    pub from: u32,
    pub to: u32,
}

// ──────────────────────────────────────────────
// Tipo do evento
// ──────────────────────────────────────────────

/// União fechada dos tipos de evento. A ordem das variantes é o
/// discriminante do wire format: não reordenar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BugEventKind {
    Luminosity(Luminosity),
    Position(Position),
}

impl BugEventKind {
    pub const LUMINOSITY_TAG: u32 = 0;
    pub const POSITION_TAG: u32 = 1;

    /// Discriminante escrito na word 3 do frame.
    pub fn discriminant(&self) -> u32 {
        match self {
            BugEventKind::Luminosity(_) => Self::LUMINOSITY_TAG,
            BugEventKind::Position(_) => Self::POSITION_TAG,
        }
    }

    /// Número de words de payload após o discriminante.
    pub fn payload_words(&self) -> usize {
        payload_words_for(self.discriminant()).unwrap_or(0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BugEventKind::Luminosity(_) => "luminosity",
            BugEventKind::Position(_) => "position",
        }
    }
}

/// Words de payload para um discriminante conhecido.
pub fn payload_words_for(discriminant: u32) -> Option<usize> {
    match discriminant {
        BugEventKind::LUMINOSITY_TAG => Some(2),
        BugEventKind::POSITION_TAG => Some(6),
        _ => None,
    }
}

/// Evento completo como visto pelo decoder do servidor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BugEvent {
    pub time_range: TimeRange,
    pub secret: u32,
    pub kind: BugEventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_match_wire_order() {
        let lum = BugEventKind::Luminosity(Luminosity::default());
        let pos = BugEventKind::Position(Position::default());
        assert_eq!(lum.discriminant(), 0);
        assert_eq!(pos.discriminant(), 1);
        assert_eq!(lum.payload_words(), 2);
        assert_eq!(pos.payload_words(), 6);
        assert_eq!(payload_words_for(7), None);
    }

    #[test]
    fn xyz_wraps_negative_displacement() {
        let a = XYZ::new(5, 0, 0);
        let b = XYZ::new((-8i32) as u32, 1, 0);
        let sum = a.wrapping_add(b);
        assert_eq!(sum.signed(), [-3, 1, 0]);
    }

    #[test]
    fn duration_never_underflows() {
        let open = TimeRange {
            started_at: 100,
            ended_at: 0,
        };
        assert_eq!(open.duration_secs(), 0);
        let closed = TimeRange {
            started_at: 100,
            ended_at: 130,
        };
        assert_eq!(closed.duration_secs(), 30);
    }
}
