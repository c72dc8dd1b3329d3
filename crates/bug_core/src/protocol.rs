//! Protocolo de comunicação binário do Bug.
//!
//! Frame de tamanho fixo, words de 32 bits little-endian, sem prefixo de
//! tamanho e sem checksum:
//!
//! ```text
//! ┌─────────────┬───────────┬───────────┬──────────┬──────────────────┐
//! │ started_at  │ ended_at  │ secret    │ kind     │ payload (2 ou 6) │
//! └─────────────┴───────────┴───────────┴──────────┴──────────────────┘
//! ```
//!
//! - `kind = 0`: Luminosity → `from`, `to` (24 bytes no total)
//! - `kind = 1`: Position → `from.xyz`, `to.xyz` (40 bytes no total)
//!
//! O encoder escreve direto num buffer do chamador, sem alocação. O decoder
//! usa bincode, cujo layout padrão (fixint, little-endian, tag u32) coincide
//! word a word com o frame.

use crate::types::{BugEvent, BugEventKind, TimeRange, payload_words_for};

/// Tamanho de uma word do frame.
pub const WORD_SIZE: usize = 4;

/// Words fixas antes do payload (started_at, ended_at, secret, kind).
pub const HEADER_WORDS: usize = 4;

/// Tamanho do header em bytes.
pub const HEADER_SIZE: usize = HEADER_WORDS * WORD_SIZE;

/// Maior frame possível (Position).
pub const MAX_FRAME_LEN: usize = 40;

/// Byte de resposta do servidor quando aceita um frame.
pub const RESPONSE_OK: u8 = 0x01;

/// Byte de resposta do servidor quando rejeita um frame (secret inválido).
pub const RESPONSE_REJECTED: u8 = 0x00;

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Tipo de evento desconhecido: {0}")]
    UnknownKind(u32),

    #[error("Tamanho inválido para o tipo {kind}: {len} bytes (esperado {expected})")]
    LengthMismatch { kind: u32, len: usize, expected: usize },

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

/// Frame codificado, pronto para transmissão.
///
/// Possui o próprio buffer: é movido para a fila do transporte e liberado
/// quando o envio conclui.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Frame {
    pub fn encode(kind: &BugEventKind, time_range: &TimeRange, secret: u32) -> Self {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = encode_event(&mut buf, kind, time_range, secret);
        Self { buf, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({} bytes: ", self.len)?;
        for b in self.as_bytes() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

#[inline]
fn put_word(buf: &mut [u8; MAX_FRAME_LEN], index: usize, word: u32) {
    let offset = index * WORD_SIZE;
    buf[offset..offset + WORD_SIZE].copy_from_slice(&word.to_le_bytes());
}

/// Codifica um evento em `buf` e retorna o número de bytes escritos.
///
/// O buffer tem o tamanho do maior frame, então a função é total.
pub fn encode_event(
    buf: &mut [u8; MAX_FRAME_LEN],
    kind: &BugEventKind,
    time_range: &TimeRange,
    secret: u32,
) -> usize {
    put_word(buf, 0, time_range.started_at);
    put_word(buf, 1, time_range.ended_at);
    put_word(buf, 2, secret);
    put_word(buf, 3, kind.discriminant());

    let payload_words = match kind {
        BugEventKind::Luminosity(luminosity) => {
            put_word(buf, 4, luminosity.from);
            put_word(buf, 5, luminosity.to);
            2
        }
        BugEventKind::Position(position) => {
            put_word(buf, 4, position.from.x);
            put_word(buf, 5, position.from.y);
            put_word(buf, 6, position.from.z);
            put_word(buf, 7, position.to.x);
            put_word(buf, 8, position.to.y);
            put_word(buf, 9, position.to.z);
            6
        }
    };

    (HEADER_WORDS + payload_words) * WORD_SIZE
}

/// Tamanho total do frame para um discriminante, se conhecido.
///
/// Usado por leitores de stream para achar o fim do frame.
pub fn frame_len(discriminant: u32) -> Option<usize> {
    payload_words_for(discriminant).map(|words| (HEADER_WORDS + words) * WORD_SIZE)
}

/// Lê o discriminante de um header completo.
pub fn peek_kind(header: &[u8]) -> Result<u32, ProtocolError> {
    if header.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort(header.len()));
    }
    let mut word = [0u8; WORD_SIZE];
    word.copy_from_slice(&header[3 * WORD_SIZE..HEADER_SIZE]);
    Ok(u32::from_le_bytes(word))
}

/// Decodifica exatamente um frame.
///
/// Valida header, discriminante e tamanho antes de deserializar.
pub fn decode_frame(data: &[u8]) -> Result<BugEvent, ProtocolError> {
    let kind = peek_kind(data)?;
    let expected = frame_len(kind).ok_or(ProtocolError::UnknownKind(kind))?;
    if data.len() != expected {
        return Err(ProtocolError::LengthMismatch {
            kind,
            len: data.len(),
            expected,
        });
    }

    bincode::deserialize(data).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
