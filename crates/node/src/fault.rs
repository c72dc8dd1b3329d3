//! Taxonomia de erros de rede e orçamento de falhas.
//!
//! Os códigos seguem a numeração do driver de rede do device (-3001..-3020).
//! Cada código tem um slot num array de contadores atômicos; o slot 20 é o
//! catch-all para códigos desconhecidos.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error};

/// Número de slots do orçamento de falhas (20 códigos + catch-all).
pub const FAULT_SLOTS: usize = 21;

/// Classe de um erro, que decide a política de recuperação.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, would-block, conexão perdida: sempre retentado.
    Transient,
    /// Falha na interface com o processador de rede: conta no orçamento.
    Device,
    /// Credenciais, DNS, DHCP: retentado como transiente, mas não se resolve sozinho.
    Configuration,
    Other,
}

/// Erro reportado pelo driver de rede ou pelo socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum NetError {
    #[error("would block: dado indisponível numa chamada não bloqueante")]
    WouldBlock,
    #[error("unsupported: funcionalidade não suportada")]
    Unsupported,
    #[error("parameter: configuração inválida")]
    Parameter,
    #[error("no connection: não conectado a uma rede")]
    NoConnection,
    #[error("no socket: socket indisponível")]
    NoSocket,
    #[error("no address: endereço IP desconhecido")]
    NoAddress,
    #[error("no memory: memória indisponível")]
    NoMemory,
    #[error("no ssid: SSID não encontrado")]
    NoSsid,
    #[error("dns failure: DNS não completou")]
    DnsFailure,
    #[error("dhcp failure: DHCP não completou")]
    DhcpFailure,
    #[error("auth failure: conexão com o access point falhou")]
    AuthFailure,
    #[error("device error: falha na interface com o processador de rede")]
    DeviceError,
    #[error("in progress: operação em andamento")]
    InProgress,
    #[error("already: operação já em andamento")]
    Already,
    #[error("is connected: socket já conectado")]
    IsConnected,
    #[error("connection lost: conexão perdida")]
    ConnectionLost,
    #[error("connection timeout: conexão expirou")]
    ConnectionTimeout,
    #[error("address in use: endereço já em uso")]
    AddressInUse,
    #[error("timeout: operação expirou")]
    Timeout,
    #[error("busy: dispositivo ocupado")]
    Busy,
    #[error("erro desconhecido ({0})")]
    Unknown(i32),
}

const KNOWN: [NetError; 20] = [
    NetError::WouldBlock,
    NetError::Unsupported,
    NetError::Parameter,
    NetError::NoConnection,
    NetError::NoSocket,
    NetError::NoAddress,
    NetError::NoMemory,
    NetError::NoSsid,
    NetError::DnsFailure,
    NetError::DhcpFailure,
    NetError::AuthFailure,
    NetError::DeviceError,
    NetError::InProgress,
    NetError::Already,
    NetError::IsConnected,
    NetError::ConnectionLost,
    NetError::ConnectionTimeout,
    NetError::AddressInUse,
    NetError::Timeout,
    NetError::Busy,
];

/// Primeiro código da faixa do driver.
const CODE_BASE: i32 = -3001;

/// Código de uma resposta de protocolo inválida (SNTP malformado, ack recusado).
pub const INVALID_RESPONSE: i32 = -1;

impl NetError {
    /// Código numérico do driver.
    pub fn code(&self) -> i32 {
        match self {
            NetError::Unknown(code) => *code,
            known => CODE_BASE - known.slot() as i32,
        }
    }

    pub fn from_code(code: i32) -> Self {
        let index = CODE_BASE - code;
        if (0..KNOWN.len() as i32).contains(&index) {
            KNOWN[index as usize]
        } else {
            NetError::Unknown(code)
        }
    }

    /// Resposta do par fora do protocolo.
    pub fn invalid_response() -> Self {
        Self::from_code(INVALID_RESPONSE)
    }

    /// Índice no orçamento de falhas.
    pub fn slot(&self) -> usize {
        match self {
            NetError::WouldBlock => 0,
            NetError::Unsupported => 1,
            NetError::Parameter => 2,
            NetError::NoConnection => 3,
            NetError::NoSocket => 4,
            NetError::NoAddress => 5,
            NetError::NoMemory => 6,
            NetError::NoSsid => 7,
            NetError::DnsFailure => 8,
            NetError::DhcpFailure => 9,
            NetError::AuthFailure => 10,
            NetError::DeviceError => 11,
            NetError::InProgress => 12,
            NetError::Already => 13,
            NetError::IsConnected => 14,
            NetError::ConnectionLost => 15,
            NetError::ConnectionTimeout => 16,
            NetError::AddressInUse => 17,
            NetError::Timeout => 18,
            NetError::Busy => 19,
            NetError::Unknown(_) => FAULT_SLOTS - 1,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            NetError::WouldBlock
            | NetError::NoConnection
            | NetError::ConnectionLost
            | NetError::ConnectionTimeout
            | NetError::Timeout
            | NetError::Busy
            | NetError::InProgress
            | NetError::Already => ErrorClass::Transient,
            NetError::DeviceError | NetError::NoSocket | NetError::NoMemory => ErrorClass::Device,
            NetError::Parameter
            | NetError::NoSsid
            | NetError::NoAddress
            | NetError::DnsFailure
            | NetError::DhcpFailure
            | NetError::AuthFailure => ErrorClass::Configuration,
            NetError::Unsupported
            | NetError::IsConnected
            | NetError::AddressInUse
            | NetError::Unknown(_) => ErrorClass::Other,
        }
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => NetError::WouldBlock,
            io::ErrorKind::TimedOut => NetError::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => NetError::ConnectionLost,
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected => {
                NetError::NoConnection
            }
            io::ErrorKind::AddrInUse => NetError::AddressInUse,
            io::ErrorKind::AddrNotAvailable => NetError::NoAddress,
            io::ErrorKind::InvalidInput => NetError::Parameter,
            io::ErrorKind::OutOfMemory => NetError::NoMemory,
            io::ErrorKind::Unsupported => NetError::Unsupported,
            _ => match e.raw_os_error() {
                Some(code) => NetError::Unknown(code),
                None => NetError::DeviceError,
            },
        }
    }
}

/// Loga um erro de rede com o código e a descrição.
pub fn log_net_error(err: &NetError, context: &str) {
    error!("{context}: [{}] {err}", err.code());
}

/// Orçamento de falhas: um contador atômico por código de erro.
///
/// Incrementado a cada falha reportada. Quando um erro de dispositivo passa
/// do threshold, o threshold é subtraído do slot via compare-and-swap e a
/// escalada (reset do rádio) acontece exatamente uma vez por cruzamento.
#[derive(Debug)]
pub struct FaultBudget {
    slots: [AtomicU32; FAULT_SLOTS],
    threshold: u32,
}

impl FaultBudget {
    pub fn new(threshold: u32) -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU32::new(0)),
            threshold,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Contagem atual do slot de `err`.
    pub fn count(&self, err: &NetError) -> u32 {
        self.slots[err.slot()].load(Ordering::Acquire)
    }

    /// Registra uma falha. Retorna `true` se esta chamada deve escalar.
    pub fn report(&self, err: &NetError) -> bool {
        let slot = &self.slots[err.slot()];
        let count = slot.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        debug!("Falha {} registrada ({count}x)", err.code());

        if *err != NetError::DeviceError || count <= self.threshold {
            return false;
        }

        let mut current = slot.load(Ordering::Acquire);
        loop {
            if current <= self.threshold {
                // Outra thread já consumiu este cruzamento
                return false;
            }
            match slot.compare_exchange_weak(
                current,
                current - self.threshold,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn codes_roundtrip() {
        for err in KNOWN {
            assert_eq!(NetError::from_code(err.code()), err);
        }
        assert_eq!(NetError::DeviceError.code(), -3012);
        assert_eq!(NetError::WouldBlock.code(), -3001);
        assert_eq!(NetError::Busy.code(), -3020);
        assert_eq!(NetError::from_code(-1), NetError::Unknown(-1));
        assert_eq!(NetError::from_code(-3021), NetError::Unknown(-3021));
    }

    #[test]
    fn slots_are_distinct_and_in_range() {
        let mut seen = [false; FAULT_SLOTS];
        for err in KNOWN {
            assert!(!seen[err.slot()]);
            seen[err.slot()] = true;
        }
        assert_eq!(NetError::Unknown(42).slot(), FAULT_SLOTS - 1);
        assert!(!seen[FAULT_SLOTS - 1]);
    }

    #[test]
    fn io_errors_are_classified() {
        let timeout = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(NetError::from(timeout), NetError::Timeout);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(NetError::from(reset).class(), ErrorClass::Transient);
        assert_eq!(NetError::AuthFailure.class(), ErrorClass::Configuration);
        assert_eq!(NetError::DeviceError.class(), ErrorClass::Device);
    }

    #[test]
    fn threshold_reports_do_not_escalate() {
        let budget = FaultBudget::new(3);
        for _ in 0..3 {
            assert!(!budget.report(&NetError::DeviceError));
        }
        assert_eq!(budget.count(&NetError::DeviceError), 3);
    }

    #[test]
    fn crossing_escalates_once_and_leaves_remainder() {
        let budget = FaultBudget::new(3);
        let escalations = (0..4)
            .filter(|_| budget.report(&NetError::DeviceError))
            .count();
        assert_eq!(escalations, 1);
        assert_eq!(budget.count(&NetError::DeviceError), 1);
    }

    #[test]
    fn other_codes_never_escalate() {
        let budget = FaultBudget::new(3);
        for _ in 0..10 {
            assert!(!budget.report(&NetError::Timeout));
        }
        assert_eq!(budget.count(&NetError::Timeout), 10);
        assert_eq!(budget.count(&NetError::DeviceError), 0);
    }

    #[test]
    fn concurrent_reports_escalate_once_per_crossing() {
        let budget = Arc::new(FaultBudget::new(3));
        let escalations = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let budget = budget.clone();
                let escalations = escalations.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if budget.report(&NetError::DeviceError) {
                            escalations.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let escalated = escalations.load(Ordering::Relaxed) as u32;
        let remaining = budget.count(&NetError::DeviceError);
        assert_eq!(escalated * 3 + remaining, 400);
        assert!(escalated >= 100);
    }
}
