//! Driver do rádio WiFi.
//!
//! O supervisor de conexão é o único dono do [`Radio`]. No host o link é a
//! própria pilha de rede do sistema: [`HostRadio`] só valida que existe uma
//! rota até o servidor.

use crate::fault::NetError;
use std::net::UdpSocket;
use tracing::debug;

/// Dados do link após o join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub mac: String,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub rssi: i32,
}

/// Interface do driver de rádio.
pub trait Radio: Send + 'static {
    fn disconnect(&mut self) -> Result<(), NetError>;

    /// Reset completo do rádio.
    fn reset(&mut self) -> Result<(), NetError>;

    /// Associa ao access point com as credenciais dadas.
    fn join(&mut self, ssid: &str, password: &str) -> Result<LinkInfo, NetError>;
}

/// Rádio emulado sobre a rede do host.
pub struct HostRadio {
    probe_addr: String,
    joined: bool,
}

impl HostRadio {
    /// `probe_addr` é o endereço usado para descobrir a interface de saída.
    pub fn new(probe_addr: impl Into<String>) -> Self {
        Self {
            probe_addr: probe_addr.into(),
            joined: false,
        }
    }
}

impl Radio for HostRadio {
    fn disconnect(&mut self) -> Result<(), NetError> {
        self.joined = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), NetError> {
        debug!("Reset do rádio (host)");
        self.joined = false;
        Ok(())
    }

    fn join(&mut self, ssid: &str, _password: &str) -> Result<LinkInfo, NetError> {
        if ssid.is_empty() {
            return Err(NetError::NoSsid);
        }

        // connect() em UDP não envia pacotes, só resolve a rota
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.connect(&self.probe_addr)
            .map_err(|_| NetError::NoConnection)?;
        let local = sock.local_addr()?;

        self.joined = true;
        Ok(LinkInfo {
            mac: "00:00:00:00:00:00".into(),
            ip: local.ip().to_string(),
            netmask: String::new(),
            gateway: String::new(),
            rssi: 0,
        })
    }
}
