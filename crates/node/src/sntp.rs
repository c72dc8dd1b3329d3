//! Cliente SNTP para sincronizar o RTC após o join.
//!
//! Modo cliente do RFC 4330: um datagrama de 48 bytes, resposta com o
//! transmit timestamp em segundos desde 1900.

use crate::fault::NetError;
use bug_core::Timestamp;
use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::debug;

const PACKET_SIZE: usize = 48;
/// LI = 0, VN = 3, Mode = 3 (cliente).
const CLIENT_HEADER: u8 = 0x1B;
const MODE_SERVER: u8 = 4;
const TRANSMIT_OFFSET: usize = 40;
/// Segundos entre 1900-01-01 e 1970-01-01.
const NTP_UNIX_OFFSET: u32 = 2_208_988_800;

/// Serviço de horário de rede.
pub trait TimeService: Send + 'static {
    fn sync(&mut self) -> Result<Timestamp, NetError>;
}

pub struct SntpClient {
    server: String,
    timeout: Duration,
}

impl SntpClient {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }
}

impl TimeService for SntpClient {
    fn sync(&mut self) -> Result<Timestamp, NetError> {
        let addr = self
            .server
            .to_socket_addrs()
            .map_err(|_| NetError::DnsFailure)?
            .next()
            .ok_or(NetError::DnsFailure)?;

        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.set_read_timeout(Some(self.timeout))?;

        let mut request = [0u8; PACKET_SIZE];
        request[0] = CLIENT_HEADER;
        sock.send_to(&request, addr)?;

        let mut response = [0u8; PACKET_SIZE];
        let (size, from) = sock.recv_from(&mut response)?;
        debug!("Resposta SNTP de {from}: {size} bytes");

        parse_response(&response[..size])
    }
}

/// Extrai o timestamp Unix de uma resposta SNTP.
pub fn parse_response(data: &[u8]) -> Result<Timestamp, NetError> {
    if data.len() < PACKET_SIZE || data[0] & 0x07 != MODE_SERVER {
        return Err(NetError::invalid_response());
    }
    let secs = u32::from_be_bytes([
        data[TRANSMIT_OFFSET],
        data[TRANSMIT_OFFSET + 1],
        data[TRANSMIT_OFFSET + 2],
        data[TRANSMIT_OFFSET + 3],
    ]);
    if secs < NTP_UNIX_OFFSET {
        return Err(NetError::invalid_response());
    }
    Ok(secs - NTP_UNIX_OFFSET)
}
