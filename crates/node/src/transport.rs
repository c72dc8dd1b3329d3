//! Transporte resiliente – um socket de saída e uma fila de thread única.
//!
//! `send` nunca falha para quem chama: ele só codifica o frame e enfileira o
//! envio. Na fila, cada envio verifica se o socket está vivo; se não estiver,
//! ou se o envio falhar, o transporte dispara (uma única vez) o loop de
//! reconexão e reenfileira o mesmo frame para depois dele. Um frame nunca é
//! descartado, mas também nunca há confirmação de volta para o chamador.

use crate::connectivity::Connectivity;
use crate::fault::{NetError, log_net_error};
use crate::queue::{EventQueue, QueueHandle};
use bug_core::config::NodeConfig;
use bug_core::protocol::{Frame, RESPONSE_OK};
use bug_core::types::{BugEventKind, TimeRange};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Stream de transporte (TCP no host, mocks nos testes).
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// Abre o stream até o servidor pela interface de rede atual.
pub trait Connector: Send + 'static {
    fn connect(&mut self) -> Result<Box<dyn Stream>, NetError>;
}

/// Conector TCP com timeout de socket.
pub struct TcpConnector {
    addr: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self) -> Result<Box<dyn Stream>, NetError> {
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|_| NetError::DnsFailure)?
            .next()
            .ok_or(NetError::NoAddress)?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Por que um envio falhou.
#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("socket desconectado")]
    Disconnected,

    #[error("{0}")]
    Net(#[from] NetError),

    #[error("resposta inesperada do servidor: 0x{0:02X}")]
    Rejected(u8),
}

/// Parâmetros do transporte.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub secret: u32,
    pub backoff: Duration,
    pub expect_ack: bool,
}

impl TransportSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            secret: config.secret,
            backoff: config.connect_backoff(),
            expect_ack: config.expect_ack,
        }
    }
}

/// Contadores do transporte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames entregues
    pub sent: u64,
    /// Tentativas de envio que falharam
    pub failed: u64,
    /// Loops de reconexão disparados pelo caminho de envio
    pub reconnects: u64,
    /// Execuções do loop de conexão (inclui a inicial)
    pub connect_loops: u64,
}

/// Handle público do transporte.
#[derive(Clone)]
pub struct EventClient {
    queue: QueueHandle<Transport>,
    secret: u32,
}

impl EventClient {
    /// Codifica e enfileira um evento. Retorna imediatamente.
    pub fn send(&self, kind: BugEventKind, time_range: TimeRange) {
        let frame = Frame::encode(&kind, &time_range, self.secret);
        trace!("Enfileirando {} ({:?})", kind.name(), frame);
        self.queue.call(move |transport| transport.send_frame(frame));
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

/// Destino dos eventos montados pelo tracker.
pub trait EventPublisher: Send + 'static {
    fn publish(&self, kind: BugEventKind, time_range: TimeRange);
}

impl EventPublisher for EventClient {
    fn publish(&self, kind: BugEventKind, time_range: TimeRange) {
        self.send(kind, time_range);
    }
}

/// Estado do transporte, possuído pela thread da fila.
pub struct Transport {
    connector: Box<dyn Connector>,
    stream: Option<Box<dyn Stream>>,
    connecting: bool,
    link: Connectivity,
    queue: QueueHandle<Transport>,
    backoff: Duration,
    expect_ack: bool,
    stats: TransportStats,
}

impl Transport {
    pub fn new(
        settings: &TransportSettings,
        connector: Box<dyn Connector>,
        link: Connectivity,
        queue: QueueHandle<Transport>,
    ) -> Self {
        Self {
            connector,
            stream: None,
            connecting: false,
            link,
            queue,
            backoff: settings.backoff,
            expect_ack: settings.expect_ack,
            stats: TransportStats::default(),
        }
    }

    #[cfg(test)]
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    fn connected(&self) -> bool {
        self.stream.is_some() && self.link.is_connected()
    }

    /// Conecta até conseguir.
    pub fn connect_socket(&mut self) {
        debug!("connect_socket");
        self.stats.connect_loops += 1;

        loop {
            // Fecha o socket anterior
            self.stream = None;

            if !self.link.is_connected() {
                trace!("Link indisponível, aguardando");
                std::thread::sleep(self.backoff);
                continue;
            }

            match self.connector.connect() {
                Ok(stream) => {
                    self.stream = Some(stream);
                    break;
                }
                Err(e) => {
                    log_net_error(&e, "Falha ao conectar socket");
                    self.link.report_error(e);
                    std::thread::sleep(self.backoff);
                }
            }
        }

        self.connecting = false;
        info!(
            "Socket conectado ({} loops de conexão, {} reconexões)",
            self.stats.connect_loops, self.stats.reconnects
        );
    }

    fn send_frame(&mut self, frame: Frame) {
        debug!("send_frame ({} bytes)", frame.len());

        let result = if self.connected() {
            self.transmit(&frame)
        } else {
            Err(SendError::Disconnected)
        };

        match result {
            Ok(()) => {
                self.stats.sent += 1;
                debug!(
                    "Frame entregue ({} bytes, {} enviados, {} falhas)",
                    frame.len(),
                    self.stats.sent,
                    self.stats.failed
                );
                // frame liberado aqui
            }
            Err(e) => {
                self.stats.failed += 1;
                match &e {
                    SendError::Net(net) => log_net_error(net, "Falha ao enviar frame"),
                    SendError::Disconnected => warn!("Socket desconectado, conectando novamente"),
                    SendError::Rejected(_) => error!("Falha ao tratar resposta: {e}"),
                }
                self.stream = None;

                if !self.connecting {
                    self.connecting = true;
                    self.stats.reconnects += 1;
                    match e {
                        SendError::Net(net) => self.link.report_error(net),
                        SendError::Rejected(_) => {
                            self.link.report_error(NetError::invalid_response())
                        }
                        SendError::Disconnected => {}
                    }
                    self.queue.call(Transport::connect_socket);
                }

                // Mesmo frame, depois da reconexão
                self.queue.call(move |transport| transport.send_frame(frame));
            }
        }
    }

    fn transmit(&mut self, frame: &Frame) -> Result<(), SendError> {
        let expect_ack = self.expect_ack;
        let stream = self.stream.as_mut().ok_or(SendError::Disconnected)?;

        stream
            .write_all(frame.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(NetError::from)?;

        if expect_ack {
            let mut response = [0u8; 1];
            stream.read_exact(&mut response).map_err(NetError::from)?;
            if response[0] != RESPONSE_OK {
                return Err(SendError::Rejected(response[0]));
            }
        }

        Ok(())
    }
}

/// Inicia a thread do transporte. A primeira conexão acontece após um backoff.
pub fn spawn_transport(
    settings: TransportSettings,
    connector: Box<dyn Connector>,
    link: Connectivity,
) -> std::io::Result<(EventClient, JoinHandle<Transport>)> {
    let queue = EventQueue::new("transport");
    let handle = queue.handle();
    let transport = Transport::new(&settings, connector, link, handle.clone());

    handle.call_in(settings.backoff, Transport::connect_socket);
    let thread = queue.spawn(transport)?;

    Ok((
        EventClient {
            queue: handle,
            secret: settings.secret,
        },
        thread,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Supervisor;
    use bug_core::protocol::decode_frame;
    use bug_core::types::{Position, XYZ};
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use std::io;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Script {
        /// Tentativas de escrita que devem falhar antes de aceitar
        failing_writes: u32,
        write_attempts: u32,
        connects: u32,
        delivered: Vec<Vec<u8>>,
        ack: Option<u8>,
    }

    struct ScriptedStream {
        script: Arc<Mutex<Script>>,
        done: Sender<Vec<u8>>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.lock().unwrap().ack {
                Some(byte) if !buf.is_empty() => {
                    buf[0] = byte;
                    Ok(1)
                }
                _ => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut script = self.script.lock().unwrap();
            script.write_attempts += 1;
            if script.write_attempts <= script.failing_writes {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            script.delivered.push(buf.to_vec());
            let _ = self.done.send(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ScriptedConnector {
        script: Arc<Mutex<Script>>,
        done: Sender<Vec<u8>>,
    }

    impl Connector for ScriptedConnector {
        fn connect(&mut self) -> Result<Box<dyn Stream>, NetError> {
            self.script.lock().unwrap().connects += 1;
            Ok(Box::new(ScriptedStream {
                script: self.script.clone(),
                done: self.done.clone(),
            }))
        }
    }

    fn up_link() -> (Connectivity, EventQueue<Supervisor>) {
        let queue = EventQueue::new("test-supervisor");
        let link = Connectivity::new(queue.handle(), 3);
        link.set_connected(true);
        (link, queue)
    }

    fn settings(expect_ack: bool) -> TransportSettings {
        TransportSettings {
            secret: 0xDEADBEEF,
            backoff: Duration::from_millis(1),
            expect_ack,
        }
    }

    fn position() -> (BugEventKind, TimeRange) {
        (
            BugEventKind::Position(Position {
                from: XYZ::new(1, 2, 3),
                to: XYZ::new(4, 5, 6),
            }),
            TimeRange {
                started_at: 100,
                ended_at: 200,
            },
        )
    }

    fn query<T: Send + 'static>(
        client: &EventClient,
        f: impl FnOnce(&mut Transport) -> T + Send + 'static,
    ) -> T {
        let (tx, rx) = unbounded();
        client.queue.call(move |t: &mut Transport| {
            let _ = tx.send(f(t));
        });
        rx.recv_timeout(WAIT).unwrap()
    }

    /// Espera a conexão inicial agendada por `spawn_transport`.
    fn wait_connected(client: &EventClient) {
        let deadline = std::time::Instant::now() + WAIT;
        while !query(client, |t| t.connected()) {
            assert!(std::time::Instant::now() < deadline, "socket não conectou");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn scripted(
        script: Script,
    ) -> (Arc<Mutex<Script>>, Box<dyn Connector>, Receiver<Vec<u8>>) {
        let script = Arc::new(Mutex::new(script));
        let (tx, rx) = unbounded();
        let connector = ScriptedConnector {
            script: script.clone(),
            done: tx,
        };
        (script, Box::new(connector), rx)
    }

    #[test]
    fn send_retries_until_delivery() {
        let (script, connector, delivered) = scripted(Script {
            failing_writes: 2,
            ..Default::default()
        });
        let (link, _supervisor) = up_link();
        let (client, thread) = spawn_transport(settings(false), connector, link).unwrap();
        wait_connected(&client);

        let (kind, range) = position();
        client.send(kind, range);

        let bytes = delivered.recv_timeout(WAIT).unwrap();
        client.shutdown();
        let transport = thread.join().unwrap();

        let expected = Frame::encode(&kind, &range, 0xDEADBEEF);
        assert_eq!(bytes, expected.as_bytes());

        let stats = transport.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.reconnects, 2);
        // conexão inicial + 2 reconexões
        assert_eq!(stats.connect_loops, 3);

        let script = script.lock().unwrap();
        assert_eq!(script.delivered.len(), 1);
        assert_eq!(script.connects, 3);
    }

    #[test]
    fn send_before_link_is_up_waits_for_connection() {
        let (_script, connector, delivered) = scripted(Script::default());
        let queue = EventQueue::<Supervisor>::new("test-supervisor");
        let link = Connectivity::new(queue.handle(), 3);
        let (client, thread) =
            spawn_transport(settings(false), connector, link.clone()).unwrap();

        let (kind, range) = position();
        client.send(kind, range);
        assert!(delivered.recv_timeout(Duration::from_millis(30)).is_err());

        link.set_connected(true);
        let bytes = delivered.recv_timeout(WAIT).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap().kind, kind);

        client.shutdown();
        assert_eq!(thread.join().unwrap().stats().sent, 1);
    }

    #[test]
    fn rejected_ack_is_retried() {
        let (script, connector, delivered) = scripted(Script {
            ack: Some(0x00),
            ..Default::default()
        });
        let (link, _supervisor) = up_link();
        let (client, thread) =
            spawn_transport(settings(true), connector, link.clone()).unwrap();
        wait_connected(&client);

        let (kind, range) = position();
        client.send(kind, range);
        delivered.recv_timeout(WAIT).unwrap();

        // Servidor passa a aceitar
        script.lock().unwrap().ack = Some(RESPONSE_OK);
        delivered.recv_timeout(WAIT).unwrap();

        // Espera o ack ser processado antes de parar a fila
        let deadline = std::time::Instant::now() + WAIT;
        loop {
            let stats = query(&client, |t| t.stats());
            if stats.sent == 1 {
                assert!(stats.failed >= 1);
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
            assert!(std::time::Instant::now() < deadline);
        }

        // Cada ack 0x00 conta como resposta inválida no orçamento
        assert!(link.fault_count(&NetError::invalid_response()) >= 1);
        assert_eq!(NetError::invalid_response(), NetError::Unknown(-1));

        client.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn connection_errors_are_reported_to_supervisor() {
        struct Refusing(u32);

        impl Connector for Refusing {
            fn connect(&mut self) -> Result<Box<dyn Stream>, NetError> {
                self.0 += 1;
                if self.0 <= 2 {
                    Err(NetError::ConnectionTimeout)
                } else {
                    Ok(Box::new(io::Cursor::new(Vec::new())))
                }
            }
        }

        let (link, _supervisor) = up_link();
        let (client, thread) =
            spawn_transport(settings(false), Box::new(Refusing(0)), link.clone()).unwrap();

        wait_connected(&client);
        assert_eq!(link.fault_count(&NetError::ConnectionTimeout), 2);

        client.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn delivers_to_real_server_with_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 40];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&[RESPONSE_OK]).unwrap();
            buf
        });

        let (link, _supervisor) = up_link();
        let connector = Box::new(TcpConnector::new(addr.to_string(), WAIT));
        let (client, thread) = spawn_transport(settings(true), connector, link).unwrap();
        wait_connected(&client);

        let (kind, range) = position();
        client.send(kind, range);
        let received = server.join().unwrap();
        let event = decode_frame(&received).unwrap();
        assert_eq!(event.kind, kind);
        assert_eq!(event.secret, 0xDEADBEEF);

        client.shutdown();
        thread.join().unwrap();
    }
}
