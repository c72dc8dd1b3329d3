//! Threads de rede: aceita conexões TCP e envia eventos para o ledger via channel.
//!
//! Cada conexão roda na sua própria thread. O frame não tem prefixo de
//! tamanho: lê o header de 16 bytes, descobre o payload pelo discriminante e
//! só então lê o resto.

use bug_core::protocol::{
    HEADER_SIZE, MAX_FRAME_LEN, ProtocolError, RESPONSE_OK, RESPONSE_REJECTED, decode_frame,
    frame_len, peek_kind,
};
use bug_core::types::BugEvent;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Mensagem enviada da thread de rede para o ledger.
#[derive(Debug, Clone)]
pub struct NetMessage {
    pub event: BugEvent,
    pub source_addr: String,
    pub raw_size: usize,
}

/// Por que uma conexão foi encerrada.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("frame inválido: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("erro de I/O: {0}")]
    Io(#[from] io::Error),
}

/// Parâmetros de cada conexão.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub secret: u32,
    pub read_timeout: Option<Duration>,
}

/// Inicia a thread de accept. Retorna o receiver do channel e o endereço real.
pub fn spawn_server_thread(
    bind_addr: &str,
    settings: ConnectionSettings,
) -> io::Result<(Receiver<NetMessage>, SocketAddr)> {
    let listener = TcpListener::bind(bind_addr)?;
    let local_addr = listener.local_addr()?;
    let (tx, rx) = bounded::<NetMessage>(64); // Buffer de 64 mensagens

    std::thread::Builder::new()
        .name("tcp-accept".into())
        .spawn(move || accept_loop(&listener, &tx, settings))?;

    info!("Server escutando em {local_addr}");
    Ok((rx, local_addr))
}

fn accept_loop(listener: &TcpListener, tx: &Sender<NetMessage>, settings: ConnectionSettings) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Erro no accept: {e}");
                continue;
            }
        };

        let source = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        if let Err(e) = configure(&stream, &settings) {
            warn!("Falha ao configurar socket de {source}: {e}");
        }
        let tx = tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("conn-{source}"))
            .spawn(move || {
                info!("Conexão de {source}");
                match serve_connection(stream, &source, &tx, settings) {
                    Ok(count) => info!("{source} desconectou após {count} eventos"),
                    Err(e) => warn!("Encerrando conexão com {source}: {e}"),
                }
            });
        if let Err(e) = spawned {
            error!("Falha ao criar thread de conexão: {e}");
        }
    }
}

/// Atende uma conexão até EOF. Retorna o número de eventos aceitos.
pub fn serve_connection<S: Read + Write>(
    mut stream: S,
    source: &str,
    tx: &Sender<NetMessage>,
    settings: ConnectionSettings,
) -> Result<u64, ConnectionError> {
    let mut accepted = 0;

    while let Some((event, raw_size)) = read_frame(&mut stream)? {
        if event.secret != settings.secret {
            warn!(
                "Segredo inválido de {source} ({} {}), rejeitando",
                event.kind.name(),
                event.secret
            );
            stream.write_all(&[RESPONSE_REJECTED])?;
            continue;
        }

        debug!("Evento de {source}: {event:?}");
        stream.write_all(&[RESPONSE_OK])?;
        accepted += 1;

        let msg = NetMessage {
            event,
            source_addr: source.to_string(),
            raw_size,
        };
        if tx.send(msg).is_err() {
            debug!("Ledger encerrado, descartando evento");
        }
    }

    Ok(accepted)
}

/// Lê um frame completo. `None` em EOF limpo entre frames.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(BugEvent, usize)>, ConnectionError> {
    let mut buf = [0u8; MAX_FRAME_LEN];

    if !read_header(reader, &mut buf[..HEADER_SIZE])? {
        return Ok(None);
    }

    let kind = peek_kind(&buf[..HEADER_SIZE])?;
    let len = frame_len(kind).ok_or(ProtocolError::UnknownKind(kind))?;
    reader.read_exact(&mut buf[HEADER_SIZE..len])?;

    let event = decode_frame(&buf[..len])?;
    Ok(Some((event, len)))
}

/// Preenche o header; `false` se o peer fechou antes do primeiro byte.
fn read_header<R: Read>(reader: &mut R, header: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Aplica o timeout de leitura numa conexão aceita.
fn configure(stream: &TcpStream, settings: &ConnectionSettings) -> io::Result<()> {
    stream.set_read_timeout(settings.read_timeout)?;
    stream.set_nodelay(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bug_core::protocol::Frame;
    use bug_core::types::{BugEventKind, Luminosity, Position, TimeRange, XYZ};
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    const SECRET: u32 = 0xDEADBEEF;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            secret: SECRET,
            read_timeout: Some(Duration::from_secs(5)),
        }
    }

    fn range() -> TimeRange {
        TimeRange {
            started_at: 1_608_119_495,
            ended_at: 1_608_119_595,
        }
    }

    fn luminosity() -> BugEventKind {
        BugEventKind::Luminosity(Luminosity { from: 1, to: 2 })
    }

    fn position() -> BugEventKind {
        BugEventKind::Position(Position {
            from: XYZ::new(1, 2, 3),
            to: XYZ::new(4, 5, 6),
        })
    }

    /// Stream em memória: lê de `input`, acumula o que foi escrito.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(frames: &[Frame]) -> Self {
            let bytes = frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect();
            Self {
                input: Cursor::new(bytes),
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn reads_back_to_back_frames() {
        let frames = [
            Frame::encode(&luminosity(), &range(), SECRET),
            Frame::encode(&position(), &range(), SECRET),
        ];
        let mut reader = Cursor::new(
            frames
                .iter()
                .flat_map(|f| f.as_bytes().to_vec())
                .collect::<Vec<u8>>(),
        );

        let (first, len) = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!((first.kind, len), (luminosity(), 24));
        let (second, len) = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!((second.kind, len), (position(), 40));
        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn acks_valid_and_rejects_wrong_secret() {
        let mut stream = Duplex::new(&[
            Frame::encode(&position(), &range(), SECRET),
            Frame::encode(&position(), &range(), 42),
            Frame::encode(&luminosity(), &range(), SECRET),
        ]);
        let (tx, rx) = unbounded();

        let accepted = serve_connection(&mut stream, "test", &tx, settings()).unwrap();
        assert_eq!(accepted, 2);
        assert_eq!(stream.output, vec![RESPONSE_OK, RESPONSE_REJECTED, RESPONSE_OK]);

        let kinds: Vec<_> = rx.try_iter().map(|m| m.event.kind).collect();
        assert_eq!(kinds, vec![position(), luminosity()]);
    }

    #[test]
    fn unknown_kind_closes_connection() {
        let mut bytes = Frame::encode(&luminosity(), &range(), SECRET)
            .as_bytes()
            .to_vec();
        bytes[12] = 7;
        let mut stream = Duplex {
            input: Cursor::new(bytes),
            output: Vec::new(),
        };
        let (tx, rx) = unbounded();

        let err = serve_connection(&mut stream, "test", &tx, settings()).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Protocol(ProtocolError::UnknownKind(7))
        ));
        assert!(stream.output.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let bytes = Frame::encode(&position(), &range(), SECRET).as_bytes()[..30].to_vec();
        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ConnectionError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));

        let err = read_frame(&mut Cursor::new(vec![0u8; 5])).unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)));
    }

    #[test]
    fn serves_over_tcp() {
        let (rx, addr) = spawn_server_thread("127.0.0.1:0", settings()).unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
            .write_all(Frame::encode(&position(), &range(), SECRET).as_bytes())
            .unwrap();

        let mut ack = [0u8; 1];
        client.read_exact(&mut ack).unwrap();
        assert_eq!(ack[0], RESPONSE_OK);

        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.event.kind, position());
        assert_eq!(msg.event.time_range, range());
        assert_eq!(msg.raw_size, 40);
    }
}
