//! # Bug Node
//!
//! Amostra o acelerômetro, filtra ruído com um noise gate e envia um evento
//! de posição por intervalo de movimento para o servidor via TCP.
//!
//! Três filas de thread única:
//! - `tracker`: tick periódico do sensor → noise gate → evento
//! - `transport`: socket TCP com reconexão e retry sem limite
//! - `connectivity`: reset do rádio, join, SNTP e orçamento de falhas
//!
//! ## Uso
//! ```bash
//! bug_node                 # config.toml ao lado do executável
//! RUST_LOG=debug bug_node  # log detalhado
//! ```

mod clock;
mod connectivity;
mod fault;
mod queue;
mod radio;
mod sensor;
mod sntp;
mod tracker;
mod transport;

use bug_core::config::AppConfig;
use clock::{Clock, RtcClock};
use connectivity::{LinkSettings, spawn_supervisor};
use fault::NetError;
use radio::HostRadio;
use sensor::SimulatedAccelerometer;
use sntp::SntpClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracker::{TrackerSettings, spawn_tracker};
use transport::{TcpConnector, TransportSettings, spawn_transport};

/// Intervalo do log de status do node.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> std::io::Result<()> {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    let node = &config.node;
    let server_addr = node.server_addr();

    // ── Relógio compartilhado ──
    let clock: Arc<dyn Clock> = Arc::new(RtcClock::from_system());

    // ── Supervisor de conectividade ──
    let (link, supervisor) = spawn_supervisor(
        LinkSettings::from_config(node),
        Box::new(HostRadio::new(server_addr.clone())),
        Box::new(SntpClient::new(
            node.time_server.clone(),
            node.socket_timeout(),
        )),
        clock.clone(),
    )?;
    link.connect();

    // ── Transporte ──
    let (client, transport) = spawn_transport(
        TransportSettings::from_config(node),
        Box::new(TcpConnector::new(server_addr.clone(), node.socket_timeout())),
        link.clone(),
    )?;

    // ── Sampler ──
    let (tracker_queue, tracker) = spawn_tracker(
        TrackerSettings::from_config(node),
        Box::new(SimulatedAccelerometer::default()),
        clock,
        client.clone(),
    )?;

    // ── Status periódico ──
    let status_link = link.clone();
    tracker_queue.call_every(STATUS_INTERVAL, move |tracker| {
        info!(
            "Status | link: {} | gate: {:?} | gravando: {} | eventos: {} | resets forçados: {} | erros de dispositivo: {}",
            if status_link.is_connected() { "up" } else { "down" },
            tracker.gate().state(),
            tracker.recorder().is_recording(),
            tracker.recorder().published(),
            status_link.escalations(),
            status_link.fault_count(&NetError::DeviceError)
        );
    });

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🐞 BUG NODE – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Servidor:   {server_addr}");
    println!("  SSID:       {}", node.wifi_ssid);
    println!("  Amostragem: {} ms", node.sample_interval_ms);
    println!(
        "  Gate:       threshold {} | release {} amostras",
        node.noise_gate_threshold,
        node.release_count()
    );
    println!("══════════════════════════════════════════════");
    println!();

    info!("Node iniciado");

    // As filas rodam para sempre; se o sampler cair, o resto para junto
    if tracker.join().is_err() {
        error!("Thread do sampler terminou com panic");
    }
    warn!("Sampler encerrado, parando transporte e supervisor");
    client.shutdown();
    link.shutdown();
    let _ = transport.join();
    let _ = supervisor.join();
    Ok(())
}
