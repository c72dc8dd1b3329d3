//! # Bug Server
//!
//! Recebe frames de evento dos nodes via TCP, confere o segredo
//! compartilhado, responde com o byte de ack e mantém um ledger dos eventos.
//!
//! ## Uso
//! ```bash
//! bug_server                 # config.toml ao lado do executável
//! RUST_LOG=debug bug_server  # log de cada frame
//! ```

mod ledger;
mod net_thread;

use bug_core::config::AppConfig;
use ledger::Ledger;
use net_thread::{ConnectionSettings, spawn_server_thread};
use std::time::Duration;
use tracing::{info, warn};

fn main() -> std::io::Result<()> {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    let server = &config.server;
    let settings = ConnectionSettings {
        secret: server.secret,
        read_timeout: (server.read_timeout_secs > 0)
            .then(|| Duration::from_secs(server.read_timeout_secs)),
    };

    let (rx, addr) = spawn_server_thread(&server.bind_addr(), settings)?;

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🐞 BUG SERVER – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Escutando: {addr}");
    println!("  Timeout:   {} s", server.read_timeout_secs);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Ledger ──
    let mut ledger = Ledger::new();
    for msg in rx.iter() {
        ledger.record(msg);
        if ledger.total() % 100 == 0 {
            let last_source = ledger.last().map(|(source, _)| source.as_str()).unwrap_or("-");
            info!(
                "{} eventos ({} position, {} luminosity, {} bytes), último de {}",
                ledger.total(),
                ledger.count("position"),
                ledger.count("luminosity"),
                ledger.bytes(),
                last_source
            );
        }
    }

    Ok(())
}
