//! Configuração unificada via TOML.
//!
//! Os valores padrão são as constantes de build do device. Um `config.toml`
//! opcional ao lado do executável pode sobrescrevê-los no boot; não há
//! reconfiguração em tempo de execução.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_WIFI_SSID: &str = "bug-ap";
pub const DEFAULT_WIFI_PASSWORD: &str = "bug-password";
pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 3002;
pub const DEFAULT_SECRET: u32 = 12345678;
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 3_000;

/// Ponto fixo do deslocamento: 1 unidade = 1/1000 mg·s².
pub const DISPLACEMENT_SCALE: i64 = 1_000;

/// 10 mg·s², na escala de [`DISPLACEMENT_SCALE`].
pub const DEFAULT_NOISE_GATE_THRESHOLD: f64 = 10.0 * DISPLACEMENT_SCALE as f64;
pub const DEFAULT_NOISE_GATE_RELEASE_MS: u64 = 500;
pub const DEFAULT_CONNECT_BACKOFF_MS: u64 = 3_000;
pub const DEFAULT_RADIO_RESET_POLL_MS: u64 = 1_000;
pub const DEFAULT_FAULT_THRESHOLD: u32 = 3;
pub const DEFAULT_TIME_SERVER: &str = "pool.ntp.org:123";

/// Erros de configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuração do Node (device sensor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// SSID da rede WiFi
    pub wifi_ssid: String,
    /// Senha da rede WiFi
    pub wifi_password: String,
    /// IP do servidor de eventos
    pub server_ip: String,
    /// Porta TCP do servidor de eventos
    pub server_port: u16,
    /// Secret compartilhado gravado em cada frame
    pub secret: u32,
    /// Timeout de leitura/escrita do socket (ms)
    pub socket_timeout_ms: u64,
    /// Período de amostragem do acelerômetro (ms)
    pub sample_interval_ms: u64,
    /// Threshold do noise gate (norma do deslocamento, em mg·s² / 1000)
    pub noise_gate_threshold: f64,
    /// Duração do período de graça do noise gate (ms)
    pub noise_gate_release_ms: u64,
    /// Espera entre tentativas de conexão (ms)
    pub connect_backoff_ms: u64,
    /// Intervalo entre tentativas de reset do rádio (ms)
    pub radio_reset_poll_ms: u64,
    /// Ocorrências de erro de dispositivo antes de forçar reset do rádio
    pub fault_threshold: u32,
    /// Espera o byte de confirmação do servidor após cada frame
    pub expect_ack: bool,
    /// Servidor SNTP (host:porta)
    pub time_server: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: DEFAULT_WIFI_SSID.into(),
            wifi_password: DEFAULT_WIFI_PASSWORD.into(),
            server_ip: DEFAULT_SERVER_IP.into(),
            server_port: DEFAULT_SERVER_PORT,
            secret: DEFAULT_SECRET,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            noise_gate_threshold: DEFAULT_NOISE_GATE_THRESHOLD,
            noise_gate_release_ms: DEFAULT_NOISE_GATE_RELEASE_MS,
            connect_backoff_ms: DEFAULT_CONNECT_BACKOFF_MS,
            radio_reset_poll_ms: DEFAULT_RADIO_RESET_POLL_MS,
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
            expect_ack: true,
            time_server: DEFAULT_TIME_SERVER.into(),
        }
    }
}

impl NodeConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn radio_reset_poll(&self) -> Duration {
        Duration::from_millis(self.radio_reset_poll_ms)
    }

    /// Amostras baixas toleradas em `Closing` antes de fechar o gate.
    ///
    /// `release_ms / sample_interval_ms`, truncado; 0 quando o período de
    /// graça é menor que um ciclo de amostragem.
    pub fn release_count(&self) -> u16 {
        if self.sample_interval_ms == 0 {
            return 0;
        }
        let count = self.noise_gate_release_ms / self.sample_interval_ms;
        u16::try_from(count).unwrap_or(u16::MAX)
    }
}

/// Configuração do Server (decoder remoto).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP local para bind
    pub bind_ip: String,
    /// Porta TCP para escutar
    pub port: u16,
    /// Secret esperado nos frames
    pub secret: u32,
    /// Timeout de leitura por conexão (segundos, 0 = sem timeout)
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            port: DEFAULT_SERVER_PORT,
            secret: DEFAULT_SECRET,
            read_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }
}

/// Configuração raiz do aplicativo (unifica node e server).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    ///
    /// Qualquer falha cai nos valores de build.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let node = &self.node;

        if node.wifi_ssid.is_empty() {
            errors.push("SSID do WiFi não pode ser vazio".into());
        }
        if node.server_port == 0 {
            errors.push("Porta do servidor não pode ser 0".into());
        }
        if node.sample_interval_ms < 10 || node.sample_interval_ms > 60_000 {
            errors.push(format!(
                "Intervalo de amostragem inválido: {} ms (10–60000)",
                node.sample_interval_ms
            ));
        }
        if !(node.noise_gate_threshold.is_finite() && node.noise_gate_threshold >= 0.0) {
            errors.push(format!(
                "Threshold do noise gate inválido: {}",
                node.noise_gate_threshold
            ));
        }
        if node.fault_threshold == 0 {
            errors.push("Threshold de falhas não pode ser 0".into());
        }
        if self.server.port == 0 {
            errors.push("Porta do server não pode ser 0".into());
        }
        if self.server.secret != node.secret {
            errors.push("Secret do server difere do secret do node".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.node.server_port, parsed.node.server_port);
        assert_eq!(config.node.secret, parsed.node.secret);
        assert_eq!(config.server.bind_ip, parsed.server.bind_ip);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[node]
server_port = 9999
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.node.server_port, 9999);
        // Outros campos devem ter valor padrão
        assert_eq!(config.node.sample_interval_ms, DEFAULT_SAMPLE_INTERVAL_MS);
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn default_threshold_is_ten_mg_s2_in_fixed_point() {
        assert_eq!(DISPLACEMENT_SCALE, 1_000);
        assert_eq!(NodeConfig::default().noise_gate_threshold, 10_000.0);
    }

    #[test]
    fn release_count_from_durations() {
        let mut node = NodeConfig::default();
        assert_eq!(node.release_count(), 0);

        node.sample_interval_ms = 30;
        node.noise_gate_release_ms = 500;
        assert_eq!(node.release_count(), 16);

        node.sample_interval_ms = 0;
        assert_eq!(node.release_count(), 0);
    }

    #[test]
    fn validate_reports_problems() {
        let mut config = AppConfig::default();
        config.node.fault_threshold = 0;
        config.node.sample_interval_ms = 1;
        config.server.secret = 1;
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "Erros: {:?}", errors);
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("bug-config-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.node.secret = 0xDEADBEEF;
        config.server.secret = 0xDEADBEEF;
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.node.secret, 0xDEADBEEF);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loaded = AppConfig::load(Path::new("/nonexistent/bug/config.toml"));
        assert_eq!(loaded.node.server_port, DEFAULT_SERVER_PORT);
    }
}
