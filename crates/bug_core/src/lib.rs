//! # Bug Core
//!
//! Crate compartilhada entre o node (device sensor) e o server: tipos de
//! evento, codec binário do frame, noise gate e configuração TOML.
//!
//! ## Módulos
//! - [`types`] – TimeRange, XYZ, Position, Luminosity, BugEventKind
//! - [`protocol`] – Encode/decode do frame de words little-endian
//! - [`noise_gate`] – Filtro de histerese genérico com [`noise_gate::Sink`]
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod noise_gate;
pub mod config;

// Re-exports convenientes
pub use types::{BugEvent, BugEventKind, Luminosity, Position, TimeRange, Timestamp, XYZ};
pub use protocol::{Frame, MAX_FRAME_LEN, decode_frame, encode_event};
pub use noise_gate::{NoiseGate, Sink};
pub use config::{AppConfig, NodeConfig, ServerConfig};
