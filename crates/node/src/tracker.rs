//! Sampler do acelerômetro e montagem dos eventos de posição.
//!
//! A cada tick o tracker lê os 3 eixos, integra o deslocamento desde o tick
//! anterior e passa o vetor pelo [`NoiseGate`]. Enquanto o gate está aberto o
//! [`EventRecorder`] acumula o deslocamento; quando fecha, um único evento
//! `Position` é publicado no transporte.

use crate::clock::Clock;
use crate::queue::{EventQueue, QueueHandle};
use crate::sensor::Accelerometer;
use crate::transport::EventPublisher;
use bug_core::config::{DISPLACEMENT_SCALE, NodeConfig};
use bug_core::noise_gate::{Exceeds, NoiseGate, Sink};
use bug_core::types::{BugEventKind, Position, TimeRange, Timestamp, XYZ};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Maior intervalo integrado de uma vez. Gaps maiores são truncados.
pub const MAX_DT: Duration = Duration::from_secs(60);

/// `4 * µs²/s²` na escala de [`DISPLACEMENT_SCALE`].
const DIVISOR: i128 = 4 * 1_000_000_000_000 / DISPLACEMENT_SCALE as i128;

/// Deslocamento integrado num intervalo de amostragem, por eixo, em
/// mg·s² / [`DISPLACEMENT_SCALE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Displacement(pub [i64; 3]);

impl Displacement {
    /// Integração trapezoidal: `(a_prev + a_curr) * dt² / 4`.
    ///
    /// `dt` vem de um relógio monotônico e é limitado a [`MAX_DT`].
    pub fn integrate(prev: [i16; 3], curr: [i16; 3], bias: [i16; 3], dt: Duration) -> Self {
        let dt_us = dt.min(MAX_DT).as_micros() as i128;
        let axis = |i: usize| {
            let a1 = i128::from(prev[i]) - i128::from(bias[i]);
            let a2 = i128::from(curr[i]) - i128::from(bias[i]);
            let d = (a1 + a2) * dt_us * dt_us / DIVISOR;
            i64::try_from(d).unwrap_or(if d < 0 { i64::MIN } else { i64::MAX })
        };
        Self([axis(0), axis(1), axis(2)])
    }

    /// Norma euclidiana.
    pub fn norm(&self) -> f64 {
        let [x, y, z] = self.0.map(|v| v as f64);
        (x * x + y * y + z * z).sqrt()
    }

    /// Representação de fio: cada eixo truncado para 32 bits em complemento de dois.
    pub fn to_xyz(self) -> XYZ {
        let [x, y, z] = self.0;
        XYZ::new(x as u32, y as u32, z as u32)
    }
}

impl Exceeds<f64> for Displacement {
    fn exceeds(&self, threshold: &f64) -> bool {
        self.norm() > *threshold
    }
}

/// Acumula um evento de posição por intervalo de gate aberto.
pub struct EventRecorder<P> {
    publisher: P,
    sample_ts: Timestamp,
    time_range: TimeRange,
    position: Option<Position>,
    published: u64,
}

impl<P: EventPublisher> EventRecorder<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            sample_ts: 0,
            time_range: TimeRange::default(),
            position: None,
            published: 0,
        }
    }

    /// Timestamp da amostra sendo processada.
    pub fn set_sample_ts(&mut self, ts: Timestamp) {
        self.sample_ts = ts;
    }

    pub fn is_recording(&self) -> bool {
        self.position.is_some()
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

impl<P: EventPublisher> Sink<Displacement> for EventRecorder<P> {
    fn record(&mut self, value: Displacement) {
        let d = value.to_xyz();
        let sample_ts = self.sample_ts;
        let time_range = &mut self.time_range;
        let position = self.position.get_or_insert_with(|| {
            time_range.started_at = sample_ts;
            Position {
                from: d,
                to: XYZ::ZERO,
            }
        });
        position.to = position.to.wrapping_add(d);
    }

    fn end_of_record(&mut self) {
        let Some(position) = self.position.take() else {
            error!("end_of_record sem evento aberto, descartando");
            return;
        };

        self.time_range.ended_at = self.sample_ts;
        info!(
            "Evento de posição: {:?} → {:?} ({}s)",
            position.from.signed(),
            position.to.signed(),
            self.time_range.duration_secs()
        );
        self.publisher
            .publish(BugEventKind::Position(position), self.time_range);
        self.published += 1;
        self.time_range = TimeRange::default();
    }
}

/// Parâmetros do sampler.
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub sample_interval: Duration,
    pub threshold: f64,
    pub release_count: u16,
}

impl TrackerSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            sample_interval: config.sample_interval(),
            threshold: config.noise_gate_threshold,
            release_count: config.release_count(),
        }
    }
}

/// Estado do sampler, possuído pela thread da fila.
pub struct PositionTracker<P> {
    accelerometer: Box<dyn Accelerometer>,
    clock: Arc<dyn Clock>,
    gate: NoiseGate<f64>,
    recorder: EventRecorder<P>,
    bias: [i16; 3],
    acc: [i16; 3],
    /// Instante do último tick; o RTC só carimba o `TimeRange`.
    last_tick: Option<Instant>,
}

impl<P: EventPublisher> PositionTracker<P> {
    pub fn new(
        settings: &TrackerSettings,
        accelerometer: Box<dyn Accelerometer>,
        clock: Arc<dyn Clock>,
        publisher: P,
    ) -> Self {
        Self {
            accelerometer,
            clock,
            gate: NoiseGate::new(settings.threshold, settings.release_count),
            recorder: EventRecorder::new(publisher),
            bias: [0; 3],
            acc: [0; 3],
            last_tick: None,
        }
    }

    /// Inicializa o sensor e captura o bias de repouso.
    pub fn init(&mut self) {
        if let Err(e) = self.accelerometer.init() {
            error!("Falha ao inicializar acelerômetro: {e}");
        }

        match self.accelerometer.read_xyz() {
            Ok(bias) => {
                self.bias = bias;
                self.acc = bias;
            }
            Err(e) => error!("Falha ao ler bias do acelerômetro: {e}"),
        }

        self.last_tick = Some(Instant::now());
        self.recorder.set_sample_ts(self.clock.now());
        debug!("Bias do acelerômetro: {:?}", self.bias);
    }

    /// Tick periódico: lê, integra e alimenta o gate.
    pub fn update_state(&mut self) {
        self.sample_at(Instant::now());
    }

    /// Tick com o instante monotônico explícito.
    pub fn sample_at(&mut self, now: Instant) {
        let prev = self.acc;
        match self.accelerometer.read_xyz() {
            Ok(acc) => self.acc = acc,
            Err(e) => {
                error!("Falha ao ler acelerômetro: {e}");
                return;
            }
        }
        trace!(
            "acc: {{x: {}, y: {}, z: {}}}",
            self.acc[0], self.acc[1], self.acc[2]
        );

        let dt = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);
        if dt > MAX_DT {
            warn!("Intervalo entre amostras de {dt:?}, integrando só {MAX_DT:?}");
        }

        let displacement = Displacement::integrate(prev, self.acc, self.bias, dt);
        self.ingest(self.clock.now(), displacement);
    }

    /// Passa um deslocamento já integrado pelo gate.
    pub fn ingest(&mut self, ts: Timestamp, displacement: Displacement) {
        self.recorder.set_sample_ts(ts);
        self.gate.process(displacement, &mut self.recorder);
    }

    pub fn gate(&self) -> &NoiseGate<f64> {
        &self.gate
    }

    pub fn recorder(&self) -> &EventRecorder<P> {
        &self.recorder
    }
}

/// Inicia a thread do sampler com o tick periódico.
pub fn spawn_tracker<P: EventPublisher>(
    settings: TrackerSettings,
    accelerometer: Box<dyn Accelerometer>,
    clock: Arc<dyn Clock>,
    publisher: P,
) -> std::io::Result<(QueueHandle<PositionTracker<P>>, JoinHandle<PositionTracker<P>>)> {
    let queue = EventQueue::new("tracker");
    let handle = queue.handle();
    let tracker = PositionTracker::new(&settings, accelerometer, clock, publisher);

    handle.call(PositionTracker::init);
    handle.call_every(settings.sample_interval, PositionTracker::update_state);
    let thread = queue.spawn(tracker)?;

    Ok((handle, thread))
}
