//! Acelerômetro de 3 eixos.

use tracing::trace;

/// Erros do sensor.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Acelerômetro não inicializado")]
    NotInitialized,
}

/// Interface do driver do acelerômetro.
pub trait Accelerometer: Send + 'static {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    /// Leitura bruta dos 3 eixos (mg).
    fn read_xyz(&mut self) -> Result<[i16; 3], SensorError>;
}

/// Acelerômetro simulado: repouso com jitter e rajadas periódicas de movimento.
#[derive(Debug, Clone)]
pub struct SimulatedAccelerometer {
    tick: u64,
    burst_every: u64,
    burst_len: u64,
    amplitude: i16,
    initialized: bool,
}

impl SimulatedAccelerometer {
    pub fn new(burst_every: u64, burst_len: u64, amplitude: i16) -> Self {
        Self {
            tick: 0,
            burst_every: burst_every.max(1),
            burst_len,
            amplitude,
            initialized: false,
        }
    }
}

impl Default for SimulatedAccelerometer {
    fn default() -> Self {
        Self::new(20, 4, 400)
    }
}

impl Accelerometer for SimulatedAccelerometer {
    fn init(&mut self) -> Result<(), SensorError> {
        self.initialized = true;
        Ok(())
    }

    fn read_xyz(&mut self) -> Result<[i16; 3], SensorError> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }

        let tick = self.tick;
        self.tick += 1;

        // Jitter determinístico de ±2 mg
        let jitter = (tick.wrapping_mul(7) % 5) as i16 - 2;
        let mut xyz = [jitter, -jitter, 1000 + jitter];

        let phase = tick % self.burst_every;
        if tick >= self.burst_every && phase < self.burst_len {
            let sign = if phase % 2 == 0 { 1 } else { -1 };
            xyz[0] = xyz[0].saturating_add(sign * self.amplitude);
            xyz[1] = xyz[1].saturating_add(self.amplitude / 2);
        }

        trace!("acc: {{x: {}, y: {}, z: {}}}", xyz[0], xyz[1], xyz[2]);
        Ok(xyz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_requires_init() {
        let mut acc = SimulatedAccelerometer::default();
        assert!(matches!(acc.read_xyz(), Err(SensorError::NotInitialized)));
        acc.init().unwrap();
        assert!(acc.read_xyz().is_ok());
    }

    #[test]
    fn bursts_follow_schedule() {
        let mut acc = SimulatedAccelerometer::new(5, 2, 400);
        acc.init().unwrap();
        let xs: Vec<i16> = (0..12).map(|_| acc.read_xyz().unwrap()[0]).collect();
        let loud: Vec<usize> = xs
            .iter()
            .enumerate()
            .filter(|(_, x)| x.abs() > 100)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(loud, vec![5, 6, 10, 11]);
    }
}
