//! Noise gate – filtro de histerese sobre um stream escalar.
//!
//! Converte um sinal contínuo e ruidoso em intervalos limpos. Depois de uma
//! sequência acima do threshold, o gate passa por um período de graça
//! (`Closing`) antes de fechar, então uma leitura baixa isolada não
//! fragmenta um evento físico em vários.
//!
//! O gate não sabe o que fazer com as amostras: ele apenas chama o [`Sink`].

/// Consumidor das amostras enquanto o gate está aberto.
pub trait Sink<T> {
    /// Chamado para cada amostra com o gate aberto (inclusive em `Closing`).
    fn record(&mut self, value: T);

    /// Chamado uma única vez quando o gate fecha.
    fn end_of_record(&mut self);
}

/// Comparação de uma amostra com o threshold do gate.
///
/// Permite que amostras vetoriais sejam comparadas por uma norma contra um
/// threshold escalar.
pub trait Exceeds<Th> {
    fn exceeds(&self, threshold: &Th) -> bool;
}

impl<T: PartialOrd> Exceeds<T> for T {
    fn exceeds(&self, threshold: &T) -> bool {
        self > threshold
    }
}

/// Estado do gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Opened,
    Closing { remaining: u16 },
}

impl GateState {
    pub fn is_open(&self) -> bool {
        !matches!(self, GateState::Closed)
    }
}

/// Noise gate genérico.
#[derive(Debug, Clone)]
pub struct NoiseGate<Th> {
    threshold: Th,
    release_count: u16,
    state: GateState,
}

impl<Th> NoiseGate<Th> {
    pub fn new(threshold: Th, release_count: u16) -> Self {
        Self {
            threshold,
            release_count,
            state: GateState::Closed,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn threshold(&self) -> &Th {
        &self.threshold
    }

    pub fn release_count(&self) -> u16 {
        self.release_count
    }

    /// Processa uma amostra e notifica o sink.
    pub fn process<T, S>(&mut self, value: T, sink: &mut S)
    where
        T: Exceeds<Th>,
        S: Sink<T>,
    {
        let was_open = self.is_open();

        self.state = self.next_state(value.exceeds(&self.threshold));

        if self.is_open() {
            sink.record(value);
        } else if was_open {
            sink.end_of_record();
        }
    }

    fn next_state(&self, over: bool) -> GateState {
        match self.state {
            GateState::Closed if over => GateState::Opened,
            GateState::Closed => GateState::Closed,
            GateState::Opened if over => GateState::Opened,
            GateState::Opened => GateState::Closing {
                remaining: self.release_count,
            },
            GateState::Closing { .. } if over => GateState::Opened,
            GateState::Closing { remaining: 0 } => GateState::Closed,
            GateState::Closing { remaining } => GateState::Closing {
                remaining: remaining - 1,
            },
        }
    }
}
