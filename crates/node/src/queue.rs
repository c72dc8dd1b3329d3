//! Fila de trabalho cooperativa de thread única.
//!
//! Cada componente do node (sampler, transporte, supervisor de conexão)
//! roda numa [`EventQueue`] própria: uma thread dedicada que possui o estado
//! do componente e executa os callbacks enfileirados um de cada vez, até o
//! fim, em ordem FIFO. Outras threads só interagem enfileirando closures
//! através de um [`QueueHandle`].

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::BTreeMap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Callback executado uma vez.
pub type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Callback periódico.
pub type Tick<S> = Box<dyn FnMut(&mut S) + Send + 'static>;

enum Command<S> {
    Call(Job<S>),
    CallIn(Duration, Job<S>),
    CallEvery(Duration, Tick<S>),
    Shutdown,
}

enum Timer<S> {
    Once(Job<S>),
    Every(Duration, Tick<S>),
}

/// Handle clonável para enfileirar trabalho numa [`EventQueue`].
pub struct QueueHandle<S> {
    tx: Sender<Command<S>>,
}

impl<S> Clone for QueueHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> QueueHandle<S> {
    /// Enfileira `f` para rodar assim que a fila estiver livre.
    pub fn call<F>(&self, f: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.submit(Command::Call(Box::new(f)));
    }

    /// Enfileira `f` para rodar depois de `delay`.
    pub fn call_in<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.submit(Command::CallIn(delay, Box::new(f)));
    }

    /// Agenda `f` a cada `period`, começando um período a partir de agora.
    pub fn call_every<F>(&self, period: Duration, f: F)
    where
        F: FnMut(&mut S) + Send + 'static,
    {
        self.submit(Command::CallEvery(period, Box::new(f)));
    }

    /// Pede para a fila parar depois do trabalho já enfileirado.
    pub fn shutdown(&self) {
        self.submit(Command::Shutdown);
    }

    fn submit(&self, command: Command<S>) {
        if self.tx.send(command).is_err() {
            debug!("Fila encerrada, descartando chamada");
        }
    }
}

/// Fila de eventos de thread única que possui um estado `S`.
pub struct EventQueue<S> {
    name: String,
    tx: Sender<Command<S>>,
    rx: Receiver<Command<S>>,
}

impl<S: Send + 'static> EventQueue<S> {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: name.into(),
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> QueueHandle<S> {
        QueueHandle {
            tx: self.tx.clone(),
        }
    }

    /// Inicia a thread da fila. O `JoinHandle` devolve o estado no shutdown.
    pub fn spawn(self, state: S) -> std::io::Result<JoinHandle<S>> {
        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || self.dispatch_forever(state))
    }

    /// Executa callbacks até receber shutdown ou até todos os handles caírem.
    pub fn dispatch_forever(self, mut state: S) -> S {
        let EventQueue { name, tx, rx } = self;
        drop(tx);

        let mut timers: BTreeMap<(Instant, u64), Timer<S>> = BTreeMap::new();
        let mut seq: u64 = 0;

        debug!("Fila {name} iniciada");

        loop {
            // Timers vencidos primeiro, por deadline e ordem de submissão
            while let Some((&(deadline, _), _)) = timers.first_key_value() {
                if deadline > Instant::now() {
                    break;
                }
                let Some((_, timer)) = timers.pop_first() else {
                    break;
                };
                match timer {
                    Timer::Once(job) => job(&mut state),
                    Timer::Every(period, mut tick) => {
                        tick(&mut state);
                        let next = (deadline + period).max(Instant::now());
                        seq += 1;
                        timers.insert((next, seq), Timer::Every(period, tick));
                    }
                }
            }

            let command = match timers.first_key_value() {
                Some((&(deadline, _), _)) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            seq += 1;
            match command {
                Command::Call(job) => job(&mut state),
                Command::CallIn(delay, job) => {
                    timers.insert((Instant::now() + delay, seq), Timer::Once(job));
                }
                Command::CallEvery(period, tick) => {
                    timers.insert((Instant::now() + period, seq), Timer::Every(period, tick));
                }
                Command::Shutdown => {
                    trace!("Fila {name} recebeu shutdown");
                    break;
                }
            }
        }

        debug!("Fila {name} encerrada");
        state
    }
}
