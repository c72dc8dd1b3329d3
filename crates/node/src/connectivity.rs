//! Supervisor de conectividade – dono do rádio e do orçamento de falhas.
//!
//! Roda na sua própria [`EventQueue`]. O ciclo de conexão é:
//! desconectar → resetar o rádio (até o reset funcionar) → join → SNTP.
//! Qualquer falha reporta o código e reagenda o ciclo inteiro após o backoff.
//!
//! Outros componentes usam o handle [`Connectivity`]: `report_error` é
//! seguro de qualquer thread (só toca no slot atômico do código) e, quando um
//! erro de dispositivo recorre além do threshold, agenda um reset completo.

use crate::clock::Clock;
use crate::fault::{ErrorClass, FaultBudget, NetError, log_net_error};
use crate::queue::{EventQueue, QueueHandle};
use crate::radio::Radio;
use crate::sntp::TimeService;
use bug_core::config::NodeConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parâmetros do ciclo de conexão.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub ssid: String,
    pub password: String,
    pub backoff: Duration,
    pub reset_poll: Duration,
    pub fault_threshold: u32,
}

impl LinkSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            ssid: config.wifi_ssid.clone(),
            password: config.wifi_password.clone(),
            backoff: config.connect_backoff(),
            reset_poll: config.radio_reset_poll(),
            fault_threshold: config.fault_threshold,
        }
    }
}

struct Shared {
    budget: FaultBudget,
    connected: AtomicBool,
    escalations: AtomicU64,
}

/// Handle clonável para o supervisor.
#[derive(Clone)]
pub struct Connectivity {
    shared: Arc<Shared>,
    queue: QueueHandle<Supervisor>,
}

impl Connectivity {
    pub fn new(queue: QueueHandle<Supervisor>, fault_threshold: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                budget: FaultBudget::new(fault_threshold),
                connected: AtomicBool::new(false),
                escalations: AtomicU64::new(0),
            }),
            queue,
        }
    }

    /// Agenda um ciclo de conexão completo.
    pub fn connect(&self) {
        self.queue.call(Supervisor::connect);
    }

    /// Link associado e com horário sincronizado.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Reporta uma falha de rede. Pode ser chamado de qualquer thread.
    pub fn report_error(&self, err: NetError) {
        if self.record(&err) {
            self.connect();
        }
    }

    /// Conta a falha no orçamento. Retorna `true` se ela escalou para reset.
    fn record(&self, err: &NetError) -> bool {
        if err.class() == ErrorClass::Configuration {
            // Não se resolve sozinho; retentado como transiente mesmo assim
            warn!("Erro de configuração [{}]: {err}", err.code());
        }

        if !self.shared.budget.report(err) {
            return false;
        }

        warn!(
            "Erro de dispositivo recorrente (> {}x), forçando reset do rádio",
            self.shared.budget.threshold()
        );
        self.shared.escalations.fetch_add(1, Ordering::Relaxed);
        self.shared.connected.store(false, Ordering::Release);
        true
    }

    /// Falhas de `err` ainda no orçamento.
    pub fn fault_count(&self, err: &NetError) -> u32 {
        self.shared.budget.count(err)
    }

    /// Resets forçados pelo orçamento de falhas até agora.
    pub fn escalations(&self) -> u64 {
        self.shared.escalations.load(Ordering::Relaxed)
    }

    /// Para a fila do supervisor depois do trabalho pendente.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::Release);
    }
}

/// Estado do supervisor, possuído pela thread da fila.
pub struct Supervisor {
    radio: Box<dyn Radio>,
    time: Box<dyn TimeService>,
    clock: Arc<dyn Clock>,
    settings: LinkSettings,
    link: Connectivity,
    /// Número do ciclo corrente; retentativas de ciclos anteriores são descartadas.
    attempts: u64,
}

impl Supervisor {
    pub fn new(
        settings: LinkSettings,
        radio: Box<dyn Radio>,
        time: Box<dyn TimeService>,
        clock: Arc<dyn Clock>,
        link: Connectivity,
    ) -> Self {
        Self {
            radio,
            time,
            clock,
            settings,
            link,
            attempts: 0,
        }
    }

    #[cfg(test)]
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Um ciclo de conexão completo.
    pub fn connect(&mut self) {
        self.attempts += 1;
        self.link.set_connected(false);
        debug!("Ciclo de conexão #{}", self.attempts);

        if let Err(e) = self.radio.disconnect() {
            debug!("Disconnect falhou ({e}), seguindo com reset");
        }

        while let Err(e) = self.radio.reset() {
            warn!("Falha ao resetar o rádio: [{}] {e}", e.code());
            std::thread::sleep(self.settings.reset_poll);
        }
        debug!("Rádio resetado");

        let info = match self.radio.join(&self.settings.ssid, &self.settings.password) {
            Ok(info) => info,
            Err(e) => {
                log_net_error(&e, "Falha ao conectar ao access point");
                self.link.record(&e);
                self.schedule_retry();
                return;
            }
        };
        info!(
            "Conectado ao access point | mac: {} | ip: {} | netmask: {} | gateway: {} | rssi: {}",
            info.mac, info.ip, info.netmask, info.gateway, info.rssi
        );

        match self.time.sync() {
            Ok(ts) => {
                self.clock.set(ts);
                info!("Horário sincronizado: {ts}");
            }
            Err(e) => {
                log_net_error(&e, "Falha ao sincronizar horário");
                self.link.record(&e);
                self.schedule_retry();
                return;
            }
        }

        self.link.set_connected(true);
        info!("Link pronto");
    }

    fn schedule_retry(&mut self) {
        let cycle = self.attempts;
        debug!("Nova tentativa do ciclo #{cycle} em {:?}", self.settings.backoff);
        self.link
            .queue
            .call_in(self.settings.backoff, move |supervisor: &mut Supervisor| {
                supervisor.retry(cycle)
            });
    }

    fn retry(&mut self, cycle: u64) {
        if cycle != self.attempts {
            debug!(
                "Retentativa do ciclo #{cycle} descartada, ciclo #{} já rodou",
                self.attempts
            );
            return;
        }
        self.connect();
    }
}

/// Inicia a thread do supervisor. A primeira conexão deve ser pedida via
/// [`Connectivity::connect`].
pub fn spawn_supervisor(
    settings: LinkSettings,
    radio: Box<dyn Radio>,
    time: Box<dyn TimeService>,
    clock: Arc<dyn Clock>,
) -> std::io::Result<(Connectivity, JoinHandle<Supervisor>)> {
    let queue = EventQueue::new("connectivity");
    let link = Connectivity::new(queue.handle(), settings.fault_threshold);
    let supervisor = Supervisor::new(settings, radio, time, clock, link.clone());
    let thread = queue.spawn(supervisor)?;
    Ok((link, thread))
}
