//! Dominio del monitor en vivo: estados, eventos internos, errores y temporizador
//! de reconexión.


use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use crate::system::domain::System;
use crate::system::domain::monitor::{CORRELATION_CAPACITY, RECONNECT_DELAY_SECS};


/// Estado de la conexión con el feed de la estación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}


/// Fallos de transporte informados a los suscriptores de errores.
///
/// Nunca se propagan fuera de la API pública del monitor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("no se pudo conectar a {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("error en el stream del feed: {0}")]
    Transport(String),

    #[error("el feed cerró la conexión{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),
}


/// Parámetros de un monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    pub correlate_responses: bool,
}


impl MonitorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            correlate_responses: false,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_correlation(mut self, enabled: bool) -> Self {
        self.correlate_responses = enabled;
        self
    }
}


impl From<&System> for MonitorConfig {
    fn from(system: &System) -> Self {
        MonitorConfig::new(system.feed_url.clone())
            .with_reconnect_delay(system.reconnect_delay())
            .with_correlation(system.correlate_responses)
    }
}


/// Confirmación de que el transporte terminó de cerrarse.
pub type CloseAck = oneshot::Sender<()>;


/// Comandos del operador hacia el actor de conexión.
#[derive(Debug)]
pub enum Command {
    Connect,
    /// Con `Some(ack)` el actor avisa cuando el websocket envió su frame de cierre.
    Disconnect(Option<CloseAck>),
    /// Notifica el buffer vigente tras un `clear_messages`.
    Clear,
}


/// Eventos internos que recibe el actor de conexión.
///
/// Los eventos de transporte llevan la generación de la conexión que los produjo;
/// el actor descarta los de generaciones anteriores.
#[derive(Debug)]
pub enum Event {
    Opened(u64),
    Frame(u64, String),
    Failed(u64, MonitorError),
    Closed(u64, MonitorError),
    /// Disparo del temporizador de reconexión con su identificador.
    ReconnectDue(u64),
}


/// Temporizador de reconexión cancelable.
///
/// Guarda un único handle: programar un disparo aborta el anterior, así que nunca
/// hay más de un temporizador pendiente. Cada disparo lleva un identificador y
/// `take_if_current` permite descartar uno que ya estaba en el canal al cancelarse.
#[derive(Debug)]
pub struct ReconnectTimer {
    tx: mpsc::UnboundedSender<Event>,
    handle: Option<JoinHandle<()>>,
    current: u64,
}


impl ReconnectTimer {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx, handle: None, current: 0 }
    }

    /// Programa un disparo tras `delay`, reemplazando cualquier disparo pendiente.
    pub fn schedule(&mut self, delay: Duration) -> u64 {
        self.cancel();
        self.current += 1;
        let id = self.current;
        let tx = self.tx.clone();
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Event::ReconnectDue(id));
        }));
        id
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Consume el disparo `id` si corresponde al temporizador vigente.
    pub fn take_if_current(&mut self, id: u64) -> bool {
        if self.handle.is_some() && id == self.current {
            self.handle = None;
            true
        } else {
            false
        }
    }
}


impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}


/// Tabla acotada `uniqueId → acción` para completar la acción de los `CallResult`.
#[derive(Debug)]
pub struct CorrelationTable {
    capacity: usize,
    actions: HashMap<String, String>,
    order: VecDeque<String>,
}


impl CorrelationTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            actions: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn remember(&mut self, unique_id: &str, action: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.actions.insert(unique_id.to_string(), action.to_string()).is_none() {
            self.order.push_back(unique_id.to_string());
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.actions.remove(&oldest);
            }
        }
    }

    /// Retira y devuelve la acción asociada; cada `Call` se responde una sola vez.
    pub fn resolve(&mut self, unique_id: &str) -> Option<String> {
        let action = self.actions.remove(unique_id)?;
        self.order.retain(|id| id != unique_id);
        Some(action)
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}


impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(CORRELATION_CAPACITY)
    }
}
