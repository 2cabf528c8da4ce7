//! Definición del Contexto de Aplicación (Shared State).
//!
//! Este módulo implementa el patrón de **Estado Compartido** para aplicaciones asíncronas.
//! El `AppContext` actúa como un contenedor de "Inyección de Dependencias" manual:
//! construye la única instancia del monitor en vivo y el motor de consultas, y los
//! entrega a todas las tareas que los necesiten.


use std::sync::Arc;
use std::time::Duration;
use crate::history::domain::QueryError;
use crate::history::logic::LogQueryEngine;
use crate::monitor::domain::MonitorConfig;
use crate::monitor::logic::LiveMonitor;
use crate::system::domain::System;
use crate::system::domain::monitor::SHUTDOWN_TIMEOUT_SECS;


#[derive(Clone, Debug)]
pub struct AppContext {
    pub system: Arc<System>,
    pub monitor: LiveMonitor,
    pub logs: LogQueryEngine,
}


impl AppContext {

    /// Construye los componentes a partir de la configuración.
    ///
    /// Debe llamarse dentro de un runtime de tokio: el monitor lanza su actor aquí.
    pub fn new(system: System) -> Result<Self, QueryError> {
        let logs = LogQueryEngine::from_system(&system)?;
        let monitor = LiveMonitor::new(MonitorConfig::from(&system));
        Ok(Self { system: Arc::new(system), monitor, logs })
    }

    /// Cierre ordenado: desconecta el monitor, suprime la reconexión y espera a
    /// que el websocket envíe su frame de cierre.
    ///
    /// Retorna `false` si el cierre no se confirmó a tiempo.
    pub async fn shutdown(&self) -> bool {
        self.monitor.disconnect_and_wait(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS)).await
    }
}
