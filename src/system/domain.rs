//! Módulo de configuración central y gestión del entorno de ejecución.
//!
//! Este módulo actúa como la fuente única de verdad para la configuración del observador.
//! Se encarga de leer las variables de entorno, establecer valores por defecto seguros
//! y proveer las estructuras necesarias para iniciar los subsistemas (Monitor, Logs, Tracing).
//!
//! # Funcionalidades Principales
//! * **Carga de Configuración:** Lee de `.env` en desarrollo y variables de sistema en producción.
//! * **Observabilidad:** Configura `tracing_subscriber` para logs estructurados o legibles.
//! * **Constantes Operativas:** Define timeouts, demoras de reconexión y límites del clasificador.
//!


use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};


/// Errores al cargar la configuración.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("la variable {0} no está configurada")]
    Missing(&'static str),

    #[error("la variable {var} tiene un valor inválido: {value}")]
    Invalid { var: &'static str, value: String },
}


/// Representa la configuración global del sistema y el estado del entorno.
#[derive(Debug, Clone)]
pub struct System {
    /// URL WebSocket del canal de control de la estación (ej. `ws://host:9000/ocpp/ST-01`).
    /// **Requerido**.
    pub feed_url: String,

    /// URL base del almacén de logs históricos.
    /// Por defecto: `http://localhost:8080/api`.
    pub log_store_url: String,

    /// Espera fija antes de reintentar la conexión del monitor.
    /// Por defecto: `5` segundos.
    pub reconnect_delay_secs: u64,

    /// Tiempo máximo de espera de una consulta al almacén de logs.
    /// Por defecto: `10` segundos.
    pub log_store_timeout_secs: u64,

    /// Completa la acción de los `CallResult` a partir del `Call` original.
    /// Por defecto: `false`.
    pub correlate_responses: bool,

    /// Entorno de ejecución actual (`development`, `staging`, `production`).
    /// Afecta el formato de logs y la carga de archivos `.env`.
    pub environment: String,

    /// Nivel de detalle de los logs (ej. `info`, `debug`, `warn`).
    /// Se autoconfigura según el `environment` si no se especifica.
    pub rust_log: String,
}


impl System {

    /// Carga la configuración desde las variables de entorno.
    ///
    /// # Comportamiento
    /// * Si `ENVIRONMENT` es "development", intenta cargar un archivo `.env`.
    /// * Establece valores por defecto para variables opcionales.
    ///
    /// # Errores
    /// * `ConfigError::Missing` si `OCPP_FEED_URL` no está definida.
    /// * `ConfigError::Invalid` si alguna variable numérica o booleana no se puede interpretar.
    pub fn new() -> Result<Self, ConfigError> {

        info!("Info: creando objeto system");

        let environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".into());

        if environment == "development" {
            dotenv::dotenv().ok();
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .unwrap_or_else(|| "development".into());

        Ok(System {
            feed_url: lookup("OCPP_FEED_URL")
                .filter(|url| !url.trim().is_empty())
                .ok_or(ConfigError::Missing("OCPP_FEED_URL"))?,

            log_store_url: lookup("LOG_STORE_URL")
                .unwrap_or_else(|| "http://localhost:8080/api".to_string())
                .trim_end_matches('/')
                .to_string(),

            reconnect_delay_secs: parse_or(&lookup, "RECONNECT_DELAY_SECS", monitor::RECONNECT_DELAY_SECS)?,

            log_store_timeout_secs: parse_or(&lookup, "LOG_STORE_TIMEOUT_SECS", log_store::TIMEOUT_SECS)?,

            correlate_responses: parse_or(&lookup, "OCPP_CORRELATE_RESPONSES", false)?,

            rust_log: lookup("RUST_LOG")
                .unwrap_or_else(|| {
                    match environment.as_str() {
                        "development" => "debug".to_string(),
                        "staging" => "info".to_string(),
                        _ => "warn".to_string(),
                    }
                }),

            environment,
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn log_store_timeout(&self) -> Duration {
        Duration::from_secs(self.log_store_timeout_secs)
    }
}


fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}


/// Inicializa el sistema de trazabilidad y logs (Tracing).
///
/// Configura el formato de salida basándose en el entorno:
/// * **Production**: Salida JSON (para logs estructurados en la nube).
/// * **Development/Otros**: Salida "Pretty" (colores y formato legible).
pub fn init_tracing(system: &System) {

    let filter = EnvFilter::try_new(&system.rust_log)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(false);

    if system.environment == "production" {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}


/// Constantes del monitor en vivo.
pub mod monitor {
    pub const RECONNECT_DELAY_SECS: u64 = 5;
    /// Entradas máximas de la tabla `uniqueId → acción`.
    pub const CORRELATION_CAPACITY: usize = 1024;
    /// Espera máxima del cierre ordenado del websocket al apagar el servicio.
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 3;
}


/// Constantes del cliente del almacén de logs.
pub mod log_store {
    pub const TIMEOUT_SECS: u64 = 10;
    pub const CONNECT_TIMEOUT_SECS: u64 = 5;
    pub const LOGS_PATH: &str = "logs";
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
}


/// Constantes del clasificador de tramas.
pub mod classifier {
    pub const DUMP_LIMIT: usize = 50;
    pub const ELLIPSIS: &str = "...";
}
