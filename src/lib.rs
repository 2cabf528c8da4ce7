//! Observabilidad del tráfico OCPP-J de una estación de carga.
//!
//! * `monitor`: monitor en vivo con reconexión, pausa y suscripciones.
//! * `history`: consultas al almacén de logs históricos.
//! * `message`: modelo de datos y clasificador de tramas.
//! * `presentation`: orden, paginación y exportación de registros.

pub mod channels;
pub mod context;
pub mod history;
pub mod message;
pub mod monitor;
pub mod presentation;
pub mod system;
