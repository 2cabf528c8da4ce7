//! Dominio del motor de consultas históricas.
//!
//! Define la forma de los registros tal como los entrega el almacén de logs
//! (`RawLogRecord`), el sobre de respuesta (`ApiEnvelope`), los errores de consulta
//! y la costura `LogStore` que separa el motor del transporte HTTP.


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use crate::message::domain::FilterCriteria;


/// Errores de una consulta al almacén de logs.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("el almacén de logs no respondió a tiempo")]
    Timeout,

    #[error("no se pudo contactar al almacén de logs: {0}")]
    Request(String),

    #[error("el almacén de logs respondió {status}: {body}")]
    Status { status: u16, body: String },

    #[error("el almacén de logs informó un error ({status}): {message}")]
    Api { status: String, message: String },

    #[error("respuesta ilegible del almacén de logs: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("la respuesta del almacén de logs no contiene datos")]
    MissingData,
}


impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QueryError::Timeout
        } else {
            QueryError::Request(e.to_string())
        }
    }
}


/// Registro tal como lo guarda el almacén, previo a la clasificación.
///
/// Todos los campos son tolerantes a ausencia: un registro incompleto se
/// clasifica igual, nunca se descarta.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawLogRecord {
    pub id: Value,
    pub message_id: Option<String>,
    pub message_type: Value,
    pub direction: Option<String>,
    pub timestamp: Value,
    pub action: Option<String>,
    pub station_id: Option<String>,
    pub charger_id: Option<String>,
    pub payload: Value,
    pub raw_message: Option<String>,
}


/// Página tal como la reporta el almacén.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawLogPage {
    pub content: Vec<RawLogRecord>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: Option<u32>,
}


/// Sobre `{ status, data, message }` de todas las respuestas del almacén.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub status: Value,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}


impl<T> ApiEnvelope<T> {

    /// `status` puede venir como código numérico o como texto.
    pub fn is_success(&self) -> bool {
        match &self.status {
            Value::Null => true,
            Value::Bool(ok) => *ok,
            Value::Number(code) => code.as_u64().is_some_and(|c| (200..300).contains(&c)),
            Value::String(s) => {
                let s = s.trim().to_ascii_lowercase();
                matches!(s.as_str(), "success" | "ok" | "succeeded")
                    || s.parse::<u16>().is_ok_and(|c| (200..300).contains(&c))
            }
            _ => false,
        }
    }

    /// Extrae `data` verificando el estado del sobre.
    pub fn into_data(self) -> Result<T, QueryError> {
        if !self.is_success() {
            return Err(QueryError::Api {
                status: self.status.to_string(),
                message: self.message.unwrap_or_default(),
            });
        }
        self.data.ok_or(QueryError::MissingData)
    }
}


/// Fuente de registros históricos.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn fetch_page(&self, criteria: &FilterCriteria) -> Result<RawLogPage, QueryError>;

    async fn fetch_one(&self, id: &str) -> Result<RawLogRecord, QueryError>;
}
