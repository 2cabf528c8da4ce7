//! Dominio de Mensajería OCPP y Modelos de Datos.
//!
//! Este módulo define las estructuras que circulan entre el monitor en vivo,
//! el motor de consultas históricas y el adaptador de presentación.
//!
//! # Estructuras Principales
//! * **`RawFrame`:** Decodificación transitoria de una trama OCPP-J.
//! * **`MessageRecord`:** Unidad observada/persistida, inmutable una vez creada.
//! * **`FilterCriteria` / `LogPage`:** Petición y resultado de consultas históricas.


use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;


/// Valor usado cuando la acción no puede derivarse de la trama.
pub const UNKNOWN_ACTION: &str = "Unknown";

/// Acción asignada a toda trama `CallError`.
pub const ERROR_ACTION: &str = "Error";


/// Tipo de mensaje OCPP-J según el primer elemento de la trama (`typeId`).
///
/// Se serializa como el `typeId` numérico (`2`, `3`, `4`); `Unknown` como `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Call,
    CallResult,
    CallError,
    Unknown,
}


impl MessageKind {

    /// Mapea el `typeId` numérico del protocolo.
    pub fn from_type_id(type_id: i64) -> Self {
        match type_id {
            2 => MessageKind::Call,
            3 => MessageKind::CallResult,
            4 => MessageKind::CallError,
            _ => MessageKind::Unknown,
        }
    }

    /// Interpreta el tipo de mensaje tal como lo informa el almacén de logs,
    /// que puede enviarlo como número o como nombre.
    pub fn from_store_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => n.as_i64().map(Self::from_type_id).unwrap_or(MessageKind::Unknown),
            Value::String(s) => match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
                "2" | "call" => MessageKind::Call,
                "3" | "callresult" => MessageKind::CallResult,
                "4" | "callerror" => MessageKind::CallError,
                _ => MessageKind::Unknown,
            },
            _ => MessageKind::Unknown,
        }
    }

    /// `typeId` del protocolo; `None` para `Unknown`.
    pub fn type_id(&self) -> Option<i64> {
        match self {
            MessageKind::Call => Some(2),
            MessageKind::CallResult => Some(3),
            MessageKind::CallError => Some(4),
            MessageKind::Unknown => None,
        }
    }

    /// Sentido observado que corresponde a cada tipo de mensaje.
    pub fn direction(&self) -> Direction {
        match self {
            MessageKind::CallResult | MessageKind::CallError => Direction::Outgoing,
            MessageKind::Call | MessageKind::Unknown => Direction::Incoming,
        }
    }
}


impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.type_id().serialize(serializer)
    }
}


impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let type_id = Option::<i64>::deserialize(deserializer)?;
        Ok(type_id.map(MessageKind::from_type_id).unwrap_or(MessageKind::Unknown))
    }
}


/// Sentido del mensaje desde el punto de vista del observador.
///
/// `Call` se etiqueta como entrante y `CallResult`/`CallError` como saliente,
/// independientemente del extremo físico que transmitió los bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}


impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }

    /// Palabra usada en los resúmenes (`request` / `response`).
    pub fn verb(&self) -> &'static str {
        match self {
            Direction::Incoming => "request",
            Direction::Outgoing => "response",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "incoming" => Some(Direction::Incoming),
            "outgoing" => Some(Direction::Outgoing),
            _ => None,
        }
    }
}


impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


/// Trama OCPP-J decodificada.
///
/// Existe sólo durante la clasificación. La decodificación nunca falla:
/// cualquier forma inesperada termina en `RawFrame::Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: Option<String>,
        action: Option<String>,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult {
        unique_id: Option<String>,
        payload: Value,
    },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: Option<String>,
        error_code: Option<String>,
        description: Option<String>,
        details: Value,
    },
    Unknown,
}


impl RawFrame {

    /// Decodifica una trama ya parseada como JSON.
    pub fn decode(value: &Value) -> Self {
        let items = match value.as_array() {
            Some(items) if items.len() >= 3 => items,
            _ => return RawFrame::Unknown,
        };

        let unique_id = items[1].as_str().map(str::to_owned);
        let text_at = |idx: usize| items.get(idx).and_then(Value::as_str).map(str::to_owned);
        let value_at = |idx: usize| items.get(idx).cloned().unwrap_or(Value::Null);

        match items[0].as_i64().map(MessageKind::from_type_id) {
            Some(MessageKind::Call) => RawFrame::Call {
                unique_id,
                action: text_at(2),
                payload: value_at(3),
            },
            Some(MessageKind::CallResult) => RawFrame::CallResult {
                unique_id,
                payload: value_at(2),
            },
            Some(MessageKind::CallError) => RawFrame::CallError {
                unique_id,
                error_code: text_at(2),
                description: text_at(3),
                details: value_at(4),
            },
            _ => RawFrame::Unknown,
        }
    }

    /// Decodifica el texto recibido del transporte.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::decode(&value),
            Err(_) => RawFrame::Unknown,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            RawFrame::Call { .. } => MessageKind::Call,
            RawFrame::CallResult { .. } => MessageKind::CallResult,
            RawFrame::CallError { .. } => MessageKind::CallError,
            RawFrame::Unknown => MessageKind::Unknown,
        }
    }

    pub fn unique_id(&self) -> Option<&str> {
        match self {
            RawFrame::Call { unique_id, .. }
            | RawFrame::CallResult { unique_id, .. }
            | RawFrame::CallError { unique_id, .. } => unique_id.as_deref(),
            RawFrame::Unknown => None,
        }
    }

    /// Objeto de datos de la trama, si lo tiene.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            RawFrame::Call { payload, .. } | RawFrame::CallResult { payload, .. } => Some(payload),
            RawFrame::CallError { details, .. } => Some(details),
            RawFrame::Unknown => None,
        }
    }
}


/// Registro de un mensaje observado.
///
/// Se crea en la clasificación (vía en vivo) o en la recuperación (vía histórica)
/// y no se modifica después. `raw_data` conserva la trama original sin cambios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub correlation_id: String,
    pub observed_at: DateTime<Utc>,
    pub direction: Direction,
    pub message_kind: MessageKind,
    pub action: String,
    pub station_id: Option<String>,
    pub charger_id: Option<String>,
    pub summary: String,
    pub raw_data: String,
}


/// Criterios de filtrado para consultas históricas.
///
/// Todos los campos son opcionales; un campo ausente no restringe el resultado.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriteria {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub action: Option<String>,
    pub direction: Option<Direction>,
    pub station_id: Option<String>,
    pub charger_id: Option<String>,
    /// Página, comenzando en cero.
    pub page: Option<u32>,
    pub size: Option<u32>,
}


/// Página de resultados. Se regenera en cada petición.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub records: Vec<MessageRecord>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u32,
}


impl LogPage {

    /// Cantidad de páginas para `total_elements` con el tamaño dado.
    pub fn pages_for(total_elements: u64, size: u32) -> u32 {
        if size == 0 {
            return 0;
        }
        total_elements.div_ceil(u64::from(size)).min(u64::from(u32::MAX)) as u32
    }

    pub fn empty(page: u32, size: u32) -> Self {
        Self {
            records: Vec::new(),
            page,
            size,
            total_elements: 0,
            total_pages: 0,
        }
    }
}
