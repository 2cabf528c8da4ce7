//! Motor de consultas históricas.
//!
//! Traduce `FilterCriteria` a una petición al almacén de logs, clasifica cada
//! registro devuelto con el mismo clasificador del monitor en vivo y arma el
//! `LogPage` resultante. No guarda estado entre consultas ni reintenta: un fallo
//! del almacén se devuelve al llamador como `QueryError`.


use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;
use crate::history::domain::{ApiEnvelope, LogStore, QueryError, RawLogPage, RawLogRecord};
use crate::message::domain::{Direction, FilterCriteria, LogPage, MessageKind, MessageRecord, RawFrame, ERROR_ACTION, UNKNOWN_ACTION};
use crate::message::logic::{extract_charger_id, extract_station_id, summarize, truncate_dump};
use crate::system::domain::System;
use crate::system::domain::log_store::{CONNECT_TIMEOUT_SECS, DEFAULT_PAGE_SIZE, LOGS_PATH};


/// Cliente HTTP del almacén de logs.
#[derive(Debug, Clone)]
pub struct HttpLogStore {
    client: Client,
    base_url: String,
}


impl HttpLogStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_system(system: &System) -> Result<Self, QueryError> {
        Self::new(&system.log_store_url, system.log_store_timeout())
    }

    fn logs_url(&self) -> String {
        format!("{}/{}", self.base_url, LOGS_PATH)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, QueryError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(QueryError::Status { status: status.as_u16(), body: truncate_dump(&body) });
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)?;
        envelope.into_data()
    }
}


#[async_trait]
impl LogStore for HttpLogStore {
    async fn fetch_page(&self, criteria: &FilterCriteria) -> Result<RawLogPage, QueryError> {
        let request = self.client.get(self.logs_url()).query(&query_params(criteria));
        self.fetch(request).await
    }

    async fn fetch_one(&self, id: &str) -> Result<RawLogRecord, QueryError> {
        let mut url = Url::parse(&self.logs_url()).map_err(|e| QueryError::Request(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| QueryError::Request(format!("URL base inválida: {}", self.base_url)))?
            .push(id);
        self.fetch(self.client.get(url)).await
    }
}


/// Parámetros de consulta del endpoint de logs. Los campos ausentes no se envían.
pub fn query_params(criteria: &FilterCriteria) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();

    if let Some(start) = criteria.start_date {
        params.push(("startDate", start.to_rfc3339_opts(SecondsFormat::Millis, true)));
    }
    if let Some(end) = criteria.end_date {
        params.push(("endDate", end.to_rfc3339_opts(SecondsFormat::Millis, true)));
    }
    if let Some(action) = criteria.action.as_ref().filter(|a| !a.is_empty()) {
        params.push(("messageType", action.clone()));
    }
    if let Some(direction) = criteria.direction {
        params.push(("direction", direction.as_str().to_string()));
    }
    if let Some(station_id) = criteria.station_id.as_ref().filter(|s| !s.is_empty()) {
        params.push(("stationId", station_id.clone()));
    }
    if let Some(charger_id) = criteria.charger_id.as_ref().filter(|c| !c.is_empty()) {
        params.push(("chargerId", charger_id.clone()));
    }
    if let Some(page) = criteria.page {
        params.push(("page", page.to_string()));
    }
    if let Some(size) = criteria.size {
        params.push(("size", size.to_string()));
    }

    params
}


/// Motor de consultas. Clonarlo es barato y las consultas concurrentes son independientes.
#[derive(Clone)]
pub struct LogQueryEngine {
    store: Arc<dyn LogStore>,
}


impl LogQueryEngine {
    pub fn new<S: LogStore + 'static>(store: S) -> Self {
        Self { store: Arc::new(store) }
    }

    pub fn from_system(system: &System) -> Result<Self, QueryError> {
        Ok(Self::new(HttpLogStore::from_system(system)?))
    }

    /// Recupera una página de registros históricos.
    ///
    /// # Argumentos
    /// * `criteria` - Filtros y paginación; los campos `None` no se envían al almacén.
    ///
    /// # Flujo de Trabajo
    /// 1. Pide la página al almacén; un error se registra y se propaga tal cual.
    /// 2. `page`, `size`, `totalElements` y `totalPages` se devuelven como los
    ///    informa el almacén; `totalPages` sólo se calcula si el almacén lo omite.
    /// 3. Cada fila pasa por `classify_log_record`; ninguna se descarta.
    #[instrument(name = "log_query", skip(self))]
    pub async fn query(&self, criteria: &FilterCriteria) -> Result<LogPage, QueryError> {
        let raw = self.store.fetch_page(criteria).await.inspect_err(|e| {
            error!("Error: consulta histórica fallida: {}", e);
        })?;

        let size = match raw.size {
            0 => criteria.size.unwrap_or(DEFAULT_PAGE_SIZE),
            size => size,
        };
        let total_pages = raw
            .total_pages
            .unwrap_or_else(|| LogPage::pages_for(raw.total_elements, size));

        let records: Vec<MessageRecord> = raw.content.into_iter().map(classify_log_record).collect();
        debug!("Debug: {} registros de {} totales", records.len(), raw.total_elements);

        Ok(LogPage {
            records,
            page: raw.page,
            size,
            total_elements: raw.total_elements,
            total_pages,
        })
    }

    /// Recupera un único registro por su id.
    #[instrument(name = "log_get", skip(self))]
    pub async fn get(&self, id: &str) -> Result<MessageRecord, QueryError> {
        let raw = self.store.fetch_one(id).await.inspect_err(|e| {
            error!("Error: no se pudo recuperar el registro {}: {}", id, e);
        })?;
        Ok(classify_log_record(raw))
    }
}


impl fmt::Debug for LogQueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogQueryEngine").finish_non_exhaustive()
    }
}


/// Convierte un registro del almacén en `MessageRecord`.
///
/// # Argumentos
/// * `record` - Fila tal como la devuelve el almacén, con cualquier campo ausente.
///
/// # Flujo de Trabajo
/// 1. Decodifica `rawMessage` como trama OCPP-J, si existe.
/// 2. Los datos del almacén (`direction`, `action`, ids) tienen prioridad; lo que
///    falte se deriva de la trama decodificada.
/// 3. Un timestamp ilegible se reemplaza por la época Unix, nunca por la hora actual.
/// 4. El resumen sale de la misma tabla de reglas que usa el monitor en vivo.
///
/// Nunca falla.
pub fn classify_log_record(record: RawLogRecord) -> MessageRecord {
    let decoded = record
        .raw_message
        .as_deref()
        .map(RawFrame::parse)
        .unwrap_or(RawFrame::Unknown);

    let raw_data = record
        .raw_message
        .clone()
        .unwrap_or_else(|| record.payload.to_string());

    let kind = match MessageKind::from_store_value(&record.message_type) {
        MessageKind::Unknown => decoded.kind(),
        kind => kind,
    };

    let direction = record
        .direction
        .as_deref()
        .and_then(Direction::parse)
        .unwrap_or_else(|| kind.direction());

    let action = record
        .action
        .filter(|a| !a.trim().is_empty())
        .or_else(|| match &decoded {
            RawFrame::Call { action, .. } => action.clone(),
            RawFrame::CallError { .. } => Some(ERROR_ACTION.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_ACTION.to_string());

    let payload = match record.payload {
        Value::Null => decoded.payload().cloned().unwrap_or(Value::Null),
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        payload => payload,
    };

    let id = match &record.id {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    let correlation_id = record
        .message_id
        .filter(|m| !m.is_empty())
        .or_else(|| decoded.unique_id().map(str::to_owned))
        .unwrap_or_else(|| id.clone());

    // Sin hora conocida el registro queda al final de un orden descendente.
    let observed_at = parse_timestamp(&record.timestamp).unwrap_or_else(|| {
        warn!("Warning: timestamp ilegible en el registro {}: {}", id, record.timestamp);
        DateTime::<Utc>::UNIX_EPOCH
    });

    let summary = if kind == MessageKind::Unknown && action == UNKNOWN_ACTION && payload.is_null() {
        truncate_dump(&raw_data)
    } else {
        summarize(&action, direction, &payload)
    };

    MessageRecord {
        station_id: record.station_id.filter(|s| !s.is_empty()).or_else(|| extract_station_id(&payload)),
        charger_id: record.charger_id.filter(|c| !c.is_empty()).or_else(|| extract_charger_id(&payload)),
        id,
        correlation_id,
        observed_at,
        direction,
        message_kind: kind,
        action,
        summary,
        raw_data,
    }
}


/// Acepta RFC 3339, fecha-hora ISO sin zona (se asume UTC) o epoch en milisegundos.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
