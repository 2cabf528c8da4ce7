//! Clasificador de tramas OCPP-J.
//!
//! Función pura: trama cruda → `MessageRecord`. No realiza I/O ni guarda estado.
//! Es total: cualquier sorpresa estructural degrada a valores conservadores
//! (acción `Unknown`, sin estación/cargador, resumen genérico) en lugar de fallar,
//! de modo que ninguna trama se pierde por un error de parseo.


use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;
use crate::message::domain::{Direction, MessageKind, MessageRecord, RawFrame, ERROR_ACTION, UNKNOWN_ACTION};
use crate::system::domain::classifier::{DUMP_LIMIT, ELLIPSIS};


/// Clasifica una trama recibida del transporte.
pub fn classify(raw: &str) -> MessageRecord {
    classify_with_hint(raw, None)
}


/// Clasifica una trama permitiendo al llamador aportar la acción desde su contexto.
///
/// Las tramas `CallResult` no describen su propia acción; `action_hint` sólo se
/// usa para ellas. Para `Call` manda el nombre de la trama y `CallError` siempre
/// queda como `Error`.
pub fn classify_with_hint(raw: &str, action_hint: Option<&str>) -> MessageRecord {
    let frame = RawFrame::parse(raw);
    classify_frame(&frame, raw, action_hint)
}


/// Construye el registro a partir de una trama ya decodificada y su texto original.
pub fn classify_frame(frame: &RawFrame, raw: &str, action_hint: Option<&str>) -> MessageRecord {
    let id = Uuid::new_v4().to_string();
    let observed_at = Utc::now();

    let action = match frame {
        RawFrame::Call { action, .. } => action.clone(),
        RawFrame::CallResult { .. } => action_hint
            .filter(|hint| !hint.trim().is_empty())
            .map(str::to_owned),
        RawFrame::CallError { .. } => Some(ERROR_ACTION.to_string()),
        RawFrame::Unknown => {
            return MessageRecord {
                correlation_id: id.clone(),
                id,
                observed_at,
                direction: Direction::Incoming,
                message_kind: MessageKind::Unknown,
                action: UNKNOWN_ACTION.to_string(),
                station_id: None,
                charger_id: None,
                summary: truncate_dump(raw),
                raw_data: raw.to_string(),
            };
        }
    }
    .unwrap_or_else(|| UNKNOWN_ACTION.to_string());

    let kind = frame.kind();
    let direction = kind.direction();
    let payload = frame.payload().unwrap_or(&Value::Null);

    MessageRecord {
        correlation_id: frame.unique_id().map(str::to_owned).unwrap_or_else(|| id.clone()),
        id,
        observed_at,
        direction,
        message_kind: kind,
        station_id: extract_station_id(payload),
        charger_id: extract_charger_id(payload),
        summary: summarize(&action, direction, payload),
        action,
        raw_data: raw.to_string(),
    }
}


/// Volcado textual acotado a `DUMP_LIMIT` caracteres, con `...` si se recortó.
pub fn truncate_dump(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(DUMP_LIMIT).collect();
    if chars.next().is_some() {
        format!("{head}{ELLIPSIS}")
    } else {
        head
    }
}


/// Genera el resumen de una línea según la tabla de reglas por acción.
pub fn summarize(action: &str, direction: Direction, payload: &Value) -> String {
    match action {
        "MeterValues" => summarize_meter_values(payload),
        "StatusNotification" => {
            let status = text_at(payload, &["status"])
                .or_else(|| text_at(payload, &["connectorStatus"]))
                .unwrap_or_default();
            format!("Status notification: {status}")
        }
        "Authorize" => {
            let id_tag = text_at(payload, &["idTag"])
                .or_else(|| text_at(payload, &["idToken", "idToken"]))
                .unwrap_or_default();
            format!("Authorization {}: {id_tag}", direction.verb())
        }
        "StartTransaction" => match direction {
            Direction::Incoming => {
                let id_tag = text_at(payload, &["idTag"]).unwrap_or_default();
                format!("Transaction start: {id_tag}")
            }
            Direction::Outgoing => format!("Transaction start response: {}", acceptance(payload)),
        },
        "StopTransaction" => match direction {
            Direction::Incoming => {
                let transaction_id = text_at(payload, &["transactionId"]).unwrap_or_default();
                format!("Transaction stop: id {transaction_id}")
            }
            Direction::Outgoing => format!("Transaction stop response: {}", acceptance(payload)),
        },
        _ => format!("{action} {}", direction.verb()),
    }
}


fn summarize_meter_values(payload: &Value) -> String {
    let samples: Vec<String> = payload
        .get("meterValue")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|meter| meter.get("sampledValue").and_then(Value::as_array))
        .flatten()
        .map(|sample| {
            let measurand = text_at(sample, &["measurand"]).unwrap_or_else(|| "Value".to_string());
            let value = text_at(sample, &["value"]).unwrap_or_default();
            let unit = text_at(sample, &["unit"])
                .or_else(|| text_at(sample, &["unitOfMeasure", "unit"]))
                .unwrap_or_default();
            format!("{measurand}: {value}{unit}")
        })
        .collect();

    if samples.is_empty() {
        "Meter values".to_string()
    } else {
        samples.join(", ")
    }
}


fn acceptance(payload: &Value) -> &'static str {
    match text_at(payload, &["idTagInfo", "status"]).as_deref() {
        Some("Accepted") => "Accepted",
        _ => "Rejected",
    }
}


/// Extrae el identificador de estación de las ubicaciones convencionales del payload.
pub fn extract_station_id(payload: &Value) -> Option<String> {
    text_at(payload, &["customData", "stationId"])
        .or_else(|| text_at(payload, &["chargingStation", "serialNumber"]))
        .filter(|id| !id.is_empty())
}


/// Extrae el identificador de cargador (EVSE / conector) del payload.
pub fn extract_charger_id(payload: &Value) -> Option<String> {
    text_at(payload, &["customData", "chargerId"])
        .or_else(|| text_at(payload, &["evseId"]))
        .or_else(|| text_at(payload, &["evse", "id"]))
        .or_else(|| text_at(payload, &["connectorId"]))
        .filter(|id| !id.is_empty())
}


/// Recorre `path` dentro de `value` y devuelve el texto (o número) encontrado.
fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    let found = path.iter().try_fold(value, |current, key| current.get(*key))?;
    match found {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
