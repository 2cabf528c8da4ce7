//! Adaptador de presentación de logs.
//!
//! Orden secundario y paginación del lado del cliente sobre registros ya
//! obtenidos, más la exportación a JSON. No hace I/O y nunca modifica su entrada.


use std::cmp::Ordering;
use crate::message::domain::{LogPage, MessageRecord};
use crate::presentation::domain::{SortDirection, SortField};


/// Devuelve una copia ordenada de `records`.
///
/// El orden es estable: ante empates se conserva el orden relativo original,
/// también en sentido descendente. Los valores ausentes quedan antes que los
/// presentes en orden ascendente.
pub fn sort_records(records: &[MessageRecord], field: SortField, direction: SortDirection) -> Vec<MessageRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| {
        let ordering = compare(a, b, field);
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
    sorted
}


fn compare(a: &MessageRecord, b: &MessageRecord, field: SortField) -> Ordering {
    match field {
        SortField::ObservedAt => a.observed_at.cmp(&b.observed_at),
        SortField::Action => a.action.cmp(&b.action),
        SortField::Direction => a.direction.as_str().cmp(b.direction.as_str()),
        SortField::StationId => a.station_id.cmp(&b.station_id),
        SortField::ChargerId => a.charger_id.cmp(&b.charger_id),
    }
}


/// Pagina `records` del lado del cliente (`page` comienza en cero).
pub fn paginate(records: &[MessageRecord], page: u32, size: u32) -> LogPage {
    let total_elements = records.len() as u64;
    let total_pages = LogPage::pages_for(total_elements, size);

    if size == 0 {
        return LogPage { total_elements, ..LogPage::empty(page, size) };
    }

    let start = (page as usize).saturating_mul(size as usize);
    let page_records = records
        .iter()
        .skip(start)
        .take(size as usize)
        .cloned()
        .collect();

    LogPage {
        records: page_records,
        page,
        size,
        total_elements,
        total_pages,
    }
}


/// Serializa los registros como arreglo JSON legible, sin transformarlos.
pub fn export_json(records: &[MessageRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(records)
}
