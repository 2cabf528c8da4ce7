use std::str::FromStr;
use serde::{Deserialize, Serialize};


/// Campo por el que se ordena una página de registros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    ObservedAt,
    Action,
    Direction,
    StationId,
    ChargerId,
}


#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}


impl FromStr for SortField {
    type Err = String;

    /// Acepta los nombres de campo del registro serializado (`observedAt`, `stationId`, …).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observedAt" | "timestamp" => Ok(SortField::ObservedAt),
            "action" => Ok(SortField::Action),
            "direction" => Ok(SortField::Direction),
            "stationId" => Ok(SortField::StationId),
            "chargerId" => Ok(SortField::ChargerId),
            other => Err(format!("campo de orden desconocido: {other}")),
        }
    }
}


impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(format!("sentido de orden desconocido: {other}")),
        }
    }
}
