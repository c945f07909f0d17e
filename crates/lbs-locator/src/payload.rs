//! Lookup wire format: query payload, outbound request body, response parsing.
//!
//! Cell, carrier and fallback fields use the Mozilla Location Services
//! geolocate names; the envelope (`common`, `wifi_networks`) follows the
//! Yandex locator protocol.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::snapshot::{CellObservation, EnvironmentSnapshot, FallbackPreferences, WifiObservation};
use crate::types::{LocatorError, LocatorResult, Position};

pub const PROTOCOL_VERSION: &str = "1.0";

/// Error code the service returns for an invalid lookup key.
pub const KEY_REJECTED_CODE: i64 = 400;

/// The field set selected by the scheduler for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cell_towers: Vec<CellObservation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consider_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_mobile_country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_mobile_network_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallbacks: Option<FallbackPreferences>,
}

impl QueryPayload {
    /// Cell, carrier and fallback fields of a snapshot. Wi-Fi is added to the
    /// wire request separately.
    pub fn from_snapshot(snapshot: &EnvironmentSnapshot) -> Self {
        let mut payload = Self {
            cell_towers: snapshot.cells.clone(),
            fallbacks: Some(snapshot.fallbacks),
            ..Self::default()
        };
        if let Some(carrier) = &snapshot.carrier {
            payload.carrier = Some(carrier.carrier_name.clone());
            payload.consider_ip = Some(true);
            payload.home_mobile_country_code = Some(carrier.home_mobile_country_code.clone());
            payload.home_mobile_network_code = Some(carrier.home_mobile_network_code.clone());
        }
        payload
    }

    /// Number of top-level fields present.
    pub fn field_count(&self) -> usize {
        [
            !self.cell_towers.is_empty(),
            self.carrier.is_some(),
            self.consider_ip.is_some(),
            self.home_mobile_country_code.is_some(),
            self.home_mobile_network_code.is_some(),
            self.fallbacks.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    /// Distinct non-zero cell identifiers.
    pub fn cell_ids(&self) -> BTreeSet<u32> {
        self.cell_towers
            .iter()
            .map(|c| c.cell_id)
            .filter(|id| *id != 0)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonFields {
    pub version: String,
    pub api_key: String,
}

/// Body of an outbound lookup request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub common: CommonFields,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wifi_networks: Vec<WifiObservation>,
    #[serde(flatten)]
    pub payload: QueryPayload,
}

impl LookupRequest {
    pub fn new(api_key: &str, payload: QueryPayload, wifi: Vec<WifiObservation>) -> Self {
        Self {
            common: CommonFields {
                version: PROTOCOL_VERSION.to_string(),
                api_key: api_key.to_string(),
            },
            wifi_networks: wifi,
            payload,
        }
    }

    pub fn to_json(&self) -> LocatorResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Parse a successful response body into a position.
pub fn parse_position(data: &[u8]) -> LocatorResult<Position> {
    let json: Value = serde_json::from_slice(data)
        .map_err(|e| LocatorError::Protocol(format!("JSON parse error: {e}")))?;

    let obj = json.as_object().ok_or_else(|| {
        LocatorError::Protocol(format!(
            "expected object at root level, not found in {}",
            String::from_utf8_lossy(data)
        ))
    })?;

    let location = obj
        .get("position")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            LocatorError::Protocol(format!(
                "no location data found in {}",
                String::from_utf8_lossy(data)
            ))
        })?;

    let latitude = location.get("latitude").and_then(Value::as_f64);
    let longitude = location.get("longitude").and_then(Value::as_f64);
    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        return Err(LocatorError::Protocol(format!(
            "latitude or longitude not readable in {}",
            String::from_utf8_lossy(data)
        )));
    };

    let accuracy = location
        .get("precision")
        .and_then(Value::as_f64)
        .unwrap_or(Position::UNKNOWN_ACCURACY);

    Ok(Position {
        latitude,
        longitude,
        accuracy,
    })
}

/// `error.code` from an error response body, if the body carries one.
/// Integral floats such as `400.0` count as codes too.
pub fn error_code(data: &[u8]) -> Option<i64> {
    let json: Value = serde_json::from_slice(data).ok()?;
    let code = json.get("error")?.get("code")?;
    code.as_i64().or_else(|| {
        code.as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

pub fn is_key_rejected(data: &[u8]) -> bool {
    error_code(data) == Some(KEY_REJECTED_CODE)
}
