//! Radio-environment snapshots built from raw modem and network observations.
//!
//! Filtering follows the geolocate field definitions: a cell record needs the
//! five identifying values to be usable, and Wi-Fi networks that opt out of
//! mapping (hidden or SSID ending in `_nomap`) must never leave the device.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// SSID suffix that marks a network as opted out of location mapping.
pub const NOMAP_SUFFIX: &str = "_nomap";

/// Age reported for every Wi-Fi observation, in milliseconds.
pub const WIFI_AGE_MILLIS: u32 = 500;

/// Radio access technology of an observed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioType {
    Gsm,
    Wcdma,
    Lte,
    #[default]
    Unknown,
}

impl RadioType {
    pub fn is_known(self) -> bool {
        !matches!(self, RadioType::Unknown)
    }
}

/// A cell as reported by the modem. Zero means "not known".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCell {
    pub radio_type: RadioType,
    pub mcc: u32,
    pub mnc: u32,
    pub lac: u32,
    pub cell_id: u32,
    pub signal_strength: i32,
}

/// A cell record that is complete enough to be transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellObservation {
    pub radio_type: RadioType,
    pub mobile_country_code: u32,
    pub mobile_network_code: u32,
    pub location_area_code: u32,
    pub cell_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
}

/// A Wi-Fi service as reported by the network stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WlanService {
    pub name: String,
    pub hidden: bool,
    pub bssid: Option<String>,
    pub strength: i32,
}

/// A Wi-Fi access point that may be transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiObservation {
    #[serde(rename = "mac")]
    pub mac_address: String,
    pub signal_strength: i32,
    #[serde(rename = "age")]
    pub age_millis: u32,
}

/// SIM/operator information for the active modem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierInfo {
    pub carrier_name: String,
    pub home_mobile_country_code: String,
    pub home_mobile_network_code: String,
}

/// Server-side fallbacks the lookup may use when no exact match exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPreferences {
    /// Fall back to coarse cell location-area estimates.
    pub lacf: bool,
    /// Fall back to a GeoIP estimate of the sender address.
    pub ipf: bool,
}

impl Default for FallbackPreferences {
    fn default() -> Self {
        Self {
            lacf: true,
            ipf: true,
        }
    }
}

/// Raw observations delivered on each environment change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEnvironment {
    pub cells: Vec<RawCell>,
    pub wlan: Vec<WlanService>,
    pub carrier: Option<CarrierInfo>,
}

/// Normalized observation set used as lookup input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentSnapshot {
    pub cells: Vec<CellObservation>,
    pub wifi: Vec<WifiObservation>,
    pub carrier: Option<CarrierInfo>,
    pub fallbacks: FallbackPreferences,
}

impl EnvironmentSnapshot {
    pub fn has_wifi(&self) -> bool {
        !self.wifi.is_empty()
    }

    /// Whether any cell or Wi-Fi observation survived filtering.
    pub fn has_usable_fields(&self) -> bool {
        !self.cells.is_empty() || !self.wifi.is_empty()
    }

    pub fn cell_ids(&self) -> BTreeSet<u32> {
        self.cells.iter().map(|c| c.cell_id).collect()
    }
}

/// Keep only cells carrying radio type, mcc, mnc, lac and cell id.
pub fn cell_tower_fields(cells: &[RawCell]) -> Vec<CellObservation> {
    cells
        .iter()
        .filter(|c| {
            c.radio_type.is_known() && c.mcc != 0 && c.mnc != 0 && c.lac != 0 && c.cell_id != 0
        })
        .map(|c| CellObservation {
            radio_type: c.radio_type,
            mobile_country_code: c.mcc,
            mobile_network_code: c.mnc,
            location_area_code: c.lac,
            cell_id: c.cell_id,
            signal_strength: (c.signal_strength != 0).then_some(c.signal_strength),
        })
        .collect()
}

/// Wi-Fi access points that may be sent: visible, mappable, with a known BSSID.
pub fn wlan_access_point_fields(services: &[WlanService]) -> Vec<WifiObservation> {
    services
        .iter()
        .filter(|s| !s.hidden && !s.name.ends_with(NOMAP_SUFFIX))
        .filter_map(|s| {
            let bssid = s.bssid.as_deref().map(str::trim).filter(|b| !b.is_empty())?;
            Some(WifiObservation {
                mac_address: bssid.to_string(),
                signal_strength: s.strength,
                age_millis: WIFI_AGE_MILLIS,
            })
        })
        .collect()
}

/// Turns raw observations into snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    fallbacks: FallbackPreferences,
    wlan_data_allowed: bool,
}

impl SnapshotBuilder {
    pub fn new(fallbacks: FallbackPreferences) -> Self {
        Self {
            fallbacks,
            wlan_data_allowed: true,
        }
    }

    pub fn wlan_data_allowed(&self) -> bool {
        self.wlan_data_allowed
    }

    /// Disabling Wi-Fi data drops all access points from later snapshots.
    pub fn set_wlan_data_allowed(&mut self, allowed: bool) {
        self.wlan_data_allowed = allowed;
    }

    pub fn build(&self, raw: &RawEnvironment) -> EnvironmentSnapshot {
        let wifi = if self.wlan_data_allowed {
            wlan_access_point_fields(&raw.wlan)
        } else {
            Vec::new()
        };
        EnvironmentSnapshot {
            cells: cell_tower_fields(&raw.cells),
            wifi,
            carrier: raw.carrier.clone(),
            fallbacks: self.fallbacks,
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(FallbackPreferences::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_cell() -> RawCell {
        RawCell {
            radio_type: RadioType::Lte,
            mcc: 250,
            mnc: 1,
            lac: 7700,
            cell_id: 12345,
            signal_strength: -85,
        }
    }

    fn wlan(name: &str, bssid: Option<&str>, hidden: bool) -> WlanService {
        WlanService {
            name: name.to_string(),
            hidden,
            bssid: bssid.map(|s| s.to_string()),
            strength: 60,
        }
    }

    #[test]
    fn test_complete_cell_kept() {
        let cells = cell_tower_fields(&[full_cell()]);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].signal_strength, Some(-85));
    }

    #[test]
    fn test_each_missing_mandatory_field_drops_cell() {
        let omissions: [fn(&mut RawCell); 5] = [
            |c| c.radio_type = RadioType::Unknown,
            |c| c.mcc = 0,
            |c| c.mnc = 0,
            |c| c.lac = 0,
            |c| c.cell_id = 0,
        ];
        for omit in omissions {
            let mut cell = full_cell();
            omit(&mut cell);
            assert!(cell_tower_fields(std::slice::from_ref(&cell)).is_empty());

            let kept = cell_tower_fields(&[cell, full_cell()]);
            assert_eq!(kept.len(), 1);
            assert_eq!(kept[0].cell_id, 12345);
        }
    }

    #[test]
    fn test_zero_signal_strength_omitted() {
        let mut cell = full_cell();
        cell.signal_strength = 0;
        let cells = cell_tower_fields(&[cell]);
        assert_eq!(cells[0].signal_strength, None);
        let json = serde_json::to_value(&cells[0]).unwrap();
        assert!(json.get("signalStrength").is_none());
        assert_eq!(json["radioType"], "lte");
        assert_eq!(json["locationAreaCode"], 7700);
    }

    #[test]
    fn test_nomap_and_hidden_excluded() {
        let services = vec![
            wlan("home_nomap", Some("aa:bb:cc:dd:ee:01"), false),
            wlan("office", Some("aa:bb:cc:dd:ee:02"), true),
            wlan("cafe", Some("aa:bb:cc:dd:ee:03"), false),
        ];
        let aps = wlan_access_point_fields(&services);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].mac_address, "aa:bb:cc:dd:ee:03");
        assert_eq!(aps[0].age_millis, WIFI_AGE_MILLIS);
    }

    #[test]
    fn test_nomap_excluded_regardless_of_strength() {
        for strength in [-100, 0, 100] {
            let mut svc = wlan("home_nomap", Some("aa:bb:cc:dd:ee:01"), false);
            svc.strength = strength;
            assert!(wlan_access_point_fields(&[svc]).is_empty());
        }
    }

    #[test]
    fn test_unknown_bssid_excluded() {
        let services = vec![wlan("a", None, false), wlan("b", Some("  "), false)];
        assert!(wlan_access_point_fields(&services).is_empty());
    }

    #[test]
    fn test_empty_input_yields_empty_snapshot() {
        let snap = SnapshotBuilder::default().build(&RawEnvironment::default());
        assert!(!snap.has_usable_fields());
        assert!(!snap.has_wifi());
        assert_eq!(snap.fallbacks, FallbackPreferences::default());
    }

    #[test]
    fn test_wlan_disallowed_drops_wifi() {
        let raw = RawEnvironment {
            cells: vec![full_cell()],
            wlan: vec![wlan("cafe", Some("aa:bb:cc:dd:ee:03"), false)],
            carrier: None,
        };
        let mut builder = SnapshotBuilder::default();
        assert!(builder.build(&raw).has_wifi());
        builder.set_wlan_data_allowed(false);
        let snap = builder.build(&raw);
        assert!(!snap.has_wifi());
        assert_eq!(snap.cells.len(), 1);
    }

    #[test]
    fn test_raw_environment_from_json() {
        let raw: RawEnvironment = serde_json::from_str(
            r#"{"cells":[{"radio_type":"gsm","mcc":250,"mnc":2,"lac":10,"cell_id":99}],
                "wlan":[{"name":"x","bssid":"00:11:22:33:44:55","strength":40}]}"#,
        )
        .unwrap();
        let snap = SnapshotBuilder::default().build(&raw);
        assert_eq!(snap.cell_ids(), BTreeSet::from([99]));
        assert_eq!(snap.wifi.len(), 1);
        assert!(snap.carrier.is_none());
    }
}
