//! Locator configuration and the static fallback-preference file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::lifecycle::REQUEST_TIMEOUT;
use crate::snapshot::FallbackPreferences;
use crate::transport::DEFAULT_ENDPOINT;

pub const DEFAULT_KEY_PATH: &str = "/etc/yandex.key";
pub const DEFAULT_FALLBACKS_PATH: &str = "/etc/gps_xtra.ini";

const FALLBACKS_SECTION: &str = "MLS";
const LACF_KEY: &str = "FALLBACKS_LACF";
const IPF_KEY: &str = "FALLBACKS_IPF";

/// Everything a locator needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorConfig {
    pub endpoint: String,
    pub key_path: PathBuf,
    pub state_path: PathBuf,
    pub fallbacks: FallbackPreferences,
    pub request_timeout: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            state_path: PathBuf::from("state.json"),
            fallbacks: FallbackPreferences::default(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Read `[MLS] FALLBACKS_LACF / FALLBACKS_IPF` from an INI file.
///
/// A missing or unreadable file, or an unrecognized value, keeps the default
/// of `true` for the affected preference.
pub fn load_fallbacks(path: &Path) -> FallbackPreferences {
    let defaults = FallbackPreferences::default();
    if !path.exists() {
        tracing::debug!("No fallback config at {}, using defaults", path.display());
        return defaults;
    }

    let ini = match Ini::load_from_file(path) {
        Ok(ini) => ini,
        Err(e) => {
            tracing::warn!("Failed to read {}: {e}", path.display());
            return defaults;
        }
    };

    let read = |key: &str, default: bool| {
        ini.get_from(Some(FALLBACKS_SECTION), key)
            .map(|raw| {
                parse_bool(raw).unwrap_or_else(|| {
                    tracing::warn!("Ignoring invalid {FALLBACKS_SECTION}/{key} value '{raw}'");
                    default
                })
            })
            .unwrap_or(default)
    };

    let fallbacks = FallbackPreferences {
        lacf: read(LACF_KEY, defaults.lacf),
        ipf: read(IPF_KEY, defaults.ipf),
    };
    tracing::debug!(
        lacf = fallbacks.lacf,
        ipf = fallbacks.ipf,
        "Loaded fallback preferences"
    );
    fallbacks
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ini(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("gps_xtra.ini");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let f = load_fallbacks(&dir.path().join("absent.ini"));
        assert!(f.lacf && f.ipf);
    }

    #[test]
    fn test_reads_both_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(&dir, "[MLS]\nFALLBACKS_LACF=false\nFALLBACKS_IPF=true\n");
        let f = load_fallbacks(&path);
        assert!(!f.lacf);
        assert!(f.ipf);
    }

    #[test]
    fn test_partial_and_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ini(&dir, "[MLS]\nFALLBACKS_IPF=maybe\n[OTHER]\nFALLBACKS_LACF=false\n");
        let f = load_fallbacks(&path);
        assert!(f.lacf);
        assert!(f.ipf);
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_default_config() {
        let cfg = LocatorConfig::default();
        assert_eq!(cfg.request_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.key_path, PathBuf::from("/etc/yandex.key"));
    }
}
