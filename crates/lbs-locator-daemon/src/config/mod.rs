//! Configuration loading and resolution.
//!
//! Every path resolves as: explicit flag, then environment variable, then
//! the built-in default.

use std::path::PathBuf;

use lbs_locator::config::{DEFAULT_FALLBACKS_PATH, DEFAULT_KEY_PATH};
use lbs_locator::transport::DEFAULT_ENDPOINT;
use lbs_locator::{load_fallbacks, LocatorConfig};

pub const KEY_ENV: &str = "LBS_LOCATOR_KEY";
pub const STATE_ENV: &str = "LBS_LOCATOR_STATE";
pub const CONFIG_ENV: &str = "LBS_LOCATOR_CONFIG";
pub const ENDPOINT_ENV: &str = "LBS_LOCATOR_ENDPOINT";

/// Values given on the command line, if any.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub key: Option<String>,
    pub state: Option<String>,
    pub config: Option<String>,
    pub endpoint: Option<String>,
}

fn explicit_or_env(explicit: Option<&str>, var: &str) -> Option<String> {
    if let Some(value) = explicit {
        return Some(value.to_string());
    }
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the lookup key file path.
pub fn resolve_key_path(explicit: Option<&str>) -> PathBuf {
    explicit_or_env(explicit, KEY_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_PATH))
}

/// Resolve the persistent state file path.
pub fn resolve_state_path(explicit: Option<&str>) -> PathBuf {
    explicit_or_env(explicit, STATE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(resolve_default_state_path)
}

fn resolve_default_state_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(format!("{home}/.lbs-locator/state.json"))
}

/// Resolve the fallback-preference INI path.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    explicit_or_env(explicit, CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FALLBACKS_PATH))
}

/// Resolve the lookup service endpoint.
pub fn resolve_endpoint(explicit: Option<&str>) -> String {
    explicit_or_env(explicit, ENDPOINT_ENV).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

/// Build the full locator configuration, reading fallback preferences.
pub fn build_config(overrides: &Overrides) -> LocatorConfig {
    let fallbacks = load_fallbacks(&resolve_config_path(overrides.config.as_deref()));
    LocatorConfig {
        endpoint: resolve_endpoint(overrides.endpoint.as_deref()),
        key_path: resolve_key_path(overrides.key.as_deref()),
        state_path: resolve_state_path(overrides.state.as_deref()),
        fallbacks,
        ..LocatorConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_wins() {
        assert_eq!(resolve_key_path(Some("/tmp/k")), PathBuf::from("/tmp/k"));
        assert_eq!(resolve_state_path(Some("s.json")), PathBuf::from("s.json"));
        assert_eq!(resolve_endpoint(Some("http://localhost:1")), "http://localhost:1");
    }

    #[test]
    fn test_env_fallback() {
        std::env::set_var(CONFIG_ENV, "/opt/lbs/gps_xtra.ini");
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("/opt/lbs/gps_xtra.ini")
        );
        assert_eq!(resolve_config_path(Some("x.ini")), PathBuf::from("x.ini"));
        std::env::remove_var(CONFIG_ENV);
    }

    #[test]
    fn test_default_state_under_home() {
        let path = resolve_default_state_path();
        assert!(path.ends_with(".lbs-locator/state.json"));
    }

    #[test]
    fn test_build_config_reads_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let ini = dir.path().join("gps_xtra.ini");
        std::fs::write(&ini, "[MLS]\nFALLBACKS_IPF=false\n").unwrap();

        let cfg = build_config(&Overrides {
            key: Some("/tmp/key".into()),
            state: Some(dir.path().join("state.json").display().to_string()),
            config: Some(ini.display().to_string()),
            endpoint: Some("http://127.0.0.1:9/geolocation".into()),
        });
        assert!(cfg.fallbacks.lacf);
        assert!(!cfg.fallbacks.ipf);
        assert_eq!(cfg.endpoint, "http://127.0.0.1:9/geolocation");
        assert_eq!(cfg.key_path, PathBuf::from("/tmp/key"));
    }
}
