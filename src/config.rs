use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOG_FILTER: &str = "cyberlearn_portal=info,axum=info";

/// Runtime settings, read from the environment (and `.env`, if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub catalog_base_url: Option<String>,
    pub catalog_timeout: Duration,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            data_dir: PathBuf::from("./data"),
            catalog_base_url: None,
            catalog_timeout: Duration::from_secs(10),
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: lookup("PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            catalog_base_url: lookup("CATALOG_API_URL").filter(|s| !s.trim().is_empty()),
            catalog_timeout: lookup("CATALOG_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.catalog_timeout),
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9000"),
            ("DATA_DIR", "/var/lib/portal"),
            ("CATALOG_API_URL", "https://catalog.example"),
            ("CATALOG_TIMEOUT_SECS", "soon"),
        ]);
        let cfg = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/portal"));
        assert_eq!(cfg.catalog_base_url.as_deref(), Some("https://catalog.example"));
        assert_eq!(cfg.catalog_timeout, Duration::from_secs(10));
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn blank_catalog_url_means_unconfigured() {
        let cfg = Config::from_lookup(|k| (k == "CATALOG_API_URL").then(|| "  ".to_string()));
        assert!(cfg.catalog_base_url.is_none());
        assert_eq!(cfg.port, 8081);
    }
}
