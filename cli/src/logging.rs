//! Subscriber setup for `chainwatch serve`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The `log` section of the config file.
///
/// ```json
/// "log": { "level": "warn", "components": { "chainwatch-core": "debug" }, "json": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Crate name to level. Dashes are accepted.
    pub components: BTreeMap<String, String>,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.components
                    .iter()
                    .map(|(target, level)| format!("{}={level}", target.replace('-', "_"))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// `RUST_LOG` wins over the config file. A config that does not parse
/// yields `None` so the caller can report it once logging is up.
fn env_filter(config: &LogConfig) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    match EnvFilter::try_new(config.directives()) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new("info"), Some(e.to_string())),
    }
}

pub fn init_tracing(config: &LogConfig) {
    let (filter, rejected) = env_filter(config);
    let json = config.json.then(|| fmt::layer().json());
    let text = (!config.json).then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();

    if let Some(reason) = rejected {
        tracing::warn!(directives = %config.directives(), %reason, "invalid log config, using info");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_components() {
        let config = LogConfig {
            level: "warn".into(),
            components: [
                ("chainwatch-core".to_string(), "debug".to_string()),
                ("chainwatch-evm".to_string(), "trace".to_string()),
            ]
            .into_iter()
            .collect(),
            json: false,
        };
        assert_eq!(
            config.directives(),
            "warn,chainwatch_core=debug,chainwatch_evm=trace"
        );
    }

    #[test]
    fn defaults_from_empty_object() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.directives(), "info");
    }

    #[test]
    fn partial_object_keeps_other_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
    }
}
