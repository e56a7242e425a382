// Sald Bridge Configuration
// Loaded from JSON, either inline or through SALD_BRIDGE_CONFIG

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};

/// Environment variable holding a JSON bridge configuration
pub const CONFIG_ENV: &str = "SALD_BRIDGE_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Reuse built callables while they are referenced.
    pub cache_callables: bool,
    /// Treat the 4th argument of `GObject.ClosureMarshal` as a value array.
    pub closure_marshal_fixup: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cache_callables: true,
            closure_marshal_fixup: false,
            log_filter: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Reads `SALD_BRIDGE_CONFIG`; defaults apply when it is unset.
    pub fn from_env() -> BridgeResult<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => Self::from_json(&json),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(BridgeError::Config(format!("{}: {}", CONFIG_ENV, e))),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing plain fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(r#"{ "closure_marshal_fixup": true }"#).unwrap();
        assert!(config.cache_callables);
        assert!(config.closure_marshal_fixup);
        assert_eq!(config.log_filter, None);
    }

    #[test]
    fn test_malformed_config() {
        let err = BridgeConfig::from_json(r#"{ "cache_callables": "yes" }"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_json_round_trip() {
        let config = BridgeConfig {
            log_filter: Some("sald_bridge=debug".to_string()),
            ..BridgeConfig::default()
        };
        assert_eq!(BridgeConfig::from_json(&config.to_json()).unwrap(), config);
    }
}
