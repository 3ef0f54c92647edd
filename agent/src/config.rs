//! `config.json` (§6, `SPEC_FULL.md` B.3): the agent's non-secret
//! configuration, deserialized the same way the teacher's
//! `core::system::config::SystemConfig` assembles plain serde structs.
//!
//! Secrets (`secrets.enc`) are handled separately in [`crate::secrets`] — a
//! misconfigured `config.json` should fail loudly at startup, but it never
//! carries anything that would widen the blast radius of a leaked file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use agent_types::SafetyLimits;

use crate::error::AgentError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub push_channel: String,
    pub push_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_in_flight_cap")]
    pub in_flight_cap: usize,
}

fn default_pool_size() -> usize {
    3
}

fn default_in_flight_cap() -> usize {
    8
}

/// Where a configured strategy's rule tree comes from: inline in
/// `config.json`, or a path to its own JSON file (so a large rule tree
/// doesn't have to live inline).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StrategyRef {
    Inline(agent_types::Strategy),
    File { path: PathBuf },
}

impl StrategyRef {
    pub fn resolve(&self, base_dir: &Path) -> Result<agent_types::Strategy, AgentError> {
        match self {
            StrategyRef::Inline(strategy) => Ok(strategy.clone()),
            StrategyRef::File { path } => {
                let full = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                let contents = std::fs::read_to_string(&full)?;
                serde_json::from_str(&contents).map_err(AgentError::from)
            }
        }
    }
}

/// Where the AES key protecting `secrets.enc` comes from (§9 "Secrets at
/// rest"). Mirrors `agent_crypto::secretstore::KeySource` but stays a plain
/// config value here so `config.json` never needs to embed a passphrase.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SecretSourceConfig {
    #[default]
    OsKeychain,
    /// The passphrase itself is read from the `AGENT_PASSPHRASE`
    /// environment variable at startup, never from this file.
    Passphrase,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub agent_id: String,
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub bridge: BridgeConfigOrDefault,
    pub safety: SafetyLimits,
    #[serde(default)]
    pub strategies: Vec<StrategyRef>,
    #[serde(default)]
    pub secret_source: SecretSourceConfig,
    /// Overrides the OS per-user data directory (§6) that holds
    /// `audit.log`, `outbox.log`, and `secrets.enc`.
    pub data_dir: Option<PathBuf>,
}

/// Wraps [`BridgeConfig`] so the whole `bridge` key can be omitted from
/// `config.json` and still produce sane defaults, instead of requiring an
/// empty `"bridge": {}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "Option<BridgeConfig>")]
pub struct BridgeConfigOrDefault(pub BridgeConfig);

impl Default for BridgeConfigOrDefault {
    fn default() -> Self {
        Self(BridgeConfig {
            pool_size: default_pool_size(),
            in_flight_cap: default_in_flight_cap(),
        })
    }
}

impl From<Option<BridgeConfig>> for BridgeConfigOrDefault {
    fn from(value: Option<BridgeConfig>) -> Self {
        match value {
            Some(cfg) => Self(cfg),
            None => Self::default(),
        }
    }
}

impl AgentConfig {
    /// Loads and validates `config.json`. Validation failures are reported
    /// together rather than one at a time, so a misconfigured agent can be
    /// fixed in one pass instead of failing, being patched, and failing
    /// again on the next field (§6 "Operator surface": fail fast, exit 1).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: AgentConfig = serde_json::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgentError> {
        let mut problems = Vec::new();

        if self.agent_id.trim().is_empty() {
            problems.push("agentId must not be empty".to_string());
        }
        if url::Url::parse(&self.control_plane.base_url).is_err() {
            problems.push(format!(
                "controlPlane.baseUrl is not a valid URL: {}",
                self.control_plane.base_url
            ));
        }
        if self.bridge.0.pool_size == 0 {
            problems.push("bridge.poolSize must be at least 1".to_string());
        }
        if self.safety.allowed_symbols.is_empty() {
            problems.push("safety.allowedSymbols must not be empty".to_string());
        }
        for (start, end) in &self.safety.forbidden_hours {
            if *start > 23 || *end > 23 {
                problems.push(format!("safety.forbiddenHours entry ({start}, {end}) out of range"));
            }
        }

        let mut seen_ids = std::collections::HashSet::new();
        for strategy_ref in &self.strategies {
            if let StrategyRef::Inline(strategy) = strategy_ref {
                if !seen_ids.insert(strategy.id.clone()) {
                    problems.push(format!("duplicate strategy id: {}", strategy.id));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Config(problems.join("; ")))
        }
    }

    /// The per-user data directory holding `audit.log`, `outbox.log`, and
    /// `secrets.enc`, created if missing (§6).
    pub fn resolve_data_dir(&self) -> Result<PathBuf, AgentError> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| AgentError::Config("could not determine OS data directory".into()))?
                .join("trading-agent"),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "agentId": "agent-1",
            "controlPlane": {
                "baseUrl": "https://control.example.com",
                "pushChannel": "agent-1",
                "pushToken": "token"
            },
            "safety": {
                "maxDailyLossPct": 5.0,
                "maxDrawdownPct": 10.0,
                "maxOpenPositions": 5,
                "maxLotSize": "1.0",
                "maxRiskPerTradePct": 2.0,
                "allowedSymbols": ["EURUSD"],
                "forbiddenHours": []
            }
        }"#
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: AgentConfig = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(config.bridge.0.pool_size, 3);
        assert_eq!(config.bridge.0.in_flight_cap, 8);
        assert!(config.strategies.is_empty());
    }

    #[test]
    fn validation_rejects_empty_allowlist() {
        let mut config: AgentConfig = serde_json::from_str(minimal_json()).unwrap();
        config.safety.allowed_symbols.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_url() {
        let mut config: AgentConfig = serde_json::from_str(minimal_json()).unwrap();
        config.control_plane.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }
}
