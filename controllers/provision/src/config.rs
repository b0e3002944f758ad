//! Controller configuration.
//!
//! Loaded once at startup from an optional YAML file plus environment
//! overrides, validated, then passed immutably into the controller and
//! workflow constructors. No shared mutable configuration state exists
//! after startup.

use crate::error::ProvisionError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the YAML config file
pub const CONFIG_PATH_ENV: &str = "PROVISION_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "provision.yaml";

/// Options controlling how provisioning works
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProvisionConfig {
    /// How often to look for newly joined nodes, in seconds
    pub period_secs: u64,
    /// Max nodes to provision in one cycle (also the concurrency bound)
    pub bulk_limit: usize,
    /// Nodes carrying any of these label keys are never provisioned
    pub ignored_labels: BTreeMap<String, String>,
    /// Label key applied once provisioning succeeds, making the node
    /// targetable by workload schedulers
    pub target_label_key: String,
    /// Value for the target label
    pub target_label_value: String,
    /// Provision attempts per node before forcing the failed state
    pub max_attempts: u32,
    /// Retries of a transient install failure within one cycle
    pub install_retries: u32,
    /// Retries of a conditional patch that hit a version conflict
    pub patch_conflict_retries: u32,
    /// Full inventory re-list period, in seconds
    pub resync_period_secs: u64,
    /// Run a tick that came due while the previous one was still running,
    /// instead of skipping it
    pub queue_missed_ticks: bool,
    /// Playbook executed against each node during the install stage
    pub playbook_path: PathBuf,
    /// Optional ansible inventory; without it an ad-hoc per-node inventory
    /// is built from the node's address
    pub inventory_path: Option<PathBuf>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            bulk_limit: 1,
            ignored_labels: BTreeMap::new(),
            target_label_key: String::new(),
            target_label_value: "true".to_string(),
            max_attempts: 3,
            install_retries: 2,
            patch_conflict_retries: 3,
            resync_period_secs: 3600,
            queue_missed_ticks: false,
            playbook_path: PathBuf::new(),
            inventory_path: None,
        }
    }
}

impl ProvisionConfig {
    /// Reconciliation period.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// Inventory resync period.
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Load configuration from the YAML file named by `PROVISION_CONFIG`
    /// (default `provision.yaml`, skipped when absent), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ProvisionError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_yaml(&text)
                .map_err(|e| e.context(format!("config file {}", path)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(ProvisionError::configuration(format!(
                    "cannot read config file {}: {}",
                    path, e
                )));
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a YAML document into a config.
    pub fn from_yaml(text: &str) -> Result<Self, ProvisionError> {
        serde_yaml::from_str(text)
            .map_err(|e| ProvisionError::configuration(format!("invalid config: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ProvisionError> {
        if let Ok(value) = std::env::var("PROVISION_PERIOD_SECS") {
            self.period_secs = parse_env("PROVISION_PERIOD_SECS", &value)?;
        }
        if let Ok(value) = std::env::var("PROVISION_BULK_LIMIT") {
            self.bulk_limit = parse_env("PROVISION_BULK_LIMIT", &value)?;
        }
        if let Ok(value) = std::env::var("PROVISION_MAX_ATTEMPTS") {
            self.max_attempts = parse_env("PROVISION_MAX_ATTEMPTS", &value)?;
        }
        if let Ok(value) = std::env::var("PROVISION_TARGET_LABEL") {
            let (key, val) = parse_label_pair(&value)?;
            self.target_label_key = key;
            self.target_label_value = val;
        }
        if let Ok(value) = std::env::var("PROVISION_IGNORED_LABELS") {
            self.ignored_labels = parse_label_map(&value)?;
        }
        if let Ok(value) = std::env::var("PROVISION_PLAYBOOK_PATH") {
            self.playbook_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("PROVISION_INVENTORY_PATH") {
            self.inventory_path = Some(PathBuf::from(value));
        }
        Ok(())
    }

    /// Validate the configuration. Called once before the loop starts;
    /// failures here prevent the process from starting.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.period_secs == 0 {
            return Err(ProvisionError::configuration("period must be at least 1s"));
        }
        if self.bulk_limit == 0 {
            return Err(ProvisionError::configuration(
                "bulk-limit must be at least 1",
            ));
        }
        if self.max_attempts == 0 {
            return Err(ProvisionError::configuration(
                "max-attempts must be at least 1",
            ));
        }
        if self.target_label_key.is_empty() {
            return Err(ProvisionError::configuration(
                "target-label-key must be set",
            ));
        }
        if self.playbook_path.as_os_str().is_empty() {
            return Err(ProvisionError::configuration("playbook-path must be set"));
        }
        Ok(())
    }
}

/// Parse a `key=value` pair (value defaults to "true" when omitted).
fn parse_label_pair(raw: &str) -> Result<(String, String), ProvisionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProvisionError::configuration("empty label"));
    }
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        Some(_) => Err(ProvisionError::configuration(format!(
            "label {:?} has an empty key",
            raw
        ))),
        None => Ok((raw.to_string(), "true".to_string())),
    }
}

/// Parse a comma-separated `key=value` list into a label map.
fn parse_label_map(raw: &str) -> Result<BTreeMap<String, String>, ProvisionError> {
    let mut labels = BTreeMap::new();
    for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let (key, value) = parse_label_pair(entry)?;
        labels.insert(key, value);
    }
    Ok(labels)
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ProvisionError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| {
        ProvisionError::configuration(format!("invalid {} value {:?}: {}", name, value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn valid_config() -> ProvisionConfig {
        ProvisionConfig {
            target_label_key: "pai-worker".to_string(),
            playbook_path: PathBuf::from("/opt/provision/playbooks/site.yml"),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ProvisionConfig::default();
        assert_eq!(config.period(), Duration::from_secs(60));
        assert_eq!(config.bulk_limit, 1);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.resync_period(), Duration::from_secs(3600));
        assert!(!config.queue_missed_ticks);
    }

    #[test]
    fn validation_accepts_a_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validation_rejects_missing_target_label() {
        let config = ProvisionConfig {
            target_label_key: String::new(),
            ..valid_config()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn validation_rejects_zero_bulk_limit() {
        let config = ProvisionConfig {
            bulk_limit: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let config = ProvisionConfig::from_yaml(
            "period-secs: 30\n\
             bulk-limit: 5\n\
             target-label-key: pai-worker\n\
             ignored-labels:\n\
             \x20 skip: \"true\"\n\
             playbook-path: /playbooks/site.yml\n",
        )
        .unwrap();
        assert_eq!(config.period_secs, 30);
        assert_eq!(config.bulk_limit, 5);
        assert_eq!(config.ignored_labels.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_yaml_fields_are_rejected() {
        assert!(ProvisionConfig::from_yaml("bogus-field: 1\n").is_err());
    }

    #[test]
    fn label_pair_defaults_value_to_true() {
        assert_eq!(
            parse_label_pair("skip").unwrap(),
            ("skip".to_string(), "true".to_string())
        );
        assert_eq!(
            parse_label_pair("skip=false").unwrap(),
            ("skip".to_string(), "false".to_string())
        );
        assert!(parse_label_pair("=x").is_err());
    }

    #[test]
    fn label_map_parses_comma_separated_pairs() {
        let labels = parse_label_map("skip=true,infra=storage").unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("infra").map(String::as_str), Some("storage"));
    }
}
