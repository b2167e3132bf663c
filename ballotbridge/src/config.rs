use crate::RelayConfig;
use std::env::var;
use std::time::Duration;

/// Runtime configuration, read from the environment with defaults suitable
/// for local runs.
pub struct Config {
    pub db_path: String,

    /// The only identity allowed to publish results and manage elections.
    pub operator: String,

    /// The single identity the relay writes to the ledger as.
    pub relay_identity: String,

    pub authority_key_bits: usize,
    pub relay: RelayConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let db_path = var("BALLOTBRIDGE_DB_PATH").unwrap_or(defaults.db_path);
        let operator = var("BALLOTBRIDGE_OPERATOR").unwrap_or(defaults.operator);
        let relay_identity =
            var("BALLOTBRIDGE_RELAY_IDENTITY").unwrap_or(defaults.relay_identity);

        let authority_key_bits = var("BALLOTBRIDGE_AUTHORITY_KEY_BITS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.authority_key_bits);

        let max_attempts = var("BALLOTBRIDGE_RELAY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.relay.max_attempts);
        let base_delay = var("BALLOTBRIDGE_RELAY_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.relay.base_delay);

        Config {
            db_path,
            operator,
            relay_identity,
            authority_key_bits,
            relay: RelayConfig {
                max_attempts,
                base_delay,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: "./ballotbridge.db".to_owned(),
            operator: "election-commission".to_owned(),
            relay_identity: "election-commission".to_owned(),
            authority_key_bits: 2048,
            relay: RelayConfig::default(),
        }
    }
}
