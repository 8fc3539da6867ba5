use crate::TradeMode;

/// All deployment configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
/// Detection/cadence tunables live in the scanner TOML file instead.
#[derive(Debug, Clone)]
pub struct Config {
    // Broker access (read-only quote/history API)
    pub broker_base_url: String,
    pub broker_client_id: String,
    pub broker_access_token: String,

    // Trading
    pub trade_mode: TradeMode,

    // Session owner; every store row is keyed by this
    pub tenant: String,

    // Database
    pub database_url: String,

    // Scanner config file path
    pub scanner_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trade_mode = match required_env("TRADE_MODE").to_lowercase().as_str() {
            "virtual" => TradeMode::Virtual,
            "live" => TradeMode::Live,
            other => panic!("ERROR: TRADE_MODE must be 'virtual' or 'live', got: '{other}'"),
        };

        // Broker credentials are only exercised in live mode; virtual
        // sessions run entirely against the replay source.
        let (broker_client_id, broker_access_token) = match trade_mode {
            TradeMode::Live => (
                required_env("BROKER_CLIENT_ID"),
                required_env("BROKER_ACCESS_TOKEN"),
            ),
            TradeMode::Virtual => (
                optional_env("BROKER_CLIENT_ID").unwrap_or_default(),
                optional_env("BROKER_ACCESS_TOKEN").unwrap_or_default(),
            ),
        };

        Config {
            broker_base_url: optional_env("BROKER_BASE_URL")
                .unwrap_or_else(|| "https://api.broker.example".to_string()),
            broker_client_id,
            broker_access_token,
            trade_mode,
            tenant: optional_env("TENANT_ID").unwrap_or_else(|| "default".to_string()),
            database_url: required_env("DATABASE_URL"),
            scanner_config_path: optional_env("SCANNER_CONFIG_PATH")
                .unwrap_or_else(|| "config/scanner.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
