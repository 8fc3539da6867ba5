use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle from the market data feed.
/// Sequences are ordered ascending by `time` with no duplicate timestamps,
/// and are immutable once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle interval requested from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    OneMinute,
    FiveMinute,
    FifteenMinute,
    Day,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Wire values used by the broker history API.
        match self {
            Resolution::OneMinute => write!(f, "1"),
            Resolution::FiveMinute => write!(f, "5"),
            Resolution::FifteenMinute => write!(f, "15"),
            Resolution::Day => write!(f, "D"),
        }
    }
}

/// Stage of a tracked symbol in the discovery-to-close lifecycle.
///
/// `Unscanned → Watching → Found → Entered → Closed`, after which the
/// symbol returns to `Watching` and is eligible for re-discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum LifecycleState {
    Unscanned,
    Watching,
    Found,
    Entered,
    Closed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unscanned => write!(f, "unscanned"),
            LifecycleState::Watching => write!(f, "watching"),
            LifecycleState::Found => write!(f, "found"),
            LifecycleState::Entered => write!(f, "entered"),
            LifecycleState::Closed => write!(f, "closed"),
        }
    }
}

/// Latest analyzer output for one tracked symbol, plus its lifecycle stage.
///
/// Invariant: `entry_price > stop_price` for every stored signal. The
/// analyzer enforces this at detection time; nothing downstream corrects it.
/// `reward_ratio` is frozen at detection time and only changes when the
/// symbol is re-scanned from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub symbol: String,
    pub reference_low: f64,
    pub resistance_1: f64,
    pub resistance_2: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub reward_ratio: f64,
    pub reference_low_time: DateTime<Utc>,
    pub last_price: f64,
    pub state: LifecycleState,
}

impl PatternSignal {
    /// Reference-low time as an exchange-local (UTC+05:30) wall clock,
    /// for display. The stored value stays UTC.
    pub fn reference_low_clock(&self) -> String {
        let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        self.reference_low_time
            .with_timezone(&ist)
            .format("%H:%M:%S")
            .to_string()
    }
}

/// Whether a trade is simulated or placed against the real account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradeMode {
    Virtual,
    Live,
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeMode::Virtual => write!(f, "virtual"),
            TradeMode::Live => write!(f, "live"),
        }
    }
}

/// An open position. At most one exists per symbol at any time; the store
/// key is `(tenant, symbol)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub symbol: String,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub quantity: i64,
    pub mode: TradeMode,
}

/// How a closed trade resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum TradeOutcome {
    Target,
    Stop,
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeOutcome::Target => write!(f, "TARGET"),
            TradeOutcome::Stop => write!(f, "STOP"),
        }
    }
}

/// Append-only record of a closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub outcome: TradeOutcome,
    pub realized_pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// Owner of a trading session. Part of every store key so tenants sharing
/// one physical database never see each other's rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tenant(String);

impl Tenant {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract metadata supplied by the candle source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    /// Units per lot. Quantities are always whole multiples of this.
    pub lot_size: u32,
}

impl Default for InstrumentMeta {
    fn default() -> Self {
        Self { lot_size: 1 }
    }
}
