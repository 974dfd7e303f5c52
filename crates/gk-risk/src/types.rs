use std::collections::BTreeMap;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Decision / RuleId
// ---------------------------------------------------------------------------

/// Tri-valued gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
    ManualReview,
}

/// Stable rule identifiers carried in decisions and audit payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleId {
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    #[serde(rename = "SIMULATION_FAILED")]
    SimulationFailed,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::R1 => "R1",
            RuleId::R2 => "R2",
            RuleId::R3 => "R3",
            RuleId::R4 => "R4",
            RuleId::R5 => "R5",
            RuleId::R6 => "R6",
            RuleId::R7 => "R7",
            RuleId::R8 => "R8",
            RuleId::R9 => "R9",
            RuleId::R10 => "R10",
            RuleId::R11 => "R11",
            RuleId::R12 => "R12",
            RuleId::SimulationFailed => "SIMULATION_FAILED",
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Heterogeneous metric value. Money and quantities stay decimal;
/// volatilities and percentage intermediates may be floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
}

impl From<Decimal> for MetricValue {
    fn from(v: Decimal) -> Self {
        MetricValue::Decimal(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

pub type Metrics = BTreeMap<String, MetricValue>;

// ---------------------------------------------------------------------------
// RiskDecision
// ---------------------------------------------------------------------------

/// Evaluation result: decision plus the evidence behind it. Violated rules
/// are listed in fixed evaluation order (R1..R12); metrics iterate in key
/// order, so equal inputs serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub decision: Decision,
    pub reason: String,
    #[serde(default)]
    pub violated_rules: Vec<RuleId>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub metrics: Metrics,
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approve
    }

    pub fn is_rejected(&self) -> bool {
        self.decision == Decision::Reject
    }
}

// ---------------------------------------------------------------------------
// Policy building blocks
// ---------------------------------------------------------------------------

/// Numeric limits for the basic rules (R1–R4, R6–R8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// R1: maximum gross notional per order.
    pub max_notional: Decimal,
    /// R2: maximum post-trade position value as % of portfolio.
    pub max_position_pct: Decimal,
    /// R3: maximum exposure to a single sector as % of portfolio.
    pub max_sector_exposure_pct: Decimal,
    /// R4: maximum acceptable slippage in basis points.
    pub max_slippage_bps: u32,
    /// R6: minimum required average daily volume.
    pub min_daily_volume: u64,
    /// R7: maximum trades per day.
    pub max_daily_trades: u32,
    /// R8: maximum allowed loss per day (positive USD amount).
    pub max_daily_loss: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_notional: Decimal::new(50_000_00, 2),
            max_position_pct: Decimal::new(100, 1),
            max_sector_exposure_pct: Decimal::new(300, 1),
            max_slippage_bps: 50,
            min_daily_volume: 100_000,
            max_daily_trades: 50,
            max_daily_loss: Decimal::new(5_000_00, 2),
        }
    }
}

/// Trading-hours window for R5. Times are UTC, `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingHours {
    pub allow_pre_market: bool,
    pub allow_after_hours: bool,
    #[serde(with = "hhmm")]
    pub market_open_utc: NaiveTime,
    #[serde(with = "hhmm")]
    pub market_close_utc: NaiveTime,
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            allow_pre_market: false,
            allow_after_hours: false,
            market_open_utc: NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            market_close_utc: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
        }
    }
}

impl TradingHours {
    /// Permissive window used by tests and paper runs: any time of day.
    pub fn always_open() -> Self {
        Self {
            allow_pre_market: true,
            allow_after_hours: true,
            ..Default::default()
        }
    }
}

/// Per-rule enable map. Missing keys default to enabled; R3/R6 evaluate as
/// documented skips while their data sources are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesEnabled {
    #[serde(rename = "R1")]
    pub r1: bool,
    #[serde(rename = "R2")]
    pub r2: bool,
    #[serde(rename = "R3")]
    pub r3: bool,
    #[serde(rename = "R4")]
    pub r4: bool,
    #[serde(rename = "R5")]
    pub r5: bool,
    #[serde(rename = "R6")]
    pub r6: bool,
    #[serde(rename = "R7")]
    pub r7: bool,
    #[serde(rename = "R8")]
    pub r8: bool,
}

impl Default for RulesEnabled {
    fn default() -> Self {
        Self {
            r1: true,
            r2: true,
            r3: true,
            r4: true,
            r5: true,
            r6: true,
            r7: true,
            r8: true,
        }
    }
}

/// Caller-maintained daily state fed into engine construction. The engine
/// itself never mutates these; whoever owns the trading day owns their
/// lifecycle (reset at rollover, increment on fills, track the peak).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyCounters {
    pub trades_count: u32,
    pub daily_pnl: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_water_mark: Option<Decimal>,
}

/// `HH:MM` serde representation for [`NaiveTime`] fields.
pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
