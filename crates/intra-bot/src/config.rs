//! Application configuration.
//!
//! Loaded once at startup from TOML. Every tunable has a safe default
//! except the profile table, which must be spelled out; validation runs
//! before any task is spawned and a broken config aborts the process.

use crate::error::{AppError, AppResult};
use intra_broker::{RateLimits, RestConfig, StreamConfig};
use intra_core::{InstrumentId, ProtectiveThresholds, TimeoutAction};
use intra_feed::AllocatorConfig;
use intra_feed::{FeedConfig, RetryPolicy};
use intra_orders::OrderMonitorConfig;
use intra_pipeline::{ExecutorConfig, WorkerConfig};
use intra_risk::{RiskConfig, ThresholdTable};
use intra_scheduler::{ProfileTable, StrategyProfile, TierPlan};
use intra_strategy::{EnsembleConfig, StrategyId};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Broker endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub base_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub account_no: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            ws_url: String::new(),
            api_key: String::new(),
            account_no: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Remote request quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_per_second")]
    pub per_second: u32,
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
}

fn default_per_second() -> u32 {
    20
}

fn default_per_minute() -> u32 {
    1000
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            per_minute: default_per_minute(),
        }
    }
}

/// Stream reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// 0 = retry forever.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

/// Feed cache/retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_history_len() -> usize {
    120
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            history_len: default_history_len(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// Stream-slot allocator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorSettings {
    /// External concurrent-registration limit.
    #[serde(default = "default_slot_capacity")]
    pub capacity: usize,
    #[serde(default = "default_eviction_margin")]
    pub eviction_margin: f64,
    #[serde(default = "default_score_cooldown_secs")]
    pub score_cooldown_secs: u64,
    #[serde(default = "default_baseline_score")]
    pub baseline_score: f64,
}

fn default_slot_capacity() -> usize {
    41
}

fn default_eviction_margin() -> f64 {
    5.0
}

fn default_score_cooldown_secs() -> u64 {
    300
}

fn default_baseline_score() -> f64 {
    50.0
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            capacity: default_slot_capacity(),
            eviction_margin: default_eviction_margin(),
            score_cooldown_secs: default_score_cooldown_secs(),
            baseline_score: default_baseline_score(),
        }
    }
}

/// Worker/queue/executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_reshuffle_period_secs")]
    pub reshuffle_period_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_signal_age_secs")]
    pub max_signal_age_secs: u64,
    #[serde(default = "default_price_band_pct")]
    pub price_band_pct: Decimal,
    #[serde(default = "default_min_agreeing")]
    pub min_agreeing: usize,
    #[serde(default = "default_min_ensemble_score")]
    pub min_ensemble_score: Decimal,
}

fn default_workers() -> usize {
    4
}

fn default_scan_interval_ms() -> u64 {
    2000
}

fn default_reshuffle_period_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_signal_age_secs() -> u64 {
    60
}

fn default_price_band_pct() -> Decimal {
    Decimal::ONE
}

fn default_min_agreeing() -> usize {
    1
}

fn default_min_ensemble_score() -> Decimal {
    dec!(60)
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            scan_interval_ms: default_scan_interval_ms(),
            reshuffle_period_secs: default_reshuffle_period_secs(),
            queue_capacity: default_queue_capacity(),
            max_signal_age_secs: default_max_signal_age_secs(),
            price_band_pct: default_price_band_pct(),
            min_agreeing: default_min_agreeing(),
            min_ensemble_score: default_min_ensemble_score(),
        }
    }
}

/// Per-strategy exit parameters as written in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSettings {
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_trigger_pct: Decimal,
    pub trailing_gap_pct: Decimal,
    pub min_holding_minutes: u64,
    #[serde(default = "default_time_exit_multiple")]
    pub time_exit_multiple: Decimal,
    #[serde(default = "default_time_exit_min_profit_pct")]
    pub time_exit_min_profit_pct: Decimal,
    #[serde(default = "default_emergency_drop_pct")]
    pub emergency_drop_pct: Decimal,
}

fn default_time_exit_multiple() -> Decimal {
    dec!(2.5)
}

fn default_time_exit_min_profit_pct() -> Decimal {
    dec!(0.3)
}

fn default_emergency_drop_pct() -> Decimal {
    dec!(-10.0)
}

impl From<&ExitSettings> for ProtectiveThresholds {
    fn from(settings: &ExitSettings) -> Self {
        Self {
            stop_loss_pct: settings.stop_loss_pct,
            take_profit_pct: settings.take_profit_pct,
            trailing_trigger_pct: settings.trailing_trigger_pct,
            trailing_gap_pct: settings.trailing_gap_pct,
            min_holding: Duration::from_secs(settings.min_holding_minutes * 60),
            time_exit_multiple: settings.time_exit_multiple,
            time_exit_min_profit_pct: settings.time_exit_min_profit_pct,
            emergency_drop_pct: settings.emergency_drop_pct,
        }
    }
}

/// Risk gate and exit monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: Decimal,
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
    #[serde(default = "default_volatility_ceiling_pct")]
    pub volatility_ceiling_pct: Decimal,
    #[serde(default = "default_exit_check_interval_secs")]
    pub exit_check_interval_secs: u64,
    /// Per-strategy exit tables keyed by strategy name.
    #[serde(default)]
    pub exits: HashMap<String, ExitSettings>,
}

fn default_max_positions() -> usize {
    10
}

fn default_position_size_pct() -> Decimal {
    dec!(20)
}

fn default_daily_loss_limit() -> Decimal {
    dec!(500000)
}

fn default_volatility_ceiling_pct() -> Decimal {
    dec!(8)
}

fn default_exit_check_interval_secs() -> u64 {
    3
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            position_size_pct: default_position_size_pct(),
            daily_loss_limit: default_daily_loss_limit(),
            volatility_ceiling_pct: default_volatility_ceiling_pct(),
            exit_check_interval_secs: default_exit_check_interval_secs(),
            exits: HashMap::new(),
        }
    }
}

/// Pending-order escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSettings {
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_adjust_timeout_secs")]
    pub adjust_timeout_secs: u64,
    #[serde(default = "default_max_adjustments")]
    pub max_adjustments: u32,
    #[serde(default = "default_adjust_step_pct")]
    pub adjust_step_pct: Decimal,
    #[serde(default = "default_force_market_after_secs")]
    pub force_market_after_secs: u64,
    #[serde(default = "default_buy_timeout_action")]
    pub buy_timeout_action: TimeoutAction,
    #[serde(default = "default_sell_timeout_action")]
    pub sell_timeout_action: TimeoutAction,
    #[serde(default = "default_order_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_submit_timeout_secs() -> u64 {
    300
}

fn default_adjust_timeout_secs() -> u64 {
    60
}

fn default_max_adjustments() -> u32 {
    3
}

fn default_adjust_step_pct() -> Decimal {
    dec!(0.3)
}

fn default_force_market_after_secs() -> u64 {
    600
}

fn default_buy_timeout_action() -> TimeoutAction {
    TimeoutAction::PriceAdjust
}

fn default_sell_timeout_action() -> TimeoutAction {
    TimeoutAction::MarketOrder
}

fn default_order_check_interval_secs() -> u64 {
    5
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            submit_timeout_secs: default_submit_timeout_secs(),
            adjust_timeout_secs: default_adjust_timeout_secs(),
            max_adjustments: default_max_adjustments(),
            adjust_step_pct: default_adjust_step_pct(),
            force_market_after_secs: default_force_market_after_secs(),
            buy_timeout_action: default_buy_timeout_action(),
            sell_timeout_action: default_sell_timeout_action(),
            check_interval_secs: default_order_check_interval_secs(),
        }
    }
}

/// Record writer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_record_buffer")]
    pub buffer_size: usize,
}

fn default_data_dir() -> String {
    "./data/records".to_string()
}

fn default_record_buffer() -> usize {
    100
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            buffer_size: default_record_buffer(),
        }
    }
}

/// One time-window profile as written in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub name: String,
    /// HH:MM, KST.
    pub start: String,
    /// HH:MM, KST (exclusive).
    pub end: String,
    /// strategy name -> weight; weights should sum to 1.
    pub weights: HashMap<String, Decimal>,
    #[serde(default = "default_critical_slots")]
    pub critical_slots: usize,
    #[serde(default = "default_high_slots")]
    pub high_slots: usize,
    /// Candidate instruments, best ranked first.
    #[serde(default)]
    pub watchlist: Vec<String>,
}

fn default_critical_slots() -> usize {
    5
}

fn default_high_slots() -> usize {
    20
}

/// The full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub allocator: AllocatorSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub orders: OrderSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    /// Required: the time-window strategy table.
    pub profiles: Vec<ProfileSettings>,
}

impl Settings {
    /// Load and validate from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("cannot parse {}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Fail-fast sanity checks, run before anything spawns.
    pub fn validate(&self) -> AppResult<()> {
        if self.profiles.is_empty() {
            return Err(AppError::Config("at least one profile is required".into()));
        }
        if self.rate_limit.per_second == 0 || self.rate_limit.per_minute == 0 {
            return Err(AppError::Config("rate limits must be positive".into()));
        }
        if self.allocator.capacity == 0 {
            return Err(AppError::Config("slot capacity must be positive".into()));
        }
        if self.pipeline.workers == 0 {
            return Err(AppError::Config("at least one worker is required".into()));
        }

        for profile in &self.profiles {
            parse_hhmm(&profile.start)
                .ok_or_else(|| bad_profile(&profile.name, "start is not HH:MM"))?;
            parse_hhmm(&profile.end)
                .ok_or_else(|| bad_profile(&profile.name, "end is not HH:MM"))?;
            if profile.weights.is_empty() {
                return Err(bad_profile(&profile.name, "no strategy weights"));
            }
            for (name, weight) in &profile.weights {
                name.parse::<StrategyId>()
                    .map_err(|e| bad_profile(&profile.name, &e.to_string()))?;
                if *weight <= Decimal::ZERO || *weight > Decimal::ONE {
                    return Err(bad_profile(
                        &profile.name,
                        &format!("weight for {name} must be in (0, 1]"),
                    ));
                }
            }
            let total: Decimal = profile.weights.values().copied().sum();
            if total > dec!(1.001) {
                return Err(bad_profile(&profile.name, "weights sum above 1"));
            }
            for code in &profile.watchlist {
                InstrumentId::new(code.clone())
                    .map_err(|e| bad_profile(&profile.name, &e.to_string()))?;
            }
            let demand = profile.critical_slots * 2 + profile.high_slots;
            if demand > self.allocator.capacity {
                return Err(bad_profile(
                    &profile.name,
                    &format!(
                        "tier plan needs {demand} slots, capacity is {}",
                        self.allocator.capacity
                    ),
                ));
            }
        }

        for strategy in self.risk.exits.keys() {
            strategy
                .parse::<StrategyId>()
                .map_err(|e| AppError::Config(format!("risk.exits: {e}")))?;
        }

        Ok(())
    }

    // --- Conversions into component configs ---

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            per_second: self.rate_limit.per_second,
            per_minute: self.rate_limit.per_minute,
        }
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.broker.base_url.clone(),
            api_key: self.broker.api_key.clone(),
            account_no: self.broker.account_no.clone(),
            request_timeout: Duration::from_millis(self.broker.request_timeout_ms),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.broker.ws_url.clone(),
            max_reconnect_attempts: self.stream.max_reconnect_attempts,
            reconnect_base_delay_ms: self.stream.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.stream.reconnect_max_delay_ms,
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            history_len: self.feed.history_len,
            retry: RetryPolicy {
                max_attempts: self.feed.retry_max_attempts,
                base_delay_ms: self.feed.retry_base_delay_ms,
            },
        }
    }

    pub fn allocator_config(&self) -> AllocatorConfig {
        AllocatorConfig {
            capacity: self.allocator.capacity,
            eviction_margin: self.allocator.eviction_margin,
            score_cooldown: Duration::from_secs(self.allocator.score_cooldown_secs),
            baseline_score: self.allocator.baseline_score,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.pipeline.workers,
            scan_interval: Duration::from_millis(self.pipeline.scan_interval_ms),
            reshuffle_period: Duration::from_secs(self.pipeline.reshuffle_period_secs),
        }
    }

    pub fn ensemble_config(&self) -> EnsembleConfig {
        EnsembleConfig {
            min_agreeing: self.pipeline.min_agreeing,
            min_score: self.pipeline.min_ensemble_score,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_signal_age: Duration::from_secs(self.pipeline.max_signal_age_secs),
            price_band_pct: self.pipeline.price_band_pct,
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            max_positions: self.risk.max_positions,
            position_size_pct: self.risk.position_size_pct,
            daily_loss_limit: self.risk.daily_loss_limit,
            volatility_ceiling_pct: self.risk.volatility_ceiling_pct,
        }
    }

    pub fn order_monitor_config(&self) -> OrderMonitorConfig {
        OrderMonitorConfig {
            submit_timeout: Duration::from_secs(self.orders.submit_timeout_secs),
            adjust_timeout: Duration::from_secs(self.orders.adjust_timeout_secs),
            max_adjustments: self.orders.max_adjustments,
            adjust_step_pct: self.orders.adjust_step_pct,
            force_market_after: Duration::from_secs(self.orders.force_market_after_secs),
            buy_timeout_action: self.orders.buy_timeout_action,
            sell_timeout_action: self.orders.sell_timeout_action,
            check_interval: Duration::from_secs(self.orders.check_interval_secs),
        }
    }

    /// Build the scheduler's window table. `validate()` must have passed.
    pub fn profile_table(&self) -> AppResult<ProfileTable> {
        let mut profiles = Vec::with_capacity(self.profiles.len());
        for settings in &self.profiles {
            let start = parse_hhmm(&settings.start)
                .ok_or_else(|| bad_profile(&settings.name, "start is not HH:MM"))?;
            let end = parse_hhmm(&settings.end)
                .ok_or_else(|| bad_profile(&settings.name, "end is not HH:MM"))?;

            let mut weights = Vec::with_capacity(settings.weights.len());
            for (name, weight) in &settings.weights {
                let id = name
                    .parse::<StrategyId>()
                    .map_err(|e| bad_profile(&settings.name, &e.to_string()))?;
                weights.push((id, *weight));
            }
            // Deterministic evaluation order regardless of map iteration.
            weights.sort_by_key(|(id, _)| id.as_str());

            let mut watchlist = Vec::with_capacity(settings.watchlist.len());
            for code in &settings.watchlist {
                watchlist.push(
                    InstrumentId::new(code.clone())
                        .map_err(|e| bad_profile(&settings.name, &e.to_string()))?,
                );
            }

            profiles.push(StrategyProfile {
                name: settings.name.clone(),
                start,
                end,
                weights,
                tier_plan: TierPlan {
                    critical: settings.critical_slots,
                    high: settings.high_slots,
                },
                watchlist,
            });
        }
        Ok(ProfileTable::new(profiles))
    }

    /// Build the per-strategy exit threshold table.
    pub fn threshold_table(&self) -> AppResult<ThresholdTable> {
        if self.risk.exits.is_empty() {
            return Ok(ThresholdTable::default());
        }
        let mut by_strategy = HashMap::new();
        for (name, exit) in &self.risk.exits {
            let id = name
                .parse::<StrategyId>()
                .map_err(|e| AppError::Config(format!("risk.exits: {e}")))?;
            by_strategy.insert(id, ProtectiveThresholds::from(exit));
        }
        Ok(ThresholdTable::new(
            by_strategy,
            ProtectiveThresholds::conservative(),
        ))
    }
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

fn bad_profile(name: &str, reason: &str) -> AppError {
    AppError::Config(format!("profile '{name}': {reason}"))
}
