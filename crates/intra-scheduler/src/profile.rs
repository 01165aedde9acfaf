//! Strategy profiles and the window table.

use chrono::NaiveTime;
use intra_core::{DataPriority, InstrumentId};
use intra_strategy::StrategyId;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Target live-slot composition while a profile is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TierPlan {
    /// Instruments streamed at critical tier (two slots each).
    pub critical: usize,
    /// Instruments streamed at high tier (one slot each).
    pub high: usize,
}

impl TierPlan {
    pub fn slot_demand(&self) -> usize {
        self.critical * DataPriority::Critical.slot_cost()
            + self.high * DataPriority::High.slot_cost()
    }

    /// Tier for a candidate at the given rank (0 = best).
    pub fn tier_for_rank(&self, rank: usize) -> DataPriority {
        if rank < self.critical {
            DataPriority::Critical
        } else if rank < self.critical + self.high {
            DataPriority::High
        } else {
            DataPriority::Medium
        }
    }
}

/// One named time window with its strategy weighting.
///
/// Read-only after configuration load.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyProfile {
    pub name: String,
    /// Window start (inclusive), KST.
    pub start: NaiveTime,
    /// Window end (exclusive), KST.
    pub end: NaiveTime,
    /// Strategy weights; weights within a profile sum to 1.
    pub weights: Vec<(StrategyId, Decimal)>,
    pub tier_plan: TierPlan,
    /// Candidate instruments for this window, best ranked first.
    pub watchlist: Vec<InstrumentId>,
}

impl StrategyProfile {
    /// Whether `time` falls inside `[start, end)`, with windows that
    /// wrap midnight handled.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    pub fn weight_of(&self, strategy: StrategyId) -> Decimal {
        self.weights
            .iter()
            .find(|(id, _)| *id == strategy)
            .map(|(_, w)| *w)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn strategies(&self) -> impl Iterator<Item = StrategyId> + '_ {
        self.weights.iter().map(|(id, _)| *id)
    }
}

/// What the scheduler currently points at.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveProfile {
    Window(Arc<StrategyProfile>),
    /// Outside every configured window; analysis pauses, exits keep
    /// running.
    Idle,
}

impl ActiveProfile {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Window(profile) => &profile.name,
            Self::Idle => "idle",
        }
    }

    pub fn profile(&self) -> Option<&Arc<StrategyProfile>> {
        match self {
            Self::Window(profile) => Some(profile),
            Self::Idle => None,
        }
    }
}

/// The interval table the scheduler walks.
///
/// Overlapping or gapped definitions are tolerated: resolution takes the
/// first matching window in configuration order, and no match means
/// idle; a gap never inherits the previous window.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    profiles: Vec<Arc<StrategyProfile>>,
}

impl ProfileTable {
    pub fn new(profiles: Vec<StrategyProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn profiles(&self) -> &[Arc<StrategyProfile>] {
        &self.profiles
    }

    /// Profile applicable at `time`; works from a cold start mid-window.
    pub fn resolve(&self, time: NaiveTime) -> ActiveProfile {
        for profile in &self.profiles {
            if profile.contains(time) {
                return ActiveProfile::Window(profile.clone());
            }
        }
        ActiveProfile::Idle
    }

    /// Time until the next window boundary after `time`, used to sleep
    /// the scheduler instead of polling. Falls back to an hour when no
    /// profiles exist.
    pub fn until_next_boundary(&self, time: NaiveTime) -> Duration {
        const DAY_SECS: i64 = 24 * 3600;
        let mut min_ahead: Option<i64> = None;

        for profile in &self.profiles {
            for boundary in [profile.start, profile.end] {
                let delta = (boundary - time).num_seconds().rem_euclid(DAY_SECS);
                if delta > 0 {
                    min_ahead = Some(min_ahead.map_or(delta, |m| m.min(delta)));
                }
            }
        }

        match min_ahead {
            // Land just past the boundary so resolve() sees the new window.
            Some(secs) => Duration::from_millis(secs as u64 * 1000 + 100),
            None => Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn profile(name: &str, start: NaiveTime, end: NaiveTime) -> StrategyProfile {
        StrategyProfile {
            name: name.to_string(),
            start,
            end,
            weights: vec![(StrategyId::Momentum, dec!(1))],
            tier_plan: TierPlan {
                critical: 2,
                high: 5,
            },
            watchlist: Vec::new(),
        }
    }

    fn table() -> ProfileTable {
        ProfileTable::new(vec![
            profile("golden_time", t(9, 0), t(9, 30)),
            profile("morning_leaders", t(9, 30), t(11, 30)),
            profile("closing_trend", t(14, 0), t(15, 20)),
        ])
    }

    #[test]
    fn test_resolve_inside_window() {
        let active = table().resolve(t(9, 15));
        assert_eq!(active.name(), "golden_time");
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let active = table().resolve(t(9, 30));
        assert_eq!(active.name(), "morning_leaders");
    }

    #[test]
    fn test_gap_resolves_to_idle() {
        // 11:30-14:00 is not covered
        assert!(table().resolve(t(12, 0)).is_idle());
        assert!(table().resolve(t(8, 0)).is_idle());
        assert!(table().resolve(t(16, 0)).is_idle());
    }

    #[test]
    fn test_overlap_takes_first_match() {
        let overlapping = ProfileTable::new(vec![
            profile("first", t(9, 0), t(10, 0)),
            profile("second", t(9, 30), t(11, 0)),
        ]);
        assert_eq!(overlapping.resolve(t(9, 45)).name(), "first");
        assert_eq!(overlapping.resolve(t(10, 30)).name(), "second");
    }

    #[test]
    fn test_midnight_wrap() {
        let night = profile("overnight", t(23, 0), t(1, 0));
        assert!(night.contains(t(23, 30)));
        assert!(night.contains(t(0, 30)));
        assert!(!night.contains(t(1, 0)));
        assert!(!night.contains(t(12, 0)));
    }

    #[test]
    fn test_until_next_boundary() {
        let table = table();
        // From 09:10 the next boundary is 09:30
        let wait = table.until_next_boundary(t(9, 10));
        assert_eq!(wait.as_secs(), 20 * 60);

        // After the last boundary, wraps to tomorrow 09:00
        let wait = table.until_next_boundary(t(16, 0));
        assert_eq!(wait.as_secs(), 17 * 3600);
    }

    #[test]
    fn test_tier_for_rank() {
        let plan = TierPlan {
            critical: 2,
            high: 3,
        };
        assert_eq!(plan.tier_for_rank(0), DataPriority::Critical);
        assert_eq!(plan.tier_for_rank(1), DataPriority::Critical);
        assert_eq!(plan.tier_for_rank(2), DataPriority::High);
        assert_eq!(plan.tier_for_rank(4), DataPriority::High);
        assert_eq!(plan.tier_for_rank(5), DataPriority::Medium);
        assert_eq!(plan.slot_demand(), 7);
    }
}
