//! Process-scoped usage aggregation.
//!
//! Keyed by calendar date (UTC). Buckets are created lazily on first use and
//! kept for the lifetime of the process.

use std::collections::{BTreeMap, HashMap};

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::agent::types::AgentType;
use crate::agent::usage::UsageMetrics;

/// Aggregated usage and cycle counts for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub metrics: UsageMetrics,
    pub by_agent_type: HashMap<AgentType, UsageMetrics>,
    pub by_model: HashMap<String, UsageMetrics>,
    pub cycles: u32,
    pub successful_cycles: u32,
}

impl DailyUsage {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            metrics: UsageMetrics::default(),
            by_agent_type: HashMap::new(),
            by_model: HashMap::new(),
            cycles: 0,
            successful_cycles: 0,
        }
    }

    /// Percentage of successful cycles, 0 when no cycle ran.
    pub fn success_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        f64::from(self.successful_cycles) / f64::from(self.cycles) * 100.0
    }
}

#[derive(Debug, Default)]
pub struct UsageLedger {
    total: UsageMetrics,
    days: BTreeMap<NaiveDate, DailyUsage>,
}

impl UsageLedger {
    fn bucket(&mut self, date: NaiveDate) -> &mut DailyUsage {
        self.days.entry(date).or_insert_with(|| DailyUsage::new(date))
    }

    /// Merge one request's usage into the all-time total and the day's
    /// per-type and per-model buckets.
    pub fn record_usage(&mut self, date: NaiveDate, agent_type: AgentType, model: &str, delta: &UsageMetrics) {
        self.total.merge(delta);
        let day = self.bucket(date);
        day.metrics.merge(delta);
        day.by_agent_type.entry(agent_type).or_default().merge(delta);
        day.by_model.entry(model.to_string()).or_default().merge(delta);
    }

    pub fn record_cycle(&mut self, date: NaiveDate, success: bool) {
        let day = self.bucket(date);
        day.cycles += 1;
        if success {
            day.successful_cycles += 1;
        }
    }

    pub fn total(&self) -> UsageMetrics {
        self.total
    }

    pub fn day(&mut self, date: NaiveDate) -> DailyUsage {
        self.bucket(date).clone()
    }

    /// The `days` most recent days ending at `today`, newest first. Days
    /// without activity are zero-filled and not inserted.
    pub fn history(&self, today: NaiveDate, days: u32) -> Vec<DailyUsage> {
        (0..days)
            .filter_map(|i| today.checked_sub_days(Days::new(u64::from(i))))
            .map(|date| {
                self.days
                    .get(&date)
                    .cloned()
                    .unwrap_or_else(|| DailyUsage::new(date))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn usage(input: u64, cost: u64) -> UsageMetrics {
        UsageMetrics {
            input_tokens: input,
            cost_nanos: cost,
            requests: 1,
            ..Default::default()
        }
    }

    #[test]
    fn usage_is_split_by_type_and_model() {
        let mut ledger = UsageLedger::default();
        let today = date("2026-03-10");
        ledger.record_usage(today, AgentType::Worker, "claude-sonnet-4", &usage(100, 10));
        ledger.record_usage(today, AgentType::Coordinator, "claude-opus-4", &usage(50, 40));
        ledger.record_usage(today, AgentType::Worker, "claude-sonnet-4", &usage(25, 5));

        let day = ledger.day(today);
        assert_eq!(day.metrics.input_tokens, 175);
        assert_eq!(day.metrics.requests, 3);
        assert_eq!(day.by_agent_type[&AgentType::Worker].input_tokens, 125);
        assert_eq!(day.by_model["claude-opus-4"].cost_nanos, 40);
        assert_eq!(ledger.total().cost_nanos, 55);
    }

    #[test]
    fn cycles_and_success_rate() {
        let mut ledger = UsageLedger::default();
        let today = date("2026-03-10");
        assert_eq!(ledger.day(today).success_rate(), 0.0);

        ledger.record_cycle(today, true);
        ledger.record_cycle(today, false);
        ledger.record_cycle(today, true);
        ledger.record_cycle(today, true);

        let day = ledger.day(today);
        assert_eq!(day.cycles, 4);
        assert_eq!(day.successful_cycles, 3);
        assert_eq!(day.success_rate(), 75.0);
    }

    #[test]
    fn history_is_zero_filled_newest_first() {
        let mut ledger = UsageLedger::default();
        ledger.record_cycle(date("2026-03-01"), true);
        ledger.record_cycle(date("2026-02-27"), false);

        let history = ledger.history(date("2026-03-01"), 4);
        let dates: Vec<_> = history.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(dates, ["2026-03-01", "2026-02-28", "2026-02-27", "2026-02-26"]);
        assert_eq!(history[0].cycles, 1);
        assert_eq!(history[1].cycles, 0);
        assert_eq!(history[2].cycles, 1);
        assert_eq!(history[2].successful_cycles, 0);
    }
}
