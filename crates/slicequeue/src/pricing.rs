//! Cost estimation. All amounts are integer minor currency units.

use crate::config::PricingConfig;
use crate::report::SliceEstimate;

/// Machine-time charge per started hour.
pub const TIME_RATE: i64 = 150;

/// `ceil(seconds / 3600) * TIME_RATE + ceil(grams) * cost_per_gram`
pub fn estimate(seconds: u64, grams: f64, cost_per_gram: i64) -> i64 {
    estimate_with_rate(seconds, grams, cost_per_gram, TIME_RATE)
}

/// Same as [`estimate`] with an explicit hourly rate. Both terms round up:
/// a started hour and a started gram are charged in full.
pub fn estimate_with_rate(seconds: u64, grams: f64, cost_per_gram: i64, hourly_rate: i64) -> i64 {
    let hours = i64::try_from(seconds.div_ceil(3600)).unwrap_or(i64::MAX);
    let grams = grams.max(0.0).ceil() as i64;
    hours
        .saturating_mul(hourly_rate)
        .saturating_add(grams.saturating_mul(cost_per_gram))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingPolicy {
    pub hourly_rate: i64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            hourly_rate: TIME_RATE,
        }
    }
}

impl From<&PricingConfig> for PricingPolicy {
    fn from(config: &PricingConfig) -> Self {
        Self {
            hourly_rate: config.hourly_rate,
        }
    }
}

impl PricingPolicy {
    pub fn price(&self, estimate: &SliceEstimate, cost_per_gram: i64) -> i64 {
        estimate_with_rate(
            estimate.seconds,
            estimate.grams,
            cost_per_gram,
            self.hourly_rate,
        )
    }
}
