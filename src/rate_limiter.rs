//! Sliding-window rate limiter plus local-midnight daily cost tracker
//! (spec section 4.5), grounded 1:1 on `app/utils/rate_limit.py`'s
//! `APIUsageTracker`.

use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Serialize, Debug)]
pub struct UsageStats {
    pub calls_last_minute: usize,
    pub daily_cost: f64,
    pub max_calls_per_minute: u32,
    pub max_daily_cost: f64,
    pub cost_reset_date: String,
}

struct TrackerState {
    call_timestamps: Vec<i64>,
    daily_cost: f64,
    cost_reset_date: NaiveDate,
}

pub struct ApiUsageTracker {
    max_calls_per_minute: u32,
    max_daily_cost: f64,
    state: Mutex<TrackerState>,
}

impl ApiUsageTracker {
    pub fn new(max_calls_per_minute: u32, max_daily_cost: f64) -> Self {
        Self {
            max_calls_per_minute,
            max_daily_cost,
            state: Mutex::new(TrackerState {
                call_timestamps: Vec::new(),
                daily_cost: 0.0,
                cost_reset_date: Local::now().date_naive(),
            }),
        }
    }

    /// `Ok(())` if within the per-minute budget, `Err(retry_after_secs)`
    /// otherwise (the caller maps this to `AppError::RateLimit`).
    pub async fn check_rate_limit(&self) -> Result<(), u64> {
        let now = Utc::now().timestamp();
        let mut state = self.state.lock().await;
        state.call_timestamps.retain(|ts| now - ts < 60);

        if state.call_timestamps.len() >= self.max_calls_per_minute as usize {
            let oldest = state.call_timestamps[0];
            let wait = 60 - (now - oldest);
            log::warn!("rate limit reached, retry in {wait}s");
            return Err(wait.max(0) as u64);
        }
        Ok(())
    }

    fn reset_if_new_day(state: &mut TrackerState) {
        let today = Local::now().date_naive();
        if today != state.cost_reset_date {
            state.daily_cost = 0.0;
            state.cost_reset_date = today;
        }
    }

    /// `Ok(())` if adding `estimated_cost` stays within the daily budget,
    /// `Err((current, limit))` otherwise.
    pub async fn check_daily_cost(&self, estimated_cost: f64) -> Result<(), (f64, f64)> {
        let mut state = self.state.lock().await;
        Self::reset_if_new_day(&mut state);

        if state.daily_cost + estimated_cost > self.max_daily_cost {
            log::warn!(
                "daily cost limit reached (${:.4}/${:.4}), query would cost ~${:.4}",
                state.daily_cost,
                self.max_daily_cost,
                estimated_cost
            );
            return Err((state.daily_cost, self.max_daily_cost));
        }
        Ok(())
    }

    pub async fn record_call(&self, cost: f64) {
        let mut state = self.state.lock().await;
        state.call_timestamps.push(Utc::now().timestamp());
        state.daily_cost += cost;
    }

    pub async fn get_stats(&self) -> UsageStats {
        let mut state = self.state.lock().await;
        Self::reset_if_new_day(&mut state);
        UsageStats {
            calls_last_minute: state.call_timestamps.len(),
            daily_cost: state.daily_cost,
            max_calls_per_minute: self.max_calls_per_minute,
            max_daily_cost: self.max_daily_cost,
            cost_reset_date: state.cost_reset_date.to_string(),
        }
    }

    pub async fn reset_daily_cost(&self) {
        let mut state = self.state.lock().await;
        state.daily_cost = 0.0;
        state.cost_reset_date = Local::now().date_naive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_calls_under_the_limit() {
        let tracker = ApiUsageTracker::new(2, 5.0);
        assert!(tracker.check_rate_limit().await.is_ok());
        tracker.record_call(0.01).await;
        assert!(tracker.check_rate_limit().await.is_ok());
    }

    #[tokio::test]
    async fn blocks_calls_over_the_limit() {
        let tracker = ApiUsageTracker::new(1, 5.0);
        tracker.record_call(0.01).await;
        assert!(tracker.check_rate_limit().await.is_err());
    }

    #[tokio::test]
    async fn daily_cost_within_budget_is_ok() {
        let tracker = ApiUsageTracker::new(60, 1.0);
        tracker.record_call(0.5).await;
        assert!(tracker.check_daily_cost(0.4).await.is_ok());
    }

    #[tokio::test]
    async fn daily_cost_over_budget_errors() {
        let tracker = ApiUsageTracker::new(60, 1.0);
        tracker.record_call(0.9).await;
        assert!(tracker.check_daily_cost(0.5).await.is_err());
    }

    #[tokio::test]
    async fn reset_daily_cost_zeroes_the_counter() {
        let tracker = ApiUsageTracker::new(60, 1.0);
        tracker.record_call(0.9).await;
        tracker.reset_daily_cost().await;
        let stats = tracker.get_stats().await;
        assert_eq!(stats.daily_cost, 0.0);
    }
}
