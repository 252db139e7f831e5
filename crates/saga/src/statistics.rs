//! Process-wide saga statistics.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state::SagaStatus;

/// Number of sagas started within trailing time windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBuckets {
    pub last_hour: u64,
    pub last_day: u64,
    pub last_week: u64,
    pub last_month: u64,
}

/// Aggregate counters over every saga started since process start.
///
/// `by_status` holds each saga's latest recorded status, so both it and
/// `by_type` always sum to `total_sagas`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStatistics {
    pub total_sagas: u64,
    pub completed_sagas: u64,
    pub failed_sagas: u64,
    pub compensated_sagas: u64,
    pub timeout_sagas: u64,
    pub cancelled_sagas: u64,
    pub active_sagas: u64,
    pub average_execution_time_ms: f64,
    pub by_type: HashMap<String, u64>,
    pub by_status: HashMap<SagaStatus, u64>,
    pub by_tenant: HashMap<String, u64>,
    pub time_buckets: TimeBuckets,
    pub last_updated: DateTime<Utc>,
    #[serde(skip)]
    recent_starts: VecDeque<DateTime<Utc>>,
}

impl Default for SagaStatistics {
    fn default() -> Self {
        Self {
            total_sagas: 0,
            completed_sagas: 0,
            failed_sagas: 0,
            compensated_sagas: 0,
            timeout_sagas: 0,
            cancelled_sagas: 0,
            active_sagas: 0,
            average_execution_time_ms: 0.0,
            by_type: HashMap::new(),
            by_status: HashMap::new(),
            by_tenant: HashMap::new(),
            time_buckets: TimeBuckets::default(),
            last_updated: Utc::now(),
            recent_starts: VecDeque::new(),
        }
    }
}

const MONTH: i64 = 30;

impl SagaStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(
        &mut self,
        saga_type: &str,
        tenant_id: Option<&str>,
        at: DateTime<Utc>,
    ) {
        self.total_sagas += 1;
        *self.by_type.entry(saga_type.to_string()).or_default() += 1;
        *self.by_status.entry(SagaStatus::Running).or_default() += 1;
        if let Some(tenant) = tenant_id {
            *self.by_tenant.entry(tenant.to_string()).or_default() += 1;
        }
        self.recent_starts.push_back(at);
        self.last_updated = Utc::now();
    }

    /// Records a saga moving from `from` to `to`.
    ///
    /// `duration_ms` feeds the running mean on transitions into `Completed`.
    pub(crate) fn record_transition(
        &mut self,
        from: SagaStatus,
        to: SagaStatus,
        duration_ms: Option<f64>,
    ) {
        if from == to {
            return;
        }
        if let Some(count) = self.by_status.get_mut(&from) {
            *count = count.saturating_sub(1);
        }
        *self.by_status.entry(to).or_default() += 1;

        match to {
            SagaStatus::Completed => {
                self.completed_sagas += 1;
                let n = self.completed_sagas as f64;
                let duration = duration_ms.unwrap_or_default();
                self.average_execution_time_ms =
                    (self.average_execution_time_ms * (n - 1.0) + duration) / n;
            }
            SagaStatus::Failed => self.failed_sagas += 1,
            SagaStatus::Compensated => self.compensated_sagas += 1,
            SagaStatus::Timeout => self.timeout_sagas += 1,
            SagaStatus::Cancelled => self.cancelled_sagas += 1,
            SagaStatus::NotStarted | SagaStatus::Running | SagaStatus::Compensating => {}
        }
        self.last_updated = Utc::now();
    }

    /// Recomputes the time buckets and active gauge as of `now`, dropping
    /// start timestamps older than a month.
    pub(crate) fn refresh(&mut self, now: DateTime<Utc>, active_sagas: u64) {
        let month_ago = now - Duration::days(MONTH);
        while self
            .recent_starts
            .front()
            .is_some_and(|start| *start < month_ago)
        {
            self.recent_starts.pop_front();
        }

        let count_since = |since: DateTime<Utc>| {
            self.recent_starts.iter().filter(|start| **start >= since).count() as u64
        };
        self.time_buckets = TimeBuckets {
            last_hour: count_since(now - Duration::hours(1)),
            last_day: count_since(now - Duration::days(1)),
            last_week: count_since(now - Duration::weeks(1)),
            last_month: count_since(month_ago),
        };
        self.active_sagas = active_sagas;
        self.last_updated = now;
    }

    pub fn type_count(&self, saga_type: &str) -> u64 {
        self.by_type.get(saga_type).copied().unwrap_or_default()
    }

    pub fn status_count(&self, status: SagaStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or_default()
    }

    pub fn tenant_count(&self, tenant_id: &str) -> u64 {
        self.by_tenant.get(tenant_id).copied().unwrap_or_default()
    }
}
