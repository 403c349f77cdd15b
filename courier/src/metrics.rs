//! Delivery metrics
//!
//! Counters are atomics so recording never blocks delivery; the last
//! activity timestamp sits behind a lock.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::DeliveryMethod;

/// Thread-safe delivery counters
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
    timeouts: AtomicU64,
    simulated_input: AtomicU64,
    file_drop: AtomicU64,
    last_activity: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub suppressed: u64,
    pub timeouts: u64,
    /// Successful deliveries by method
    pub by_method: BTreeMap<String, u64>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Fraction of attempts that succeeded, 0.0 with no attempts
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        debug!("DeliveryMetrics::new: called");
        Self::default()
    }

    /// Count one delivery attempt
    pub fn record(&self, success: bool) {
        debug!(success, "DeliveryMetrics::record: called");
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    /// Count a successful delivery by `method`
    pub fn record_method(&self, method: DeliveryMethod) {
        debug!(%method, "DeliveryMetrics::record_method: called");
        match method {
            DeliveryMethod::SimulatedInput => self.simulated_input.fetch_add(1, Ordering::Relaxed),
            DeliveryMethod::FileDrop => self.file_drop.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Count a message the filter refused; not an attempt
    pub fn record_suppressed(&self) {
        debug!("DeliveryMetrics::record_suppressed: called");
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Count a queued message whose deadline passed
    pub fn record_timeout(&self) {
        debug!("DeliveryMetrics::record_timeout: called");
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut by_method = BTreeMap::new();
        by_method.insert(
            DeliveryMethod::SimulatedInput.to_string(),
            self.simulated_input.load(Ordering::Relaxed),
        );
        by_method.insert(DeliveryMethod::FileDrop.to_string(), self.file_drop.load(Ordering::Relaxed));

        let last_activity = match self.last_activity.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };

        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            by_method,
            last_activity,
        }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.write() {
            *last = Some(Utc::now());
        } else {
            debug!("DeliveryMetrics::touch: failed to acquire last_activity lock");
        }
    }
}
