use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static JOBS_SUBMITTED: AtomicU64 = AtomicU64::new(0);
static VALIDATION_FAILURES: AtomicU64 = AtomicU64::new(0);
static ENQUEUE_FAILURES: AtomicU64 = AtomicU64::new(0);
static SUBSCRIPTIONS_OPENED: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub validation_failures: u64,
    pub enqueue_failures: u64,
    pub subscriptions_opened: u64,
    pub last_error_ts: i64,
}

pub fn inc_jobs_submitted() {
    JOBS_SUBMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_validation_failures() {
    VALIDATION_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_enqueue_failures() {
    ENQUEUE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_subscriptions_opened() {
    SUBSCRIPTIONS_OPENED.fetch_add(1, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        jobs_submitted: JOBS_SUBMITTED.load(Ordering::Relaxed),
        validation_failures: VALIDATION_FAILURES.load(Ordering::Relaxed),
        enqueue_failures: ENQUEUE_FAILURES.load(Ordering::Relaxed),
        subscriptions_opened: SUBSCRIPTIONS_OPENED.load(Ordering::Relaxed),
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}
