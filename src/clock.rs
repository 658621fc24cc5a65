use chrono::{DateTime, TimeZone, Utc};

// ─── Clock ──────────────────────────────────────────────────────────────────

/// Source of the current time. Injected everywhere a timestamp is recorded so
/// tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_unix(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Wall-clock implementation used outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a fixed Unix timestamp.
#[derive(Debug, Clone, Copy)]
pub struct StaticClock {
    unix: i64,
}

impl StaticClock {
    pub fn new(unix: i64) -> Self {
        Self { unix }
    }
}

impl Default for StaticClock {
    fn default() -> Self {
        Self { unix: 1_694_097_824 }
    }
}

impl Clock for StaticClock {
    fn now(&self) -> DateTime<Utc> {
        // Seconds are always in range for chrono's single-result mapping.
        Utc.timestamp_opt(self.unix, 0).single().unwrap_or_default()
    }
}

// ─── Id Generation ──────────────────────────────────────────────────────────

/// Source of fresh identifiers for instances and generated resources.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random v4 UUIDs, the production generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic generator for tests: `<prefix>-0`, `<prefix>-1`, ...
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: std::sync::atomic::AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate(&self) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}
