//! # Raffle Testing
//!
//! Testing utilities for the raffle pipeline.
//!
//! This crate provides:
//! - [`InMemoryEntryStore`] and its [`InMemoryChangeStream`]
//! - [`InMemoryBroker`]: partitioned topics, consumer groups and admin calls
//! - Failure injection on every component (transient errors, latency, races)
//! - Deterministic clocks, decisions and a recording poison sink
//!
//! ## Example
//!
//! ```
//! use raffle_core::topic::{TopicProducer, TopicSpec};
//! use raffle_core::entry::EntryId;
//! use raffle_testing::InMemoryBroker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new().with_topic(&TopicSpec::new("raffle-entries"));
//! broker.append("raffle-entries", &EntryId::new("E1"), b"{}").await?;
//! assert_eq!(broker.messages("raffle-entries").len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod entry_store;

use chrono::{DateTime, Utc};
use raffle_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

    use super::{Clock, DateTime, Utc};
    use raffle_core::decision::Decision;
    use raffle_core::entry::Entry;
    use raffle_core::poison::{PoisonReport, PoisonSink};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_testing::mocks::FixedClock;
    /// use raffle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }

    /// Decision that returns a scripted sequence of outcomes.
    ///
    /// Once the script runs out it keeps returning the fallback. Every call is
    /// counted so tests can assert the draw happened exactly once.
    #[derive(Debug, Clone)]
    pub struct ScriptedDecision {
        script: Arc<Mutex<VecDeque<bool>>>,
        fallback: bool,
        calls: Arc<Mutex<Vec<Entry>>>,
    }

    impl ScriptedDecision {
        /// Always return `outcome`.
        #[must_use]
        pub fn always(outcome: bool) -> Self {
            Self::sequence(Vec::new(), outcome)
        }

        /// Return `outcomes` in order, then `fallback`.
        #[must_use]
        pub fn sequence(outcomes: Vec<bool>, fallback: bool) -> Self {
            Self {
                script: Arc::new(Mutex::new(outcomes.into())),
                fallback,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Number of times the draw was made.
        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Entries the draw was made for, in call order.
        #[must_use]
        pub fn decided_entries(&self) -> Vec<Entry> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Decision for ScriptedDecision {
        fn decide(&self, entry: &Entry) -> bool {
            self.calls.lock().unwrap().push(entry.clone());
            self.script.lock().unwrap().pop_front().unwrap_or(self.fallback)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Poison sink that keeps every report in memory.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingPoisonSink {
        reports: Arc<Mutex<Vec<PoisonReport>>>,
    }

    impl RecordingPoisonSink {
        /// Create an empty sink.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All reports received so far.
        #[must_use]
        pub fn reports(&self) -> Vec<PoisonReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl PoisonSink for RecordingPoisonSink {
        fn report(&self, report: PoisonReport) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            self.reports.lock().unwrap().push(report);
            Box::pin(async {})
        }
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
/// Honors `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts `tracing` events at one level.
///
/// ```
/// use raffle_testing::LevelCounter;
/// use tracing::Level;
///
/// let warnings = LevelCounter::new(Level::WARN);
/// let _guard = warnings.install();
/// tracing::warn!("once");
/// tracing::info!("ignored");
/// assert_eq!(warnings.count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct LevelCounter {
    level: tracing::Level,
    count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl LevelCounter {
    /// Count events at exactly `level`.
    #[must_use]
    pub fn new(level: tracing::Level) -> Self {
        Self {
            level,
            count: std::sync::Arc::default(),
        }
    }

    /// Events seen so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Make this counter the current thread's subscriber until the guard drops.
    ///
    /// Use with a current-thread runtime (the `#[tokio::test]` default).
    #[must_use]
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        use tracing_subscriber::layer::SubscriberExt;
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == self.level {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

// Re-export commonly used items
pub use broker::{InMemoryBroker, InMemoryConsumer};
pub use entry_store::{InMemoryChangeStream, InMemoryEntryStore};
pub use mocks::{FixedClock, RecordingPoisonSink, ScriptedDecision, test_clock};
