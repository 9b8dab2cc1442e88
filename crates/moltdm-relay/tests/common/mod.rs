//! Shared test fixtures.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use moltdm_crypto::{Environment, SystemEnv};

/// Scripted clock over real OS entropy.
///
/// Freshness windows, pairing TTLs, and message expiry advance only when a
/// test says so; key material stays cryptographically random.
#[derive(Clone)]
pub struct TestEnv {
    now: Arc<AtomicU64>,
}

impl TestEnv {
    /// Start the clock at `now_ms`.
    pub fn at(now_ms: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(now_ms)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        SystemEnv::new().random_bytes(buffer);
    }
}

/// A plausible fixed epoch for test clocks (2023-11-14T22:13:20Z).
pub const T0: u64 = 1_700_000_000_000;
