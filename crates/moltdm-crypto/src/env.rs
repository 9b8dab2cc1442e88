//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). The
//! literal-value protocol scenarios in the test suites run against a scripted
//! environment; production uses [`SystemEnv`].

/// Abstract environment providing wall-clock time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now_ms()` never goes backwards within a single execution context
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time as Unix milliseconds.
    ///
    /// Used for request timestamps, message `createdAt`, and expiry checks.
    fn now_ms(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a fixed-size array of random bytes.
    ///
    /// Convenience for chain keys, nonces, and ephemeral key material.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }

    /// Generates `n_bytes` of randomness rendered as lowercase hex.
    ///
    /// Used for relay-assigned identifiers (`moltbot_…`, `conv_…`, `msg_…`).
    fn random_hex(&self, n_bytes: usize) -> String {
        let mut bytes = vec![0u8; n_bytes];
        self.random_bytes(&mut bytes);

        let mut out = String::with_capacity(n_bytes * 2);
        for byte in bytes {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// Production environment using system time and cryptographic RNG.
///
/// Uses `std::time::SystemTime` for wall-clock time and the OS CSPRNG
/// (`/dev/urandom` on Linux, `BCryptGenRandom` on Windows) for randomness.
///
/// # Panics
///
/// Panics if the OS RNG fails or the system clock is before the Unix epoch.
/// This is intentional - a process without functioning cryptographic
/// randomness or a sane clock cannot operate securely, and continuing would
/// compromise chain keys, nonces, and request signatures.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn now_ms(&self) -> u64 {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)");

        u64::try_from(elapsed.as_millis())
            .expect("invariant: current time in milliseconds fits in u64 until the year 584556019")
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}
