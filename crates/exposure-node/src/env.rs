//! Environment abstraction for time and randomness.
//!
//! Key lifecycle logic never reads the clock or the OS RNG directly. Production
//! code uses [`SystemEnv`]; tests use [`ManualEnv`] to pin the clock and make
//! generated keys reproducible.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use exposure_crypto::{EnIntervalNumber, ValidationError};

/// Source of wall-clock time and cryptographic randomness.
///
/// Must be Clone (shared by the key store and the receive task), Send + Sync
/// (used from tokio tasks) and cheap to clone.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Seconds since the Unix epoch.
    fn wall_clock_secs(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Production implementations use a cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// EN interval containing the current wall-clock time.
    fn current_interval(&self) -> Result<EnIntervalNumber, ValidationError> {
        EnIntervalNumber::from_unix_secs(self.wall_clock_secs())
    }
}

/// Production environment using the system clock and the OS CSPRNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A device that cannot generate key material
/// must not broadcast at all.
#[derive(Debug, Clone, Copy, Default)]
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
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_secs()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - keys cannot be generated");
    }
}

/// Test environment with a settable clock and a seeded byte stream.
///
/// Clones share the clock, so advancing one advances all of them.
#[derive(Debug, Clone)]
pub struct ManualEnv {
    clock: Arc<AtomicU64>,
    rng: Arc<AtomicU64>,
}

impl ManualEnv {
    /// Start the clock at `unix_secs` with the given RNG seed.
    pub fn new(unix_secs: u64, seed: u64) -> Self {
        Self { clock: Arc::new(AtomicU64::new(unix_secs)), rng: Arc::new(AtomicU64::new(seed)) }
    }

    /// Jump the clock to `unix_secs`.
    pub fn set_time(&self, unix_secs: u64) {
        self.clock.store(unix_secs, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Environment for ManualEnv {
    fn wall_clock_secs(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let state = self.rng.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::SeqCst);
            let word = splitmix64(state);
            chunk.copy_from_slice(&word.to_le_bytes()[..chunk.len()]);
        }
    }
}

/// SplitMix64 output function.
fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
