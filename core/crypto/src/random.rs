//! Cryptographically secure random source.
//!
//! A hardware instruction source (RDRAND on x86_64) is tried first with a
//! bounded number of retries, then the operating system CSPRNG. If both
//! fail the request fails closed: the destination is wiped and
//! `EntropyUnavailable` is returned.

use std::fmt;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, error};

use sealcore_common::{Error, Result};
use crate::memory::wipe;

/// Retries granted to the hardware source before falling back.
pub const DEFAULT_RETRIES: u32 = 10;

/// Largest single `random_bytes` request (1 MiB).
pub const MAX_RANDOM_BYTES: usize = 1024 * 1024;

/// Failure reported by a single entropy source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntropyFault {
    /// The source may succeed if asked again.
    #[error("entropy source temporarily unavailable")]
    Transient,

    /// The source does not exist on this platform.
    #[error("entropy source not supported")]
    Unsupported,

    /// The source failed permanently.
    #[error("entropy source failed: {0}")]
    Failed(String),
}

/// A provider of random bytes.
pub trait EntropySource: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Fill `dest` entirely or report why it could not.
    fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), EntropyFault>;
}

/// CPU random number instruction.
#[derive(Debug, Clone, Copy)]
pub struct HardwareEntropy {
    _private: (),
}

impl HardwareEntropy {
    /// Returns the hardware source if the CPU advertises it and its output
    /// passes a short self-test.
    pub fn detect() -> Option<Self> {
        if hardware_supported() && self_test(next_hardware_word) {
            Some(Self { _private: () })
        } else {
            None
        }
    }
}

/// Words drawn by `self_test`.
const SELF_TEST_WORDS: usize = 8;

/// Repeats tolerated by `self_test` before the source is rejected.
const SELF_TEST_MAX_REPEATS: usize = 2;

/// Reject sources that fail outright or keep repeating a word.
///
/// Some CPUs report success while returning a stuck value; those repeat
/// on every draw and fail here.
fn self_test(mut next_word: impl FnMut() -> Option<u64>) -> bool {
    let mut previous = u64::MAX;
    let mut repeats = 0;

    for _ in 0..SELF_TEST_WORDS {
        match next_word() {
            Some(word) if word == previous => repeats += 1,
            Some(word) => previous = word,
            None => return false,
        }
    }

    repeats <= SELF_TEST_MAX_REPEATS
}

/// Fill `dest` from a word generator.
///
/// An all-ones word is the stuck-at value of faulty RDRAND parts, so it is
/// reported as `Transient` and the caller retries or falls back.
fn fill_words(
    dest: &mut [u8],
    mut next_word: impl FnMut() -> Option<u64>,
) -> std::result::Result<(), EntropyFault> {
    let mut complete = true;

    for chunk in dest.chunks_mut(8) {
        let word = match next_word() {
            Some(word) if word != u64::MAX => word,
            _ => {
                complete = false;
                break;
            }
        };
        let mut bytes = word.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
        wipe(&mut bytes);
    }

    if !complete {
        wipe(dest);
        return Err(EntropyFault::Transient);
    }

    Ok(())
}

impl EntropySource for HardwareEntropy {
    fn name(&self) -> &'static str {
        "rdrand"
    }

    fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), EntropyFault> {
        fill_from_hardware(dest)
    }
}

#[cfg(target_arch = "x86_64")]
fn hardware_supported() -> bool {
    std::arch::is_x86_feature_detected!("rdrand")
}

#[cfg(not(target_arch = "x86_64"))]
fn hardware_supported() -> bool {
    false
}

fn fill_from_hardware(dest: &mut [u8]) -> std::result::Result<(), EntropyFault> {
    if !hardware_supported() {
        return Err(EntropyFault::Unsupported);
    }
    fill_words(dest, next_hardware_word)
}

#[cfg(target_arch = "x86_64")]
fn next_hardware_word() -> Option<u64> {
    if !hardware_supported() {
        return None;
    }
    // SAFETY: the CPU feature was checked above.
    unsafe { rdrand_u64() }
}

#[cfg(not(target_arch = "x86_64"))]
fn next_hardware_word() -> Option<u64> {
    None
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "rdrand")]
unsafe fn rdrand_u64() -> Option<u64> {
    let mut word = 0u64;
    if core::arch::x86_64::_rdrand64_step(&mut word) == 1 {
        Some(word)
    } else {
        None
    }
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn name(&self) -> &'static str {
        "os"
    }

    fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), EntropyFault> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| EntropyFault::Failed(e.to_string()))
    }
}

/// Random source with hardware preference and OS fallback.
///
/// Clones share the same underlying sources.
#[derive(Clone)]
pub struct RandomSource {
    primary: Option<Arc<dyn EntropySource>>,
    fallback: Arc<dyn EntropySource>,
    retries: u32,
    max_request: usize,
}

impl RandomSource {
    /// Hardware source if detected, OS CSPRNG as fallback.
    pub fn system() -> Self {
        let primary = HardwareEntropy::detect().map(|hw| Box::new(hw) as Box<dyn EntropySource>);
        Self::with_sources(primary, Box::new(OsEntropy))
    }

    /// Build from explicit sources.
    pub fn with_sources(
        primary: Option<Box<dyn EntropySource>>,
        fallback: Box<dyn EntropySource>,
    ) -> Self {
        Self {
            primary: primary.map(Arc::from),
            fallback: Arc::from(fallback),
            retries: DEFAULT_RETRIES,
            max_request: MAX_RANDOM_BYTES,
        }
    }

    /// Set the retry budget for the primary source.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the largest size accepted by `random_bytes`.
    pub fn with_max_request(mut self, max_request: usize) -> Self {
        self.max_request = max_request;
        self
    }

    /// Fill `dest` with random bytes.
    ///
    /// # Errors
    /// - `EntropyUnavailable` if the primary source exhausted its retries
    ///   and the fallback failed; `dest` is wiped in that case
    pub fn fill(&self, dest: &mut [u8]) -> Result<()> {
        let mut attempts = 0u32;

        if let Some(primary) = &self.primary {
            for _ in 0..self.retries {
                attempts += 1;
                match primary.try_fill(dest) {
                    Ok(()) => return Ok(()),
                    Err(EntropyFault::Transient) => continue,
                    Err(fault) => {
                        debug!(source = primary.name(), %fault, "Primary entropy source failed");
                        break;
                    }
                }
            }
            debug!(
                source = primary.name(),
                fallback = self.fallback.name(),
                attempts,
                "Falling back to secondary entropy source"
            );
        }

        attempts += 1;
        match self.fallback.try_fill(dest) {
            Ok(()) => Ok(()),
            Err(fault) => {
                wipe(dest);
                error!(source = self.fallback.name(), %fault, attempts, "Entropy exhausted");
                Err(Error::EntropyUnavailable { attempts })
            }
        }
    }

    /// Return `n` random bytes.
    ///
    /// # Errors
    /// - `InvalidInput` if `n` is zero or above the request cap
    /// - `EntropyUnavailable` as for `fill`
    pub fn random_bytes(&self, n: usize) -> Result<Vec<u8>> {
        if n == 0 {
            return Err(Error::InvalidInput(
                "Requested zero random bytes".to_string(),
            ));
        }
        if n > self.max_request {
            return Err(Error::InvalidInput(format!(
                "Requested {} random bytes, limit is {}",
                n, self.max_request
            )));
        }

        let mut bytes = vec![0u8; n];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }

    /// Return a fixed-size random array.
    pub fn array<const N: usize>(&self) -> Result<[u8; N]> {
        let mut bytes = [0u8; N];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSource")
            .field("primary", &self.primary.as_ref().map(|s| s.name()))
            .field("fallback", &self.fallback.name())
            .field("retries", &self.retries)
            .field("max_request", &self.max_request)
            .finish()
    }
}

/// Return `n` bytes from the system random source.
pub fn random_bytes(n: usize) -> Result<Vec<u8>> {
    RandomSource::system().random_bytes(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakySource {
        calls: Arc<AtomicU32>,
        fault: EntropyFault,
    }

    impl EntropySource for FlakySource {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), EntropyFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            dest.fill(0xAA);
            Err(self.fault.clone())
        }
    }

    struct FixedSource(u8);

    impl EntropySource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), EntropyFault> {
            dest.fill(self.0);
            Ok(())
        }
    }

    fn flaky(fault: EntropyFault) -> (Box<dyn EntropySource>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let source = FlakySource {
            calls: Arc::clone(&calls),
            fault,
        };
        (Box::new(source), calls)
    }

    #[test]
    fn test_system_random_bytes() {
        let a = random_bytes(32).unwrap();
        let b = random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_request_bounds() {
        let source = RandomSource::system();
        assert!(matches!(source.random_bytes(0), Err(Error::InvalidInput(_))));
        assert!(matches!(
            source.random_bytes(MAX_RANDOM_BYTES + 1),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(source.random_bytes(MAX_RANDOM_BYTES).unwrap().len(), MAX_RANDOM_BYTES);
    }

    #[test]
    fn test_transient_primary_is_retried_then_falls_back() {
        let (primary, calls) = flaky(EntropyFault::Transient);
        let source = RandomSource::with_sources(Some(primary), Box::new(FixedSource(7)));

        let bytes = source.random_bytes(16).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_RETRIES);
        assert_eq!(bytes, vec![7u8; 16]);
    }

    #[test]
    fn test_permanent_primary_failure_skips_retries() {
        let (primary, calls) = flaky(EntropyFault::Unsupported);
        let source = RandomSource::with_sources(Some(primary), Box::new(FixedSource(1)));

        source.random_bytes(8).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fails_closed_when_all_sources_fail() {
        let (primary, _) = flaky(EntropyFault::Transient);
        let (fallback, _) = flaky(EntropyFault::Failed("no device".to_string()));
        let source = RandomSource::with_sources(Some(primary), fallback).with_retries(3);

        let mut dest = [0x55u8; 24];
        let err = source.fill(&mut dest).unwrap_err();
        assert!(matches!(err, Error::EntropyUnavailable { attempts: 4 }));
        assert!(dest.iter().all(|b| *b == 0));
    }

    struct StuckHardware {
        calls: Arc<AtomicU32>,
    }

    impl EntropySource for StuckHardware {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn try_fill(&self, dest: &mut [u8]) -> std::result::Result<(), EntropyFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fill_words(dest, || Some(u64::MAX))
        }
    }

    #[test]
    fn test_stuck_hardware_word_is_transient() {
        let mut dest = [0x33u8; 12];
        assert_eq!(
            fill_words(&mut dest, || Some(u64::MAX)),
            Err(EntropyFault::Transient)
        );
        assert_eq!(dest, [0u8; 12]);

        let mut words = [1u64, u64::MAX].into_iter();
        let mut dest = [0x33u8; 16];
        assert_eq!(
            fill_words(&mut dest, || words.next()),
            Err(EntropyFault::Transient)
        );
        assert_eq!(dest, [0u8; 16]);

        let mut counter = 0u64;
        let mut dest = [0u8; 12];
        fill_words(&mut dest, || {
            counter += 1;
            Some(counter)
        })
        .unwrap();
        assert_eq!(&dest[..8], &1u64.to_le_bytes());
        assert_eq!(&dest[8..], &2u64.to_le_bytes()[..4]);
    }

    #[test]
    fn test_stuck_hardware_falls_back_to_os() {
        let calls = Arc::new(AtomicU32::new(0));
        let stuck = StuckHardware {
            calls: Arc::clone(&calls),
        };
        let source = RandomSource::with_sources(Some(Box::new(stuck)), Box::new(OsEntropy))
            .with_retries(3);

        let a: [u8; 12] = source.array().unwrap();
        let b: [u8; 12] = source.array().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_ne!(a, [0xFF; 12]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_self_test_rejects_repeating_words() {
        assert!(!self_test(|| Some(u64::MAX)));
        assert!(!self_test(|| Some(42)));
        assert!(!self_test(|| None));

        let mut counter = 0u64;
        assert!(self_test(|| {
            counter += 1;
            Some(counter)
        }));

        let mut words = [5u64, 5, 6, 6, 7, 8, 9, 10].into_iter();
        assert!(self_test(|| words.next()));
    }

    #[test]
    fn test_clone_shares_sources() {
        let (primary, calls) = flaky(EntropyFault::Transient);
        let source = RandomSource::with_sources(Some(primary), Box::new(FixedSource(4)))
            .with_retries(2);
        let copy = source.clone();

        assert_eq!(copy.random_bytes(4).unwrap(), vec![4u8; 4]);
        assert_eq!(source.random_bytes(4).unwrap(), vec![4u8; 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_array() {
        let source = RandomSource::with_sources(None, Box::new(FixedSource(9)));
        let nonce: [u8; 12] = source.array().unwrap();
        assert_eq!(nonce, [9u8; 12]);
    }

    #[test]
    fn test_hardware_source_when_present() {
        if let Some(hw) = HardwareEntropy::detect() {
            let mut a = [0u8; 21];
            let mut b = [0u8; 21];
            // RDRAND may transiently underflow; the source is only required to
            // succeed eventually.
            let ok = (0..DEFAULT_RETRIES).any(|_| hw.try_fill(&mut a).is_ok())
                && (0..DEFAULT_RETRIES).any(|_| hw.try_fill(&mut b).is_ok());
            if ok {
                assert_ne!(a, b);
            }
        }
    }
}
