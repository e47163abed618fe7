//! Cycle-based timekeeping.
//!
//! All kernel timeouts are expressed in TSC cycles. The cycles-per-
//! millisecond conversion starts from a placeholder constant and should
//! be replaced by a PIT-measured value via `calibrate` during bring-up;
//! until then sleeps and timeouts are only approximate.

use core::sync::atomic::{AtomicU64, Ordering};

/// Placeholder conversion assuming a ~1 GHz TSC. See module docs.
pub const DEFAULT_CYCLES_PER_MS: u64 = 1_000_000;

static CYCLES_PER_MS: AtomicU64 = AtomicU64::new(DEFAULT_CYCLES_PER_MS);

/// Current TSC value.
#[inline]
pub fn cycles() -> u64 {
    crate::arch::x86_64::cpu::read_tsc()
}

pub fn cycles_per_ms() -> u64 {
    CYCLES_PER_MS.load(Ordering::Relaxed)
}

#[inline]
pub fn ms_to_cycles(ms: u64) -> u64 {
    ms.saturating_mul(cycles_per_ms())
}

/// Install a measured cycles-per-millisecond value (from the PIT driver).
pub fn calibrate(measured_cycles_per_ms: u64) {
    if measured_cycles_per_ms > 0 {
        CYCLES_PER_MS.store(measured_cycles_per_ms, Ordering::Relaxed);
    }
}

/// Milliseconds since boot under the current calibration.
pub fn uptime_ms() -> u64 {
    cycles() / cycles_per_ms()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_monotonic() {
        let a = cycles();
        let b = cycles();
        assert!(b >= a);
    }

    #[test]
    fn test_ms_conversion() {
        assert_eq!(ms_to_cycles(3), 3 * cycles_per_ms());
        assert_eq!(ms_to_cycles(0), 0);
    }

    #[test]
    fn test_calibrate_rejects_zero() {
        let before = cycles_per_ms();
        calibrate(0);
        assert_eq!(cycles_per_ms(), before);
    }
}
