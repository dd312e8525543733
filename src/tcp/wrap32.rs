//! 32-bit modular sequence-number arithmetic.

use std::fmt;
use std::ops::Add;

/// A sequence number in the wrapped (32-bit, modular) space used on the
/// wire. Two absolute `u64` checkpoints can map to the same `Wrap32`;
/// `unwrap` recovers whichever absolute value is closest to a given
/// checkpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Wrap32 {
    raw: u32,
}

impl Wrap32 {
    pub fn new(raw: u32) -> Self {
        Wrap32 { raw }
    }

    pub fn raw_value(self) -> u32 {
        self.raw
    }

    /// `wrap(n, zero_point) = zero_point + (n mod 2^32)`.
    pub fn wrap(n: u64, zero_point: Wrap32) -> Wrap32 {
        let offset = (n % (1u64 << 32)) as u32;
        Wrap32::new(zero_point.raw.wrapping_add(offset))
    }

    /// The absolute sequence number closest to `checkpoint` whose `wrap`
    /// (relative to `zero_point`) equals `self`.
    pub fn unwrap(self, zero_point: Wrap32, checkpoint: u64) -> u64 {
        let offset = self.raw.wrapping_sub(zero_point.raw) as u64;
        let high = checkpoint & 0xFFFF_FFFF_0000_0000;
        let candidate = high | offset;

        let mut best = candidate;
        let mut best_dist = abs_diff(candidate, checkpoint);

        if candidate >= (1u64 << 32) {
            let lower = candidate - (1u64 << 32);
            let dist = abs_diff(lower, checkpoint);
            if dist < best_dist || (dist == best_dist && lower < best) {
                best = lower;
                best_dist = dist;
            }
        }

        if let Some(upper) = candidate.checked_add(1u64 << 32) {
            let dist = abs_diff(upper, checkpoint);
            if dist < best_dist || (dist == best_dist && upper < best) {
                best = upper;
            }
        }

        best
    }
}

fn abs_diff(a: u64, b: u64) -> u64 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

impl Add<u32> for Wrap32 {
    type Output = Wrap32;

    fn add(self, rhs: u32) -> Wrap32 {
        Wrap32::new(self.raw.wrapping_add(rhs))
    }
}

impl fmt::Debug for Wrap32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wrap32({})", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundary_wraparound() {
        let zp = Wrap32::new(u32::MAX);
        assert_eq!(Wrap32::wrap(1, zp), Wrap32::new(0));
        assert_eq!(Wrap32::wrap(1, zp).unwrap(zp, 0), 1);
        assert_eq!(Wrap32::wrap(1, zp).unwrap(zp, 1u64 << 33), (1u64 << 32) + 1);
    }

    #[test]
    fn unwrap_picks_smaller_on_tie() {
        // Two candidates equidistant from the checkpoint: prefer the smaller.
        let zp = Wrap32::new(0);
        let w = Wrap32::new(0);
        // checkpoint exactly halfway between 0 and 2^32
        let checkpoint = 1u64 << 31;
        assert_eq!(w.unwrap(zp, checkpoint), 0);
    }

    proptest! {
        #[test]
        fn wrap_unwrap_round_trip(n in 0u64..(1u64 << 40), zp_raw in any::<u32>()) {
            let zp = Wrap32::new(zp_raw);
            let wrapped = Wrap32::wrap(n, zp);
            prop_assert_eq!(wrapped.unwrap(zp, n), n);
        }

        #[test]
        fn unwrap_is_within_half_range_of_checkpoint(raw in any::<u32>(), zp_raw in any::<u32>(), checkpoint in 0u64..(1u64 << 40)) {
            let zp = Wrap32::new(zp_raw);
            let w = Wrap32::new(raw);
            let n = w.unwrap(zp, checkpoint);
            let dist = if n > checkpoint { n - checkpoint } else { checkpoint - n };
            prop_assert!(dist <= (1u64 << 31));
            prop_assert_eq!(Wrap32::wrap(n, zp), w);
        }
    }
}
