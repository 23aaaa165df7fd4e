//! Fixed 20-byte amount encoding and currency precision correction.
//!
//! Layout: one sign byte, 18 magnitude digits, one decimal-count digit.
//! Correction arithmetic is exact; rounding goes through `rust_decimal`
//! rather than floating point so 18-digit magnitudes never lose precision.

use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;

/// Total width of an encoded amount.
pub const AMOUNT_WIDTH: usize = 20;

/// Number of magnitude digits in an encoded amount.
pub const MAGNITUDE_DIGITS: usize = 18;

/// Decimal count every corrected amount is expressed with.
pub const CANONICAL_DECIMALS: u8 = 3;

/// Precision assumed when a currency is blank or unknown.
pub const DEFAULT_PRECISION: u8 = 3;

const MAGNITUDE_MODULUS: u128 = 1_000_000_000_000_000_000;

/// A decoded 20-byte amount.
///
/// The sign byte is carried verbatim: it is whatever the sign source put
/// there, usually `+` or `-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedAmount {
    sign: u8,
    magnitude: u64,
    decimals: u8,
}

impl EncodedAmount {
    /// Decodes the fixed layout. Returns `None` unless the input is exactly
    /// 20 bytes with digits in every magnitude and decimal-count position.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != AMOUNT_WIDTH {
            return None;
        }
        let digits = &bytes[1..1 + MAGNITUDE_DIGITS];
        let decimals = bytes[AMOUNT_WIDTH - 1];
        if !digits.iter().all(u8::is_ascii_digit) || !decimals.is_ascii_digit() {
            return None;
        }
        let magnitude = digits
            .iter()
            .fold(0u64, |acc, &d| acc * 10 + u64::from(d - b'0'));
        Some(EncodedAmount {
            sign: bytes[0],
            magnitude,
            decimals: decimals - b'0',
        })
    }

    pub fn encode(&self) -> [u8; AMOUNT_WIDTH] {
        let mut out = [b'0'; AMOUNT_WIDTH];
        out[0] = self.sign;
        let mut rest = self.magnitude;
        for slot in out[1..1 + MAGNITUDE_DIGITS].iter_mut().rev() {
            *slot = b'0' + (rest % 10) as u8;
            rest /= 10;
        }
        out[AMOUNT_WIDTH - 1] = b'0' + self.decimals;
        out
    }

    pub fn sign(&self) -> u8 {
        self.sign
    }

    pub fn magnitude(&self) -> u64 {
        self.magnitude
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Re-expresses the amount for a currency with `precision` decimals.
    ///
    /// - equal precision: digits shift left by `3 - precision`
    /// - fewer source decimals: digits shift left by the difference, no rounding
    /// - more source decimals: magnitude is divided by `10^difference` with
    ///   round half up, then shifted left by `3 - precision`
    ///
    /// Above 3, the magnitude is rounded half up once, straight to 3
    /// decimals. Digits pushed past the 18-digit window are dropped. The
    /// result always carries decimal count 3.
    pub fn with_precision(&self, precision: u8) -> Self {
        let source = i32::from(self.decimals);
        let target = i32::from(precision.min(9));
        let canonical = i32::from(CANONICAL_DECIMALS);

        let magnitude = match source.cmp(&target) {
            Ordering::Equal => shift(self.magnitude, canonical - target),
            Ordering::Less => shift(self.magnitude, target - source),
            Ordering::Greater if target > canonical => {
                round_half_up(self.magnitude, (source - canonical) as u32)
            }
            Ordering::Greater => {
                let reduced = round_half_up(self.magnitude, (source - target) as u32);
                shift(reduced, canonical - target)
            }
        };

        EncodedAmount {
            sign: self.sign,
            magnitude,
            decimals: CANONICAL_DECIMALS,
        }
    }
}

fn shift(magnitude: u64, exponent: i32) -> u64 {
    if exponent >= 0 {
        let scaled = u128::from(magnitude) * 10u128.pow(exponent as u32);
        (scaled % MAGNITUDE_MODULUS) as u64
    } else {
        round_half_up(magnitude, exponent.unsigned_abs())
    }
}

/// `magnitude / 10^places`, rounded half up.
fn round_half_up(magnitude: u64, places: u32) -> u64 {
    // magnitude < 10^18 always fits in an i64
    let value = Decimal::new(magnitude as i64, places);
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.mantissa() as u64
}
