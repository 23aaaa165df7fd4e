//! Field codec: text to fixed-width byte conversions.
//!
//! Every conversion produces exactly the declared number of bytes. Numeric
//! and amount kinds fall back to a raw truncate-and-pad copy when the input
//! does not parse, so a bad value never stops a record.

use chrono::NaiveTime;
use std::fmt;
use thiserror::Error;

/// Marker byte used to fill slots whose value could not be produced.
pub const FILLER_BYTE: u8 = b'#';

/// Returns a filler pattern of the given length.
pub fn filler(length: usize) -> Vec<u8> {
    vec![FILLER_BYTE; length]
}

/// Output format of a field, as named in layout descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// `skip`: raw copy, truncated or space padded on the right.
    PassThrough,
    /// `charED`: trimmed text, left-justified.
    TextLeft,
    /// `charEG`: trimmed text, right-justified.
    TextRight,
    /// `entierEG`: unsigned, right-justified, space padded.
    UnsignedSpaced,
    /// `entierZG`: unsigned, right-justified, zero padded.
    UnsignedZeroed,
    /// `entierSG`: sign on the left, space padded.
    SignLeadSpaced,
    /// `entierSZG`: sign on the left, zero padded.
    SignLeadZeroed,
    /// `entierSD`: sign on the right, space padded.
    SignTrailSpaced,
    /// `entierSZD`: sign on the right, zero padded.
    SignTrailZeroed,
    /// `amount3DEC`: sign byte, zero padded digits, one decimal-count digit.
    Amount,
}

impl FormatKind {
    /// Resolves a descriptor token. Unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        let kind = match token.trim() {
            "skip" => FormatKind::PassThrough,
            "charED" => FormatKind::TextLeft,
            "charEG" => FormatKind::TextRight,
            "entierEG" => FormatKind::UnsignedSpaced,
            "entierZG" => FormatKind::UnsignedZeroed,
            "entierSG" => FormatKind::SignLeadSpaced,
            "entierSZG" => FormatKind::SignLeadZeroed,
            "entierSD" => FormatKind::SignTrailSpaced,
            "entierSZD" => FormatKind::SignTrailZeroed,
            "amount3DEC" => FormatKind::Amount,
            _ => return None,
        };
        Some(kind)
    }

    /// The descriptor token for this kind.
    pub fn token(&self) -> &'static str {
        match self {
            FormatKind::PassThrough => "skip",
            FormatKind::TextLeft => "charED",
            FormatKind::TextRight => "charEG",
            FormatKind::UnsignedSpaced => "entierEG",
            FormatKind::UnsignedZeroed => "entierZG",
            FormatKind::SignLeadSpaced => "entierSG",
            FormatKind::SignLeadZeroed => "entierSZG",
            FormatKind::SignTrailSpaced => "entierSD",
            FormatKind::SignTrailZeroed => "entierSZD",
            FormatKind::Amount => "amount3DEC",
        }
    }

    fn min_length(&self) -> usize {
        match self {
            FormatKind::SignLeadSpaced
            | FormatKind::SignLeadZeroed
            | FormatKind::SignTrailSpaced
            | FormatKind::SignTrailZeroed => 2,
            FormatKind::Amount => 3,
            _ => 0,
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A conversion that cannot produce bytes for its slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{kind} field needs at least {min} bytes, declared length is {length}")]
    TooNarrow {
        kind: FormatKind,
        min: usize,
        length: usize,
    },
}

/// Sign of a parsed numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn as_byte(&self) -> u8 {
        match self {
            Sign::Positive => b'+',
            Sign::Negative => b'-',
        }
    }
}

/// An integer with leading zeros stripped (at least one digit kept).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numeric {
    pub digits: Vec<u8>,
    pub sign: Sign,
}

/// A numeric value whose decimal point has been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAmount {
    pub digits: Vec<u8>,
    pub sign: Sign,
    /// Number of digits that were on the right of the decimal point.
    pub decimals: usize,
}

/// Parses an optionally signed integer.
///
/// Surrounding whitespace is ignored and the sign may lead or trail.
/// Returns `None` when anything other than digits remains.
pub fn parse_numeric(field: &[u8]) -> Option<Numeric> {
    let trimmed = field.trim_ascii();
    let (sign, body) = match trimmed {
        [b'-', rest @ ..] => (Sign::Negative, rest),
        [b'+', rest @ ..] => (Sign::Positive, rest),
        [rest @ .., b'-'] => (Sign::Negative, rest),
        [rest @ .., b'+'] => (Sign::Positive, rest),
        _ => (Sign::Positive, trimmed),
    };
    let body = body.trim_ascii();
    if body.is_empty() || !body.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let first = body
        .iter()
        .position(|&b| b != b'0')
        .unwrap_or(body.len() - 1);
    Some(Numeric {
        digits: body[first..].to_vec(),
        sign,
    })
}

/// Parses an amount with an optional decimal point.
///
/// The decimal count is the number of bytes between the rightmost `.` and
/// the next blank (or the end of the field).
pub fn parse_amount(field: &[u8]) -> Option<ParsedAmount> {
    let Some(dot) = field.iter().rposition(|&b| b == b'.') else {
        return parse_numeric(field).map(|n| ParsedAmount {
            digits: n.digits,
            sign: n.sign,
            decimals: 0,
        });
    };

    let end = field[dot + 1..]
        .iter()
        .position(|&b| b == b' ')
        .map_or(field.len(), |p| dot + 1 + p);
    let decimals = end - dot - 1;

    let mut joined = Vec::with_capacity(field.len() - 1);
    joined.extend_from_slice(&field[..dot]);
    joined.extend_from_slice(&field[dot + 1..]);

    parse_numeric(&joined).map(|n| ParsedAmount {
        digits: n.digits,
        sign: n.sign,
        decimals,
    })
}

/// Converts `value` to exactly `length` bytes using `kind`.
pub fn convert(kind: FormatKind, value: &[u8], length: usize) -> Result<Vec<u8>, CodecError> {
    let min = kind.min_length();
    if length < min {
        return Err(CodecError::TooNarrow { kind, min, length });
    }

    let converted = match kind {
        FormatKind::PassThrough => None,
        FormatKind::TextLeft => Some(pad_right(value.trim_ascii(), length, b' ')),
        FormatKind::TextRight => Some(pad_left(value.trim_ascii(), length, b' ')),
        FormatKind::UnsignedSpaced => {
            parse_numeric(value).map(|n| pad_left(&n.digits, length, b' '))
        }
        FormatKind::UnsignedZeroed => {
            parse_numeric(value).map(|n| pad_left(&n.digits, length, b'0'))
        }
        FormatKind::SignLeadSpaced => parse_numeric(value).map(|n| sign_lead(&n, length, b' ')),
        FormatKind::SignLeadZeroed => parse_numeric(value).map(|n| sign_lead(&n, length, b'0')),
        FormatKind::SignTrailSpaced => {
            parse_numeric(value).map(|n| sign_trail(&n, length, b' '))
        }
        FormatKind::SignTrailZeroed => {
            parse_numeric(value).map(|n| sign_trail(&n, length, b'0'))
        }
        FormatKind::Amount => parse_amount(value)
            .filter(|a| a.decimals <= 9)
            .map(|a| encode_amount(&a, length)),
    };

    Ok(converted.unwrap_or_else(|| pad_right(value, length, b' ')))
}

/// Validates an `HHMMSS` time of day.
pub fn is_valid_time(time: &[u8]) -> bool {
    if time.len() != 6 || !time.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let pair = |i: usize| u32::from(time[i] - b'0') * 10 + u32::from(time[i + 1] - b'0');
    NaiveTime::from_hms_opt(pair(0), pair(2), pair(4)).is_some()
}

/// Left-aligns `src` in `length` bytes, padding with `fill` on the right.
pub fn pad_right(src: &[u8], length: usize, fill: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(&src[..src.len().min(length)]);
    out.resize(length, fill);
    out
}

/// Right-aligns `src` in `length` bytes, padding with `fill` on the left.
/// Values longer than `length` keep their leftmost bytes.
pub fn pad_left(src: &[u8], length: usize, fill: u8) -> Vec<u8> {
    if src.len() >= length {
        return src[..length].to_vec();
    }
    let mut out = vec![fill; length - src.len()];
    out.extend_from_slice(src);
    out
}

fn sign_lead(n: &Numeric, length: usize, fill: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(length);
    out.push(n.sign.as_byte());
    out.extend(pad_left(&n.digits, length - 1, fill));
    out
}

fn sign_trail(n: &Numeric, length: usize, fill: u8) -> Vec<u8> {
    let mut out = pad_left(&n.digits, length - 1, fill);
    out.push(n.sign.as_byte());
    out
}

fn encode_amount(a: &ParsedAmount, length: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(length);
    out.push(a.sign.as_byte());
    out.extend(pad_left(&a.digits, length - 2, b'0'));
    // decimals <= 9 is checked by the caller
    out.push(b'0' + a.decimals as u8);
    out
}
