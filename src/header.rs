//! Record header blocks.
//!
//! Every output record starts with a fixed header. Workers copy a
//! pre-rendered template and fill in per-record origin bytes; lot and
//! sequence numbers are stamped later, during ordered reassembly.

use crate::lot::LotAssignment;
use crate::schema::Variant;
use std::ops::Range;

pub const INVENTORY_HEADER_LEN: usize = 155;
pub const LEDGER_HEADER_LEN: usize = 169;

const LABEL_LEN: usize = 20;
const INVENTORY_LABEL: &[u8] = b"INV_MARCHE";
const LEDGER_LABEL: &[u8] = b"CPTA_MARCHE";

const YEAR: Range<usize> = 20..24;
const ISSUER: Range<usize> = 24..27;
const LOT_NUMBER: Range<usize> = 27..44;
const COMPOSITION: Range<usize> = 44..69;
const SEQUENCE: Range<usize> = 69..75;

/// Builds a blank output record: header filled in, body all spaces.
///
/// `accounting_date` is the validated `YYYYMMDD` rendering.
pub fn template(variant: Variant, accounting_date: &str, record_len: usize) -> Vec<u8> {
    let mut record = vec![b' '; record_len.max(variant.header_len())];
    let date = accounting_date.as_bytes();
    match variant {
        Variant::Inventory => {
            record[..INVENTORY_LABEL.len()].copy_from_slice(INVENTORY_LABEL);
            let end = (LABEL_LEN + date.len()).min(INVENTORY_HEADER_LEN);
            record[LABEL_LEN..end].copy_from_slice(&date[..end - LABEL_LEN]);
        }
        Variant::Ledger => {
            record[..LEDGER_LABEL.len()].copy_from_slice(LEDGER_LABEL);
            let width = date.len().min(COMPOSITION.len());
            record[COMPOSITION.start..COMPOSITION.start + width].copy_from_slice(&date[..width]);
            write_number(&mut record[LOT_NUMBER], 0);
            write_number(&mut record[SEQUENCE], 0);
        }
    }
    record.truncate(record_len);
    record
}

/// Writes the operation year and issuing application into a ledger header.
/// Shorter values leave the remaining bytes untouched.
pub fn stamp_origin(record: &mut [u8], year: &[u8], issuer: &[u8]) {
    copy_prefix(&mut record[YEAR], year);
    copy_prefix(&mut record[ISSUER], issuer);
}

/// Writes lot and sequence numbers into a ledger header.
pub fn stamp_lot(record: &mut [u8], assignment: LotAssignment) {
    write_number(&mut record[LOT_NUMBER], assignment.lot);
    write_number(&mut record[SEQUENCE], u64::from(assignment.sequence));
}

fn copy_prefix(slot: &mut [u8], value: &[u8]) {
    let n = slot.len().min(value.len());
    slot[..n].copy_from_slice(&value[..n]);
}

// zero padded, keeps the low-order digits when the number is wider
fn write_number(slot: &mut [u8], mut value: u64) {
    for byte in slot.iter_mut().rev() {
        *byte = b'0' + (value % 10) as u8;
        value /= 10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_template() {
        let record = template(Variant::Inventory, "20240131", INVENTORY_HEADER_LEN + 4);
        assert_eq!(record.len(), INVENTORY_HEADER_LEN + 4);
        assert_eq!(&record[..20], b"INV_MARCHE          ");
        assert_eq!(&record[20..28], b"20240131");
        assert!(record[28..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_ledger_template() {
        let record = template(Variant::Ledger, "20240131", LEDGER_HEADER_LEN);
        assert_eq!(&record[..11], b"CPTA_MARCHE");
        assert_eq!(&record[27..44], b"00000000000000000");
        assert_eq!(&record[44..52], b"20240131");
        assert!(record[52..69].iter().all(|&b| b == b' '));
        assert_eq!(&record[69..75], b"000000");
        assert!(record[75..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_stamp_origin_and_lot() {
        let mut record = template(Variant::Ledger, "20240131", LEDGER_HEADER_LEN);
        stamp_origin(&mut record, b"2023", b"GLX");
        stamp_lot(
            &mut record,
            LotAssignment {
                lot: 42,
                sequence: 7,
            },
        );
        assert_eq!(&record[20..27], b"2023GLX");
        assert_eq!(&record[27..44], b"00000000000000042");
        assert_eq!(&record[69..75], b"000007");
    }

    #[test]
    fn test_stamp_origin_short_values() {
        let mut record = template(Variant::Ledger, "20240131", LEDGER_HEADER_LEN);
        stamp_origin(&mut record, b"20", b"");
        assert_eq!(&record[20..27], b"20     ");
    }
}
