//! Reference tables.
//!
//! Loaded once before processing and never mutated afterwards. Malformed rows
//! are reported through the `rejects` list handed to each loader; missing or
//! unreadable files are configuration errors.

use crate::codec::{convert, filler, FormatKind};
use crate::error::{Result, TranscoError};
use csv::{ByteRecord, Reader, ReaderBuilder};
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::path::Path;

/// Width of each resolved counterparty identifier.
pub const ENRICHMENT_WIDTH: usize = 12;

/// Columns `REF_TIERS.dat` must carry, in order.
pub const COUNTERPARTY_COLUMNS: &str =
    "SIAM;RICOS_SC_ID;RICOS_CPY_ID;RTS_SC_ID;SC_INTITULE_USUEL;SIA_CIT_TYPE";

const PRIMARY_SUFFIX: u8 = b';';

/// `;`-separated reader used for every reference and descriptor file.
pub(crate) fn reference_reader<R: Read>(reader: R) -> Reader<R> {
    ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(reader)
}

/// Zero-based index of the record in its file.
fn index_of(record: &ByteRecord) -> u64 {
    record.position().map_or(0, |p| p.record())
}

/// Which identifier column a counterparty lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    /// Primary party id; keys are stored with a trailing `;`.
    Primary,
    /// Alternate short code, stored as is.
    Alternate,
}

impl Keyspace {
    fn key(&self, id: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(id.len() + 1);
        key.extend_from_slice(id);
        if let Keyspace::Primary = self {
            key.push(PRIMARY_SUFFIX);
        }
        key
    }

    pub fn label(&self) -> &'static str {
        match self {
            Keyspace::Primary => "primary",
            Keyspace::Alternate => "alternate",
        }
    }
}

/// Resolved identifiers, already rendered to their 12-byte output form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterparty {
    pub service_center: Vec<u8>,
    pub company: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct CounterpartyRow<'a> {
    primary_id: &'a [u8],
    service_center: &'a [u8],
    company_id: &'a [u8],
    alternate_id: &'a [u8],
    _label: &'a [u8],
    _kind: &'a [u8],
}

/// Counterparty identifiers keyed by primary id or alternate code.
#[derive(Debug, Clone, Default)]
pub struct CounterpartyTable {
    entries: HashMap<Vec<u8>, Counterparty>,
    primary: usize,
    alternate: usize,
}

impl CounterpartyTable {
    /// Checks a column descriptor: one column name per line.
    pub fn verify_columns<R: BufRead>(reader: R, path: &Path) -> Result<()> {
        let mut names = Vec::new();
        for line in reader.split(b'\n') {
            let line = line?;
            let name = line.trim_ascii();
            if name.len() > 1 {
                names.push(String::from_utf8_lossy(name).into_owned());
            }
        }
        let found = names.join(";");
        if found != COUNTERPARTY_COLUMNS {
            return Err(TranscoError::UnexpectedHeader {
                path: path.to_path_buf(),
                expected: COUNTERPARTY_COLUMNS.to_string(),
                found,
            });
        }
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R, rejects: &mut Vec<String>) -> Result<Self> {
        let mut table = CounterpartyTable::default();
        let mut csv_reader = reference_reader(reader);
        let mut record = ByteRecord::new();

        while csv_reader.read_byte_record(&mut record)? {
            let index = index_of(&record);
            if record.len() != 6 {
                rejects.push(format!(
                    "Counterparty record {:06}: expected 6 columns, found {}",
                    index,
                    record.len()
                ));
                continue;
            }
            let row: CounterpartyRow = record.deserialize(None)?;
            let primary = row.primary_id.trim_ascii();
            let alternate = row.alternate_id.trim_ascii();
            if primary.is_empty() && alternate.is_empty() {
                rejects.push(format!(
                    "Counterparty record {:06}: both identifiers are empty",
                    index
                ));
                continue;
            }

            let resolved = Counterparty {
                service_center: render(FormatKind::TextLeft, row.service_center),
                company: render(FormatKind::UnsignedZeroed, row.company_id),
            };
            if !primary.is_empty() {
                table.insert(Keyspace::Primary, primary, resolved.clone());
            }
            if !alternate.is_empty() {
                table.insert(Keyspace::Alternate, alternate, resolved);
            }
        }

        info!(
            "Loaded {} primary and {} alternate counterparty entries",
            table.primary, table.alternate
        );
        Ok(table)
    }

    /// Adds or replaces one entry. Later rows win.
    pub fn insert(&mut self, keyspace: Keyspace, id: &[u8], counterparty: Counterparty) {
        if self.entries.insert(keyspace.key(id), counterparty).is_none() {
            match keyspace {
                Keyspace::Primary => self.primary += 1,
                Keyspace::Alternate => self.alternate += 1,
            }
        }
    }

    pub fn lookup(&self, keyspace: Keyspace, id: &[u8]) -> Option<&Counterparty> {
        self.entries.get(&keyspace.key(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn render(kind: FormatKind, value: &[u8]) -> Vec<u8> {
    convert(kind, value.trim_ascii(), ENRICHMENT_WIDTH)
        .unwrap_or_else(|_| filler(ENRICHMENT_WIDTH))
}

/// Decimal precision per currency code.
#[derive(Debug, Clone, Default)]
pub struct CurrencyTable {
    precisions: HashMap<Vec<u8>, u8>,
}

impl CurrencyTable {
    /// Reads `code;precision[;...]` rows. Rows without a code or with a
    /// precision that is not a single digit are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut table = CurrencyTable::default();
        let mut csv_reader = reference_reader(reader);
        let mut record = ByteRecord::new();
        let mut skipped = 0usize;

        while csv_reader.read_byte_record(&mut record)? {
            let code = record.get(0).map(<[u8]>::trim_ascii).unwrap_or_default();
            let precision = record.get(1).map(<[u8]>::trim_ascii).unwrap_or_default();
            match precision {
                [digit] if digit.is_ascii_digit() && !code.is_empty() => {
                    table.insert(code, digit - b'0');
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!("Skipped {} currency rows without a usable precision", skipped);
        }
        info!("Loaded {} currencies", table.precisions.len());
        Ok(table)
    }

    pub fn insert(&mut self, code: &[u8], precision: u8) {
        self.precisions.insert(code.to_vec(), precision);
    }

    pub fn precision(&self, code: &[u8]) -> Option<u8> {
        self.precisions.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.precisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precisions.is_empty()
    }
}

/// Whether an account is booked on or off balance sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imputation {
    OnBalance,
    OffBalance,
}

impl Imputation {
    /// Off balance when the balance flag starts with `H`.
    pub fn from_balance_flag(flag: &[u8]) -> Self {
        match flag.first() {
            Some(b'H') => Imputation::OffBalance,
            _ => Imputation::OnBalance,
        }
    }

    pub fn code(&self) -> &'static [u8] {
        match self {
            Imputation::OnBalance => b"BR",
            Imputation::OffBalance => b"HB",
        }
    }
}

/// Derived classification of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub imputation: Imputation,
    /// `I` (internal) or `E` (external); mixed accounts count as internal.
    pub scope: Vec<u8>,
    pub tax_code: Vec<u8>,
}

impl Default for Classification {
    /// Used for accounts missing from the table.
    fn default() -> Self {
        Classification {
            imputation: Imputation::OnBalance,
            scope: b"E".to_vec(),
            tax_code: Vec::new(),
        }
    }
}

/// Column positions in the classification data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationColumns {
    pub account: usize,
    pub balance: usize,
    pub scope: usize,
    pub tax: usize,
    /// Number of columns a data row must have at least.
    pub width: usize,
}

impl ClassificationColumns {
    /// Resolves positions from a `name;format;length` descriptor. Lines with
    /// fewer than three entries are ignored and do not count as columns.
    pub fn from_descriptor<R: Read>(reader: R, path: &Path) -> Result<Self> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut width = 0;
        let mut csv_reader = reference_reader(reader);
        let mut record = ByteRecord::new();

        while csv_reader.read_byte_record(&mut record)? {
            if record.len() < 3 {
                continue;
            }
            let name = String::from_utf8_lossy(record[0].trim_ascii()).into_owned();
            positions.entry(name).or_insert(width);
            width += 1;
        }

        let position = |name: &str| {
            positions.get(name).copied().ok_or_else(|| {
                TranscoError::config(path, format!("column {} is not described", name))
            })
        };
        Ok(ClassificationColumns {
            account: position("COMPTE_DODGE")?,
            balance: position("TOP_BILAN")?,
            scope: position("TOP_INT_EXT")?,
            tax: position("TVA")?,
            width,
        })
    }
}

/// Account classification keyed by account code.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTable {
    accounts: HashMap<Vec<u8>, Classification>,
}

impl ClassificationTable {
    /// Reads data rows. Rows with fewer columns than described, or without an
    /// account code, are skipped.
    pub fn from_reader<R: Read>(reader: R, columns: &ClassificationColumns) -> Result<Self> {
        let mut table = ClassificationTable::default();
        let mut csv_reader = reference_reader(reader);
        let mut record = ByteRecord::new();
        let mut skipped = 0usize;

        while csv_reader.read_byte_record(&mut record)? {
            if record.len() < columns.width {
                skipped += 1;
                continue;
            }
            let account = record[columns.account].trim_ascii();
            if account.is_empty() {
                skipped += 1;
                continue;
            }
            let scope = match record[columns.scope].trim_ascii() {
                b"M" => b"I".to_vec(),
                other => other.to_vec(),
            };
            let classification = Classification {
                imputation: Imputation::from_balance_flag(record[columns.balance].trim_ascii()),
                scope,
                tax_code: record[columns.tax].trim_ascii().to_vec(),
            };
            table.accounts.insert(account.to_vec(), classification);
        }

        if skipped > 0 {
            debug!("Skipped {} short or keyless classification rows", skipped);
        }
        info!("Loaded {} account classifications", table.accounts.len());
        Ok(table)
    }

    pub fn insert(&mut self, account: &[u8], classification: Classification) {
        self.accounts.insert(account.to_vec(), classification);
    }

    pub fn lookup(&self, account: &[u8]) -> Option<&Classification> {
        self.accounts.get(account)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_counterparty_keyspaces() {
        let data = "S1;SC01;42;R1;Label;T\n;SC02;7;R2;Other;T\n";
        let mut rejects = Vec::new();
        let table = CounterpartyTable::from_reader(Cursor::new(data), &mut rejects).unwrap();

        assert!(rejects.is_empty());
        let hit = table.lookup(Keyspace::Primary, b"S1").unwrap();
        assert_eq!(hit.service_center, b"SC01        ");
        assert_eq!(hit.company, b"000000000042");
        assert!(table.lookup(Keyspace::Alternate, b"S1").is_none());
        assert_eq!(table.lookup(Keyspace::Alternate, b"R2").unwrap().company, b"000000000007");
        assert!(table.lookup(Keyspace::Primary, b"R2").is_none());
    }

    #[test]
    fn test_counterparty_rejects() {
        let data = "S1;SC01;42;R1;Label\n ;SC;1; ;L;T\nS3;SC03;3;R3;L;T\n";
        let mut rejects = Vec::new();
        let table = CounterpartyTable::from_reader(Cursor::new(data), &mut rejects).unwrap();

        assert_eq!(rejects.len(), 2);
        assert_eq!(rejects[0], "Counterparty record 000000: expected 6 columns, found 5");
        assert_eq!(rejects[1], "Counterparty record 000001: both identifiers are empty");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_counterparty_non_numeric_company_is_copied() {
        let mut rejects = Vec::new();
        let table = CounterpartyTable::from_reader(
            Cursor::new("S1;SC;AB12;;L;T\n"),
            &mut rejects,
        )
        .unwrap();
        assert_eq!(table.lookup(Keyspace::Primary, b"S1").unwrap().company, b"AB12        ");
    }

    #[test]
    fn test_verify_columns() {
        let ok = "SIAM\nRICOS_SC_ID\n\nRICOS_CPY_ID\nRTS_SC_ID\nSC_INTITULE_USUEL\nSIA_CIT_TYPE\n";
        assert!(CounterpartyTable::verify_columns(Cursor::new(ok), Path::new("t.conf")).is_ok());

        let bad = "SIAM\nRICOS_SC_ID\n";
        let err = CounterpartyTable::verify_columns(Cursor::new(bad), Path::new("t.conf"))
            .unwrap_err();
        assert!(matches!(err, TranscoError::UnexpectedHeader { .. }));
    }

    #[test]
    fn test_currency_table() {
        let data = "EUR;2\nJPY;0;extra\nXXX;\nBAD;12\n;3\n";
        let table = CurrencyTable::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.precision(b"EUR"), Some(2));
        assert_eq!(table.precision(b"JPY"), Some(0));
        assert_eq!(table.precision(b"BAD"), None);
    }

    fn columns() -> ClassificationColumns {
        let descriptor = "COMPTE_DODGE;charED;15\nLIBELLE;charED;30\nTOP_BILAN;charED;1\nTOP_INT_EXT;charED;1\nTVA;charED;2\n";
        ClassificationColumns::from_descriptor(Cursor::new(descriptor), Path::new("rca.conf"))
            .unwrap()
    }

    #[test]
    fn test_classification_columns() {
        let c = columns();
        assert_eq!(
            c,
            ClassificationColumns {
                account: 0,
                balance: 2,
                scope: 3,
                tax: 4,
                width: 5
            }
        );
    }

    #[test]
    fn test_classification_columns_missing_is_config_error() {
        let err = ClassificationColumns::from_descriptor(
            Cursor::new("COMPTE_DODGE;charED;15\n"),
            Path::new("rca.conf"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("TOP_BILAN"));
    }

    #[test]
    fn test_classification_rows() {
        let data = "100;x;H;M;01\n200;x;B;E;\n300;x;B\n;x;B;I;02\n";
        let table = ClassificationTable::from_reader(Cursor::new(data), &columns()).unwrap();

        assert_eq!(table.len(), 2);
        let off = table.lookup(b"100").unwrap();
        assert_eq!(off.imputation.code(), b"HB");
        assert_eq!(off.scope, b"I");
        assert_eq!(off.tax_code, b"01");
        let on = table.lookup(b"200").unwrap();
        assert_eq!(on.imputation, Imputation::OnBalance);
        assert_eq!(on.scope, b"E");
        assert!(table.lookup(b"300").is_none());
    }

    #[test]
    fn test_default_classification() {
        let d = Classification::default();
        assert_eq!(d.imputation.code(), b"BR");
        assert_eq!(d.scope, b"E");
        assert!(d.tax_code.is_empty());
    }
}
