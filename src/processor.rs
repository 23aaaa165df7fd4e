//! Record processor.
//!
//! Turns one input line into one fixed-width output record. Field-level
//! problems never abort the record: the slot gets its filler pattern and a
//! reject message is collected instead. Only a record that cannot be split
//! at all is dropped.

use crate::amount::{EncodedAmount, AMOUNT_WIDTH, CANONICAL_DECIMALS, DEFAULT_PRECISION};
use crate::catalog::Catalog;
use crate::codec::{convert, is_valid_time, pad_right, FormatKind};
use crate::header;
use crate::lot::LotKey;
use crate::reference::{Classification, Keyspace};
use crate::schema::{CurrencySlot, DerivedRole, FieldDefinition, InputSource, Marker};
use std::borrow::Cow;
use std::ops::Range;

/// Time part of a timestamp slot (`YYYYMMDDHHMMSS...`).
const TIMESTAMP_TIME: Range<usize> = 8..14;
const DEFAULT_TIME: &[u8] = b"000000";

const LOT_DATE_LEN: usize = 8;
const YEAR_LEN: usize = 4;
const REFERENCE_MIN_LEN: usize = 20;
const ENTRY_NUMBER: Range<usize> = 11..17;
const ISSUER: Range<usize> = 17..20;

/// Output of one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    /// Exactly `record_len` bytes, no line terminator.
    pub bytes: Vec<u8>,
    /// Present for variants that allocate lots.
    pub lot_key: Option<LotKey>,
}

/// Stateless per-record converter over a frozen catalog.
#[derive(Debug, Clone, Copy)]
pub struct RecordProcessor<'a> {
    catalog: &'a Catalog,
}

impl<'a> RecordProcessor<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        RecordProcessor { catalog }
    }

    /// Converts `line` (without its terminator).
    ///
    /// Returns `None` when the line cannot be split into columns; one reject
    /// is recorded in that case.
    pub fn process(&self, line: &[u8], rejects: &mut Vec<String>) -> Option<ProcessedRecord> {
        let schema = self.catalog.schema();
        let columns = match schema.split(line) {
            Ok(columns) => columns,
            Err(e) => {
                rejects.push(format!("Record dropped: {}", e));
                return None;
            }
        };

        let mut record = RecordState::new(self.catalog.template());
        let fields = schema.fields();
        let mut index = 0;

        while index < fields.len() {
            let field = &fields[index];
            let derived_end = (index + 1 + field.role.synthetic_count()).min(fields.len());
            let derived = &fields[index + 1..derived_end];
            index = derived_end;

            let InputSource::Column(column) = field.input else {
                continue;
            };
            let Some(&value) = columns.get(column) else {
                rejects.push(format!(
                    "Field {} missing in input (column {})",
                    field.name,
                    column + 1
                ));
                record.write(field, &field.filler);
                for slot in derived {
                    record.write(slot, &slot.filler);
                }
                continue;
            };

            match convert(field.format, value, field.length) {
                Ok(bytes) => record.write(field, &bytes),
                Err(e) => {
                    rejects.push(format!("Field {} conversion error: {}", field.name, e));
                    record.write(field, &field.filler);
                }
            }

            if let Some(marker) = field.marker {
                self.apply_marker(&mut record, field, marker, value, rejects);
            }
            match field.role {
                DerivedRole::None => {}
                DerivedRole::EnrichmentPair(keyspace) | DerivedRole::EnrichmentSingle(keyspace) => {
                    self.enrich(&mut record, keyspace, value, derived, rejects)
                }
                DerivedRole::ClassificationTriplet => {
                    self.classify(&mut record, value, derived, rejects)
                }
            }
        }

        let lot_key = if schema.variant().allocates_lots() {
            header::stamp_origin(&mut record.bytes, &record.lot.year, &record.lot.issuer);
            Some(LotKey {
                issuer: record.lot.issuer,
                lot_id: record.lot.lot_id,
            })
        } else {
            None
        };

        Some(ProcessedRecord {
            bytes: record.bytes,
            lot_key,
        })
    }

    fn apply_marker(
        &self,
        record: &mut RecordState,
        field: &FieldDefinition,
        marker: Marker,
        value: &[u8],
        rejects: &mut Vec<String>,
    ) {
        match marker {
            Marker::Timestamp => {
                let slot = record.slot_mut(field);
                if slot.len() >= TIMESTAMP_TIME.end && !is_valid_time(&slot[TIMESTAMP_TIME]) {
                    slot[TIMESTAMP_TIME].copy_from_slice(DEFAULT_TIME);
                }
            }
            Marker::Currency(slot) => {
                let code = value.trim_ascii();
                let precision = if code.is_empty() {
                    DEFAULT_PRECISION
                } else {
                    self.catalog.currencies().precision(code).unwrap_or_else(|| {
                        rejects.push(format!("Currency {} not found", lossy(code)));
                        DEFAULT_PRECISION
                    })
                };
                record.precisions[slot.index()] = precision;
            }
            Marker::DecimalCount => {
                record.staged.decimals = Some(value.trim_ascii().to_vec());
                let canonical = [b'0' + CANONICAL_DECIMALS];
                record.write(field, &pad_right(&canonical, field.length, b' '));
                record.complete_staged_amount();
            }
            Marker::AmountSign => {
                record.staged.sign = Some(record.slot(field).to_vec());
                record.complete_staged_amount();
            }
            Marker::StagedAmount => {
                record.staged.amount = Some(field.range());
                record.complete_staged_amount();
            }
            Marker::InlineAmount(slot) => {
                let precision = record.precisions[slot.index()];
                if let Some(amount) = EncodedAmount::decode(record.slot(field)) {
                    let corrected = amount.with_precision(precision).encode();
                    record.write(field, &pad_right(&corrected, field.length, b' '));
                }
            }
            Marker::LotDate => {
                record.lot.year = value[..value.len().min(YEAR_LEN)].to_vec();
                record.lot.lot_id = value[..value.len().min(LOT_DATE_LEN)].to_vec();
            }
            Marker::LotReference => {
                if value.len() >= REFERENCE_MIN_LEN {
                    record.lot.lot_id.extend_from_slice(&value[ENTRY_NUMBER]);
                    record.lot.issuer = value[ISSUER].to_vec();
                }
            }
        }
    }

    fn enrich(
        &self,
        record: &mut RecordState,
        keyspace: Keyspace,
        value: &[u8],
        derived: &[FieldDefinition],
        rejects: &mut Vec<String>,
    ) {
        let key = value.trim_ascii();
        let hit = if key.is_empty() {
            None
        } else {
            let hit = self.catalog.counterparties().lookup(keyspace, key);
            if hit.is_none() {
                rejects.push(format!(
                    "Counterparty {} key {} not found",
                    keyspace.label(),
                    lossy(key)
                ));
            }
            hit
        };

        match hit {
            Some(counterparty) => {
                let resolved = [&counterparty.service_center, &counterparty.company];
                for (slot, bytes) in derived.iter().zip(resolved) {
                    record.write(slot, bytes);
                }
            }
            None => {
                for slot in derived {
                    record.write(slot, &slot.filler);
                }
            }
        }
    }

    fn classify(
        &self,
        record: &mut RecordState,
        value: &[u8],
        derived: &[FieldDefinition],
        rejects: &mut Vec<String>,
    ) {
        let account = value.trim_ascii();
        let classification = match self.catalog.classifications().lookup(account) {
            Some(found) => Cow::Borrowed(found),
            None => {
                rejects.push(format!("Account {} not found in classification table", lossy(account)));
                Cow::Owned(Classification::default())
            }
        };

        let values = [
            classification.imputation.code(),
            classification.scope.as_slice(),
            classification.tax_code.as_slice(),
        ];
        for (slot, bytes) in derived.iter().zip(values) {
            let text = convert(FormatKind::TextLeft, bytes, slot.length)
                .unwrap_or_else(|_| slot.filler.to_vec());
            record.write(slot, &text);
        }

        record.lot.lot_id.extend_from_slice(classification.imputation.code());
        record.lot.lot_id.extend_from_slice(&classification.scope);
    }
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

#[derive(Debug, Default)]
struct StagedAmount {
    sign: Option<Vec<u8>>,
    decimals: Option<Vec<u8>>,
    amount: Option<Range<usize>>,
    done: bool,
}

#[derive(Debug, Default)]
struct LotParts {
    year: Vec<u8>,
    issuer: Vec<u8>,
    lot_id: Vec<u8>,
}

/// Mutable state for the record being built.
struct RecordState {
    bytes: Vec<u8>,
    precisions: [u8; CurrencySlot::COUNT],
    staged: StagedAmount,
    lot: LotParts,
}

impl RecordState {
    fn new(template: &[u8]) -> Self {
        RecordState {
            bytes: template.to_vec(),
            precisions: [DEFAULT_PRECISION; CurrencySlot::COUNT],
            staged: StagedAmount::default(),
            lot: LotParts::default(),
        }
    }

    fn slot(&self, field: &FieldDefinition) -> &[u8] {
        &self.bytes[field.range()]
    }

    fn slot_mut(&mut self, field: &FieldDefinition) -> &mut [u8] {
        &mut self.bytes[field.range()]
    }

    fn write(&mut self, field: &FieldDefinition, value: &[u8]) {
        let n = field.length.min(value.len());
        self.bytes[field.offset..field.offset + n].copy_from_slice(&value[..n]);
    }

    /// Corrects the staged amount once sign, digits and decimal count are
    /// all known. Runs at most once per record.
    fn complete_staged_amount(&mut self) {
        let staged = &self.staged;
        let (Some(sign), Some(decimals), Some(range)) =
            (&staged.sign, &staged.decimals, &staged.amount)
        else {
            return;
        };
        if staged.done {
            return;
        }

        let mut combined = Vec::with_capacity(AMOUNT_WIDTH + 2);
        combined.extend_from_slice(sign);
        combined.extend_from_slice(&self.bytes[range.clone()]);
        combined.extend_from_slice(decimals);
        let range = range.clone();
        self.staged.done = true;

        if combined.len() < AMOUNT_WIDTH {
            return;
        }
        if let Some(amount) = EncodedAmount::decode(&combined[..AMOUNT_WIDTH]) {
            let precision = self.precisions[CurrencySlot::Main.index()];
            let corrected = amount.with_precision(precision).encode();
            let digits = pad_right(&corrected[1..], range.len(), b' ');
            self.bytes[range].copy_from_slice(&digits);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountingDate;
    use crate::reference::{
        Classification, ClassificationTable, Counterparty, CounterpartyTable, CurrencyTable,
        Imputation,
    };
    use crate::schema::{FieldDescriptor, Schema, Variant};

    fn date() -> AccountingDate {
        "20240131".parse().unwrap()
    }

    fn counterparties() -> CounterpartyTable {
        let mut table = CounterpartyTable::default();
        let resolved = Counterparty {
            service_center: b"SC01        ".to_vec(),
            company: b"000000000042".to_vec(),
        };
        table.insert(Keyspace::Primary, b"S1", resolved.clone());
        table.insert(Keyspace::Alternate, b"R1", resolved);
        table
    }

    fn currencies() -> CurrencyTable {
        let mut table = CurrencyTable::default();
        table.insert(b"EUR", 2);
        table.insert(b"JPY", 0);
        table
    }

    fn inventory(fields: &[(&str, &str, usize)]) -> Catalog {
        let descriptors: Vec<FieldDescriptor> = fields
            .iter()
            .map(|(n, f, l)| FieldDescriptor::new(n, f, *l))
            .collect();
        Catalog::new(
            Schema::compile(Variant::Inventory, &descriptors),
            &date(),
            counterparties(),
            currencies(),
            ClassificationTable::default(),
        )
    }

    fn body(catalog: &Catalog, record: &ProcessedRecord) -> String {
        String::from_utf8_lossy(&record.bytes[catalog.schema().variant().header_len()..]).into_owned()
    }

    #[test]
    fn test_plain_fields_and_header() {
        let catalog = inventory(&[("A", "charED", 5), ("B", "entierZG", 6), ("C", "entierSZD", 5)]);
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog).process(b"ab|42|-7", &mut rejects).unwrap();

        assert!(rejects.is_empty());
        assert_eq!(record.bytes.len(), catalog.schema().record_len());
        assert_eq!(&record.bytes[..10], b"INV_MARCHE");
        assert_eq!(&record.bytes[20..28], b"20240131");
        assert_eq!(body(&catalog, &record), "ab   0000420007-");
        assert!(record.lot_key.is_none());
    }

    #[test]
    fn test_missing_column_fills_and_rejects_once() {
        let catalog = inventory(&[("A", "charED", 3), ("TIERS", "charED", 4)]);
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog).process(b"x", &mut rejects).unwrap();

        assert_eq!(rejects.len(), 1);
        assert!(rejects[0].contains("TIERS"));
        assert_eq!(body(&catalog, &record), format!("x  {}", "#".repeat(4 + 24)));
    }

    #[test]
    fn test_enrichment_hit_miss_and_blank() {
        let catalog = inventory(&[("TIERS", "charED", 4)]);
        let processor = RecordProcessor::new(&catalog);

        let mut rejects = Vec::new();
        let hit = processor.process(b"S1", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &hit), "S1  SC01        000000000042");
        assert!(rejects.is_empty());

        let miss = processor.process(b"S9", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &miss), format!("S9  {}", "#".repeat(24)));
        assert_eq!(rejects.len(), 1);
        assert!(rejects[0].contains("S9"));

        let blank = processor.process(b"  ", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &blank), format!("    {}", "#".repeat(24)));
        assert_eq!(rejects.len(), 1);
    }

    #[test]
    fn test_alternate_single_enrichment() {
        let catalog = inventory(&[("Z_ALIAS_ID_ACTR", "charED", 3)]);
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog).process(b"R1", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &record), "R1 SC01        ");
        // primary ids are not visible through the alternate keyspace
        let record = RecordProcessor::new(&catalog).process(b"S1", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &record), format!("S1 {}", "#".repeat(12)));
        assert_eq!(rejects.len(), 1);
    }

    #[test]
    fn test_conversion_fault_uses_filler() {
        let catalog = inventory(&[("S", "entierSG", 1), ("N", "charED", 2)]);
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog).process(b"5|ok", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &record), "#ok");
        assert_eq!(rejects.len(), 1);
        assert!(rejects[0].contains("conversion error"));
    }

    #[test]
    fn test_timestamp_time_reset() {
        let catalog = inventory(&[("EMISS_CRS", "charED", 20)]);
        let processor = RecordProcessor::new(&catalog);
        let mut rejects = Vec::new();

        let valid = processor.process(b"20240131235959000000", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &valid), "20240131235959000000");
        let invalid = processor.process(b"20240131246199123456", &mut rejects).unwrap();
        assert_eq!(body(&catalog, &invalid), "20240131000000123456");
        assert!(rejects.is_empty());
    }

    fn staged_catalog() -> Catalog {
        inventory(&[
            ("CODE_DEVISE_ISO", "charED", 3),
            ("I_SIGN_MNT_DEVISE", "charED", 1),
            ("Z_MNT_ESTD_DEVISE", "entierZG", 18),
            ("QTE_DECIMALES", "charED", 1),
        ])
    }

    #[test]
    fn test_staged_amount_corrected_with_currency_precision() {
        let catalog = staged_catalog();
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog)
            .process(b"EUR|-|125|3", &mut rejects)
            .unwrap();

        assert!(rejects.is_empty());
        // 0.125 EUR rounds to 0.13, written with three decimals
        assert_eq!(body(&catalog, &record), "EUR-0000000000000001303");
    }

    #[test]
    fn test_unknown_currency_defaults_to_three_decimals() {
        let catalog = staged_catalog();
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog)
            .process(b"XYZ|+|125|3", &mut rejects)
            .unwrap();
        assert_eq!(rejects.len(), 1);
        assert!(rejects[0].contains("XYZ"));
        assert_eq!(body(&catalog, &record), "XYZ+0000000000000001253");
    }

    #[test]
    fn test_staged_amount_order_independent() {
        let catalog = inventory(&[
            ("QTE_DECIMALES", "charED", 1),
            ("Z_MNT_ESTD_DEVISE", "entierZG", 18),
            ("CODE_DEVISE_ISO", "charED", 3),
            ("I_SIGN_MNT_DEVISE", "charED", 1),
        ]);
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog)
            .process(b"0|5|JPY|+", &mut rejects)
            .unwrap();
        // currency comes before the sign, so precision 0 is in effect: 5 -> 5000
        assert_eq!(body(&catalog, &record), "3000000000000005000JPY+");
    }

    fn ledger() -> Catalog {
        let descriptors = vec![
            FieldDescriptor::new("MAI_DAT_OPE", "charED", 8),
            FieldDescriptor::new("MAI_CPT_IMP", "charED", 6),
            FieldDescriptor::new("MAI_DEV_IMP", "charED", 3),
            FieldDescriptor::new("MAI_MNT_IMP", "amount3DEC", 10),
            FieldDescriptor::new("MAI_REF_OPE", "charED", 20),
        ];
        let mut classifications = ClassificationTable::default();
        classifications.insert(
            b"ACC001",
            Classification {
                imputation: Imputation::OffBalance,
                scope: b"I".to_vec(),
                tax_code: b"01".to_vec(),
            },
        );
        Catalog::new(
            Schema::compile(Variant::Ledger, &descriptors),
            &date(),
            CounterpartyTable::default(),
            currencies(),
            classifications,
        )
    }

    #[test]
    fn test_ledger_record() {
        let catalog = ledger();
        let line = b"20231215ACC001EUR   -12.345ABCDEFGHIJK123456GLX";
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog).process(line, &mut rejects).unwrap();

        assert!(rejects.is_empty(), "{:?}", rejects);
        assert_eq!(record.bytes.len(), catalog.schema().record_len());
        assert_eq!(&record.bytes[20..27], b"2023GLX");
        assert_eq!(
            record.lot_key,
            Some(LotKey {
                issuer: b"GLX".to_vec(),
                lot_id: b"20231215HBI123456".to_vec(),
            })
        );
        assert_eq!(
            body(&catalog, &record),
            "20231215ACC001HBI01EUR-0000000000000123503ABCDEFGHIJK123456GLX"
        );
    }

    #[test]
    fn test_ledger_unknown_account_uses_defaults() {
        let catalog = ledger();
        let line = b"20231215ZZZ999EUR       1.5ABCDEFGHIJK123456GLX";
        let mut rejects = Vec::new();
        let record = RecordProcessor::new(&catalog).process(line, &mut rejects).unwrap();

        assert_eq!(rejects.len(), 1);
        assert!(rejects[0].contains("ZZZ999"));
        assert_eq!(
            record.lot_key.as_ref().unwrap().lot_id,
            b"20231215BRE123456".to_vec()
        );
        assert!(body(&catalog, &record).starts_with("20231215ZZZ999BRE  EUR+0000000000000001503"));
    }

    #[test]
    fn test_ledger_length_mismatch_drops_record() {
        let catalog = ledger();
        let mut rejects = Vec::new();
        assert!(RecordProcessor::new(&catalog).process(b"short", &mut rejects).is_none());
        assert_eq!(rejects.len(), 1);
        assert!(rejects[0].contains("expected 47"));
    }
}
