//! Schema compiler.
//!
//! Turns a layout descriptor into an ordered, offset-resolved list of field
//! definitions. Enrichment triggers get their synthetic slots inserted right
//! after them, and marker fields are tagged for the record processor.

use crate::codec::{filler, FormatKind};
use crate::error::{Result, TranscoError};
use crate::reference::{reference_reader, Keyspace, ENRICHMENT_WIDTH};
use crate::{amount::AMOUNT_WIDTH, header};
use csv::ByteRecord;
use log::{debug, warn};
use std::fmt;
use std::io::Read;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Alias fields enriched with the service-center code only.
const ALTERNATE_SINGLE_TRIGGERS: [&str; 7] = [
    "Z_ALIAS_ID_EMPPRET",
    "Z_ALIAS_ID_GARANT",
    "Z_ALIAS_ID_EMETTIT",
    "Z_ALIAS_ID_DEPOSIT",
    "Z_ALIAS_ID_EMETSSJ",
    "Z_ALIAS_ID_ACTR",
    "Z_ALIAS_ID_TIERORI",
];

/// Synthetic classification slots: name and width.
const CLASSIFICATION_SLOTS: [(&str, usize); 3] =
    [("CD_TYPIMP", 2), ("CD_TYPEI", 1), ("CD_TVA_APP", 2)];

/// Output record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Delimited inventory records enriched with counterparty identifiers.
    Inventory,
    /// Fixed-width ledger entries with account classification and lots.
    Ledger,
}

impl Variant {
    /// Layout descriptor file name in the reference directory.
    pub fn layout_file(&self) -> &'static str {
        match self {
            Variant::Inventory => "struct_pestd.conf",
            Variant::Ledger => "struct_premai.conf",
        }
    }

    pub fn header_len(&self) -> usize {
        match self {
            Variant::Inventory => header::INVENTORY_HEADER_LEN,
            Variant::Ledger => header::LEDGER_HEADER_LEN,
        }
    }

    /// Whether records carry lot and sequence numbers.
    pub fn allocates_lots(&self) -> bool {
        matches!(self, Variant::Ledger)
    }

    fn rules(&self, name: &str) -> FieldRules {
        match self {
            Variant::Inventory => inventory_rules(name),
            Variant::Ledger => ledger_rules(name),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inventory" => Ok(Variant::Inventory),
            "ledger" => Ok(Variant::Ledger),
            other => Err(format!(
                "unknown variant \"{}\" (expected inventory or ledger)",
                other
            )),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Inventory => f.write_str("inventory"),
            Variant::Ledger => f.write_str("ledger"),
        }
    }
}

/// Which currency a precision marker or amount refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrencySlot {
    Main,
    Imputation,
    Management,
    Counterpart,
}

impl CurrencySlot {
    pub const COUNT: usize = 4;

    pub fn index(&self) -> usize {
        match self {
            CurrencySlot::Main => 0,
            CurrencySlot::Imputation => 1,
            CurrencySlot::Management => 2,
            CurrencySlot::Counterpart => 3,
        }
    }
}

/// Fields whose values the record processor consumes specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Date followed by an `HHMMSS` time that is reset when invalid.
    Timestamp,
    /// Currency code setting the precision of a slot.
    Currency(CurrencySlot),
    /// Decimal count of the staged amount.
    DecimalCount,
    /// Sign of the staged amount.
    AmountSign,
    /// Magnitude digits of the staged amount.
    StagedAmount,
    /// Self-contained 20-byte amount corrected with a slot's precision.
    InlineAmount(CurrencySlot),
    /// Operation date opening the lot id.
    LotDate,
    /// Operation reference carrying the entry number and issuer.
    LotReference,
}

/// How a field derives synthetic output slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedRole {
    None,
    /// Service-center code and company id.
    EnrichmentPair(Keyspace),
    /// Service-center code only.
    EnrichmentSingle(Keyspace),
    /// Imputation flag, internal/external flag and tax code.
    ClassificationTriplet,
}

impl DerivedRole {
    /// Number of synthetic fields following the trigger.
    pub fn synthetic_count(&self) -> usize {
        match self {
            DerivedRole::None => 0,
            DerivedRole::EnrichmentPair(_) => 2,
            DerivedRole::EnrichmentSingle(_) => 1,
            DerivedRole::ClassificationTriplet => CLASSIFICATION_SLOTS.len(),
        }
    }

    fn synthetic_fields(&self, trigger: &str) -> Vec<(String, FormatKind, usize)> {
        match self {
            DerivedRole::None => Vec::new(),
            DerivedRole::EnrichmentPair(_) => vec![
                (
                    format!("{}_SERVICE_CENTER", trigger),
                    FormatKind::TextLeft,
                    ENRICHMENT_WIDTH,
                ),
                (
                    format!("{}_COMPANY", trigger),
                    FormatKind::UnsignedZeroed,
                    ENRICHMENT_WIDTH,
                ),
            ],
            DerivedRole::EnrichmentSingle(_) => vec![(
                format!("{}_SERVICE_CENTER", trigger),
                FormatKind::TextLeft,
                ENRICHMENT_WIDTH,
            )],
            DerivedRole::ClassificationTriplet => CLASSIFICATION_SLOTS
                .iter()
                .map(|(name, width)| (name.to_string(), FormatKind::TextLeft, *width))
                .collect(),
        }
    }
}

/// Where a field's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Column index in the split input record.
    Column(usize),
    /// Populated by the trigger field's lookup.
    Synthetic,
}

/// One compiled output field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub format: FormatKind,
    pub length: usize,
    pub offset: usize,
    pub input: InputSource,
    pub role: DerivedRole,
    pub marker: Option<Marker>,
    pub filler: Box<[u8]>,
}

impl FieldDefinition {
    fn new(
        name: String,
        format: FormatKind,
        length: usize,
        offset: usize,
        input: InputSource,
    ) -> Self {
        FieldDefinition {
            name,
            format,
            length,
            offset,
            input,
            role: DerivedRole::None,
            marker: None,
            filler: filler(length).into_boxed_slice(),
        }
    }

    /// Byte range of this field in the output record.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// One `name;format;length` line of a layout descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub format: String,
    pub length: usize,
}

impl FieldDescriptor {
    pub fn new(name: &str, format: &str, length: usize) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            format: format.to_string(),
            length,
        }
    }
}

/// Reads a layout descriptor. `path` only labels errors.
pub fn read_layout<R: Read>(reader: R, path: &Path) -> Result<Vec<FieldDescriptor>> {
    let mut csv_reader = reference_reader(reader);

    let mut descriptors = Vec::new();
    let mut record = ByteRecord::new();
    while csv_reader.read_byte_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        let name = String::from_utf8_lossy(record.get(0).unwrap_or_default())
            .trim()
            .to_string();
        if name.len() <= 1 && record.len() == 1 {
            continue;
        }
        if record.len() < 3 {
            return Err(TranscoError::config(
                path,
                format!("line {}: expected name;format;length", line),
            ));
        }
        let format = String::from_utf8_lossy(&record[1]).trim().to_string();
        let raw_length = String::from_utf8_lossy(&record[2]).trim().to_string();
        let length = raw_length.parse::<usize>().map_err(|_| {
            TranscoError::config(
                path,
                format!("line {}: invalid length \"{}\" for {}", line, raw_length, name),
            )
        })?;
        descriptors.push(FieldDescriptor {
            name,
            format,
            length,
        });
    }

    if descriptors.is_empty() {
        return Err(TranscoError::config(path, "no field definitions"));
    }
    Ok(descriptors)
}

/// How input records are split into columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLayout {
    /// Columns separated by a single byte.
    Delimited(u8),
    /// Columns at fixed byte spans; lines must be exactly `width` long.
    Positional { spans: Vec<Range<usize>>, width: usize },
}

/// A record that cannot be split at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid record length: expected {expected}, got {actual}")]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Compiled, immutable output layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    variant: Variant,
    fields: Vec<FieldDefinition>,
    input: InputLayout,
    record_len: usize,
}

impl Schema {
    /// Compiles descriptors for `variant`.
    ///
    /// Unknown format tokens compile to pass-through copies.
    pub fn compile(variant: Variant, descriptors: &[FieldDescriptor]) -> Schema {
        let mut fields = Vec::with_capacity(descriptors.len());
        let mut spans = Vec::with_capacity(descriptors.len());
        let mut offset = variant.header_len();
        let mut input_start = 0;

        for (index, descriptor) in descriptors.iter().enumerate() {
            let rules = variant.rules(&descriptor.name);
            let format = rules
                .format
                .or_else(|| FormatKind::from_token(&descriptor.format))
                .unwrap_or_else(|| {
                    warn!(
                        "Unknown format \"{}\" for field {}, copying value as is",
                        descriptor.format, descriptor.name
                    );
                    FormatKind::PassThrough
                });
            let length = rules.length.unwrap_or(descriptor.length);

            spans.push(input_start..input_start + descriptor.length);
            input_start += descriptor.length;

            let mut field = FieldDefinition::new(
                descriptor.name.clone(),
                format,
                length,
                offset,
                InputSource::Column(index),
            );
            field.role = rules.role;
            field.marker = rules.marker;
            let synthetic = rules.role.synthetic_fields(&descriptor.name);
            offset += length;
            fields.push(field);

            for (name, format, width) in synthetic {
                fields.push(FieldDefinition::new(
                    name,
                    format,
                    width,
                    offset,
                    InputSource::Synthetic,
                ));
                offset += width;
            }
        }

        let input = match variant {
            Variant::Inventory => InputLayout::Delimited(b'|'),
            Variant::Ledger => InputLayout::Positional {
                spans,
                width: input_start,
            },
        };

        debug!(
            "Compiled {} layout: {} fields, {} bytes per record",
            variant,
            fields.len(),
            offset
        );

        Schema {
            variant,
            fields,
            input,
            record_len: offset,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn input_layout(&self) -> &InputLayout {
        &self.input
    }

    /// Header length plus the sum of all field lengths.
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Splits one input line into columns.
    pub fn split<'a>(&self, line: &'a [u8]) -> std::result::Result<Vec<&'a [u8]>, LengthMismatch> {
        match &self.input {
            InputLayout::Delimited(separator) => {
                Ok(line.split(|b| b == separator).collect())
            }
            InputLayout::Positional { spans, width } => {
                if line.len() != *width {
                    return Err(LengthMismatch {
                        expected: *width,
                        actual: line.len(),
                    });
                }
                Ok(spans.iter().map(|span| &line[span.clone()]).collect())
            }
        }
    }
}

/// Variant-specific treatment of one named field.
#[derive(Debug)]
struct FieldRules {
    role: DerivedRole,
    marker: Option<Marker>,
    format: Option<FormatKind>,
    length: Option<usize>,
}

impl Default for FieldRules {
    fn default() -> Self {
        FieldRules {
            role: DerivedRole::None,
            marker: None,
            format: None,
            length: None,
        }
    }
}

impl FieldRules {
    fn role(role: DerivedRole) -> Self {
        FieldRules {
            role,
            ..Default::default()
        }
    }

    fn marker(marker: Marker) -> Self {
        FieldRules {
            marker: Some(marker),
            ..Default::default()
        }
    }
}

fn inventory_rules(name: &str) -> FieldRules {
    match name {
        "TIERS" => FieldRules::role(DerivedRole::EnrichmentPair(Keyspace::Primary)),
        "Z_ALIAS_ID_TIERS" => FieldRules::role(DerivedRole::EnrichmentPair(Keyspace::Alternate)),
        n if ALTERNATE_SINGLE_TRIGGERS.contains(&n) => {
            FieldRules::role(DerivedRole::EnrichmentSingle(Keyspace::Alternate))
        }
        "EMISS_CRS" => FieldRules::marker(Marker::Timestamp),
        "CODE_DEVISE_ISO" => FieldRules::marker(Marker::Currency(CurrencySlot::Main)),
        "QTE_DECIMALES" => FieldRules::marker(Marker::DecimalCount),
        "I_SIGN_MNT_DEVISE" => FieldRules::marker(Marker::AmountSign),
        "Z_MNT_ESTD_DEVISE" => FieldRules::marker(Marker::StagedAmount),
        _ => FieldRules::default(),
    }
}

fn ledger_rules(name: &str) -> FieldRules {
    let inline_amount = |slot| FieldRules {
        marker: Some(Marker::InlineAmount(slot)),
        format: Some(FormatKind::Amount),
        length: Some(AMOUNT_WIDTH),
        ..Default::default()
    };
    match name {
        "MAI_DEV_IMP" => FieldRules::marker(Marker::Currency(CurrencySlot::Imputation)),
        "MAI_DEV_GES" => FieldRules::marker(Marker::Currency(CurrencySlot::Management)),
        "MAI_DEV_CTP" => FieldRules::marker(Marker::Currency(CurrencySlot::Counterpart)),
        "MAI_MNT_IMP" => inline_amount(CurrencySlot::Imputation),
        "MAI_MNT_GES" => inline_amount(CurrencySlot::Management),
        // nominal amounts follow the management currency
        "MAI_MNT_NOM" => inline_amount(CurrencySlot::Management),
        "MAI_CPT_IMP" => FieldRules::role(DerivedRole::ClassificationTriplet),
        "MAI_DAT_OPE" => FieldRules::marker(Marker::LotDate),
        "MAI_REF_OPE" => FieldRules::marker(Marker::LotReference),
        _ => FieldRules::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn descriptors(entries: &[(&str, &str, usize)]) -> Vec<FieldDescriptor> {
        entries
            .iter()
            .map(|(n, f, l)| FieldDescriptor::new(n, f, *l))
            .collect()
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let schema = Schema::compile(
            Variant::Inventory,
            &descriptors(&[("A", "charED", 5), ("B", "entierZG", 7), ("C", "skip", 3)]),
        );
        let header = Variant::Inventory.header_len();
        let offsets: Vec<usize> = schema.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![header, header + 5, header + 12]);
        assert_eq!(schema.record_len(), header + 15);
    }

    #[test]
    fn test_enrichment_pair_inserted_after_trigger() {
        let schema = Schema::compile(
            Variant::Inventory,
            &descriptors(&[("TIERS", "charED", 10), ("NEXT", "charED", 4)]),
        );
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["TIERS", "TIERS_SERVICE_CENTER", "TIERS_COMPANY", "NEXT"]
        );

        let fields = schema.fields();
        assert_eq!(
            fields[0].role,
            DerivedRole::EnrichmentPair(Keyspace::Primary)
        );
        assert_eq!(fields[1].input, InputSource::Synthetic);
        assert_eq!(fields[1].offset, fields[0].offset + 10);
        assert_eq!(fields[2].offset, fields[1].offset + ENRICHMENT_WIDTH);
        assert_eq!(fields[2].format, FormatKind::UnsignedZeroed);
        assert_eq!(&*fields[2].filler, &[b'#'; ENRICHMENT_WIDTH][..]);
        // input indices skip synthetic fields
        assert_eq!(fields[3].input, InputSource::Column(1));
        assert_eq!(fields[3].offset, fields[2].offset + ENRICHMENT_WIDTH);
    }

    #[test]
    fn test_single_enrichment_for_alias_fields() {
        let schema = Schema::compile(
            Variant::Inventory,
            &descriptors(&[("Z_ALIAS_ID_GARANT", "charED", 8)]),
        );
        assert_eq!(schema.fields().len(), 2);
        assert_eq!(
            schema.fields()[0].role,
            DerivedRole::EnrichmentSingle(Keyspace::Alternate)
        );
    }

    #[test]
    fn test_unknown_format_compiles_to_pass_through() {
        let schema = Schema::compile(Variant::Inventory, &descriptors(&[("X", "weird", 4)]));
        assert_eq!(schema.fields()[0].format, FormatKind::PassThrough);
    }

    #[test]
    fn test_markers_tagged() {
        let schema = Schema::compile(
            Variant::Inventory,
            &descriptors(&[
                ("EMISS_CRS", "skip", 26),
                ("CODE_DEVISE_ISO", "charED", 3),
                ("QTE_DECIMALES", "skip", 1),
            ]),
        );
        assert_eq!(
            schema.field("EMISS_CRS").unwrap().marker,
            Some(Marker::Timestamp)
        );
        assert_eq!(
            schema.field("CODE_DEVISE_ISO").unwrap().marker,
            Some(Marker::Currency(CurrencySlot::Main))
        );
    }

    #[test]
    fn test_ledger_amounts_and_classification() {
        let schema = Schema::compile(
            Variant::Ledger,
            &descriptors(&[
                ("MAI_CPT_IMP", "charED", 6),
                ("MAI_MNT_IMP", "skip", 15),
                ("MAI_LIB", "charED", 4),
            ]),
        );
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["MAI_CPT_IMP", "CD_TYPIMP", "CD_TYPEI", "CD_TVA_APP", "MAI_MNT_IMP", "MAI_LIB"]
        );
        let amount = schema.field("MAI_MNT_IMP").unwrap();
        assert_eq!(amount.format, FormatKind::Amount);
        assert_eq!(amount.length, AMOUNT_WIDTH);
        assert_eq!(
            schema.record_len(),
            Variant::Ledger.header_len() + 6 + 5 + AMOUNT_WIDTH + 4
        );
        assert_eq!(
            schema.input_layout(),
            &InputLayout::Positional {
                spans: vec![0..6, 6..21, 21..25],
                width: 25
            }
        );
    }

    #[test]
    fn test_split_delimited() {
        let schema = Schema::compile(Variant::Inventory, &descriptors(&[("A", "skip", 1)]));
        let columns = schema.split(b"a|b||c").unwrap();
        assert_eq!(columns, vec![&b"a"[..], b"b", b"", b"c"]);
    }

    #[test]
    fn test_split_positional_checks_width() {
        let schema = Schema::compile(
            Variant::Ledger,
            &descriptors(&[("A", "skip", 2), ("B", "skip", 3)]),
        );
        assert_eq!(schema.split(b"abcde").unwrap(), vec![&b"ab"[..], b"cde"]);
        assert_eq!(
            schema.split(b"abcd").unwrap_err(),
            LengthMismatch {
                expected: 5,
                actual: 4
            }
        );
    }

    #[test]
    fn test_read_layout() {
        let text = "A;charED;5\n\nB;entierZG;7\nC;skip;3\n";
        let parsed = read_layout(Cursor::new(text), Path::new("layout.conf")).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], FieldDescriptor::new("B", "entierZG", 7));
    }

    #[test]
    fn test_read_layout_rejects_bad_length() {
        let err = read_layout(Cursor::new("A;charED;five\n"), Path::new("layout.conf"))
            .unwrap_err();
        assert!(matches!(err, TranscoError::Config { .. }));
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("Ledger".parse::<Variant>().unwrap(), Variant::Ledger);
        assert!("other".parse::<Variant>().is_err());
    }
}
