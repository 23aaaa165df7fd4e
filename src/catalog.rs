//! Frozen run snapshot: compiled schema, reference tables, header template.

use crate::config::{AccountingDate, Site};
use crate::error::{Result, TranscoError};
use crate::header;
use crate::reference::{
    ClassificationColumns, ClassificationTable, CounterpartyTable, CurrencyTable,
};
use crate::schema::{read_layout, Schema, Variant};
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const COUNTERPARTY_DESCRIPTOR: &str = "REF_TIERS.conf";
pub const COUNTERPARTY_DATA: &str = "REF_TIERS.dat";
pub const CURRENCY_DATA: &str = "REF_CURRENCY.dat";
pub const CLASSIFICATION_DESCRIPTOR: &str = "REF_RCA_CPT.conf";

/// Everything a worker needs, shared read-only across the pool.
#[derive(Debug, Clone)]
pub struct Catalog {
    schema: Schema,
    counterparties: CounterpartyTable,
    currencies: CurrencyTable,
    classifications: ClassificationTable,
    template: Vec<u8>,
}

impl Catalog {
    pub fn new(
        schema: Schema,
        accounting_date: &AccountingDate,
        counterparties: CounterpartyTable,
        currencies: CurrencyTable,
        classifications: ClassificationTable,
    ) -> Self {
        let template = header::template(
            schema.variant(),
            &accounting_date.compact(),
            schema.record_len(),
        );
        Catalog {
            schema,
            counterparties,
            currencies,
            classifications,
            template,
        }
    }

    /// Loads the layout and the tables `variant` needs from `dir`.
    ///
    /// Row-level problems in the tables are appended to `rejects`.
    pub fn load(
        dir: &Path,
        variant: Variant,
        site: Site,
        accounting_date: &AccountingDate,
        rejects: &mut Vec<String>,
    ) -> Result<Self> {
        let layout_path = dir.join(variant.layout_file());
        let descriptors = read_layout(open(&layout_path)?, &layout_path)?;
        let schema = Schema::compile(variant, &descriptors);

        let mut counterparties = CounterpartyTable::default();
        let mut classifications = ClassificationTable::default();
        match variant {
            Variant::Inventory => {
                let descriptor = dir.join(COUNTERPARTY_DESCRIPTOR);
                CounterpartyTable::verify_columns(open(&descriptor)?, &descriptor)?;
                let data = dir.join(COUNTERPARTY_DATA);
                counterparties = CounterpartyTable::from_reader(open(&data)?, rejects)?;
            }
            Variant::Ledger => {
                let descriptor = dir.join(CLASSIFICATION_DESCRIPTOR);
                let columns = ClassificationColumns::from_descriptor(open(&descriptor)?, &descriptor)?;
                let data = dir.join(site.classification_file());
                classifications = ClassificationTable::from_reader(open(&data)?, &columns)?;
            }
        }

        let currency_path = dir.join(CURRENCY_DATA);
        let currencies = CurrencyTable::from_reader(open(&currency_path)?)?;

        info!(
            "Reference data loaded from {} ({} layout, site {})",
            dir.display(),
            variant,
            site
        );
        Ok(Catalog::new(
            schema,
            accounting_date,
            counterparties,
            currencies,
            classifications,
        ))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn counterparties(&self) -> &CounterpartyTable {
        &self.counterparties
    }

    pub fn currencies(&self) -> &CurrencyTable {
        &self.currencies
    }

    pub fn classifications(&self) -> &ClassificationTable {
        &self.classifications
    }

    /// Blank record with the header already rendered.
    pub fn template(&self) -> &[u8] {
        &self.template
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TranscoError::config(path, e.to_string()))
}
