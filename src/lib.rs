//! # Placement Ledger
//!
//! Consolidates per-vendor media delivery files into one priced ledger.
//!
//! ## Core Concepts
//!
//! - **Vendor Matrix**: one configuration row per data source naming its raw
//!   file, how to read it, how to build its placement names and which rules
//!   adjust its metrics
//! - **Full Placement Name (FPN)**: underscore-joined identity built from a
//!   source's configured columns
//! - **Dictionary**: FPN → descriptive attributes (buy model, rates, dates),
//!   auto-populated from unresolved placement names
//! - **Error Report**: placements seen in delivery but missing from the
//!   dictionary, rewritten on every import
//! - **Plan Net**: planned cost per plan-level placement, used as the cap
//! - **Cost Engine**: prices every row, caps spend at plan, adds fees
//!
//! ## Example
//!
//! ```rust,ignore
//! use placement_ledger::*;
//!
//! let config = LedgerConfig::with_root("/srv/media");
//! let ledger = run_pipeline(&config)?;
//! println!("total cost {:.2}", ledger.column_sum(columns::TOTAL_COST));
//! ```

pub mod config;
pub mod cost;
pub mod dictionary;
pub mod enrichment;
pub mod error;
pub mod error_report;
pub mod placement;
pub mod rules;
pub mod schema;
pub mod store;
pub mod table;
pub mod transform;
pub mod utils;
pub mod vendor_matrix;

pub use config::{AncillaryRate, AncillaryRates, CapSpec, FeeConfig, LedgerConfig};
pub use cost::CostEngine;
pub use dictionary::{AutoSlot, Dictionary, DictionaryKind};
pub use enrichment::Enrichment;
pub use error::{LedgerError, Result};
pub use error_report::ErrorReport;
pub use placement::{FpnColumn, FpnSpec};
pub use rules::{Rule, RulePhase};
pub use schema::*;
pub use store::{CsvStore, TableStore};
pub use table::{Row, RowExt, Table, Value};
pub use transform::Transform;
pub use vendor_matrix::{OmitPlan, VendorMatrix, VendorSource, PLAN_NET};

use log::{debug, info};
use std::collections::BTreeMap;

pub struct LedgerProcessor;

impl LedgerProcessor {
    /// Imports every source and prices the result.
    pub fn process(config: &LedgerConfig) -> Result<Table> {
        validate_config(config)?;

        let matrix = VendorMatrix::load_config(config)?;
        debug!(
            "Processing {} vendor keys",
            matrix.keys().filter(|k| *k != PLAN_NET).count()
        );

        let mut ledger = matrix.vm_loop()?;
        CostEngine::from_config(config).run(&mut ledger)?;

        info!("Ledger complete with {} rows", ledger.len());
        Ok(ledger)
    }

    /// Like [`process`](Self::process), then checks that no plan-level
    /// placement ends above its planned cost by more than `tolerance`.
    pub fn process_with_verification(config: &LedgerConfig, tolerance: f64) -> Result<Table> {
        let ledger = Self::process(config)?;
        verify_caps(&ledger, tolerance)?;
        Ok(ledger)
    }
}

pub fn run_pipeline(config: &LedgerConfig) -> Result<Table> {
    LedgerProcessor::process(config)
}

pub fn run_pipeline_with_verification(config: &LedgerConfig, tolerance: f64) -> Result<Table> {
    LedgerProcessor::process_with_verification(config, tolerance)
}

fn validate_config(config: &LedgerConfig) -> Result<()> {
    let matrix = config.config_dir.join(&config.vendor_matrix_file);
    if !matrix.is_file() {
        return Err(LedgerError::config(
            matrix.display().to_string(),
            "vendor matrix not found",
        ));
    }
    Ok(())
}

/// Sums final cost and planned cost per `Plan FPN` over capped rows.
pub fn verify_caps(ledger: &Table, tolerance: f64) -> Result<()> {
    let mut totals: BTreeMap<String, (f64, Option<f64>)> = BTreeMap::new();
    for row in &ledger.rows {
        if !row.has_value(columns::PLAN_FPN) || utils::parse_flag(&row.rendered(columns::UNCAPPED)) {
            continue;
        }
        let entry = totals.entry(row.rendered(columns::PLAN_FPN)).or_default();
        entry.0 += row.number_or_zero(columns::NET_COST_FINAL);
        if let Some(planned) = row.number(columns::PLANNED_NET_COST) {
            *entry.1.get_or_insert(0.0) += planned;
        }
    }

    for (plan_fpn, (actual, planned)) in totals {
        let Some(planned) = planned else {
            continue;
        };
        if actual > planned + tolerance {
            return Err(LedgerError::CapViolation {
                plan_fpn,
                actual,
                planned,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_verify_caps_flags_overspend() {
        let ledger = Table::from_rows(vec![
            row(&[
                ("Plan FPN", "Spring_Meta".into()),
                ("Net Cost Final", 600.0.into()),
                ("Uncapped", "FALSE".into()),
            ]),
            row(&[
                ("Plan FPN", "Spring_Meta".into()),
                ("Planned Net Cost", 500.0.into()),
                ("Uncapped", "FALSE".into()),
            ]),
            row(&[
                ("Plan FPN", "Spring_Snap".into()),
                ("Net Cost Final", 900.0.into()),
                ("Uncapped", "TRUE".into()),
            ]),
        ]);

        assert!(matches!(
            verify_caps(&ledger, 0.01),
            Err(LedgerError::CapViolation { plan_fpn, .. }) if plan_fpn == "Spring_Meta"
        ));
        assert!(verify_caps(&ledger, 200.0).is_ok());
    }

    #[test]
    fn test_missing_vendor_matrix_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_root(dir.path());
        assert!(matches!(
            run_pipeline(&config),
            Err(LedgerError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_missing_raw_dir_skips_sources() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_root(dir.path());
        std::fs::create_dir_all(&config.config_dir).unwrap();
        std::fs::write(
            config.config_dir.join(&config.vendor_matrix_file),
            "Vendor Key,FILENAME,Full Placement Name,FILENAME_DICTIONARY\n\
             API_Meta,meta.csv,Campaign,meta_dictionary.csv\n\
             Plan Net,,Campaign,\n",
        )
        .unwrap();
        assert!(!config.raw_dir.exists());

        let ledger = run_pipeline(&config).unwrap();
        assert!(ledger.is_empty());
    }
}
