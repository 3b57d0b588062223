use crate::config::{load_ancillary_rates, AncillaryRate, AncillaryRates, LedgerConfig};
use crate::dictionary::{parse_auto_order, AutoSlot, Dictionary, DictionaryKind};
use crate::enrichment::Enrichment;
use crate::error::{LedgerError, Result};
use crate::error_report::ErrorReport;
use crate::placement::FpnSpec;
use crate::rules::{apply_phase, parse_rules, Rule, RulePhase};
use crate::schema::{columns, dictionary_columns, RateModel};
use crate::store::TableStore;
use crate::table::{Row, RowExt, Table, Value};
use crate::transform::{grid_to_table, header_rows, parse_transforms, Transform};
use crate::utils::{parse_date_strict, parse_flag, retry_with_backoff, split_list};
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration as StdDuration, SystemTime};

/// Vendor key of the planned-cost source.
pub const PLAN_NET: &str = "Plan Net";

const READ_ATTEMPTS: u32 = 3;
const READ_BACKOFF: StdDuration = StdDuration::from_millis(200);

/// Vendor matrix header names.
pub mod matrix_columns {
    pub const VENDOR_KEY: &str = "Vendor Key";
    pub const FILENAME: &str = "FILENAME";
    pub const FIRSTROW: &str = "FIRSTROW";
    pub const LASTROW: &str = "LASTROW";
    pub const FULL_PLACEMENT_NAME: &str = "Full Placement Name";
    pub const PLACEMENT: &str = "PLACEMENT";
    pub const AUTO_DICTIONARY_ORDER: &str = "AUTO DICTIONARY ORDER";
    pub const FILENAME_DICTIONARY: &str = "FILENAME_DICTIONARY";
    pub const FILENAME_ERROR: &str = "FILENAME_ERROR";
    pub const START_DATE: &str = "START DATE";
    pub const END_DATE: &str = "END DATE";
    pub const DROP: &str = "DROP";
    pub const TRANSFORM: &str = "TRANSFORM";
    pub const API_MERGE: &str = "API_MERGE";
    pub const OMIT_PLAN: &str = "OMIT_PLAN";
    pub const UNCAPPED: &str = "UNCAPPED";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OmitPlan {
    #[default]
    None,
    /// Imported, but left out of the plan slice.
    Plan,
    /// Not imported at all.
    All,
}

impl OmitPlan {
    fn parse(cell: &str) -> Self {
        match cell.trim().to_ascii_uppercase().as_str() {
            "PLAN" => OmitPlan::Plan,
            "ALL" => OmitPlan::All,
            _ => OmitPlan::None,
        }
    }
}

/// Parsed vendor matrix row.
#[derive(Debug, Clone)]
pub struct VendorSource {
    pub key: String,
    pub file_name: String,
    /// Lines before the header.
    pub first_row: usize,
    /// Footer lines after the data.
    pub last_row: usize,
    pub fpn: FpnSpec,
    pub placement_column: Option<String>,
    pub auto_order: Vec<AutoSlot>,
    pub dictionary_file: String,
    pub error_file: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub drop_columns: Vec<String>,
    pub transforms: Vec<Transform>,
    pub api_merge_days: Option<i64>,
    pub omit_plan: OmitPlan,
    pub uncapped: bool,
    /// Standard column → raw alternatives, summed when several are present.
    pub metric_map: Vec<(String, Vec<String>)>,
    pub rules: Vec<Rule>,
}

impl VendorSource {
    pub fn is_plan(&self) -> bool {
        self.key == PLAN_NET
    }

    fn from_row(row: &Row, plan_dictionary: &str) -> Result<Self> {
        use matrix_columns::*;

        let key = row.rendered(VENDOR_KEY).trim().to_string();
        let is_plan = key == PLAN_NET;

        let dictionary_file = match row.rendered(FILENAME_DICTIONARY).trim() {
            "" if is_plan => plan_dictionary.to_string(),
            "" => return Err(LedgerError::MissingDictionary(key)),
            name => name.to_string(),
        };
        let error_file = match row.rendered(FILENAME_ERROR).trim() {
            "" => format!("{}.csv", key.replace([' ', '/'], "_")),
            name => name.to_string(),
        };

        let mut metric_map = Vec::new();
        for standard in std::iter::once(&columns::DATE).chain(columns::METRICS.iter()) {
            let raw = split_list(&row.rendered(standard));
            if !raw.is_empty() {
                metric_map.push((standard.to_string(), raw));
            }
        }

        Ok(Self {
            file_name: row.rendered(FILENAME).trim().to_string(),
            first_row: parse_count(row, FIRSTROW),
            last_row: parse_count(row, LASTROW),
            fpn: FpnSpec::parse(&row.rendered(FULL_PLACEMENT_NAME)),
            placement_column: Some(row.rendered(PLACEMENT).trim().to_string())
                .filter(|c| !c.is_empty()),
            auto_order: parse_auto_order(&row.rendered(AUTO_DICTIONARY_ORDER)),
            dictionary_file,
            error_file,
            start_date: optional_date(row, START_DATE)?,
            end_date: optional_date(row, END_DATE)?,
            drop_columns: split_list(&row.rendered(DROP)),
            transforms: parse_transforms(&row.rendered(TRANSFORM)),
            api_merge_days: row.number(API_MERGE).map(|d| d as i64),
            omit_plan: OmitPlan::parse(&row.rendered(OMIT_PLAN)),
            uncapped: !is_plan && parse_flag(&row.rendered(UNCAPPED)),
            metric_map,
            rules: parse_rules(row),
            key,
        })
    }

    /// Raw header carrying this source's dates.
    fn raw_date_column(&self) -> String {
        self.metric_map
            .iter()
            .find(|(standard, _)| standard == columns::DATE)
            .and_then(|(_, raw)| raw.first().cloned())
            .unwrap_or_else(|| columns::DATE.to_string())
    }
}

fn optional_date(row: &Row, column: &str) -> Result<Option<NaiveDate>> {
    let cell = row.rendered(column);
    if cell.trim().is_empty() {
        return Ok(None);
    }
    parse_date_strict(&cell).map(Some)
}

fn parse_count(row: &Row, column: &str) -> usize {
    row.number(column)
        .filter(|n| *n > 0.0)
        .map(|n| n as usize)
        .unwrap_or(0)
}

pub struct VendorMatrix {
    config: LedgerConfig,
    sources: BTreeMap<String, VendorSource>,
    enrichment: Enrichment,
    ancillary: AncillaryRates,
}

impl VendorMatrix {
    /// Reads the vendor matrix and the optional enrichment and ancillary
    /// tables. Fails when the matrix has no `Plan Net` row or a source has no
    /// dictionary file.
    pub fn load_config(config: &LedgerConfig) -> Result<Self> {
        let store = config.config_store();
        let table = store.load(&config.vendor_matrix_file)?;
        if !table.has_column(matrix_columns::VENDOR_KEY) {
            return Err(LedgerError::config(
                &config.vendor_matrix_file,
                format!("missing column '{}'", matrix_columns::VENDOR_KEY),
            ));
        }

        let mut sources = BTreeMap::new();
        for row in &table.rows {
            if !row.has_value(matrix_columns::VENDOR_KEY) {
                continue;
            }
            let source = VendorSource::from_row(row, &config.plan_dictionary_file)?;
            if sources.contains_key(&source.key) {
                warn!("Duplicate vendor key '{}', keeping the last row", source.key);
            }
            sources.insert(source.key.clone(), source);
        }

        if !sources.contains_key(PLAN_NET) {
            return Err(LedgerError::MissingPlanNet(PLAN_NET.to_string()));
        }

        info!("Vendor matrix loaded with {} sources", sources.len());
        Ok(Self {
            config: config.clone(),
            sources,
            enrichment: Enrichment::load(config),
            ancillary: load_ancillary_rates(config),
        })
    }

    pub fn source(&self, key: &str) -> Result<&VendorSource> {
        self.sources
            .get(key)
            .ok_or_else(|| LedgerError::UnknownVendorKey(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    fn plan_source(&self) -> Result<&VendorSource> {
        self.sources
            .get(PLAN_NET)
            .ok_or_else(|| LedgerError::MissingPlanNet(PLAN_NET.to_string()))
    }

    /// Imports one non-plan source from its raw file.
    pub fn import_source(&self, key: &str) -> Result<Table> {
        let source = self.source(key)?;
        if source.is_plan() {
            return Err(LedgerError::config(
                &self.config.vendor_matrix_file,
                "Plan Net is built from the other sources, not a raw file",
            ));
        }

        let raw_store = self.config.raw_store();
        let mut grid = retry_with_backoff(READ_ATTEMPTS, READ_BACKOFF, || {
            raw_store.load_grid(&source.file_name)
        })?;
        grid.drain(..source.first_row.min(grid.len()));
        grid.truncate(grid.len().saturating_sub(source.last_row));

        let mut table = grid_to_table(grid, header_rows(&source.transforms));
        for transform in &source.transforms {
            table = transform.apply(table);
        }
        map_metrics(&mut table, &source.metric_map, &source.key);
        source.fpn.apply(&mut table, columns::FPN);

        let dictionary = self.resolve_identity(source, &table)?;
        dictionary.merge(&mut table, columns::FPN);

        apply_phase(&source.rules, RulePhase::Pre, &mut table);
        coerce_metrics(&mut table);
        filter_dates(&mut table, source.start_date, source.end_date);
        add_ancillary_costs(&mut table, &self.ancillary);
        table.drop_columns(&source.drop_columns);
        apply_phase(&source.rules, RulePhase::Post, &mut table);

        stamp_source(&mut table, &source.key, source.uncapped);
        info!("Imported {} rows from {}", table.len(), source.key);
        Ok(table)
    }

    /// Loads the source's dictionary, fills it from unresolved placements,
    /// and writes what is still unresolved.
    fn resolve_identity(&self, source: &VendorSource, table: &Table) -> Result<Dictionary> {
        let dictionary_store = self.config.dictionary_store();
        let mut dictionary = Dictionary::load(
            &dictionary_store,
            &source.dictionary_file,
            DictionaryKind::Placement,
        )?;
        let placement = source.placement_column.as_deref();

        let errors = ErrorReport::create(table, &dictionary, placement, columns::FPN);
        let added = dictionary.auto(
            &errors,
            &source.auto_order,
            placement.unwrap_or(columns::FPN),
        );
        dictionary.enrich(&self.enrichment);
        if added > 0 {
            dictionary.save(&dictionary_store)?;
        }

        let remaining = ErrorReport::create(table, &dictionary, placement, columns::FPN);
        remaining.write(&self.config.error_store(), &source.error_file)?;
        Ok(dictionary)
    }

    /// Slices `actuals` to the plan-level columns and attaches planned cost.
    /// Rows from sources marked `OMIT_PLAN` are left out.
    pub fn import_plan(&self, actuals: &Table) -> Result<Table> {
        let plan = self.plan_source()?;
        let omitted: HashSet<&str> = self
            .sources
            .values()
            .filter(|s| s.omit_plan != OmitPlan::None)
            .map(|s| s.key.as_str())
            .collect();
        let plan_columns = plan.fpn.column_names();

        let mut rows = Table::new(plan_columns.clone());
        for row in &actuals.rows {
            if omitted.contains(row.rendered(columns::VENDOR_KEY).as_str()) {
                continue;
            }
            let sliced: Row = plan_columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
                .collect();
            rows.push(sliced);
        }
        plan.fpn.apply(&mut rows, columns::FPN);
        rows.dedup_first_by(|r| r.rendered(columns::FPN));

        let dictionary_store = self.config.dictionary_store();
        let dictionary =
            Dictionary::load(&dictionary_store, &plan.dictionary_file, DictionaryKind::Plan)?;
        ErrorReport::create(&rows, &dictionary, None, columns::FPN)
            .write(&self.config.error_store(), &plan.error_file)?;
        dictionary.merge(&mut rows, columns::FPN);

        rows.set_column(columns::PLAN_FPN, |r| {
            r.get(columns::FPN).cloned().unwrap_or_default()
        });
        stamp_source(&mut rows, PLAN_NET, false);
        debug!("Plan slice has {} placements", rows.len());
        Ok(rows)
    }

    /// Imports every source in raw-file modification order, then the plan,
    /// and tags each row with its plan-level placement name.
    pub fn vm_loop(&self) -> Result<Table> {
        let raw_store = self.config.raw_store();

        let mut ordered: Vec<(SystemTime, &VendorSource)> = Vec::new();
        for source in self.sources.values().filter(|s| !s.is_plan()) {
            if source.omit_plan == OmitPlan::All {
                info!("Skipping {} (OMIT_PLAN=ALL)", source.key);
                continue;
            }
            if source.file_name.is_empty() || !raw_store.exists(&source.file_name) {
                warn!(
                    "Raw file '{}' for {} not found, skipping",
                    source.file_name, source.key
                );
                continue;
            }
            match raw_store.modified(&source.file_name) {
                Ok(modified) => ordered.push((modified, source)),
                Err(e) => warn!("Cannot stat raw file for {}, skipping: {}", source.key, e),
            }
        }
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.key.cmp(&b.1.key)));

        let mut imported = Vec::with_capacity(ordered.len());
        for (_, source) in ordered {
            match self.import_source(&source.key) {
                Ok(table) => imported.push(table),
                Err(e) => warn!("Failed to import {}, skipping: {}", source.key, e),
            }
        }
        let mut ledger = Table::concat(imported);

        let plan = self.plan_source()?;
        let plan_rows = self.import_plan(&ledger)?;
        plan.fpn.apply(&mut ledger, columns::PLAN_FPN);
        ledger.append(plan_rows);

        info!("Vendor matrix produced {} rows", ledger.len());
        Ok(ledger)
    }

    /// Merges a fresh API pull into the source's persisted raw file. Persisted
    /// rows dated inside the refresh window are replaced by `fresh`; the
    /// window is `API_MERGE` days back from the newest fresh date, or
    /// everything from the oldest fresh date when no window is configured.
    pub fn merge_api_pull(&self, key: &str, fresh: &Table) -> Result<Table> {
        let source = self.source(key)?;
        let raw_store = self.config.raw_store();
        let date_column = source.raw_date_column();

        let fresh_dates: Vec<NaiveDate> = fresh
            .rows
            .iter()
            .filter_map(|r| r.date(&date_column))
            .collect();
        let cutoff = match (source.api_merge_days, fresh_dates.iter().max()) {
            (Some(days), Some(newest)) => Some(*newest - Duration::days(days)),
            (None, _) => fresh_dates.iter().min().copied(),
            (Some(_), None) => None,
        };

        let mut merged = if raw_store.exists(&source.file_name) {
            raw_store.load(&source.file_name)?
        } else {
            Table::default()
        };
        if let Some(cutoff) = cutoff {
            let before = merged.len();
            merged
                .rows
                .retain(|r| r.date(&date_column).map_or(true, |d| d < cutoff));
            debug!(
                "{}: replacing {} rows dated on or after {}",
                key,
                before - merged.len(),
                cutoff
            );
        }
        merged.append(fresh.clone());

        raw_store.save(&source.file_name, &merged)?;
        Ok(merged)
    }
}

/// Copies or sums raw columns into their standard names. Raw columns stay in
/// place so they can still feed the placement name.
fn map_metrics(table: &mut Table, metric_map: &[(String, Vec<String>)], key: &str) {
    for (standard, raw) in metric_map {
        let present: Vec<&String> = raw.iter().filter(|c| table.has_column(c)).collect();
        if present.is_empty() {
            warn!("{}: none of {:?} found for {}", key, raw, standard);
            continue;
        }
        if present.len() == 1 && *present[0] == *standard {
            continue;
        }

        if standard == columns::DATE {
            let from = present[0].clone();
            table.set_column(standard, |r| r.get(&from).cloned().unwrap_or_default());
        } else {
            table.set_column(standard, |r| {
                let values: Vec<f64> = present.iter().filter_map(|c| r.number(c)).collect();
                if values.is_empty() {
                    Value::Null
                } else {
                    Value::Number(values.iter().sum())
                }
            });
        }
    }
}

fn coerce_metrics(table: &mut Table) {
    for row in &mut table.rows {
        for (column, value) in row.iter_mut() {
            if column == columns::DATE {
                *value = value.as_date().map(Value::Date).unwrap_or(Value::Null);
            } else if columns::METRICS.contains(&column.as_str()) {
                *value = Value::from(value.as_f64());
            }
        }
    }
}

/// Inclusive window. With no bounds every row is kept; otherwise undated
/// rows are dropped.
fn filter_dates(table: &mut Table, start: Option<NaiveDate>, end: Option<NaiveDate>) {
    if start.is_none() && end.is_none() {
        return;
    }
    let before = table.len();
    table.rows.retain(|r| match r.date(columns::DATE) {
        Some(d) => start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e),
        None => false,
    });
    if table.len() < before {
        debug!("Date window dropped {} rows", before - table.len());
    }
}

fn add_ancillary_costs(table: &mut Table, rates: &AncillaryRates) {
    let kinds: [(&str, &str, &BTreeMap<String, AncillaryRate>); 3] = [
        (dictionary_columns::SERVING, columns::AD_SERVING_COST, &rates.serving),
        (dictionary_columns::VERIFICATION, columns::VERIFICATION_COST, &rates.verification),
        (dictionary_columns::REPORTING, columns::REPORTING_COST, &rates.reporting),
    ];
    for (kind, output, lookup) in kinds {
        if lookup.is_empty() {
            continue;
        }
        table.set_column(output, |row| {
            let cost = match lookup.get(&row.rendered(kind)) {
                Some(rate) => match rate.model {
                    RateModel::Cpm => rate.rate * row.number_or_zero(columns::IMPRESSIONS) / 1000.0,
                    RateModel::Cpc => rate.rate * row.number_or_zero(columns::CLICKS),
                },
                None => 0.0,
            };
            Value::Number(cost)
        });
    }
}

fn stamp_source(table: &mut Table, key: &str, uncapped: bool) {
    table.set_column(columns::VENDOR_KEY, |_| Value::text(key));
    let flag = if uncapped { "TRUE" } else { "FALSE" };
    table.set_column(columns::UNCAPPED, |_| Value::text(flag));
}
