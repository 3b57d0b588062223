use crate::config::{load_cap_specs, load_fee_config, CapSpec, FeeConfig, LedgerConfig};
use crate::error::Result;
use crate::schema::{columns, dictionary_columns, BuyModel};
use crate::store::{CsvStore, TableStore};
use crate::table::{Row, RowExt, Table, Value};
use crate::utils::parse_flag;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

const PROGRAMMATIC_MARGIN: f64 = 0.85;

/// Prices the assembled ledger. Each stage reads only columns written by an
/// earlier stage or by import, so running the engine twice is stable.
pub struct CostEngine {
    fee: FeeConfig,
    caps: Vec<CapSpec>,
    cap_store: CsvStore,
}

impl CostEngine {
    pub fn new(fee: FeeConfig, caps: Vec<CapSpec>, cap_store: CsvStore) -> Self {
        Self {
            fee,
            caps,
            cap_store,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(
            load_fee_config(config),
            load_cap_specs(config),
            config.config_store(),
        )
    }

    /// Net cost, metric caps, plan caps into `Net Cost Final`, then fees and
    /// `Total Cost`.
    pub fn run(&self, table: &mut Table) -> Result<()> {
        if table.is_empty() {
            return Ok(());
        }
        self.net_cost(table);
        self.apply_metric_caps(table)?;
        self.net_cost_final(table);
        self.agency_fees(table);
        self.total_cost(table);
        info!(
            "Priced {} rows: net {:.2}, final {:.2}, total {:.2}",
            table.len(),
            table.column_sum(columns::NET_COST),
            table.column_sum(columns::NET_COST_FINAL),
            table.column_sum(columns::TOTAL_COST)
        );
        Ok(())
    }

    pub fn net_cost(&self, table: &mut Table) {
        if table.is_empty() {
            return;
        }
        if !table.has_column(columns::RAW_NET_COST) {
            table.set_column(columns::RAW_NET_COST, |r| {
                Value::from(r.number(columns::NET_COST))
            });
        }

        let present: HashSet<String> = table.columns.iter().cloned().collect();
        let mut pricer = Pricer {
            present: &present,
            warned: HashSet::new(),
        };
        let flat_totals = flat_group_totals(table);

        let costs: Vec<Value> = table
            .rows
            .iter()
            .map(|row| match BuyModel::parse(&row.rendered(dictionary_columns::BUY_MODEL)) {
                Some(model @ (BuyModel::Flat | BuyModel::FlatImp)) => {
                    Value::from(flat_cost(row, model, &flat_totals))
                }
                Some(model) => Value::from(pricer.price(row, model)),
                None => Value::from(row.number(columns::RAW_NET_COST)),
            })
            .collect();

        table.ensure_column(columns::NET_COST);
        for (row, cost) in table.rows.iter_mut().zip(costs) {
            row.insert(columns::NET_COST.to_string(), cost);
        }
    }

    /// Caps `Net Cost` by external metric caps. Each cap caps the processor
    /// metric per processor dimension value; net cost scales by the share of
    /// the metric that survives.
    pub fn apply_metric_caps(&self, table: &mut Table) -> Result<()> {
        for spec in &self.caps {
            if !self.cap_store.exists(&spec.file_name) {
                warn!("Cap file {} not found, skipping", spec.file_name);
                continue;
            }
            let cap_table = self.cap_store.load(&spec.file_name)?;
            let limits: HashMap<String, f64> = cap_table
                .rows
                .iter()
                .filter_map(|r| Some((r.rendered(&spec.file_dim), r.number(&spec.file_metric)?)))
                .collect();

            let groups = group_rows(table, |row| {
                let key = row.rendered(&spec.processor_dim);
                (!is_uncapped(row) && limits.contains_key(&key)).then_some(key)
            });

            let mut capped_rows = 0;
            for (key, indices) in groups {
                let limit = limits[&key];
                let values: Vec<(Option<NaiveDate>, f64)> = indices
                    .iter()
                    .map(|&i| {
                        let row = &table.rows[i];
                        (row.date(columns::DATE), row.number_or_zero(&spec.processor_metric))
                    })
                    .collect();
                let Some(capped) = reconcile(&values, limit) else {
                    continue;
                };

                for (&i, (&(_, original), new)) in indices.iter().zip(values.iter().zip(capped)) {
                    let row = &mut table.rows[i];
                    let cost = if spec.processor_metric == columns::NET_COST {
                        new
                    } else if original != 0.0 {
                        row.number_or_zero(columns::NET_COST) * new / original
                    } else {
                        row.number_or_zero(columns::NET_COST)
                    };
                    row.insert(columns::NET_COST.to_string(), Value::Number(cost));
                }
                capped_rows += indices.len();
            }
            debug!("Cap {} touched {} rows", spec.file_name, capped_rows);
        }
        Ok(())
    }

    /// Reconciles actual spend against planned cost per `Plan FPN`. Rows
    /// flagged uncapped and placements without a plan keep their full cost.
    pub fn net_cost_final(&self, table: &mut Table) {
        if table.is_empty() {
            return;
        }
        table.set_column(columns::NET_COST_FINAL, |r| {
            Value::from(r.number(columns::NET_COST))
        });

        let groups = group_rows(table, |row| {
            (!is_uncapped(row) && row.has_value(columns::PLAN_FPN))
                .then(|| row.rendered(columns::PLAN_FPN))
        });

        let mut capped_groups = 0;
        for (plan_fpn, indices) in groups {
            let planned: Vec<f64> = indices
                .iter()
                .filter_map(|&i| table.rows[i].number(columns::PLANNED_NET_COST))
                .collect();
            if planned.is_empty() {
                continue;
            }
            let plan: f64 = planned.iter().sum();

            let values: Vec<(Option<NaiveDate>, f64)> = indices
                .iter()
                .map(|&i| {
                    let row = &table.rows[i];
                    (row.date(columns::DATE), row.number_or_zero(columns::NET_COST))
                })
                .collect();
            let Some(capped) = reconcile(&values, plan) else {
                continue;
            };

            debug!("{} exceeds plan of {:.2}", plan_fpn, plan);
            for (&i, cost) in indices.iter().zip(capped) {
                table.rows[i].insert(columns::NET_COST_FINAL.to_string(), Value::Number(cost));
            }
            capped_groups += 1;
        }
        if capped_groups > 0 {
            info!("{} placements capped at planned cost", capped_groups);
        }
    }

    /// Fee on each row's final cost, scaled by how much of the ledger's total
    /// spend lies above the fee threshold.
    pub fn agency_fees(&self, table: &mut Table) {
        if table.is_empty() {
            return;
        }
        let total = table.column_sum(columns::NET_COST_FINAL);
        let scale = if total == 0.0 {
            0.0
        } else {
            ((total - self.fee.threshold) / total).clamp(0.0, 1.0)
        };

        table.set_column(columns::AGENCY_FEES, |r| {
            Value::Number(
                r.number_or_zero(dictionary_columns::AGENCY_FEES_RATE)
                    * scale
                    * r.number_or_zero(columns::NET_COST_FINAL),
            )
        });
    }

    pub fn total_cost(&self, table: &mut Table) {
        if table.is_empty() {
            return;
        }
        let ancillary: Vec<&str> = columns::ANCILLARY_COSTS
            .iter()
            .copied()
            .filter(|c| table.has_column(c))
            .collect();

        table.set_column(columns::TOTAL_COST, |r| {
            let extra: f64 = ancillary.iter().map(|c| r.number_or_zero(c)).sum();
            Value::Number(
                r.number_or_zero(columns::NET_COST_FINAL) + r.number_or_zero(columns::AGENCY_FEES) + extra,
            )
        });
    }
}

fn is_uncapped(row: &Row) -> bool {
    parse_flag(&row.rendered(columns::UNCAPPED))
}

/// Row indices grouped by `key`; rows where `key` is `None` are left out.
fn group_rows<F>(table: &Table, key: F) -> BTreeMap<String, Vec<usize>>
where
    F: Fn(&Row) -> Option<String>,
{
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        if let Some(k) = key(row) {
            groups.entry(k).or_default().push(i);
        }
    }
    groups
}

/// Caps dated values at `cap`. Returns `None` when the total never exceeds
/// the cap. Otherwise the first date whose cumulative total passes the cap
/// is prorated by each row's share of that date's total, and every later
/// date is zeroed. Undated values sort first.
fn reconcile(values: &[(Option<NaiveDate>, f64)], cap: f64) -> Option<Vec<f64>> {
    let total: f64 = values.iter().map(|(_, v)| v).sum();
    if total <= cap {
        return None;
    }

    let mut by_date: BTreeMap<Option<NaiveDate>, f64> = BTreeMap::new();
    for (date, value) in values {
        *by_date.entry(*date).or_default() += value;
    }

    let mut cumulative = 0.0;
    let mut crossing = None;
    for (date, day_total) in &by_date {
        cumulative += day_total;
        if cumulative > cap {
            crossing = Some((*date, *day_total, cumulative - cap));
            break;
        }
    }
    let (crossing_date, day_total, overflow) = crossing?;

    let capped = values
        .iter()
        .map(|&(date, value)| {
            if date < crossing_date {
                value
            } else if date == crossing_date {
                if day_total == 0.0 {
                    0.0
                } else {
                    value - value / day_total * overflow
                }
            } else {
                0.0
            }
        })
        .collect();
    Some(capped)
}

fn flat_metric(model: BuyModel) -> &'static str {
    model.required_metrics().first().copied().unwrap_or(columns::CLICKS)
}

type FlatKey = (&'static str, String, String);

fn flat_key(row: &Row, model: BuyModel) -> FlatKey {
    (
        flat_metric(model),
        row.rendered(columns::DATE),
        row.rendered(dictionary_columns::PLACEMENT_NAME),
    )
}

/// Metric total and row count per (date, placement) across flat-priced rows.
fn flat_group_totals(table: &Table) -> HashMap<FlatKey, (f64, usize)> {
    let mut totals: HashMap<FlatKey, (f64, usize)> = HashMap::new();
    for row in &table.rows {
        let Some(model @ (BuyModel::Flat | BuyModel::FlatImp)) =
            BuyModel::parse(&row.rendered(dictionary_columns::BUY_MODEL))
        else {
            continue;
        };
        let entry = totals.entry(flat_key(row, model)).or_default();
        entry.0 += row.number_or_zero(flat_metric(model));
        entry.1 += 1;
    }
    totals
}

/// The flat fee is billed once, on the placement date, and shared across the
/// group by volume. A group with no volume splits it evenly.
fn flat_cost(row: &Row, model: BuyModel, totals: &HashMap<FlatKey, (f64, usize)>) -> Option<f64> {
    let rate = row.number(dictionary_columns::BUY_RATE)?;
    let billed_on = row.date(dictionary_columns::PLACEMENT_DATE);
    if billed_on.is_none() || row.date(columns::DATE) != billed_on {
        return Some(0.0);
    }

    let (total, count) = totals.get(&flat_key(row, model)).copied()?;
    let share = if total == 0.0 {
        1.0 / count as f64
    } else {
        row.number_or_zero(flat_metric(model)) / total
    };
    Some(rate * share)
}

/// Prices the non-flat models. Rows whose model needs a metric no source
/// provides are left unpriced, with one warning per model and column.
struct Pricer<'a> {
    present: &'a HashSet<String>,
    warned: HashSet<(String, &'static str)>,
}

impl Pricer<'_> {
    fn has_metrics(&mut self, model: BuyModel) -> bool {
        let mut complete = true;
        for &column in model.required_metrics() {
            if self.present.contains(column) {
                continue;
            }
            complete = false;
            if self.warned.insert((model.to_string(), column)) {
                warn!("{} rows need '{}', which no source provides", model, column);
            }
        }
        complete
    }

    fn price(&mut self, row: &Row, model: BuyModel) -> Option<f64> {
        use columns::*;
        if !self.has_metrics(model) {
            return None;
        }
        let rate = || row.number(dictionary_columns::BUY_RATE);
        let metric = |column: &str| row.number_or_zero(column);

        match model {
            BuyModel::Cpm => Some(rate()? * metric(IMPRESSIONS) / 1000.0),
            BuyModel::Cpc => Some(rate()? * metric(CLICKS)),
            BuyModel::Cpv => Some(rate()? * metric(VIDEO_VIEWS)),
            BuyModel::Cpcv => Some(rate()? * metric(VIDEO_VIEWS_100)),
            BuyModel::Cplp => Some(rate()? * metric(LANDING_PAGE)),
            BuyModel::Cpvm => Some(rate()? * metric(VIDEO_VIEWS) / 1000.0),
            BuyModel::Av => Some(rate()? * metric(VIEWABLE_IMPRESSIONS) / 1000.0),
            BuyModel::Cpe => Some(rate()? * metric(ENGAGEMENTS)),
            BuyModel::ProgrammaticAdjusted => {
                Some(row.number(RAW_NET_COST)? / PROGRAMMATIC_MARGIN)
            }
            BuyModel::Cpa(tiers) => {
                Some(tiered_rate(row, tiers)? * metric(CONVERSIONS))
            }
            BuyModel::CpaCpm => {
                let before = match (row.date(DATE), row.date(dictionary_columns::PLACEMENT_DATE)) {
                    (Some(date), Some(switch)) => date < switch,
                    _ => true,
                };
                if before {
                    Some(rate()? * metric(CONVERSIONS))
                } else {
                    let cpm = row.number(dictionary_columns::BUY_RATE_2)?;
                    Some(cpm * metric(IMPRESSIONS) / 1000.0)
                }
            }
            BuyModel::CpnuCpsu => {
                let nu_rate = row.number_or_zero(dictionary_columns::BUY_RATE);
                let su_rate = row.number_or_zero(dictionary_columns::BUY_RATE_2);
                Some(nu_rate * metric(NEW_USERS) + su_rate * metric(SIGNUPS))
            }
            BuyModel::Flat | BuyModel::FlatImp => None,
        }
    }
}

/// Rate of the highest tier among the first `tiers` whose start date has
/// been reached and whose rate is set.
fn tiered_rate(row: &Row, tiers: u8) -> Option<f64> {
    let date = row.date(columns::DATE);
    dictionary_columns::RATE_TIERS
        .iter()
        .take(tiers as usize)
        .filter(|(_, threshold)| match threshold {
            None => true,
            Some(column) => match (date, row.date(column)) {
                (Some(d), Some(start)) => d >= start,
                _ => false,
            },
        })
        .filter_map(|(rate, _)| row.number(rate))
        .last()
}
