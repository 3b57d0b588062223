use crate::error::{LedgerError, Result};
use crate::schema::columns;
use crate::table::{Row, RowExt, Table, Value};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::BTreeSet;

const PART_SEP: &str = "::";
const EXCLUDE: &str = "EXCLUDE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePhase {
    /// Before type coercion and date filtering.
    Pre,
    /// After ancillary costs and column drops.
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    In(Vec<String>),
    DateRange(NaiveDate, NaiveDate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub predicate: Predicate,
    pub exclude: bool,
}

impl Condition {
    fn parse(raw: &str) -> Option<Self> {
        let (column, values) = raw.split_once(PART_SEP)?;
        let column = column.trim().to_string();
        let mut values: Vec<String> = values.split(',').map(|v| v.trim().to_string()).collect();

        let exclude = values.last().is_some_and(|v| v == EXCLUDE);
        if exclude {
            values.pop();
        }
        if column.is_empty() || values.is_empty() {
            return None;
        }

        let predicate = if column == columns::DATE && values.len() == 2 {
            let start = crate::utils::parse_date(&values[0])?;
            let end = crate::utils::parse_date(&values[1])?;
            Predicate::DateRange(start.min(end), start.max(end))
        } else {
            Predicate::In(values)
        };

        Some(Self {
            column,
            predicate,
            exclude,
        })
    }

    fn matches(&self, row: &Row) -> bool {
        let hit = match &self.predicate {
            Predicate::In(values) => {
                let cell = row.rendered(&self.column);
                values.iter().any(|v| *v == cell)
            }
            Predicate::DateRange(start, end) => row
                .date(&self.column)
                .is_some_and(|d| *start <= d && d <= *end),
        };
        hit != self.exclude
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub phase: RulePhase,
    pub metrics: Vec<String>,
    /// Adjusted value goes here instead of overwriting the metric.
    pub rename: Option<String>,
    pub conditions: Vec<Condition>,
    pub factor: f64,
}

impl Rule {
    pub fn parse(name: &str, metric: &str, query: &str, factor: &str) -> Result<Self> {
        let invalid = |details: &str| LedgerError::InvalidRule {
            name: name.to_string(),
            details: details.to_string(),
        };

        let parts: Vec<&str> = metric.split(PART_SEP).map(str::trim).collect();
        let (phase, metric_list, rename) = match parts.as_slice() {
            [phase, metrics] => (*phase, *metrics, None),
            [phase, metrics, rename] if !rename.is_empty() => {
                (*phase, *metrics, Some(rename.to_string()))
            }
            _ => return Err(invalid("metric must be PHASE::metrics[::rename]")),
        };

        let phase = match phase.to_ascii_uppercase().as_str() {
            "PRE" => RulePhase::Pre,
            "POST" => RulePhase::Post,
            other => return Err(invalid(&format!("unknown phase '{}'", other))),
        };

        let metrics = crate::utils::split_list(metric_list);
        if metrics.is_empty() {
            return Err(invalid("no target metrics"));
        }
        if rename.is_some() && metrics.len() != 1 {
            return Err(invalid("rename needs exactly one metric"));
        }

        let conditions = query
            .split('|')
            .filter(|q| !q.trim().is_empty())
            .map(|q| Condition::parse(q).ok_or_else(|| invalid(&format!("bad query '{}'", q))))
            .collect::<Result<Vec<_>>>()?;

        let factor = crate::utils::parse_number(factor)
            .ok_or_else(|| invalid(&format!("factor '{}' is not a number", factor)))?;

        Ok(Self {
            name: name.to_string(),
            phase,
            metrics,
            rename,
            conditions,
            factor,
        })
    }

    /// Every condition must hold; a rule without conditions matches all rows.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// Returns how many rows were adjusted.
    pub fn apply(&self, table: &mut Table) -> usize {
        if let Some(target) = &self.rename {
            table.ensure_column(target);
        }

        let mut touched = 0;
        for row in &mut table.rows {
            if !self.matches(row) {
                continue;
            }
            for metric in &self.metrics {
                let Some(value) = row.number(metric) else {
                    continue;
                };
                let target = self.rename.as_ref().unwrap_or(metric);
                row.insert(target.clone(), Value::Number(value * self.factor));
            }
            touched += 1;
        }
        debug!("Rule {} adjusted {} rows", self.name, touched);
        touched
    }
}

/// Collects `RULE_<n>_{METRIC,QUERY,FACTOR}` triples from one matrix row,
/// ordered by `n`, e.g. `PRE::Impressions|Clicks`,
/// `Country::US,CA|Vendor::Meta,EXCLUDE` and `0.5`. Malformed rules are
/// skipped with a warning.
pub fn parse_rules(row: &Row) -> Vec<Rule> {
    let mut numbers: BTreeSet<u32> = BTreeSet::new();
    for key in row.keys() {
        if let Some(n) = key
            .strip_prefix("RULE_")
            .and_then(|rest| rest.strip_suffix("_METRIC"))
            .and_then(|n| n.parse().ok())
        {
            numbers.insert(n);
        }
    }

    let mut rules = Vec::new();
    for n in &numbers {
        let metric = row.rendered(&format!("RULE_{}_METRIC", n));
        if metric.trim().is_empty() {
            continue;
        }
        let query = row.rendered(&format!("RULE_{}_QUERY", n));
        let factor = row.rendered(&format!("RULE_{}_FACTOR", n));
        match Rule::parse(&format!("RULE_{}", n), &metric, &query, &factor) {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!("Skipping rule: {}", e),
        }
    }
    rules
}

pub fn apply_phase(rules: &[Rule], phase: RulePhase, table: &mut Table) {
    for rule in rules.iter().filter(|r| r.phase == phase) {
        rule.apply(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::text(*v)))
            .collect()
    }

    #[test]
    fn test_parse_full_rule() {
        let rule = Rule::parse(
            "RULE_1",
            "PRE::Impressions|Clicks",
            "Country::US,CA|Vendor::Meta,EXCLUDE",
            "0.5",
        )
        .unwrap();
        assert_eq!(rule.phase, RulePhase::Pre);
        assert_eq!(rule.metrics, vec!["Impressions", "Clicks"]);
        assert_eq!(rule.conditions.len(), 2);
        assert!(rule.conditions[1].exclude);
        assert_eq!(rule.factor, 0.5);
    }

    #[test]
    fn test_malformed_rules_are_rejected() {
        assert!(Rule::parse("R", "MID::Clicks", "", "1").is_err());
        assert!(Rule::parse("R", "PRE::Clicks", "", "half").is_err());
        assert!(Rule::parse("R", "PRE::Clicks", "Country", "1").is_err());
        assert!(Rule::parse("R", "PRE::Clicks|Impressions::Both", "", "1").is_err());
    }

    #[test]
    fn test_apply_respects_predicates() {
        let rule = Rule::parse("R", "POST::Clicks", "Country::US|Vendor::Snap,EXCLUDE", "2").unwrap();
        let mut table = Table::from_rows(vec![
            row(&[("Country", "US"), ("Vendor", "Meta"), ("Clicks", "10")]),
            row(&[("Country", "US"), ("Vendor", "Snap"), ("Clicks", "10")]),
            row(&[("Country", "CA"), ("Vendor", "Meta"), ("Clicks", "10")]),
        ]);

        assert_eq!(rule.apply(&mut table), 1);
        assert_eq!(table.rows[0].number("Clicks"), Some(20.0));
        assert_eq!(table.rows[1].number("Clicks"), Some(10.0));
        assert_eq!(table.rows[2].number("Clicks"), Some(10.0));
    }

    #[test]
    fn test_date_range_and_rename() {
        let rule = Rule::parse(
            "R",
            "POST::Net Cost::Adjusted Cost",
            "Date::2023-01-02,2023-01-03",
            "1.1",
        )
        .unwrap();
        let mut table = Table::from_rows(vec![
            row(&[("Date", "2023-01-01"), ("Net Cost", "100")]),
            row(&[("Date", "2023-01-03"), ("Net Cost", "100")]),
        ]);
        rule.apply(&mut table);

        assert!(!table.rows[0].has_value("Adjusted Cost"));
        assert!((table.rows[1].number("Adjusted Cost").unwrap() - 110.0).abs() < 1e-9);
        assert_eq!(table.rows[1].number("Net Cost"), Some(100.0));
    }

    #[test]
    fn test_parse_rules_skips_bad_triples() {
        let matrix_row = row(&[
            ("RULE_2_METRIC", "POST::Clicks"),
            ("RULE_2_QUERY", ""),
            ("RULE_2_FACTOR", "3"),
            ("RULE_1_METRIC", "PRE::Clicks"),
            ("RULE_1_QUERY", ""),
            ("RULE_1_FACTOR", "oops"),
            ("RULE_3_METRIC", ""),
        ]);
        let rules = parse_rules(&matrix_row);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "RULE_2");
    }
}
