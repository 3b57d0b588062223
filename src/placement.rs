use crate::table::{Row, RowExt, Table, Value};
use serde::{Deserialize, Serialize};

const COMPACT_PREFIX: &str = "::";

/// One component of a full placement name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpnColumn {
    pub name: String,
    /// Underscores are stripped from the value so it stays one segment.
    pub compact: bool,
}

impl FpnColumn {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_prefix(COMPACT_PREFIX) {
            Some(name) => Self {
                name: name.trim().to_string(),
                compact: true,
            },
            None => Self {
                name: raw.to_string(),
                compact: false,
            },
        }
    }

    fn segment(&self, row: &Row) -> String {
        let value = row.rendered(&self.name);
        if self.compact {
            value.replace('_', "")
        } else {
            value
        }
    }
}

/// Ordered column list whose values, joined by `_`, identify a placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpnSpec {
    pub columns: Vec<FpnColumn>,
}

impl FpnSpec {
    /// Parses a `|`-separated vendor matrix cell such as
    /// `Campaign|Vendor|::Creative`.
    pub fn parse(cell: &str) -> Self {
        let columns = crate::utils::split_list(cell)
            .iter()
            .map(|c| FpnColumn::parse(c))
            .collect();
        Self { columns }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Depends only on this row's values in the configured columns.
    pub fn build(&self, row: &Row) -> String {
        self.columns
            .iter()
            .map(|c| c.segment(row))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn apply(&self, table: &mut Table, target: &str) {
        table.set_column(target, |row| Value::Text(self.build(row)));
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
    fn test_build_joins_in_configured_order() {
        let spec = FpnSpec::parse("Campaign|Vendor|Creative");
        let r = row(&[("Vendor", "Meta"), ("Campaign", "Spring"), ("Creative", "Hero")]);
        assert_eq!(spec.build(&r), "Spring_Meta_Hero");
    }

    #[test]
    fn test_compact_columns_drop_underscores() {
        let spec = FpnSpec::parse("Campaign|::Creative");
        let r = row(&[("Campaign", "Spring"), ("Creative", "Hero_Video_15s")]);
        assert_eq!(spec.build(&r), "Spring_HeroVideo15s");
        assert_eq!(spec.column_names(), vec!["Campaign", "Creative"]);
    }

    #[test]
    fn test_fpn_is_independent_of_neighbours_and_order() {
        let spec = FpnSpec::parse("Campaign|Vendor");
        let a = row(&[("Campaign", "Spring"), ("Vendor", "Meta"), ("Clicks", "4")]);
        let b = row(&[("Campaign", "Fall"), ("Vendor", "Snap")]);

        let mut forward = Table::from_rows(vec![a.clone(), b.clone()]);
        let mut reverse = Table::from_rows(vec![b, a.clone()]);
        spec.apply(&mut forward, "FPN");
        spec.apply(&mut reverse, "FPN");

        assert_eq!(forward.rows[0].rendered("FPN"), spec.build(&a));
        assert_eq!(reverse.rows[1].rendered("FPN"), spec.build(&a));
        assert_eq!(forward.rows[1].rendered("FPN"), reverse.rows[0].rendered("FPN"));
    }

    #[test]
    fn test_missing_columns_render_empty_segments() {
        let spec = FpnSpec::parse("Campaign|Vendor");
        assert_eq!(spec.build(&row(&[("Campaign", "Spring")])), "Spring_");
    }
}
