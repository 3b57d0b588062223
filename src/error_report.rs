use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::schema::columns;
use crate::store::TableStore;
use crate::table::{Row, RowExt, Table};
use log::{info, warn};

/// Delivery rows whose FPN has no dictionary entry, deduplicated on FPN
/// (and placement name when one is configured).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorReport {
    entries: Table,
}

impl ErrorReport {
    /// Anti-join of `rows` against `dictionary` on `merge_col`.
    pub fn create(
        rows: &Table,
        dictionary: &Dictionary,
        placement_col: Option<&str>,
        merge_col: &str,
    ) -> Self {
        let mut report_columns = vec![columns::FPN.to_string()];
        if let Some(placement) = placement_col {
            report_columns.push(placement.to_string());
        }

        let mut entries = Table::new(report_columns.clone());
        for row in &rows.rows {
            let fpn = row.rendered(merge_col);
            if dictionary.contains(&fpn) {
                continue;
            }
            let mut entry = Row::new();
            entry.insert(columns::FPN.to_string(), fpn.into());
            if let Some(placement) = placement_col {
                entry.insert(
                    placement.to_string(),
                    row.get(placement).cloned().unwrap_or_default(),
                );
            }
            entries.push(entry);
        }
        entries.dedup_first_by(|r| {
            report_columns
                .iter()
                .map(|c| r.rendered(c))
                .collect::<Vec<_>>()
                .join("\u{1f}")
        });

        Self { entries }
    }

    pub fn from_table(entries: Table) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &Table {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persists the report, or removes a stale one when nothing is unresolved.
    pub fn write(&self, store: &dyn TableStore, file_name: &str) -> Result<()> {
        if self.is_empty() {
            if store.exists(file_name) {
                info!("All placements resolved, removing {}", file_name);
            }
            return store.remove(file_name);
        }
        warn!(
            "{} unresolved placements written to {}",
            self.len(),
            file_name
        );
        store.save(file_name, &self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::DictionaryKind;
    use crate::store::CsvStore;
    use crate::table::Value;

    fn rows(fpns: &[(&str, &str)]) -> Table {
        Table::from_rows(
            fpns.iter()
                .map(|(fpn, placement)| {
                    let mut r = Row::new();
                    r.insert("FPN".to_string(), Value::text(*fpn));
                    r.insert("Placement".to_string(), Value::text(*placement));
                    r
                })
                .collect(),
        )
    }

    fn dictionary(fpns: &[&str]) -> Dictionary {
        Dictionary::from_table(
            "dict.csv",
            DictionaryKind::Placement,
            rows(&fpns.iter().map(|f| (*f, "")).collect::<Vec<_>>()),
        )
    }

    #[test]
    fn test_create_dedups_unmatched() {
        let data = rows(&[("a", "p1"), ("x", "p2"), ("x", "p2"), ("x", "p3")]);
        let report = ErrorReport::create(&data, &dictionary(&["a"]), Some("Placement"), "FPN");
        assert_eq!(report.len(), 2);
        assert_eq!(report.entries().columns, vec!["FPN", "Placement"]);

        let report = ErrorReport::create(&data, &dictionary(&["a"]), None, "FPN");
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn test_fully_resolved_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());
        let data = rows(&[("a", "p1"), ("b", "p2")]);

        let unresolved = ErrorReport::create(&data, &dictionary(&["a"]), None, "FPN");
        unresolved.write(&store, "errors.csv").unwrap();
        assert!(store.exists("errors.csv"));

        let resolved = ErrorReport::create(&data, &dictionary(&["a", "b"]), None, "FPN");
        assert!(resolved.is_empty());
        resolved.write(&store, "errors.csv").unwrap();
        assert!(!store.exists("errors.csv"));
    }
}
