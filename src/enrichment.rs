use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::store::{CsvStore, TableStore};
use crate::table::{RowExt, Table};
use log::{debug, warn};
use std::collections::BTreeMap;

const RELATION_KEY: &str = "Key Column";
const RELATION_FILE: &str = "File Name";
const CONSTANT_COLUMN: &str = "Dictionary Column";
const CONSTANT_VALUE: &str = "Value";
const CONSTANT_DICTIONARY: &str = "Dictionary File";
const TRANSLATION_COLUMN: &str = "Column";
const TRANSLATION_OLD: &str = "Old Value";
const TRANSLATION_NEW: &str = "New Value";

/// Lookup table propagating dependent columns from a key column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub key_column: String,
    pub dependent_columns: Vec<String>,
    pub lookup: BTreeMap<String, Vec<(String, String)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub column: String,
    pub value: String,
    /// Restricts the constant to one dictionary file; `None` means all.
    pub dictionary: Option<String>,
}

impl Constant {
    pub fn applies_to(&self, file_name: &str) -> bool {
        self.dictionary.as_deref().map_or(true, |d| d == file_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub column: String,
    pub old_value: String,
    pub new_value: String,
}

/// Optional dictionary enrichment tables from the config directory. A missing
/// or malformed file loads as empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub relations: Vec<Relation>,
    pub constants: Vec<Constant>,
    pub translations: Vec<Translation>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty() && self.constants.is_empty() && self.translations.is_empty()
    }

    pub fn load(config: &LedgerConfig) -> Self {
        let store = config.config_store();
        let enrichment = Self {
            relations: optional(&store, &config.relation_file, |t| load_relations(&store, t)),
            constants: optional(&store, &config.constant_file, parse_constants),
            translations: optional(&store, &config.translation_file, parse_translations),
        };
        debug!(
            "Enrichment: {} relations, {} constants, {} translations",
            enrichment.relations.len(),
            enrichment.constants.len(),
            enrichment.translations.len()
        );
        enrichment
    }
}

fn optional<T, F>(store: &CsvStore, name: &str, parse: F) -> Vec<T>
where
    F: FnOnce(&Table) -> Result<Vec<T>>,
{
    if !store.exists(name) {
        return Vec::new();
    }
    match store.load(name).and_then(|table| parse(&table)) {
        Ok(items) => items,
        Err(e) => {
            warn!("Ignoring malformed enrichment file {}: {}", name, e);
            Vec::new()
        }
    }
}

fn require_columns(table: &Table, file: &str, required: &[&str]) -> Result<()> {
    for column in required {
        if !table.has_column(column) {
            return Err(LedgerError::config(
                file,
                format!("missing column '{}'", column),
            ));
        }
    }
    Ok(())
}

fn load_relations(store: &CsvStore, index: &Table) -> Result<Vec<Relation>> {
    require_columns(index, "relations", &[RELATION_KEY, RELATION_FILE])?;

    let mut relations = Vec::new();
    for row in &index.rows {
        let key_column = row.rendered(RELATION_KEY);
        let file = row.rendered(RELATION_FILE);
        if key_column.is_empty() || file.is_empty() {
            continue;
        }
        let table = match store.load(&file) {
            Ok(table) => table,
            Err(e) => {
                warn!("Skipping relation {}: {}", file, e);
                continue;
            }
        };
        if !table.has_column(&key_column) {
            warn!("Skipping relation {}: no key column '{}'", file, key_column);
            continue;
        }

        let dependent_columns: Vec<String> = table
            .columns
            .iter()
            .filter(|c| **c != key_column)
            .cloned()
            .collect();
        let lookup = table
            .rows
            .iter()
            .map(|r| {
                let values = dependent_columns
                    .iter()
                    .map(|c| (c.clone(), r.rendered(c)))
                    .collect();
                (r.rendered(&key_column), values)
            })
            .collect();

        relations.push(Relation {
            key_column,
            dependent_columns,
            lookup,
        });
    }
    Ok(relations)
}

fn parse_constants(table: &Table) -> Result<Vec<Constant>> {
    require_columns(table, "constants", &[CONSTANT_COLUMN, CONSTANT_VALUE])?;
    Ok(table
        .rows
        .iter()
        .filter(|r| r.has_value(CONSTANT_COLUMN))
        .map(|r| Constant {
            column: r.rendered(CONSTANT_COLUMN),
            value: r.rendered(CONSTANT_VALUE),
            dictionary: r
                .has_value(CONSTANT_DICTIONARY)
                .then(|| r.rendered(CONSTANT_DICTIONARY)),
        })
        .collect())
}

fn parse_translations(table: &Table) -> Result<Vec<Translation>> {
    require_columns(
        table,
        "translations",
        &[TRANSLATION_COLUMN, TRANSLATION_OLD, TRANSLATION_NEW],
    )?;
    Ok(table
        .rows
        .iter()
        .filter(|r| r.has_value(TRANSLATION_COLUMN))
        .map(|r| Translation {
            column: r.rendered(TRANSLATION_COLUMN),
            old_value: r.rendered(TRANSLATION_OLD),
            new_value: r.rendered(TRANSLATION_NEW),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_reads_all_three_tables() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_root(dir.path());
        fs::create_dir_all(&config.config_dir).unwrap();
        let c = &config.config_dir;
        fs::write(c.join("dictionary_relations.csv"), "Key Column,File Name\nCampaign,campaign_rel.csv\n").unwrap();
        fs::write(c.join("campaign_rel.csv"), "Campaign,Agency,KPI\nSpring,North,CTR\n").unwrap();
        fs::write(c.join("dictionary_constants.csv"), "Dictionary Column,Value,Dictionary File\nAgency Fees Rate,0.1,\n").unwrap();
        fs::write(c.join("dictionary_translations.csv"), "Column,Old Value,New Value\nVendor,FB,Meta\n").unwrap();

        let enrichment = Enrichment::load(&config);

        assert_eq!(enrichment.relations.len(), 1);
        let relation = &enrichment.relations[0];
        assert_eq!(relation.dependent_columns, vec!["Agency", "KPI"]);
        assert_eq!(
            relation.lookup.get("Spring").unwrap()[0],
            ("Agency".to_string(), "North".to_string())
        );
        assert_eq!(enrichment.constants[0].dictionary, None);
        assert!(enrichment.constants[0].applies_to("any.csv"));
        assert_eq!(enrichment.translations[0].new_value, "Meta");
    }

    #[test]
    fn test_malformed_tables_are_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_root(dir.path());
        fs::create_dir_all(&config.config_dir).unwrap();
        fs::write(config.config_dir.join("dictionary_constants.csv"), "Wrong,Headers\na,b\n").unwrap();
        fs::write(config.config_dir.join("dictionary_relations.csv"), "Key Column,File Name\nCampaign,missing.csv\n").unwrap();

        let enrichment = Enrichment::load(&config);
        assert!(enrichment.is_empty());
    }
}
