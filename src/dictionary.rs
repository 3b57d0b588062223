use crate::enrichment::Enrichment;
use crate::error::Result;
use crate::error_report::ErrorReport;
use crate::schema::{columns, dictionary_columns};
use crate::store::TableStore;
use crate::table::{Row, RowExt, Table, Value};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

const COMBINE_SEP: &str = ":::";
const SPLIT_SEP: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryKind {
    /// Full descriptive schema keyed by FPN.
    Placement,
    /// `FPN, Planned Net Cost`.
    Plan,
}

impl DictionaryKind {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            DictionaryKind::Placement => dictionary_columns::ALL,
            DictionaryKind::Plan => dictionary_columns::PLAN_ALL,
        }
    }

    fn float_columns(&self) -> &'static [&'static str] {
        match self {
            DictionaryKind::Placement => dictionary_columns::FLOAT_COLUMNS,
            DictionaryKind::Plan => &[columns::PLANNED_NET_COST],
        }
    }

    fn date_columns(&self) -> &'static [&'static str] {
        match self {
            DictionaryKind::Placement => dictionary_columns::DATE_COLUMNS,
            DictionaryKind::Plan => &[],
        }
    }
}

/// One slot of an auto-dictionary order.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoSlot {
    /// Position is copied into the column as-is.
    Column(String),
    /// Position is the `index`-th piece of `column`, pieces joined by `delimiter`.
    Combine {
        column: String,
        index: usize,
        delimiter: String,
    },
    /// Position is split once on `delimiter` into two columns.
    Split {
        first: String,
        second: String,
        delimiter: String,
    },
}

impl AutoSlot {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains(COMBINE_SEP) {
            let parts: Vec<&str> = raw.split(COMBINE_SEP).collect();
            if let [column, index, delimiter] = parts.as_slice() {
                if let Ok(index) = index.trim().parse() {
                    return AutoSlot::Combine {
                        column: column.trim().to_string(),
                        index,
                        delimiter: delimiter.to_string(),
                    };
                }
            }
        } else if raw.contains(SPLIT_SEP) {
            let parts: Vec<&str> = raw.split(SPLIT_SEP).collect();
            if let [first, second, delimiter] = parts.as_slice() {
                return AutoSlot::Split {
                    first: first.trim().to_string(),
                    second: second.trim().to_string(),
                    delimiter: delimiter.to_string(),
                };
            }
        }
        AutoSlot::Column(raw.to_string())
    }
}

pub fn parse_auto_order(cell: &str) -> Vec<AutoSlot> {
    crate::utils::split_list(cell)
        .iter()
        .map(|s| AutoSlot::parse(s))
        .collect()
}

/// Canonical FPN → attribute store.
#[derive(Debug, Clone)]
pub struct Dictionary {
    file_name: String,
    kind: DictionaryKind,
    table: Table,
    index: HashMap<String, usize>,
}

impl Dictionary {
    pub fn empty(file_name: impl Into<String>, kind: DictionaryKind) -> Self {
        Self {
            file_name: file_name.into(),
            kind,
            table: Table::new(kind.columns().iter().map(|c| c.to_string()).collect()),
            index: HashMap::new(),
        }
    }

    /// Loads and coerces a dictionary. A file that does not exist yet yields
    /// an empty dictionary with the full schema.
    pub fn load(store: &dyn TableStore, file_name: &str, kind: DictionaryKind) -> Result<Self> {
        if !store.exists(file_name) {
            info!("Dictionary {} not found, starting empty", file_name);
            return Ok(Self::empty(file_name, kind));
        }

        let loaded = store.load(file_name)?;
        let mut dictionary = Self::empty(file_name, kind);
        dictionary.table.rows = loaded.rows;
        for column in loaded.columns {
            dictionary.table.ensure_column(&column);
        }
        dictionary.coerce();
        dictionary
            .table
            .dedup_last_by(|row| row.rendered(columns::FPN));
        dictionary.rebuild_index();

        debug!(
            "Dictionary {} loaded with {} entries",
            file_name,
            dictionary.len()
        );
        Ok(dictionary)
    }

    pub fn from_table(file_name: impl Into<String>, kind: DictionaryKind, table: Table) -> Self {
        let mut dictionary = Self::empty(file_name, kind);
        dictionary.table.append(table);
        dictionary.coerce();
        dictionary
            .table
            .dedup_last_by(|row| row.rendered(columns::FPN));
        dictionary.rebuild_index();
        dictionary
    }

    pub fn save(&self, store: &dyn TableStore) -> Result<()> {
        store.save(&self.file_name, &self.table)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn kind(&self) -> DictionaryKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn contains(&self, fpn: &str) -> bool {
        self.index.contains_key(fpn)
    }

    pub fn get(&self, fpn: &str) -> Option<&Row> {
        self.index.get(fpn).map(|&i| &self.table.rows[i])
    }

    /// Attribute columns carried onto merged rows (everything except FPN).
    pub fn attribute_columns(&self) -> Vec<String> {
        self.table
            .columns
            .iter()
            .filter(|c| c.as_str() != columns::FPN)
            .cloned()
            .collect()
    }

    /// Left join on `key`. Matched rows receive every dictionary attribute;
    /// unmatched rows keep their metrics and get nulls for the attributes.
    pub fn merge(&self, rows: &mut Table, key: &str) {
        let attributes = self.attribute_columns();
        for column in &attributes {
            rows.ensure_column(column);
        }

        let mut unmatched = 0usize;
        for row in &mut rows.rows {
            let fpn = row.rendered(key);
            match self.get(&fpn) {
                Some(entry) => {
                    for column in &attributes {
                        let value = entry.get(column).cloned().unwrap_or_default();
                        row.insert(column.clone(), value);
                    }
                }
                None => {
                    unmatched += 1;
                    for column in &attributes {
                        row.insert(column.clone(), Value::Null);
                    }
                }
            }
        }

        if unmatched > 0 {
            debug!(
                "{} of {} rows unmatched against {}",
                unmatched,
                rows.len(),
                self.file_name
            );
        }
    }

    /// Synthesizes entries for unresolved placements by splitting their
    /// placement name on `_` into `auto_order`. Returns how many entries were
    /// added; the caller persists.
    pub fn auto(
        &mut self,
        errors: &ErrorReport,
        auto_order: &[AutoSlot],
        placement_column: &str,
    ) -> usize {
        if errors.is_empty() || auto_order.is_empty() {
            return 0;
        }

        let mut added = 0;
        for error in &errors.entries().rows {
            let fpn = error.rendered(columns::FPN);
            if fpn.is_empty() || self.contains(&fpn) {
                continue;
            }

            let name = if error.has_value(placement_column) {
                error.rendered(placement_column)
            } else {
                fpn.clone()
            };

            let mut entry = synthesize_entry(&name, auto_order);
            entry.insert(columns::FPN.to_string(), Value::Text(fpn.clone()));
            self.insert(entry);
            added += 1;
        }

        if added > 0 {
            self.coerce();
            info!(
                "Auto-populated {} entries into {}",
                added, self.file_name
            );
        }
        added
    }

    /// Relation, constant and translation passes, then re-coercion.
    pub fn enrich(&mut self, enrichment: &Enrichment) {
        if enrichment.is_empty() {
            return;
        }
        self.apply_relation(enrichment);
        self.apply_constants(enrichment);
        self.apply_translation(enrichment);
        self.coerce();
    }

    /// Propagates dependent columns from relation tables keyed by a designated
    /// key column. Blank relation cells leave the entry untouched.
    pub fn apply_relation(&mut self, enrichment: &Enrichment) {
        for relation in &enrichment.relations {
            for column in &relation.dependent_columns {
                self.table.ensure_column(column);
            }
            for row in &mut self.table.rows {
                let key = row.rendered(&relation.key_column);
                if let Some(values) = relation.lookup.get(&key) {
                    for (column, value) in values {
                        if !value.is_empty() {
                            row.insert(column.clone(), Value::Text(value.clone()));
                        }
                    }
                }
            }
        }
    }

    pub fn apply_constants(&mut self, enrichment: &Enrichment) {
        let file_name = self.file_name.clone();
        for constant in enrichment
            .constants
            .iter()
            .filter(|c| c.applies_to(&file_name))
        {
            self.table.ensure_column(&constant.column);
            for row in &mut self.table.rows {
                row.insert(constant.column.clone(), Value::Text(constant.value.clone()));
            }
        }
    }

    pub fn apply_translation(&mut self, enrichment: &Enrichment) {
        for translation in &enrichment.translations {
            for row in &mut self.table.rows {
                if row.rendered(&translation.column) == translation.old_value {
                    row.insert(
                        translation.column.clone(),
                        Value::Text(translation.new_value.clone()),
                    );
                }
            }
        }
    }

    fn insert(&mut self, row: Row) {
        let fpn = row.rendered(columns::FPN);
        match self.index.get(&fpn) {
            Some(&i) => self.table.rows[i] = row,
            None => {
                self.index.insert(fpn, self.table.len());
                self.table.push(row);
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.rendered(columns::FPN), i))
            .collect();
    }

    fn coerce(&mut self) {
        let floats = self.kind.float_columns();
        let dates = self.kind.date_columns();
        for row in &mut self.table.rows {
            for (column, value) in row.iter_mut() {
                let coerced = if floats.contains(&column.as_str()) {
                    Value::from(value.as_f64())
                } else if dates.contains(&column.as_str()) {
                    value.as_date().map(Value::Date).unwrap_or(Value::Null)
                } else {
                    match &*value {
                        Value::Null => Value::Null,
                        other => Value::Text(other.render()),
                    }
                };
                *value = coerced;
            }
        }
    }
}

fn synthesize_entry(name: &str, auto_order: &[AutoSlot]) -> Row {
    let parts: Vec<&str> = name.split('_').collect();
    let mut entry = Row::new();
    let mut combined: BTreeMap<String, (String, BTreeMap<usize, String>)> = BTreeMap::new();

    for (position, slot) in auto_order.iter().enumerate() {
        let Some(part) = parts.get(position) else {
            break;
        };
        match slot {
            AutoSlot::Column(column) => {
                if !column.is_empty() {
                    entry.insert(column.clone(), Value::text(*part));
                }
            }
            AutoSlot::Combine {
                column,
                index,
                delimiter,
            } => {
                combined
                    .entry(column.clone())
                    .or_insert_with(|| (delimiter.clone(), BTreeMap::new()))
                    .1
                    .insert(*index, part.to_string());
            }
            AutoSlot::Split {
                first,
                second,
                delimiter,
            } => match part.split_once(delimiter.as_str()) {
                Some((a, b)) => {
                    entry.insert(first.clone(), Value::text(a));
                    entry.insert(second.clone(), Value::text(b));
                }
                None => {
                    entry.insert(first.clone(), Value::text(*part));
                }
            },
        }
    }

    for (column, (delimiter, pieces)) in combined {
        let joined = pieces.into_values().collect::<Vec<_>>().join(&delimiter);
        entry.insert(column, Value::Text(joined));
    }

    if parts.len() > auto_order.len() {
        warn!(
            "Placement name '{}' has {} segments but auto order covers {}",
            name,
            parts.len(),
            auto_order.len()
        );
    }
    entry
}
