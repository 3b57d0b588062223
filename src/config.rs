use crate::error::{LedgerError, Result};
use crate::schema::RateModel;
use crate::store::{CsvStore, TableStore};
use crate::table::{Row, RowExt};
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Locations and file names for one pipeline run. Every component receives
/// this explicitly; nothing reads ambient paths.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LedgerConfig {
    #[schemars(description = "Directory holding the vendor matrix and the optional config tables")]
    pub config_dir: PathBuf,

    #[schemars(description = "Directory holding dictionary files, one per dictionary name")]
    pub dictionary_dir: PathBuf,

    #[schemars(description = "Directory where unresolved-placement error reports are written")]
    pub error_dir: PathBuf,

    #[schemars(description = "Directory where vendor adapters drop raw delivery files")]
    pub raw_dir: PathBuf,

    #[serde(default = "default_vendor_matrix")]
    pub vendor_matrix_file: String,

    #[serde(default = "default_cap_config")]
    #[schemars(description = "Optional metric-cap table; absent means no metric caps")]
    pub cap_config_file: String,

    #[serde(default = "default_fee_config")]
    #[schemars(description = "Optional JSON holding the agency fee threshold")]
    pub fee_config_file: String,

    #[serde(default = "default_ancillary_rates")]
    #[schemars(description = "Optional JSON pricing ad serving, verification and reporting")]
    pub ancillary_rates_file: String,

    #[serde(default = "default_relation_file")]
    pub relation_file: String,

    #[serde(default = "default_constant_file")]
    pub constant_file: String,

    #[serde(default = "default_translation_file")]
    pub translation_file: String,

    #[serde(default = "default_plan_dictionary")]
    #[schemars(description = "Dictionary holding Planned Net Cost per plan-level placement name")]
    pub plan_dictionary_file: String,
}

fn default_vendor_matrix() -> String {
    "vendormatrix.csv".to_string()
}

fn default_cap_config() -> String {
    "cap_config.csv".to_string()
}

fn default_fee_config() -> String {
    "fee_config.json".to_string()
}

fn default_ancillary_rates() -> String {
    "ancillary_rates.json".to_string()
}

fn default_relation_file() -> String {
    "dictionary_relations.csv".to_string()
}

fn default_constant_file() -> String {
    "dictionary_constants.csv".to_string()
}

fn default_translation_file() -> String {
    "dictionary_translations.csv".to_string()
}

fn default_plan_dictionary() -> String {
    "plannet_dictionary.csv".to_string()
}

impl LedgerConfig {
    /// All directories under one root, with default file names.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            config_dir: root.join("config"),
            dictionary_dir: root.join("dictionaries"),
            error_dir: root.join("errors"),
            raw_dir: root.join("raw_data"),
            vendor_matrix_file: default_vendor_matrix(),
            cap_config_file: default_cap_config(),
            fee_config_file: default_fee_config(),
            ancillary_rates_file: default_ancillary_rates(),
            relation_file: default_relation_file(),
            constant_file: default_constant_file(),
            translation_file: default_translation_file(),
            plan_dictionary_file: default_plan_dictionary(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| LedgerError::config(path.display().to_string(), e.to_string()))
    }

    pub fn config_store(&self) -> CsvStore {
        CsvStore::new(&self.config_dir)
    }

    pub fn dictionary_store(&self) -> CsvStore {
        CsvStore::new(&self.dictionary_dir)
    }

    pub fn error_store(&self) -> CsvStore {
        CsvStore::new(&self.error_dir)
    }

    pub fn raw_store(&self) -> CsvStore {
        CsvStore::new(&self.raw_dir)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(LedgerConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FeeConfig {
    #[serde(default)]
    #[schemars(description = "Spend below this amount is not charged agency fees")]
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct AncillaryRate {
    pub model: RateModel,
    pub rate: f64,
}

/// Per-kind lookup of dictionary value (e.g. a `Serving` of "DCM") to rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AncillaryRates {
    #[serde(default, rename = "Serving")]
    pub serving: BTreeMap<String, AncillaryRate>,
    #[serde(default, rename = "Verification")]
    pub verification: BTreeMap<String, AncillaryRate>,
    #[serde(default, rename = "Reporting")]
    pub reporting: BTreeMap<String, AncillaryRate>,
}

impl AncillaryRates {
    pub fn is_empty(&self) -> bool {
        self.serving.is_empty() && self.verification.is_empty() && self.reporting.is_empty()
    }
}

/// One external cap source: a file of caps keyed by `file_dim`, applied to
/// the ledger's `processor_metric` grouped by `processor_dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CapSpec {
    pub file_name: String,
    pub file_dim: String,
    pub file_metric: String,
    pub processor_dim: String,
    pub processor_metric: String,
}

/// Reads an optional JSON file. Missing or unparsable files log a warning and
/// yield the default.
pub fn load_optional_json<T>(dir: &Path, name: &str) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    let path = dir.join(name);
    if !path.is_file() {
        return T::default();
    }
    let parsed = fs::read_to_string(&path)
        .map_err(LedgerError::from)
        .and_then(|text| serde_json::from_str(&text).map_err(LedgerError::from));
    match parsed {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring {}: {}", path.display(), e);
            T::default()
        }
    }
}

pub fn load_fee_config(config: &LedgerConfig) -> FeeConfig {
    load_optional_json(&config.config_dir, &config.fee_config_file)
}

pub fn load_ancillary_rates(config: &LedgerConfig) -> AncillaryRates {
    load_optional_json(&config.config_dir, &config.ancillary_rates_file)
}

/// Reads the cap table. Absent file means no caps; rows missing a field are
/// skipped with a warning.
pub fn load_cap_specs(config: &LedgerConfig) -> Vec<CapSpec> {
    let store = config.config_store();
    if !store.exists(&config.cap_config_file) {
        return Vec::new();
    }
    let table = match store.load(&config.cap_config_file) {
        Ok(table) => table,
        Err(e) => {
            warn!("Ignoring cap config {}: {}", config.cap_config_file, e);
            return Vec::new();
        }
    };

    let mut specs = Vec::new();
    for (idx, row) in table.rows.iter().enumerate() {
        match cap_spec_from_row(row) {
            Some(spec) => specs.push(spec),
            None => warn!("Skipping incomplete cap config row {}", idx + 1),
        }
    }
    specs
}

fn cap_spec_from_row(row: &Row) -> Option<CapSpec> {
    let field = |name: &str| {
        let value = row.rendered(name).trim().to_string();
        (!value.is_empty()).then_some(value)
    };
    Some(CapSpec {
        file_name: field("file_name")?,
        file_dim: field("file_dim")?,
        file_metric: field("file_metric")?,
        processor_dim: field("processor_dim")?,
        processor_metric: field("processor_metric")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = LedgerConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("dictionary_dir"));
        assert!(schema_json.contains("vendor_matrix_file"));
    }

    #[test]
    fn test_json_defaults_fill_file_names() {
        let json = r#"{
            "config_dir": "/c",
            "dictionary_dir": "/d",
            "error_dir": "/e",
            "raw_dir": "/r"
        }"#;
        let config: LedgerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.vendor_matrix_file, "vendormatrix.csv");
        assert_eq!(config.plan_dictionary_file, "plannet_dictionary.csv");
    }

    #[test]
    fn test_optional_configs_tolerate_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_root(dir.path());
        fs::create_dir_all(&config.config_dir).unwrap();
        fs::write(config.config_dir.join("fee_config.json"), "{not json").unwrap();

        assert_eq!(load_fee_config(&config).threshold, 0.0);
        assert!(load_ancillary_rates(&config).is_empty());
        assert!(load_cap_specs(&config).is_empty());
    }

    #[test]
    fn test_cap_specs_skip_incomplete_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_root(dir.path());
        fs::create_dir_all(&config.config_dir).unwrap();
        fs::write(
            config.config_dir.join("cap_config.csv"),
            "file_name,file_dim,file_metric,processor_dim,processor_metric\n\
             imp_caps.csv,Campaign,Cap,Campaign,Impressions\n\
             broken.csv,,Cap,Campaign,Impressions\n",
        )
        .unwrap();

        let specs = load_cap_specs(&config);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].processor_metric, "Impressions");
    }
}
