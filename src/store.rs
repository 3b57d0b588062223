use crate::error::{LedgerError, Result};
use crate::table::{RowExt, Table};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub trait TableStore {
    /// Loads a table whose first line is the header.
    fn load(&self, name: &str) -> Result<Table>;

    /// Loads every line as an untyped record, header included.
    fn load_grid(&self, name: &str) -> Result<Vec<Vec<String>>>;

    fn save(&self, name: &str, table: &Table) -> Result<()>;

    fn exists(&self, name: &str) -> bool;

    fn remove(&self, name: &str) -> Result<()>;

    fn modified(&self, name: &str) -> Result<SystemTime>;
}

/// CSV files under one directory, addressed by file name.
#[derive(Debug, Clone)]
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn require(&self, name: &str) -> Result<PathBuf> {
        let path = self.path(name);
        if !path.is_file() {
            return Err(LedgerError::NotFound(path.display().to_string()));
        }
        Ok(path)
    }
}

impl TableStore for CsvStore {
    fn load(&self, name: &str) -> Result<Table> {
        let path = self.require(name)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result?;
            records.push(record.iter().map(str::to_string).collect());
        }

        debug!("Loaded {} rows from {}", records.len(), path.display());
        Ok(Table::from_records(headers, records))
    }

    fn load_grid(&self, name: &str) -> Result<Vec<Vec<String>>> {
        let path = self.require(name)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;

        let mut grid = Vec::new();
        for result in reader.records() {
            let record = result?;
            grid.push(record.iter().map(str::to_string).collect());
        }
        Ok(grid)
    }

    fn save(&self, name: &str, table: &Table) -> Result<()> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(table.columns.iter().map(|c| row.rendered(c)))?;
        }
        writer.flush()?;

        debug!("Wrote {} rows to {}", table.len(), path.display());
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn modified(&self, name: &str) -> Result<SystemTime> {
        let path = self.require(name)?;
        Ok(fs::metadata(path)?.modified()?)
    }
}
