//! JSON workbook store.
//!
//! The workbook is a single JSON file:
//!
//! ```json
//! { "sheets": [ { "name": "Sheet1", "rows": [["id", "prompt"], ["1", "hello"]] } ] }
//! ```
//!
//! Rows and columns are 1-based, as in a spreadsheet. A missing or `null`
//! cell is empty. Results are appended as a new column whose header is the
//! run date, so each run leaves its own column behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use harvest_types::columns::column_index;
use harvest_types::config::WorkbookConfig;
use harvest_types::{HarvestError, Job, JobResult, TabularStore};

// ============================================================
// File format
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct WorkbookFile {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sheet {
    name: String,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl Sheet {
    fn cell(&self, row: u32, column: u32) -> Option<&Value> {
        let r = usize::try_from(row).ok()?.checked_sub(1)?;
        let c = usize::try_from(column).ok()?.checked_sub(1)?;
        self.rows.get(r)?.get(c)
    }

    fn set_cell(&mut self, row: u32, column: u32, value: &str) {
        let (r, c) = (row.saturating_sub(1) as usize, column.saturating_sub(1) as usize);
        if self.rows.len() <= r {
            self.rows.resize_with(r + 1, Vec::new);
        }
        let cells = &mut self.rows[r];
        if cells.len() <= c {
            cells.resize(c + 1, Value::String(String::new()));
        }
        cells[c] = Value::String(value.to_string());
    }

    fn last_row(&self) -> u32 {
        u32::try_from(self.rows.len()).unwrap_or(u32::MAX)
    }
}

/// Text of a cell; `None` when the cell is blank.
fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!text.trim().is_empty()).then_some(text)
}

// ============================================================
// Layout
// ============================================================

/// Resolved (numeric) sheet layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkbookLayout {
    pub prompt_column: u32,
    pub header_row: u32,
    pub start_row: u32,
    pub result_start_column: u32,
}

impl WorkbookLayout {
    pub fn from_config(config: &WorkbookConfig) -> Result<Self, HarvestError> {
        let column = |key: &str, letters: &str| {
            column_index(letters).ok_or_else(|| {
                HarvestError::Config(format!("workbook.{key}: invalid column '{letters}'"))
            })
        };
        Ok(Self {
            prompt_column: column("prompt_column", &config.prompt_column)?,
            header_row: config.header_row,
            start_row: config.start_row,
            result_start_column: column("result_start_column", &config.result_start_column)?,
        })
    }
}

// ============================================================
// JsonWorkbook
// ============================================================

/// [`TabularStore`] backed by a JSON workbook file.
///
/// The whole workbook is held in memory; [`persist`](TabularStore::persist)
/// writes it back atomically.
#[derive(Debug)]
pub struct JsonWorkbook {
    path: PathBuf,
    layout: WorkbookLayout,
    file: WorkbookFile,
}

impl JsonWorkbook {
    /// Load the workbook named in `config`.
    pub async fn open(config: &WorkbookConfig) -> Result<Self, HarvestError> {
        Self::load(&config.path, WorkbookLayout::from_config(config)?).await
    }

    pub async fn load(path: &Path, layout: WorkbookLayout) -> Result<Self, HarvestError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            HarvestError::Store(format!("failed to read workbook {}: {e}", path.display()))
        })?;
        let file: WorkbookFile = serde_json::from_slice(&bytes).map_err(|e| {
            HarvestError::Store(format!("failed to parse workbook {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), sheets = file.sheets.len(), "loaded workbook");

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Text of a cell, `None` when blank or out of range.
    pub fn cell(&self, sheet: &str, row: u32, column: u32) -> Option<String> {
        self.sheet(sheet).ok()?.cell(row, column).and_then(cell_text)
    }

    fn sheet(&self, name: &str) -> Result<&Sheet, HarvestError> {
        self.file
            .sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| HarvestError::Store(format!("sheet '{name}' not found")))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut Sheet, HarvestError> {
        self.file
            .sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| HarvestError::Store(format!("sheet '{name}' not found")))
    }

    /// First column at or after the start column whose header is blank or
    /// already equals `run_date`.
    fn result_column(sheet: &Sheet, layout: &WorkbookLayout, run_date: &str) -> u32 {
        let mut column = layout.result_start_column;
        while let Some(header) = sheet
            .cell(layout.header_row, column)
            .and_then(cell_text)
        {
            if header.trim() == run_date {
                break;
            }
            column += 1;
        }
        column
    }
}

#[async_trait]
impl TabularStore for JsonWorkbook {
    async fn list_sheets(&self) -> Result<Vec<String>, HarvestError> {
        Ok(self.file.sheets.iter().map(|s| s.name.clone()).collect())
    }

    async fn read_jobs(&self, sheet: &str) -> Result<Vec<Job>, HarvestError> {
        let data = self.sheet(sheet)?;
        let jobs = (self.layout.start_row..=data.last_row())
            .filter_map(|row| {
                data.cell(row, self.layout.prompt_column)
                    .and_then(cell_text)
                    .map(|text| Job::new(row, text))
            })
            .collect();
        Ok(jobs)
    }

    async fn write_results(
        &mut self,
        sheet: &str,
        results: &[JobResult],
        run_date: &str,
    ) -> Result<u32, HarvestError> {
        let layout = self.layout;
        let data = self.sheet_mut(sheet)?;

        let column = Self::result_column(data, &layout, run_date);
        data.set_cell(layout.header_row, column, run_date);
        for result in results {
            data.set_cell(result.row, column, &result.value);
        }

        info!(sheet, column, results = results.len(), "wrote results");
        Ok(column)
    }

    async fn persist(&mut self) -> Result<(), HarvestError> {
        let bytes = serde_json::to_vec_pretty(&self.file)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workbook".to_string());
        let tmp = dir.join(format!(".{name}.tmp-{}", Uuid::new_v4().simple()));

        let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| {
            HarvestError::Store(format!("failed to create {}: {e}", tmp.display()))
        })?;
        file.write_all(&bytes).await.map_err(|e| {
            HarvestError::Store(format!("failed to write {}: {e}", tmp.display()))
        })?;
        file.sync_all().await.map_err(|e| {
            HarvestError::Store(format!("failed to flush {}: {e}", tmp.display()))
        })?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(HarvestError::Store(format!(
                "failed to move {} -> {}: {e}",
                tmp.display(),
                self.path.display()
            )));
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "persisted workbook");
        Ok(())
    }
}
