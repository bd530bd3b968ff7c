//! Writing finished records to disk.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs;
use tracing::info;

use crate::error::MeterError;
use crate::profile::ExportRecord;

/// Receives every record a session produces.
pub trait Exporter: Send + Sync {
    /// Persist `record`, returning where it went.
    fn export(&self, record: &ExportRecord) -> impl Future<Output = Result<PathBuf, MeterError>> + Send;
}

/// Writes `<yyyyMMddHHmmss>#<serial>.json` files into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileExporter {
    output_dir: PathBuf,
}

impl JsonFileExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File name for `record` exported at `now`.
    pub fn file_name(record: &ExportRecord, now: DateTime<Local>) -> String {
        let serial: String = record
            .serial_number
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}#{}.json", now.format("%Y%m%d%H%M%S"), serial)
    }

    pub async fn export_at(&self, record: &ExportRecord, now: DateTime<Local>) -> Result<PathBuf, MeterError> {
        fs::create_dir_all(&self.output_dir).await.map_err(MeterError::Io)?;
        let path = self.output_dir.join(Self::file_name(record, now));
        fs::write(&path, record.to_json()?).await.map_err(MeterError::Io)?;
        info!(
            path = %path.display(),
            readings = record.measurements.len(),
            "Exported meter data"
        );
        Ok(path)
    }
}

impl Exporter for JsonFileExporter {
    async fn export(&self, record: &ExportRecord) -> Result<PathBuf, MeterError> {
        self.export_at(record, Local::now()).await
    }
}
