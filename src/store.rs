//! Labeled result files with per-request identifiers and a latest-result pointer

use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

/// Number of result files kept when no retention is configured
pub const DEFAULT_RETENTION: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    pub id: Uuid,
    #[serde(skip)]
    pub path: PathBuf,
    /// Name offered to the browser when downloading
    pub file_name: String,
    pub rows: usize,
    pub created_at: DateTime<Utc>,
}

/// Directory of result files. Each save gets a fresh file, so concurrent
/// requests never write to the same path. At most `retention` files are kept.
#[derive(Debug)]
pub struct ResultStore {
    dir: PathBuf,
    retention: usize,
    /// Records saved by this process, oldest first
    records: RwLock<VecDeque<ResultRecord>>,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retention: DEFAULT_RETENTION,
            records: RwLock::new(VecDeque::new()),
        }
    }

    /// Keep at most `retention` result files; values below 1 are raised to 1
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.csv", id))
    }

    /// Write `frame` as CSV under a new identifier and make it the latest result
    pub fn save(&self, frame: &mut DataFrame, source_name: &str) -> Result<ResultRecord, AppError> {
        fs::create_dir_all(&self.dir)?;

        let id = Uuid::now_v7();
        let path = self.path_for(&id);
        let tmp_path = self.dir.join(format!(".{}.csv.tmp", id));

        let mut buffer = Vec::new();
        CsvWriter::new(&mut buffer)
            .include_header(true)
            .finish(frame)
            .map_err(|e| AppError::Aggregation(e.to_string()))?;

        write_atomically(&tmp_path, &path, &buffer)?;

        let record = ResultRecord {
            id,
            path,
            file_name: download_name(source_name),
            rows: frame.height(),
            created_at: Utc::now(),
        };
        tracing::info!("clustered data saved to: {}", record.path.display());

        {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            records.push_back(record.clone());
            while records.len() > self.retention {
                records.pop_front();
            }
        }
        self.prune();

        Ok(record)
    }

    /// Delete result files beyond the retention cap, oldest first. Files this
    /// process did not save (or already evicted from its index) count as older
    /// than indexed ones and are ordered among themselves by their UUID v7.
    fn prune(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("could not list {}: {}", self.dir.display(), e);
                return;
            }
        };

        let mut ids: Vec<Uuid> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
                    return None;
                }
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| Uuid::parse_str(stem).ok())
            })
            .collect();

        if ids.len() <= self.retention {
            return;
        }
        {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            ids.sort_by_key(|id| match records.iter().position(|record| &record.id == id) {
                Some(position) => (1, position as u128),
                None => (0, id.as_u128()),
            });
        }

        let expired = ids.len() - self.retention;
        for id in &ids[..expired] {
            let path = self.path_for(id);
            match fs::remove_file(&path) {
                Ok(()) => tracing::info!("removed expired result: {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("could not remove {}: {}", path.display(), e),
            }
        }

        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|record| !ids[..expired].contains(&record.id));
    }

    /// Most recently saved result, if any
    pub fn latest(&self) -> Option<ResultRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    /// Look up a result by identifier
    pub fn get(&self, id: &Uuid) -> Option<ResultRecord> {
        let known = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|record| &record.id == id)
            .cloned();
        if known.is_some() {
            return known;
        }

        // Written by an earlier process; only the file itself is known
        let path = self.path_for(id);
        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Some(ResultRecord {
            id: *id,
            path,
            file_name: download_name(""),
            rows: 0,
            created_at,
        })
    }
}

/// Write through `tmp_path` and rename into place. The temporary file is
/// removed when any step fails.
fn write_atomically(tmp_path: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let result = fs::File::create(tmp_path)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(tmp_path, path));

    if result.is_err() {
        if let Err(e) = fs::remove_file(tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("could not remove temporary file {}: {}", tmp_path.display(), e);
            }
        }
    }
    result
}

fn download_name(source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(|stem| {
            stem.chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '-' | '_'))
                .collect::<String>()
        })
        .filter(|stem| !stem.is_empty());

    match stem {
        Some(stem) => format!("{}_with_clusters.csv", stem),
        None => "output_with_clusters.csv".to_string(),
    }
}
