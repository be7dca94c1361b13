//! Permissive CSV loading and column schema inference using Polars

use std::borrow::Cow;
use std::io::Cursor;

use polars::prelude::*;
use serde::Serialize;

use crate::error::AppError;

/// A parsed upload, scoped to a single request
#[derive(Debug, Clone)]
pub struct UploadedDataset {
    /// Parsed table with inferred column types
    pub frame: DataFrame,
    /// Name of the uploaded file, used for logging and downloads
    pub source_name: String,
    /// Rows dropped because they had more fields than the header
    pub skipped_rows: usize,
}

impl UploadedDataset {
    /// Parse CSV bytes, tolerating non-UTF-8 input and malformed rows
    pub fn from_csv_bytes(bytes: &[u8], source_name: &str) -> Result<Self, AppError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(AppError::ParseFailure("the file is empty".to_string()));
        }

        let text = decode_text(bytes);
        let (sanitized, skipped_rows) = sanitize_rows(text.as_bytes())?;
        if skipped_rows > 0 {
            tracing::warn!("skipped {} malformed row(s) in {}", skipped_rows, source_name);
        }

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            // Whole-file inference; a late value must not fail the upload
            .with_infer_schema_length(None)
            .into_reader_with_file_handle(Cursor::new(sanitized))
            .finish()?;

        tracing::info!(
            "parsed {}: {} rows, {} columns",
            source_name,
            frame.height(),
            frame.width()
        );

        Ok(Self {
            frame,
            source_name: source_name.to_string(),
            skipped_rows,
        })
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }
}

/// Decode bytes as UTF-8, falling back to Latin-1 where every byte is a code point
fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            tracing::info!("upload is not valid UTF-8, decoding as Latin-1");
            Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect())
        }
    }
}

/// Drop rows with more fields than the header and pad short rows with empty
/// fields. Returns the rewritten CSV and the number of dropped rows.
fn sanitize_rows(input: &[u8]) -> Result<(Vec<u8>, usize), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::with_capacity(input.len()));

    let mut records = reader.byte_records();
    let header = match records.next() {
        Some(record) => record.map_err(|e| AppError::ParseFailure(e.to_string()))?,
        None => return Err(AppError::ParseFailure("the file has no header row".to_string())),
    };
    let width = header.len();
    writer
        .write_byte_record(&header)
        .map_err(|e| AppError::ParseFailure(e.to_string()))?;

    let mut skipped = 0;
    for record in records {
        let mut record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("unreadable row skipped: {}", e);
                skipped += 1;
                continue;
            }
        };

        if record.len() > width {
            skipped += 1;
            continue;
        }
        while record.len() < width {
            record.push_field(b"");
        }

        writer
            .write_byte_record(&record)
            .map_err(|e| AppError::ParseFailure(e.to_string()))?;
    }

    let sanitized = writer
        .into_inner()
        .map_err(|e| AppError::ParseFailure(e.to_string()))?;
    Ok((sanitized, skipped))
}

/// Why a column was left out of the numeric feature universe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    NonNumeric { dtype: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedColumn {
    pub name: String,
    #[serde(flatten)]
    pub reason: DropReason,
}

/// Typed split of an upload's columns into numeric candidates and dropped columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    /// Integer or floating-point columns, in file order
    pub numeric: Vec<String>,
    pub dropped: Vec<DroppedColumn>,
}

impl ColumnSchema {
    pub fn infer(dataset: &UploadedDataset) -> Self {
        let mut schema = ColumnSchema::default();

        for series in dataset.frame.get_columns() {
            let name = series.name().to_string();
            let dtype = series.dtype();
            if dtype.is_numeric() {
                schema.numeric.push(name);
            } else {
                tracing::info!("dropping non-numeric column '{}' ({})", name, dtype);
                schema.dropped.push(DroppedColumn {
                    name,
                    reason: DropReason::NonNumeric {
                        dtype: dtype.to_string(),
                    },
                });
            }
        }

        tracing::info!("numeric columns detected: {:?}", schema.numeric);
        schema
    }

    pub fn contains(&self, column: &str) -> bool {
        self.numeric.iter().any(|name| name == column)
    }
}
