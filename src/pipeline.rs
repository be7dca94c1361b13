//! Upload processing shared by the HTTP handlers and the command line

use crate::aggregate::{aggregate, ClusterSummary};
use crate::align::{align_with_schema, ensure_numeric};
use crate::data::{ColumnSchema, UploadedDataset};
use crate::error::AppError;
use crate::inference::predict;
use crate::model::ClusterModel;
use crate::store::{ResultRecord, ResultStore};
use crate::viz::{render_charts, ChartSet};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    pub render_charts: bool,
}

/// Everything produced for one processed upload
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub record: ResultRecord,
    pub summary: ClusterSummary,
    pub schema: ColumnSchema,
    pub skipped_rows: usize,
    pub charts: Option<ChartSet>,
}

/// Parse, align, label and summarize an upload, then store the labeled file.
///
/// The no-numeric-data check runs before the model availability check, so an
/// upload without numbers is reported as such even in degraded mode.
pub fn process_upload(
    bytes: &[u8],
    source_name: &str,
    model: Option<&dyn ClusterModel>,
    store: &ResultStore,
    options: ProcessOptions,
) -> Result<ProcessOutcome, AppError> {
    let dataset = UploadedDataset::from_csv_bytes(bytes, source_name)?;
    let skipped_rows = dataset.skipped_rows;

    let schema = ColumnSchema::infer(&dataset);
    ensure_numeric(&schema)?;

    let model = model.ok_or_else(|| {
        tracing::error!("clustering pipeline not loaded");
        AppError::ModelUnavailable
    })?;

    let aligned = align_with_schema(&dataset, schema, model)?;
    let assignment = predict(&aligned, model)?;
    let (mut labeled, summary) = aggregate(dataset, &aligned, &assignment)?;

    let record = store.save(&mut labeled.frame, &labeled.source_name)?;

    let charts = if options.render_charts {
        match render_charts(&aligned, &assignment) {
            Ok(charts) => Some(charts),
            Err(e) => {
                tracing::warn!("chart rendering failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(ProcessOutcome {
        record,
        summary,
        schema: aligned.schema,
        skipped_rows,
        charts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlignError;
    use crate::model::ClusteringPipeline;
    use tempfile::tempdir;

    fn create_test_model() -> ClusteringPipeline {
        ClusteringPipeline::new(
            vec!["A".to_string(), "B".to_string()],
            None,
            vec![vec![1.5, 1.5], vec![10.0, 10.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_process_upload_end_to_end() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let model = create_test_model();

        let outcome = process_upload(
            b"name,A,B\nx,1,1\ny,2,2\nz,10,10\n",
            "data.csv",
            Some(&model),
            &store,
            ProcessOptions::default(),
        )
        .unwrap();

        assert_eq!(outcome.summary.mean(0, "A"), Some(1.5));
        assert_eq!(outcome.summary.mean(0, "B"), Some(1.5));
        assert_eq!(outcome.summary.mean(1, "A"), Some(10.0));
        assert_eq!(outcome.summary.mean(1, "B"), Some(10.0));
        assert_eq!(outcome.schema.dropped.len(), 1);
        assert!(outcome.charts.is_none());
        assert_eq!(store.latest(), Some(outcome.record.clone()));

        let contents = std::fs::read_to_string(&outcome.record.path).unwrap();
        assert!(contents.starts_with("name,A,B,Cluster"));
    }

    #[test]
    fn test_no_numeric_data_is_reported_without_model() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());

        let result = process_upload(
            b"name\nalice\n",
            "data.csv",
            None,
            &store,
            ProcessOptions::default(),
        );
        assert!(matches!(
            result,
            Err(AppError::Validation(AlignError::NoNumericData))
        ));
    }

    #[test]
    fn test_model_unavailable() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());

        let result = process_upload(b"A\n1\n", "data.csv", None, &store, ProcessOptions::default());
        assert!(matches!(result, Err(AppError::ModelUnavailable)));
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_failed_validation_stores_nothing() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let model = create_test_model();

        let result = process_upload(
            b"name,A\nx,1\n",
            "data.csv",
            Some(&model),
            &store,
            ProcessOptions::default(),
        );
        match result {
            Err(AppError::Validation(AlignError::MissingFeatures(missing))) => {
                assert_eq!(missing, vec!["B"]);
            }
            other => panic!("expected missing features, got {:?}", other.map(|o| o.record)),
        }
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_non_finite_rows_are_not_labeled() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let model = create_test_model();

        let result = process_upload(
            b"A,B\n10,10\nNaN,10\ninf,10\n",
            "data.csv",
            Some(&model),
            &store,
            ProcessOptions::default(),
        );
        assert!(matches!(
            result,
            Err(AppError::Validation(AlignError::NonFiniteValues { count: 2, .. }))
        ));
        assert!(store.latest().is_none());
    }
}
