//! Feature alignment: match an upload's numeric columns to the model's feature set

use ndarray::Array2;
use polars::prelude::*;

use crate::data::{ColumnSchema, UploadedDataset};
use crate::error::{AlignError, AppError};
use crate::model::ClusterModel;

/// Numeric table whose columns equal the model's features, in the model's order
#[derive(Debug, Clone)]
pub struct AlignedFeatures {
    pub features: Vec<String>,
    /// Feature values, shape (n_rows, n_features)
    pub values: Array2<f64>,
    /// Schema the alignment was computed from
    pub schema: ColumnSchema,
}

impl AlignedFeatures {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }
}

/// Align `dataset` with the features `model` was fit on
pub fn align(
    dataset: &UploadedDataset,
    model: &dyn ClusterModel,
) -> Result<AlignedFeatures, AppError> {
    let schema = ColumnSchema::infer(dataset);
    align_with_schema(dataset, schema, model)
}

/// Fail with `NoNumericData` when the schema has no numeric column.
pub fn ensure_numeric(schema: &ColumnSchema) -> Result<(), AlignError> {
    if schema.numeric.is_empty() {
        tracing::error!("no numeric data found in the uploaded file");
        return Err(AlignError::NoNumericData);
    }
    Ok(())
}

/// Names from `expected` that are absent from the numeric columns, in `expected` order.
pub fn missing_features(schema: &ColumnSchema, expected: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|feature| !schema.contains(feature))
        .cloned()
        .collect()
}

/// Same as [`align`] but reuses an already inferred schema
pub fn align_with_schema(
    dataset: &UploadedDataset,
    schema: ColumnSchema,
    model: &dyn ClusterModel,
) -> Result<AlignedFeatures, AppError> {
    ensure_numeric(&schema)?;

    let expected = model.feature_names();
    tracing::info!("required features for the model: {:?}", expected);

    let missing = missing_features(&schema, expected);
    if !missing.is_empty() {
        tracing::error!("missing features: {:?}", missing);
        return Err(AlignError::MissingFeatures(missing).into());
    }

    // Extra numeric columns are dropped here, after both checks have run.
    let n_rows = dataset.height();
    let mut values = Array2::<f64>::zeros((n_rows, expected.len()));
    for (col_idx, feature) in expected.iter().enumerate() {
        let column = dataset.frame.column(feature)?.cast(&DataType::Float64)?;
        let null_count = column.null_count();
        if null_count > 0 {
            return Err(AlignError::MissingValues {
                column: feature.clone(),
                count: null_count,
            }
            .into());
        }

        let non_finite = column
            .f64()?
            .into_no_null_iter()
            .filter(|value| !value.is_finite())
            .count();
        if non_finite > 0 {
            tracing::error!("feature '{}' has {} non-finite value(s)", feature, non_finite);
            return Err(AlignError::NonFiniteValues {
                column: feature.clone(),
                count: non_finite,
            }
            .into());
        }

        for (row_idx, value) in column.f64()?.into_no_null_iter().enumerate() {
            values[[row_idx, col_idx]] = value;
        }
    }

    Ok(AlignedFeatures {
        features: expected.to_vec(),
        values,
        schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClusteringPipeline;

    fn create_model(features: &[&str]) -> ClusteringPipeline {
        let names: Vec<String> = features.iter().map(|s| s.to_string()).collect();
        let centroid = vec![0.0; names.len()];
        ClusteringPipeline::new(names, None, vec![centroid]).unwrap()
    }

    fn dataset(csv: &str) -> UploadedDataset {
        UploadedDataset::from_csv_bytes(csv.as_bytes(), "test.csv").unwrap()
    }

    #[test]
    fn test_align_reorders_to_model_order() {
        let data = dataset("B,label,A,C\n10,x,1,100\n20,y,2,200\n");
        let model = create_model(&["A", "B"]);

        let aligned = align(&data, &model).unwrap();
        assert_eq!(aligned.features, vec!["A", "B"]);
        assert_eq!(aligned.values.shape(), &[2, 2]);
        assert_eq!(aligned.values[[0, 0]], 1.0);
        assert_eq!(aligned.values[[0, 1]], 10.0);
        assert_eq!(aligned.values[[1, 1]], 20.0);
    }

    #[test]
    fn test_missing_features_are_enumerated_in_model_order() {
        let data = dataset("A,D\n1,4\n");
        let model = create_model(&["C", "A", "B"]);

        match align(&data, &model) {
            Err(AppError::Validation(AlignError::MissingFeatures(missing))) => {
                assert_eq!(missing, vec!["C", "B"]);
            }
            other => panic!("expected missing features, got {:?}", other),
        }
    }

    #[test]
    fn test_no_numeric_data_regardless_of_model() {
        let data = dataset("name,city\nalice,paris\n");
        let model = create_model(&["A"]);

        assert!(matches!(
            align(&data, &model),
            Err(AppError::Validation(AlignError::NoNumericData))
        ));
    }

    #[test]
    fn test_text_column_named_like_feature_counts_as_missing() {
        // A is numeric, so the failure is about B rather than numeric data
        let data = dataset("name,A\nalice,1\nbob,2\n");
        let model = create_model(&["B"]);

        match align(&data, &model) {
            Err(AppError::Validation(AlignError::MissingFeatures(missing))) => {
                assert_eq!(missing, vec!["B"]);
            }
            other => panic!("expected missing features, got {:?}", other),
        }
    }

    #[test]
    fn test_integer_columns_are_cast() {
        let data = dataset("A\n3\n4\n");
        let model = create_model(&["A"]);

        let aligned = align(&data, &model).unwrap();
        assert_eq!(aligned.values.column(0).to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_null_feature_values_are_rejected() {
        let data = dataset("A,B\n1,2\n3,\n");
        let model = create_model(&["A", "B"]);

        match align(&data, &model) {
            Err(AppError::Validation(AlignError::MissingValues { column, count })) => {
                assert_eq!(column, "B");
                assert_eq!(count, 1);
            }
            other => panic!("expected missing values, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_feature_values_are_rejected() {
        let data = dataset("A,B\n10,10\nNaN,10\ninf,10\n-inf,10\n");
        let model = create_model(&["A", "B"]);

        match align(&data, &model) {
            Err(AppError::Validation(AlignError::NonFiniteValues { column, count })) => {
                assert_eq!(column, "A");
                assert_eq!(count, 3);
            }
            other => panic!("expected non-finite values, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_values_outside_features_are_ignored() {
        let data = dataset("A,extra\n1,NaN\n2,inf\n");
        let model = create_model(&["A"]);

        let aligned = align(&data, &model).unwrap();
        assert_eq!(aligned.values.column(0).to_vec(), vec![1.0, 2.0]);
    }
}
