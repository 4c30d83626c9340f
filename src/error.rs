use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("column `{column}` not found in input table")]
    MissingColumn { column: String },

    #[error("column `{column}` has type {found}, expected {expected}")]
    ColumnType {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("column `{column}` has {found} rows, table has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("feature `{0}` is produced more than once by the catalog")]
    DuplicateFeature(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, FeatureError>;
