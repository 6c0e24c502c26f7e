use thiserror::Error;

/// The cutoff table could not be produced. Fatal for the current run.
#[derive(Error, Debug)]
pub enum DataLoadError {
    #[error("data file not found: {0}")]
    FileNotFound(String),

    #[error("failed to read data file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch data from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request for {url} failed with status: {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("CSV parse failure: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("no valid rows in data source ({skipped} rows rejected)")]
    EmptyTable { skipped: usize },

    #[error("no data source configured: {0}")]
    NoSource(String),
}

/// A single table row that failed conversion into a typed offering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("{field} is empty")]
    MissingField { field: &'static str },

    #[error("{field} is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field} must be a positive whole rank, got {value:?}")]
    InvalidRank { field: &'static str, value: String },
}

/// A query value the table can never satisfy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidQueryValue {
    #[error("rank must be positive")]
    NonPositiveRank,

    #[error("unknown {column} value {value:?}")]
    UnknownCategory { column: &'static str, value: String },
}
