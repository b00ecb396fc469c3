//! Database value parsing utilities

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use serde::de::DeserializeOwned;

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str, column: usize) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// Parse a JSON text column
pub fn parse_json<T: DeserializeOwned>(s: &str, column: usize) -> Result<T, SqlError> {
    serde_json::from_str(s)
        .map_err(|e| SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// Read a non-negative integer column stored as INTEGER
pub fn parse_u64(v: i64, column: usize) -> Result<u64, SqlError> {
    u64::try_from(v).map_err(|_| SqlError::IntegralValueOutOfRange(column, v))
}
