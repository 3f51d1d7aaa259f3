//! # Request Helpers
//!
//! JSON body extraction with error mapping, and parsing of the
//! comma-separated id lists some routes take in their query string.

use std::str::FromStr;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::Json;

use crate::error::AppError;

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract query parameters, mapping errors to [`AppError::BadRequest`].
pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Parse `a,b,c` into ids. Empty segments are skipped; `None` is empty.
pub fn parse_list<T>(list: Option<&str>) -> Result<Vec<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|e: T::Err| AppError::BadRequest(e.to_string()))
        })
        .collect()
}
