//! Degraded responses substituted when a downstream call cannot succeed.
//!
//! Every resolver answers with `503 Service Unavailable` so callers can tell
//! degraded data from live data. Resolvers are pure apart from logging and
//! metrics, and never fail.

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::outcome::{CallFailure, Operation};

/// Body plus the status the caller should see.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse<T> {
    pub status: StatusCode,
    pub body: T,
}

impl<T> ServiceResponse<T> {
    pub fn live(status: StatusCode, body: T) -> Self {
        Self { status, body }
    }

    pub fn degraded(body: T) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == StatusCode::SERVICE_UNAVAILABLE
    }
}

impl<T: Serialize> IntoResponse for ServiceResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// List payload exchanged with downstream services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtoCollection<T> {
    pub collection: Vec<T>,
}

impl<T> Default for DtoCollection<T> {
    fn default() -> Self {
        Self {
            collection: Vec::new(),
        }
    }
}

/// Empty collection for list operations.
pub fn empty_collection<T>(service: &str, op: Operation, failure: &CallFailure) -> ServiceResponse<DtoCollection<T>> {
    announce(service, op, None, failure);
    ServiceResponse::degraded(DtoCollection::default())
}

/// Nothing found for single-item lookups.
pub fn absent<T>(service: &str, op: Operation, key: &str, failure: &CallFailure) -> ServiceResponse<Option<T>> {
    announce(service, op, Some(key), failure);
    ServiceResponse::degraded(None)
}

/// Hands the caller's own input back for writes, so nothing looks persisted
/// except through the degraded status.
pub fn echo<T>(service: &str, op: Operation, key: Option<&str>, input: T, failure: &CallFailure) -> ServiceResponse<T> {
    announce(service, op, key, failure);
    ServiceResponse::degraded(input)
}

/// `false` for deletes.
pub fn not_deleted(service: &str, op: Operation, key: &str, failure: &CallFailure) -> ServiceResponse<bool> {
    announce(service, op, Some(key), failure);
    ServiceResponse::degraded(false)
}

fn announce(service: &str, op: Operation, key: Option<&str>, failure: &CallFailure) {
    match key {
        Some(key) => warn!(service, operation = %op, key, reason = %failure, "fallback triggered"),
        None => warn!(service, operation = %op, reason = %failure, "fallback triggered"),
    }
    metrics::counter!(
        "fallbacks_total",
        "service" => service.to_owned(),
        "operation" => op.as_str()
    )
    .increment(1);
}
