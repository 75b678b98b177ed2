use std::str::FromStr;

use axum::{extract::Extension, http::StatusCode, response::Response};

use ecf_core::{AggregateId, UserId};

use crate::app::errors;
use crate::context::ActorContext;

/// The acting user, for operations that record who did them.
pub fn require_actor(actor: Option<Extension<ActorContext>>) -> Result<UserId, Response> {
    actor.map(|Extension(a)| a.user_id()).ok_or_else(|| {
        errors::json_error(StatusCode::BAD_REQUEST, "missing_user", "x-user-id header is required")
    })
}

/// Parse a path segment, answering 400 `invalid_id` on failure.
pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, Response> {
    raw.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}"))
    })
}

pub fn parse_aggregate_id(raw: &str, what: &str) -> Result<AggregateId, Response> {
    parse_id::<AggregateId>(raw, what)
}

/// Unwrap a result whose error is already a response.
macro_rules! try_response {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(resp) => return resp,
        }
    };
}

pub(crate) use try_response;
