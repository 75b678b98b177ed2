use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use ecf_infra::allocator::{NewRange, RangeRevision};
use ecf_sequencing::{IssuingLocation, RangeId};

use crate::app::routes::common::{parse_aggregate_id, try_response};
use crate::app::services::{blocking, AppServices};
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_range).get(list_ranges))
        .route("/expire", post(expire_ranges))
        .route("/:id", get(get_range).put(revise_range))
        .route("/:id/activate", post(activate_range))
        .route("/:id/void", post(void_range))
        .route("/:id/next", post(next_sequence))
}

fn range_id(raw: &str) -> Result<RangeId, Response> {
    parse_aggregate_id(raw, "range id").map(RangeId::new)
}

pub async fn create_range(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreateRangeRequest>,
) -> Response {
    let location = match IssuingLocation::new(body.establishment, body.emission_point) {
        Ok(l) => l,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let input = NewRange {
        name: body.name,
        document_type: body.document_type,
        location,
        lower: body.lower,
        upper: body.upper,
        expires_on: body.expires_on,
    };

    let range = try_response!(
        blocking(&services, move |s| {
            s.allocator
                .create(tenant.tenant_id(), input, Utc::now())
                .map_err(errors::allocation_error_to_response)
        })
        .await
    );
    let today = Utc::now().date_naive();
    (StatusCode::CREATED, Json(dto::RangeView::new(&range, today))).into_response()
}

pub async fn list_ranges(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    let today = Utc::now().date_naive();
    let mut ranges = services.allocator.list(tenant.tenant_id());
    ranges.sort_by_key(|r| (r.document_type().code(), r.lower()));
    let views: Vec<dto::RangeView> = ranges.iter().map(|r| dto::RangeView::new(r, today)).collect();
    Json(views).into_response()
}

pub async fn get_range(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let range_id = try_response!(range_id(&id));
    match services.allocator.get(tenant.tenant_id(), range_id) {
        Some(range) => Json(dto::RangeView::new(&range, Utc::now().date_naive())).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "range_not_found", "range not found"),
    }
}

pub async fn revise_range(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReviseRangeRequest>,
) -> Response {
    let range_id = try_response!(range_id(&id));
    let revision = RangeRevision {
        name: body.name,
        lower: body.lower,
        upper: body.upper,
        expires_on: body.expires_on,
    };

    let range = try_response!(
        blocking(&services, move |s| {
            s.allocator
                .revise(tenant.tenant_id(), range_id, revision, Utc::now())
                .map_err(errors::allocation_error_to_response)
        })
        .await
    );
    Json(dto::RangeView::new(&range, Utc::now().date_naive())).into_response()
}

pub async fn activate_range(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let range_id = try_response!(range_id(&id));
    let today = Utc::now().date_naive();

    let range = try_response!(
        blocking(&services, move |s| {
            s.allocator
                .activate(tenant.tenant_id(), range_id, today, Utc::now())
                .map_err(errors::allocation_error_to_response)
        })
        .await
    );
    Json(dto::RangeView::new(&range, today)).into_response()
}

pub async fn void_range(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> Response {
    let range_id = try_response!(range_id(&id));
    let reason = body.and_then(|Json(b)| b.reason);

    let range = try_response!(
        blocking(&services, move |s| {
            s.allocator
                .void(tenant.tenant_id(), range_id, reason, Utc::now())
                .map_err(errors::allocation_error_to_response)
        })
        .await
    );
    Json(dto::RangeView::new(&range, Utc::now().date_naive())).into_response()
}

pub async fn next_sequence(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let range_id = try_response!(range_id(&id));

    let allocation = try_response!(
        blocking(&services, move |s| {
            s.allocator
                .next_sequence(tenant.tenant_id(), range_id, Utc::now())
                .map_err(errors::allocation_error_to_response)
        })
        .await
    );
    Json(dto::AllocationView::from(allocation)).into_response()
}

/// Run the expiry sweep for this tenant now.
pub async fn expire_ranges(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    body: Option<Json<dto::ExpireRangesRequest>>,
) -> Response {
    let as_of = body
        .and_then(|Json(b)| b.as_of)
        .unwrap_or_else(|| Utc::now().date_naive());

    let expired = try_response!(
        blocking(&services, move |s| {
            Ok(s.allocator.expire_due_ranges_for(tenant.tenant_id(), as_of, Utc::now()))
        })
        .await
    );
    Json(json!({ "as_of": as_of, "expired": expired })).into_response()
}
