use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use ecf_core::PartnerId;
use ecf_credits::{ApplicationId, CreditId};

use crate::app::routes::common::{parse_aggregate_id, parse_id, require_actor, try_response};
use crate::app::services::{blocking, AppServices};
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_credit).get(list_credits))
        .route("/:id", get(get_credit))
        .route("/:id/apply", post(apply_credit))
        .route("/:id/void", post(void_credit))
}

pub fn applications_router() -> Router {
    Router::new().route("/:id/reverse", post(reverse_application))
}

fn credit_id(raw: &str) -> Result<CreditId, Response> {
    parse_aggregate_id(raw, "credit id").map(CreditId::new)
}

#[derive(Debug, Default, Deserialize)]
pub struct CreditFilter {
    pub owner: Option<PartnerId>,
}

/// Open the credit for an accepted credit note.
pub async fn open_credit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::OpenCreditRequest>,
) -> Response {
    let credit = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .open_credit_for(tenant.tenant_id(), body.document_id, Utc::now())
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    (StatusCode::CREATED, Json(dto::CreditView::from(&credit))).into_response()
}

pub async fn list_credits(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(filter): Query<CreditFilter>,
) -> Response {
    let mut credits = match filter.owner {
        Some(owner) => services.ledger.credits_for_owner(tenant.tenant_id(), owner),
        None => services.ledger.list(tenant.tenant_id()),
    };
    credits.sort_by_key(|c| c.created_at());
    let views: Vec<dto::CreditView> = credits.iter().map(dto::CreditView::from).collect();
    Json(views).into_response()
}

pub async fn get_credit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let credit_id = try_response!(credit_id(&id));
    match services.ledger.get(tenant.tenant_id(), credit_id) {
        Some(credit) => Json(dto::CreditView::from(&credit)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "credit_not_found", "credit not found"),
    }
}

pub async fn apply_credit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    actor: Option<Extension<ActorContext>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ApplyCreditRequest>,
) -> Response {
    let credit_id = try_response!(credit_id(&id));
    let actor = try_response!(require_actor(actor));

    let application = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .apply_to_invoice(
                    tenant.tenant_id(),
                    credit_id,
                    body.invoice_id,
                    body.amount,
                    actor,
                    Utc::now(),
                )
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    (StatusCode::CREATED, Json(dto::ApplicationView::from(&application))).into_response()
}

pub async fn void_credit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    actor: Option<Extension<ActorContext>>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> Response {
    let credit_id = try_response!(credit_id(&id));
    let actor = try_response!(require_actor(actor));
    let reason = body.and_then(|Json(b)| b.reason);

    let credit = try_response!(
        blocking(&services, move |s| {
            s.ledger
                .void(tenant.tenant_id(), credit_id, actor, reason, Utc::now())
                .map_err(errors::ledger_error_to_response)
        })
        .await
    );
    Json(dto::CreditView::from(&credit)).into_response()
}

pub async fn reverse_application(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    actor: Option<Extension<ActorContext>>,
    Path(id): Path<String>,
) -> Response {
    let application_id: ApplicationId = try_response!(parse_id(&id, "application id"));
    let actor = try_response!(require_actor(actor));

    let application = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .reverse_application(tenant.tenant_id(), application_id, actor, Utc::now())
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    Json(dto::ApplicationView::from(&application)).into_response()
}
