use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use ecf_core::DocumentId;
use ecf_infra::workflow::NewDocument;
use ecf_sequencing::IssuingLocation;

use crate::app::routes::common::{parse_id, require_actor, try_response};
use crate::app::services::{blocking, AppServices};
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_document).get(list_documents))
        .route("/:id", get(get_document))
        .route("/:id/history", get(document_history))
        .route("/:id/transactions", get(document_transactions))
        .route("/:id/number", post(assign_number))
        .route("/:id/submit", post(submit_document))
        .route("/:id/status", post(record_status))
        .route("/:id/refresh", post(refresh_status))
        .route("/:id/cancel", post(cancel_document))
}

fn document_not_found() -> Response {
    errors::json_error(StatusCode::NOT_FOUND, "document_not_found", "document not found")
}

fn document_id(raw: &str) -> Result<DocumentId, Response> {
    parse_id(raw, "document id")
}

pub async fn register_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::RegisterDocumentRequest>,
) -> Response {
    let location = match IssuingLocation::new(body.establishment, body.emission_point) {
        Ok(l) => l,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let input = NewDocument {
        document_type: body.document_type,
        location,
        owner: body.owner,
        buyer_rnc: body.buyer_rnc,
        total: body.total,
        reference: body.reference,
    };

    let document = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .register(tenant.tenant_id(), input, Utc::now())
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    (StatusCode::CREATED, Json(dto::DocumentView::from(&document))).into_response()
}

pub async fn list_documents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    let mut documents = services.workflow.list(tenant.tenant_id());
    documents.sort_by_key(|d| d.registered_at());
    let views: Vec<dto::DocumentView> = documents.iter().map(dto::DocumentView::from).collect();
    Json(views).into_response()
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let document_id = try_response!(document_id(&id));
    match services.workflow.get(tenant.tenant_id(), document_id) {
        Some(document) => Json(dto::DocumentView::from(&document)).into_response(),
        None => document_not_found(),
    }
}

pub async fn document_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let document_id = try_response!(document_id(&id));
    if services.workflow.get(tenant.tenant_id(), document_id).is_none() {
        return document_not_found();
    }
    let entries = services.audit.for_aggregate(tenant.tenant_id(), document_id.into());
    Json(dto::HistoryView {
        aggregate_id: document_id.to_string(),
        entries,
    })
    .into_response()
}

/// Numbering and signing-service calls made for the document, failures included.
pub async fn document_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let document_id = try_response!(document_id(&id));
    if services.workflow.get(tenant.tenant_id(), document_id).is_none() {
        return document_not_found();
    }
    Json(dto::TransactionsView {
        document_id,
        transactions: services.workflow.transactions(tenant.tenant_id(), document_id),
    })
    .into_response()
}

/// Take the next e-NCF from the active range for the document's type and location.
pub async fn assign_number(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let document_id = try_response!(document_id(&id));
    let today = Utc::now().date_naive();

    let document = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .assign_number(tenant.tenant_id(), document_id, today, Utc::now())
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    Json(dto::DocumentView::from(&document)).into_response()
}

pub async fn submit_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let document_id = try_response!(document_id(&id));

    let document = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .submit(tenant.tenant_id(), document_id, Utc::now())
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    Json(dto::DocumentView::from(&document)).into_response()
}

/// Record a regulator verdict pushed by the caller.
pub async fn record_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordStatusRequest>,
) -> Response {
    let document_id = try_response!(document_id(&id));

    let document = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .record_status(
                    tenant.tenant_id(),
                    document_id,
                    body.status,
                    body.messages,
                    Utc::now(),
                )
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    Json(dto::DocumentView::from(&document)).into_response()
}

/// Ask the signing service for the current verdict.
pub async fn refresh_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let document_id = try_response!(document_id(&id));

    let document = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .refresh_status(tenant.tenant_id(), document_id, Utc::now())
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    Json(dto::DocumentView::from(&document)).into_response()
}

pub async fn cancel_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    actor: Option<Extension<ActorContext>>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> Response {
    let document_id = try_response!(document_id(&id));
    let actor = try_response!(require_actor(actor));
    let reason = body.and_then(|Json(b)| b.reason);

    let document = try_response!(
        blocking(&services, move |s| {
            s.workflow
                .cancel(tenant.tenant_id(), document_id, actor, reason, Utc::now())
                .map_err(errors::workflow_error_to_response)
        })
        .await
    );
    Json(dto::DocumentView::from(&document)).into_response()
}
