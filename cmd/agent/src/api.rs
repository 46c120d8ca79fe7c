//! Thin marshaling shell over the core: apply manifest, delete/list by
//! kind, endpoint/address lookup, node listing, whitelist and token
//! administration, health and metrics. A stand-in front door for the
//! cluster, not a behavior of the core components themselves.

use axum::body::Bytes;
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{Router, delete, get, post};
use serde::{Deserialize, Serialize};

use swarmd_core::error::Error as CoreError;
use swarmd_dns::whitelist::Whitelist;
use swarmd_workload::manifest::{self, ManifestKind};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/manifests", post(apply_manifest))
        .route("/api/v1/{kind}", get(list_by_kind))
        .route("/api/v1/{kind}/{namespace}/{name}", delete(delete_by_kind))
        .route("/api/v1/services/{namespace}/{name}/endpoints", get(get_endpoints))
        .route("/api/v1/services/{namespace}/{name}/addresses", get(get_addresses))
        .route("/api/v1/whitelist", get(get_whitelist).put(put_whitelist))
        .route("/api/v1/whitelist/hosts", post(add_whitelist_host))
        .route("/api/v1/whitelist/hosts/{host}", delete(remove_whitelist_host))
        .route("/api/v1/tokens", get(list_tokens).post(issue_token))
        .route("/api/v1/tokens/{token}", delete(revoke_token))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let members = state.membership.members().await.len() as i64;
    let services = state.registry.list_services().await;
    let fresh: i64 = services.values().map(|endpoints| endpoints.len() as i64).sum();
    state.metrics.set_members(members);
    state.metrics.set_services(services.len() as i64);
    state.metrics.set_fresh_endpoints(fresh);

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.membership.members().await)
}

async fn apply_manifest(State(state): State<AppState>, body: Bytes) -> Response {
    match manifest::parse_manifest(&body) {
        Ok(ManifestKind::Deployment(deployment)) => match state.workload.apply_deployment(deployment).await {
            Ok(applied) => (StatusCode::OK, Json(applied)).into_response(),
            Err(e) => error_response(e),
        },
        Ok(ManifestKind::Service(service)) => match state.workload.apply_service(service).await {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => error_response(e),
        },
        Ok(ManifestKind::Ingress(ingress)) => match state.workload.apply_ingress(ingress).await {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => error_response(e),
        },
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn delete_by_kind(
    State(state): State<AppState>,
    Path((kind, namespace, name)): Path<(String, String, String)>,
) -> Response {
    // Idempotent: a missing record is not an error.
    let result = match kind.as_str() {
        "deployments" => state.workload.delete_deployment(&namespace, &name).await,
        "services" => state.workload.delete_service(&namespace, &name).await,
        "ingresses" => state.workload.delete_ingress(&namespace, &name).await,
        _ => return (StatusCode::BAD_REQUEST, format!("unknown kind: {kind}")).into_response(),
    };
    match result {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_by_kind(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    match kind.as_str() {
        "deployments" => Json(state.store.list_deployments().await).into_response(),
        "services" => Json(state.store.list_services().await).into_response(),
        "ingresses" => Json(state.store.list_ingresses().await).into_response(),
        "pods" => Json(state.store.list_pods().await).into_response(),
        _ => (StatusCode::BAD_REQUEST, format!("unknown kind: {kind}")).into_response(),
    }
}

async fn get_endpoints(State(state): State<AppState>, Path((namespace, name)): Path<(String, String)>) -> Response {
    Json(state.registry.get_endpoints(&namespace, &name).await).into_response()
}

async fn get_addresses(State(state): State<AppState>, Path((namespace, name)): Path<(String, String)>) -> Response {
    match state.registry.get_addresses(&namespace, &name).await {
        Ok(addrs) => Json(addrs).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Serialize)]
struct WhitelistView {
    enabled: bool,
    hosts: Vec<String>,
}

async fn get_whitelist(State(state): State<AppState>) -> impl IntoResponse {
    let whitelist = state.dns.whitelist.read().await;
    Json(WhitelistView {
        enabled: whitelist.enabled,
        hosts: whitelist.list(),
    })
}

#[derive(Deserialize)]
struct WhitelistUpdate {
    enabled: bool,
    hosts: Vec<String>,
}

async fn put_whitelist(State(state): State<AppState>, Json(body): Json<WhitelistUpdate>) -> impl IntoResponse {
    let mut whitelist = state.dns.whitelist.write().await;
    *whitelist = Whitelist::new(body.enabled, body.hosts);
    StatusCode::OK
}

#[derive(Deserialize)]
struct HostBody {
    host: String,
}

async fn add_whitelist_host(State(state): State<AppState>, Json(body): Json<HostBody>) -> impl IntoResponse {
    state.dns.whitelist.write().await.add(&body.host);
    StatusCode::OK
}

async fn remove_whitelist_host(State(state): State<AppState>, Path(host): Path<String>) -> impl IntoResponse {
    let removed = state.dns.whitelist.write().await.remove(&host);
    if removed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn list_tokens(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.membership.tokens().list())
}

async fn issue_token(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "token": state.membership.tokens().issue() }))
}

async fn revoke_token(State(state): State<AppState>, Path(token): Path<String>) -> impl IntoResponse {
    if state.membership.tokens().revoke(&token) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

fn error_response(err: CoreError) -> Response {
    let status = match &err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CoreError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
        CoreError::NoMatchingNode => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}
