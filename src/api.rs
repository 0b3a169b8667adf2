//! Gateway routes.
//!
//! Every downstream operation answers with a structurally valid body; when the
//! downstream could not be reached the status is 503 and the body is the
//! fallback value.

use std::{sync::Arc, time::Duration};

use axum::{
    BoxError, Json, Router,
    error_handling::HandleErrorLayer,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::{ServiceBuilder, limit::GlobalConcurrencyLimitLayer};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::Cfg;
use crate::resilience::ResilienceSnapshot;
use crate::services::{
    Downstreams, Dto, FavouriteId, FavouriteService, ProductService, ResilientResource,
    UserService,
};

#[derive(Clone)]
pub struct AppState {
    pub downstreams: Arc<Downstreams>,
    /// Absent when no global recorder was installed (tests)
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState, cfg: &Cfg) -> Router {
    Router::new()
        .merge(collection_routes("/app/api/users", users))
        .merge(item_routes("/app/api/users", users))
        .route("/app/api/users/username/{username}", get(find_user_by_username))
        .merge(collection_routes("/app/api/products", products))
        .merge(item_routes("/app/api/products", products))
        .merge(collection_routes("/app/api/favourites", favourites))
        .route(
            "/app/api/favourites/{user_id}/{product_id}/{like_date}",
            get(find_favourite).delete(delete_favourite),
        )
        .route("/app/api/favourites/find", get(find_favourite_by_body))
        .route(
            "/app/api/favourites/delete",
            delete(delete_favourite_by_body),
        )
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ready" }))
        .route("/metrics", get(render_metrics))
        .route("/actuator/circuitbreakers", get(circuit_breakers))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_overload))
                .load_shed()
                .layer(GlobalConcurrencyLimitLayer::new(cfg.concurrency_limit))
                .timeout(Duration::from_millis(cfg.request_timeout_ms)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn users(d: &Downstreams) -> &UserService {
    &d.users
}

fn products(d: &Downstreams) -> &ProductService {
    &d.products
}

fn favourites(d: &Downstreams) -> &FavouriteService {
    &d.favourites
}

/// List, create and update routes shared by every resource.
fn collection_routes<T: Dto>(base: &str, select: fn(&Downstreams) -> &ResilientResource<T>) -> Router<AppState> {
    Router::new().route(
        base,
        get(move |State(st): State<AppState>| async move { select(&st.downstreams).find_all().await })
            .post(move |State(st): State<AppState>, Json(dto): Json<T>| async move {
                select(&st.downstreams).save(dto).await
            })
            .put(move |State(st): State<AppState>, Json(dto): Json<T>| async move {
                select(&st.downstreams).update(dto).await
            }),
    )
}

/// Routes addressing one item by a single path id.
fn item_routes<T: Dto>(base: &str, select: fn(&Downstreams) -> &ResilientResource<T>) -> Router<AppState> {
    Router::new().route(
        &format!("{base}/{{id}}"),
        get(move |State(st): State<AppState>, Path(id): Path<String>| async move {
            select(&st.downstreams).find_by_id(&id).await
        })
        .put(
            move |State(st): State<AppState>, Path(id): Path<String>, Json(dto): Json<T>| async move {
                select(&st.downstreams).update_by_id(&id, dto).await
            },
        )
        .delete(move |State(st): State<AppState>, Path(id): Path<String>| async move {
            select(&st.downstreams).delete_by_id(&id).await
        }),
    )
}

async fn find_user_by_username(
    State(st): State<AppState>,
    Path(username): Path<String>,
) -> impl IntoResponse {
    st.downstreams.users.find_by_username(&username).await
}

async fn find_favourite(
    State(st): State<AppState>,
    Path((user_id, product_id, like_date)): Path<(i64, i64, String)>,
) -> impl IntoResponse {
    let id = FavouriteId {
        user_id,
        product_id,
        like_date,
    };
    st.downstreams.favourites.find_by_key(&id).await
}

async fn delete_favourite(
    State(st): State<AppState>,
    Path((user_id, product_id, like_date)): Path<(i64, i64, String)>,
) -> impl IntoResponse {
    let id = FavouriteId {
        user_id,
        product_id,
        like_date,
    };
    st.downstreams.favourites.delete_by_key(&id).await
}

async fn find_favourite_by_body(
    State(st): State<AppState>,
    Json(id): Json<FavouriteId>,
) -> impl IntoResponse {
    st.downstreams.favourites.find_by_favourite_id(&id).await
}

async fn delete_favourite_by_body(
    State(st): State<AppState>,
    Json(id): Json<FavouriteId>,
) -> impl IntoResponse {
    st.downstreams.favourites.delete_by_favourite_id(&id).await
}

async fn render_metrics(State(st): State<AppState>) -> String {
    st.metrics.as_ref().map(PrometheusHandle::render).unwrap_or_default()
}

async fn circuit_breakers(State(st): State<AppState>) -> Json<Vec<ResilienceSnapshot>> {
    Json(st.downstreams.snapshots())
}

async fn handle_overload(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::GATEWAY_TIMEOUT, "request timed out".into())
    } else if err.is::<tower::load_shed::error::Overloaded>() {
        (StatusCode::SERVICE_UNAVAILABLE, "gateway overloaded".into())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled error: {err}"))
    }
}
