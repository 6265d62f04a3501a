use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use storeprov_common::shutdown::shutdown_signal;
use tower_http::cors::{Any, CorsLayer};

use crate::errors::Error;
use crate::lifecycle::Lifecycle;
use crate::models::{CreateStoreRequest, HealthResponse, ListStoresResponse};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
}

pub async fn run_server(port: u16, lifecycle: Arc<Lifecycle>) -> anyhow::Result<()> {
    let state = AppState { lifecycle };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/stores", get(list_stores).post(create_store))
        .route(
            "/api/v1/stores/{id}",
            get(get_store).delete(delete_store),
        )
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    tracing::info!(%addr, "starting store-provisioning HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped gracefully");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "store-provisioning-backend",
    })
}

async fn list_stores(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let stores = state.lifecycle.list_stores().await?;
    Ok(Json(ListStoresResponse { stores }))
}

async fn create_store(
    State(state): State<AppState>,
    Json(req): Json<CreateStoreRequest>,
) -> Result<impl IntoResponse, Error> {
    let snapshot = state.lifecycle.create_store(req).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn get_store(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let snapshot = state.lifecycle.get_store(&id).await?;
    Ok(Json(snapshot))
}

async fn delete_store(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let response = state.lifecycle.delete_store(&id).await?;
    Ok(Json(response))
}
