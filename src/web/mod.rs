//! HTTP entrypoint: the axum router, health endpoint, and server bootstrap.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, RawQuery, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::proxy::ProxyPipeline;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ProxyPipeline>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(host: &str, port: u16, pipeline: Arc<ProxyPipeline>) -> Result<Self> {
        let state = AppState { pipeline };
        let app = Self::create_router(state);
        let addr: SocketAddr = format!("{host}:{port}").parse()?;
        Ok(Self { app, addr })
    }

    /// Build the router directly, for tests that want to bind it to their
    /// own (typically ephemeral-port) listener instead of going through
    /// `WebServer::serve`.
    pub fn router(pipeline: Arc<ProxyPipeline>) -> Router {
        Self::create_router(AppState { pipeline })
    }

    fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route(
                "/proxy/*remainder",
                get(proxy_handler)
                    .post(proxy_handler)
                    .put(proxy_handler)
                    .delete(proxy_handler)
                    .patch(proxy_handler)
                    .options(proxy_handler)
                    .head(proxy_handler),
            )
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn proxy_handler(
    State(state): State<AppState>,
    Path(remainder): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    match state
        .pipeline
        .handle(method, &remainder, query.as_deref(), headers, body, peer)
        .await
    {
        Ok(upstream) => {
            let mut response = (upstream.status, upstream.body).into_response();
            *response.headers_mut() = upstream.headers;
            response
        }
        Err(err) => err.into_response(),
    }
}
