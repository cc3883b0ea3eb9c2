//! Demo upstream service: the backend the gateway fronts in manual testing
//! and in the integration test suite. Mirrors the routes of the reference
//! Flask app this gateway replaces: `/health`, `/ok`, `/fail`, `/slow`, and
//! an `/echo` that reflects method/headers/query back to the caller.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::Query,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{any, get},
    Router,
};
use clap::Parser;
use serde_json::json;

#[derive(Parser)]
struct Cli {
    #[arg(short, long, default_value_t = 5001)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "healthy" })) }))
        .route("/ok", get(ok))
        .route("/users", get(users))
        .route("/products", get(products))
        .route("/slow", get(slow))
        .route("/fail", get(fail))
        .route("/echo", any(echo));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cli.port))
        .await
        .expect("failed to bind demo upstream listener");
    axum::serve(listener, app).await.expect("demo upstream server failed");
}

async fn ok() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("X-Upstream", "ok")],
        Json(json!({ "message": "ok" })),
    )
}

async fn users() -> impl IntoResponse {
    Json(json!({ "users": [{ "id": 1, "name": "Alice" }] }))
}

async fn products() -> impl IntoResponse {
    Json(json!({ "products": [{ "id": 10, "name": "Widget" }] }))
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({ "message": "slow response" }))
}

async fn fail() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "intentional failure" })))
}

async fn echo(
    method: Method,
    headers: HeaderMap,
    Query(args): Query<HashMap<String, String>>,
    _body: Bytes,
) -> impl IntoResponse {
    let headers: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    Json(json!({
        "method": method.to_string(),
        "headers": headers,
        "args": args,
    }))
}
