//! Demo upstream: an HTTPS echo server with a `/health` endpoint, for
//! exercising the proxy locally. Requests that did not come through the
//! proxy (no X-Forwarded-For) are rejected.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde_json::json;
use tollgate::tls;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tollgate-echo", version, about = "Demo echo upstream for tollgate")]
struct Args {
    /// HTTPS port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,
    #[arg(long, default_value = "ssl/server.crt")]
    cert_file: PathBuf,
    #[arg(long, default_value = "ssl/server.key")]
    key_file: PathBuf,
    #[arg(long)]
    debug: bool,
}

fn proxied_only(headers: &HeaderMap) -> Option<Response> {
    if headers.get("x-forwarded-for").is_none() {
        let body = Json(json!({ "error": "Direct access not allowed" }));
        return Some((StatusCode::FORBIDDEN, body).into_response());
    }
    None
}

async fn health(headers: HeaderMap) -> Response {
    if let Some(rejected) = proxied_only(&headers) {
        return rejected;
    }
    StatusCode::OK.into_response()
}

async fn echo(request: Request<Body>) -> Response {
    if let Some(rejected) = proxied_only(request.headers()) {
        return rejected;
    }

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("failed to read body: {err}"))
                .into_response();
        }
    };

    let headers: serde_json::Map<String, serde_json::Value> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                json!(String::from_utf8_lossy(value.as_bytes())),
            )
        })
        .collect();

    Json(json!({
        "status": "success",
        "message": "Request received successfully",
        "path": parts.uri.path(),
        "method": parts.method.as_str(),
        "headers": headers,
        "query": parts.uri.query().unwrap_or(""),
        "body": String::from_utf8_lossy(&body),
        "forwarded_proto": parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unknown"),
    }))
    .into_response()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tls::ensure_self_signed(&args.cert_file, &args.key_file)?;
    let rustls_config = tls::load_rustls_config(&args.cert_file, &args.key_file).await?;

    let app = Router::new().route("/health", get(health)).fallback(echo);
    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    tracing::info!(%addr, "echo upstream listening");
    axum_server::bind_rustls(addr, rustls_config)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
