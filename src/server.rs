use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router as AxumRouter,
    body::Body,
    extract::{ConnectInfo, State},
    response::IntoResponse,
    routing::any,
};
use http::{StatusCode, header};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::http::request::Request;
use crate::http::response::Response;
use crate::router::Router;
use crate::state::AppState;

/// Bodies above this size are rejected before dispatch.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// The HTTP shell's shared state: application state plus the route table.
#[derive(Clone)]
struct ServerState {
    app: AppState,
    router: Arc<Router>,
}

/// Binds the listener and serves requests until shutdown.
pub async fn serve(app: AppState, router: Router) -> anyhow::Result<()> {
    let addr = app.config.listen_addr;
    let state = ServerState {
        app,
        router: Arc::new(router),
    };

    let shell: AxumRouter = AxumRouter::new()
        .route("/", any(entry))
        .route("/{*path}", any(entry))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("🚀 Server listening on {}", addr);
    axum::serve(
        listener,
        shell.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// The single entry point: every inbound call is normalized into a `Request`
/// and handed to the dispatcher.
async fn entry(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = req.into_parts();

    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "Request body could not be read");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    // TLS terminates upstream; the proxy says whether the hop was encrypted.
    let secure = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));

    let request = Request::from_parts(
        parts.method,
        &parts.uri,
        parts.headers,
        &bytes,
        Some(addr.ip()),
        secure,
        &state.app.config.api_prefix,
    );

    let response = state.router.dispatch(&state.app, request).await;
    into_axum_response(response)
}

fn into_axum_response(response: Response) -> axum::response::Response {
    let mut builder = http::Response::builder().status(response.status());

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in response.headers() {
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::try_from(name.as_str()),
                header::HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, value);
            }
        }
        for cookie in response.cookies() {
            if let Ok(value) = header::HeaderValue::try_from(cookie.to_header_value()) {
                headers.append(header::SET_COOKIE, value);
            }
        }
    }

    match builder.body(Body::from(response.body().to_vec())) {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "❌ Response conversion failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
