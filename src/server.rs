//! HTTP side of the server: routes, upload handler and the serving loop.

use std::net::SocketAddr;
use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    extract::{
        ConnectInfo,
        DefaultBodyLimit,
        State,
    },
    http::{
        header::{
            self,
            HeaderMap,
        },
        StatusCode,
    },
    Json,
    response::{
        IntoResponse,
        Response,
    },
    routing::{get, post},
    BoxError,
    Router,
};
use futures::stream::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::{timeout::TimeoutLayer, ServiceBuilder};

use crate::{
    error::{ServerError, UploadError},
    upload_store::{ConnectionRegistry, RegistryStats},
};

/// Body of every successful upload response
pub const ACKNOWLEDGMENT: &str = "Ok.";

/// Build the application router around the given registry
pub fn router(registry: ConnectionRegistry) -> Router {

    let timeout = registry.config().connection_timeout;
    Router::new()
        .route("/", get(show_stats)           // `GET /` is handled by `show_stats`
                    .post(post_upload))        // `POST` anywhere is handled by `post_upload`
        .route("/*path", post(post_upload))
        .layer(DefaultBodyLimit::disable())    // uploads are bounded by their session capacity
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(registry)                  // as a state object use the registry
}

/// Serve `listener` until `token` is cancelled
///
/// # Errors
///
/// Returns [`ServerError::Io`] when accepting connections fails.
pub async fn serve(
    listener: TcpListener,
    registry: ConnectionRegistry,
    token: CancellationToken,
) -> Result<(), ServerError> {

    let addr = listener.local_addr()?;
    tracing::info!(%addr, "accepting uploads");
    axum::serve(listener, router(registry).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Returns registry statistics as JSON (`GET /`)
async fn show_stats(State(registry): State<ConnectionRegistry>) -> Json<RegistryStats> {
    Json(registry.stats())
}

/// Accept a streamed upload.
/// The body is accumulated into a session sized from `Content-Length`, which is answered
///   with `Ok.` once the body ends. Bodies larger than the session buffer are refused.
async fn post_upload(
    State(registry): State<ConnectionRegistry>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> Response {

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let content_length = headers.get(header::CONTENT_LENGTH).and_then(|e| e.to_str().ok());
    let guard = match registry.open(content_length) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::error!(?peer, %err, "could not start upload");
            return err.into_response();
        },
    };
    let key = guard.key();

    // As long as chunks are incoming, append them to the session
    let mut stream = body.into_data_stream();
    while let Some(polled) = stream.next().await {
        let appended = match polled {
            Ok(bytes) => guard.on_data(&bytes),
            Err(err) => Err(UploadError::Body(err.to_string())),
        };
        if let Err(err) = appended {
            tracing::warn!(%key, ?peer, %err, "upload aborted");
            return err.into_response();
        }
    }

    match guard.complete() {
        Ok(summary) => {
            tracing::info!(
                %key,
                ?peer,
                bytes = summary.bytes,
                chunks = summary.chunks,
                average_chunk = ?summary.average_chunk,
                "upload complete"
            );
            (StatusCode::OK, ACKNOWLEDGMENT).into_response()
        },
        Err(err) => {
            tracing::error!(%key, ?peer, %err, "could not complete upload");
            err.into_response()
        },
    }
}

/// Maps middleware errors, most notably the request timeout, to a response
async fn handle_timeout(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("upload timed out");
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled internal error: {err}"))
    }
}

// Hic sunt tests:
