// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::http_reader::LazyHttpReader;
use crate::aggregation::TransferRegistry;
use crate::constants::prefix_car_bytes;

#[derive(Clone)]
pub struct TransferState {
    pub registry: Arc<TransferRegistry>,
    pub target_deal_size: u64,
}

/// Serves aggregate payloads to the storage provider: `GET|HEAD
/// /?id=<transferID>` streams (or sizes) the un-padded aggregate bytes.
pub fn router(state: TransferState) -> Router {
    Router::new()
        .route("/", get(transfer_handler))
        .with_state(state)
}

/// Bind and serve until cancellation, draining in-flight requests.
pub async fn serve(state: TransferState, addr: String, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind transfer server on {addr}"))?;
    info!(%addr, "transfer server starting");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("transfer server failed")
}

async fn transfer_handler(
    State(state): State<TransferState>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    // wire size of any aggregate: the payload is not fr32 encoded
    let payload_size = state.target_deal_size - state.target_deal_size / 128;

    if method == Method::HEAD {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, payload_size)
            .body(Body::empty())
            .unwrap_or_default();
    }

    let Some(id_str) = params.get("id") else {
        return (StatusCode::BAD_REQUEST, "ID is required").into_response();
    };
    let Ok(id) = id_str.parse::<u64>() else {
        return (StatusCode::BAD_REQUEST, "Invalid ID").into_response();
    };

    let Some(transfer) = state.registry.get(id).await else {
        return (StatusCode::NOT_FOUND, "No data found").into_response();
    };

    // The prefix CAR leads, then each sub piece streams from its buffer
    // location on demand.
    let mut sources: Vec<Box<dyn AsyncRead + Send + Unpin>> =
        Vec::with_capacity(transfer.locations.len() + 1);
    sources.push(Box::new(std::io::Cursor::new(prefix_car_bytes())));
    for url in &transfer.locations {
        sources.push(Box::new(LazyHttpReader::new(url.clone())));
    }

    let reader = match transfer.agg.object_reader(sources) {
        Ok(reader) => reader,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to create aggregate reader: {e}"),
            )
                .into_response();
        }
    };

    let stream = ReaderStream::new(reader).map(move |chunk| {
        chunk.inspect_err(|e| error!(transfer_id = id, error = %e, "failed to write aggregate stream"))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, payload_size)
        .body(Body::from_stream(stream))
        .unwrap_or_default()
}
