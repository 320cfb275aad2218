// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Filesystem-backed payload buffer, holding offer payloads between the
//! on-chain offer and the provider's pull. A collaborator service of the
//! aggregator, run with `daemon --buffer-service`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::TryStreamExt;
use serde::Deserialize;
use tokio::io::BufWriter;
use tokio::sync::Mutex;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct BufferService {
    base_path: PathBuf,
    next_id: Mutex<u64>,
}

impl BufferService {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            next_id: Mutex::new(1),
        }
    }

    fn data_path(&self, id: u64) -> PathBuf {
        self.base_path.join(format!("data_{id}"))
    }
}

#[derive(Deserialize)]
struct GetQuery {
    id: Option<String>,
}

pub fn router(service: Arc<BufferService>) -> Router {
    Router::new()
        .route("/put", post(put_handler))
        .route("/get", get(get_handler))
        .with_state(service)
}

/// Bind and serve until cancellation.
pub async fn serve(service: Arc<BufferService>, port: u16, cancel: CancellationToken) -> Result<()> {
    tokio::fs::create_dir_all(&service.base_path)
        .await
        .with_context(|| format!("failed to create buffer dir {}", service.base_path.display()))?;
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind buffer server on {addr}"))?;
    info!(%addr, "buffer server starting");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("buffer server failed")
}

async fn put_handler(State(service): State<Arc<BufferService>>, request: Request) -> Response {
    let mut next_id = service.next_id.lock().await;

    let path = service.data_path(*next_id);
    let file = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to create file: {e}"),
            )
                .into_response();
        }
    };

    let body_stream = request
        .into_body()
        .into_data_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(body_stream);
    let mut writer = BufWriter::new(file);
    if tokio::io::copy(&mut reader, &mut writer).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to write data").into_response();
    }
    if tokio::io::AsyncWriteExt::flush(&mut writer).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to write data").into_response();
    }

    let id = *next_id;
    *next_id += 1;
    (StatusCode::OK, format!("{{\"id\": {id}}}")).into_response()
}

async fn get_handler(
    State(service): State<Arc<BufferService>>,
    Query(query): Query<GetQuery>,
) -> Response {
    let Some(id_str) = query.id else {
        return (StatusCode::BAD_REQUEST, "ID is required").into_response();
    };
    let Ok(id) = id_str.parse::<u64>() else {
        return (StatusCode::BAD_REQUEST, "Invalid ID").into_response();
    };

    let file = match tokio::fs::File::open(service.data_path(id)).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::NOT_FOUND, "No data found").into_response(),
    };
    Body::from_stream(ReaderStream::new(file)).into_response()
}
