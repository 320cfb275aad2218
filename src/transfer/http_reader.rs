// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::info;

type BodyReader = StreamReader<BoxStream<'static, io::Result<bytes::Bytes>>, bytes::Bytes>;

enum State {
    Idle,
    Connecting(BoxFuture<'static, io::Result<BodyReader>>),
    Streaming(BodyReader),
}

/// An `AsyncRead` that issues an HTTP GET to its URL on the first read
/// and then relays body bytes. A non-200 status fails the read with the
/// status message.
pub struct LazyHttpReader {
    url: String,
    state: State,
}

impl LazyHttpReader {
    pub fn new(url: String) -> Self {
        Self {
            url,
            state: State::Idle,
        }
    }
}

async fn open(url: String) -> io::Result<BodyReader> {
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    if resp.status() != reqwest::StatusCode::OK {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("failed to fetch data: {}", resp.status()),
        ));
    }
    let stream = resp
        .bytes_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        .boxed();
    Ok(StreamReader::new(stream))
}

impl AsyncRead for LazyHttpReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            match &mut self.state {
                State::Idle => {
                    info!(url = %self.url, "reading buffer location");
                    self.state = State::Connecting(Box::pin(open(self.url.clone())));
                }
                State::Connecting(fut) => {
                    let reader = ready!(fut.as_mut().poll(cx))?;
                    self.state = State::Streaming(reader);
                }
                State::Streaming(reader) => return Pin::new(reader).poll_read(cx, buf),
            }
        }
    }
}
