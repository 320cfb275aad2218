// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

use super::aggregate::Aggregate;
use super::index::ENTRY_SIZE;
use super::DatasegmentError;

/// Streaming reader over an aggregate payload.
///
/// Emits each piece's raw bytes at its un-padded offset, zero fill between
/// pieces, and the serialized segment index in the trailing free region.
/// Total output is exactly `Aggregate::payload_size()` bytes.
pub struct AggregateObjectReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for AggregateObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateObjectReader").finish()
    }
}

impl AsyncRead for AggregateObjectReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

pub(crate) fn build_object_reader(
    agg: &Aggregate,
    sources: Vec<Box<dyn AsyncRead + Send + Unpin>>,
) -> Result<AggregateObjectReader, DatasegmentError> {
    let placements = agg.placements();
    if sources.len() != placements.len() {
        return Err(DatasegmentError::SourceCount {
            expected: placements.len(),
            actual: sources.len(),
        });
    }

    let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(tokio::io::empty());
    let mut cursor = 0u64;
    for (placement, source) in placements.iter().zip(sources) {
        let start = placement.unpadded_offset();
        if start > cursor {
            reader = Box::new(reader.chain(zeros(start - cursor)));
        }
        let len = placement.piece.size.unpadded();
        reader = Box::new(reader.chain(PieceSource::new(source, len)));
        cursor = start + len;
    }

    // Trailing free region: zero fill, with the segment index at the very
    // end when there is room for it.
    let trailing = agg.payload_size() - cursor;
    let entries = agg.index_entries();
    let fitting = std::cmp::min(entries.len() as u64, trailing / ENTRY_SIZE as u64) as usize;
    let index_bytes: Vec<u8> = entries[..fitting]
        .iter()
        .flat_map(|e| e.to_bytes())
        .collect();
    let pad = trailing - index_bytes.len() as u64;
    if pad > 0 {
        reader = Box::new(reader.chain(zeros(pad)));
    }
    if !index_bytes.is_empty() {
        reader = Box::new(reader.chain(io::Cursor::new(index_bytes)));
    }

    Ok(AggregateObjectReader { inner: reader })
}

fn zeros(n: u64) -> impl AsyncRead + Send + Unpin {
    tokio::io::repeat(0).take(n)
}

/// Emits exactly `len` bytes for one piece: the source's bytes, truncated
/// at the piece boundary, then zero fill once the source runs dry. Piece
/// commitments are computed over zero-padded payloads, so a payload
/// shorter than the piece's un-padded size is completed with zeros.
struct PieceSource {
    source: Take<Box<dyn AsyncRead + Send + Unpin>>,
    exhausted: bool,
}

impl PieceSource {
    fn new(source: Box<dyn AsyncRead + Send + Unpin>, len: u64) -> Self {
        Self {
            source: source.take(len),
            exhausted: false,
        }
    }
}

impl AsyncRead for PieceSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.source.limit() == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if !self.exhausted {
            let before = buf.filled().len();
            ready!(Pin::new(&mut self.source).poll_read(cx, buf))?;
            if buf.filled().len() > before {
                return Poll::Ready(Ok(()));
            }
            self.exhausted = true;
        }
        let n = std::cmp::min(buf.remaining() as u64, self.source.limit()) as usize;
        let chunk = [0u8; 512];
        let mut left = n;
        while left > 0 {
            let c = std::cmp::min(left, chunk.len());
            buf.put_slice(&chunk[..c]);
            left -= c;
        }
        let remaining = self.source.limit() - n as u64;
        self.source.set_limit(remaining);
        Poll::Ready(Ok(()))
    }
}
