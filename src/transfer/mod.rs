// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod http_reader;
pub mod server;

pub use http_reader::LazyHttpReader;
pub use server::{router, serve, TransferState};
