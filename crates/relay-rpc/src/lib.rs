// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod protocol;
mod router;
mod server;

pub use protocol::{RpcError, RpcRequest, RpcResponse, PROTOCOL_VERSION};
pub use router::RpcRouter;
pub use server::serve_stdio;
