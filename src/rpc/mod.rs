//! JSON-RPC transport: framing, request correlation, and inbound routing.

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod message;
pub mod pending;
pub mod reader;
pub mod writer;

pub use client::RpcClient;
pub use dispatcher::{Dispatcher, HandlerResult, InboundCall};
pub use message::{Frame, RpcErrorObject, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
