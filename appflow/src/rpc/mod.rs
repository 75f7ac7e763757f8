//! Tool facades over the orchestrator.
//!
//! Two transports share one [`ToolExecutor`]:
//! - [`StdioServer`]: newline-delimited JSON-RPC 2.0 with MCP-style
//!   `tools/list` and `tools/call`, progress as notifications
//! - [`http`]: an axum router streaming progress as Server-Sent Events
//!   (feature `http-facade`)

mod executor;
pub mod protocol;
mod stdio;
pub mod tools;

#[cfg(feature = "http-facade")]
pub mod http;

pub use executor::ToolExecutor;
pub use protocol::{Notification, Request, RequestId, Response, RpcError};
pub use stdio::{StdioServer, PROGRESS_NOTIFICATION, PROTOCOL_VERSION};
pub use tools::{all_tools, ToolCall, ToolCallError, ToolContent, ToolDefinition, ToolResult};
