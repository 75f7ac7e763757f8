//! HTTP facade with Server-Sent Events.
//!
//! `POST /execute-tool` answers with an SSE stream: zero or more `update`
//! events, then exactly one `done` or `error` event. Event ids count up
//! from 0. Closing the connection cancels the run behind it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::executor::ToolExecutor;
use super::tools::{self, ToolCall, ToolCallError};
use crate::workflow::{ProgressEvent, RunHandle};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
struct HttpState {
    executor: ToolExecutor,
}

/// One entry of `GET /tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListing {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the input.
    pub input_schema: Value,
}

/// Body of `POST /execute-tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteToolRequest {
    /// Tool to run.
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub input: Value,
}

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Builds the router.
pub fn router(executor: ToolExecutor) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tools", get(list_tools))
        .route("/execute-tool", post(execute_tool))
        .with_state(HttpState { executor })
}

/// Serves on `listener` until `shutdown` completes.
pub async fn serve<F>(
    listener: TcpListener,
    executor: ToolExecutor,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "HTTP facade listening");
    axum::serve(listener, router(executor))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_check() -> &'static str {
    "ok"
}

async fn list_tools() -> Json<Vec<ToolListing>> {
    let listings = tools::all_tools()
        .into_iter()
        .map(|tool| ToolListing {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        })
        .collect();
    Json(listings)
}

async fn execute_tool(
    State(state): State<HttpState>,
    Json(request): Json<ExecuteToolRequest>,
) -> Response {
    let call = match ToolCall::parse(&request.tool_name, &request.input) {
        Ok(call) => call,
        Err(err) => {
            let status = match err {
                ToolCallError::UnknownTool(_) => StatusCode::NOT_FOUND,
                ToolCallError::InvalidArguments { .. } => StatusCode::BAD_REQUEST,
            };
            debug!(tool = %request.tool_name, error = %err, "Rejected tool call");
            return (status, Json(json!({ "error": err.to_string() }))).into_response();
        }
    };

    info!(tool = call.name(), "Executing tool over HTTP");
    let events: EventStream = match call {
        ToolCall::CreateAndDeployApp { prompt } => {
            run_events(state.executor.start_run(&prompt)).boxed()
        }
        step => step_events(state.executor, step).boxed(),
    };
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn sse_event(id: u64, kind: &str, content: String) -> Event {
    Event::default()
        .id(id.to_string())
        .event(kind)
        .data(json!({ "content": content }).to_string())
}

fn progress_event(id: u64, event: ProgressEvent) -> Event {
    match event {
        ProgressEvent::Progress { message } => sse_event(id, "update", message),
        ProgressEvent::Completed { url } => sse_event(id, "done", url),
        ProgressEvent::Failed { message, .. } => sse_event(id, "error", message),
    }
}

/// Streams a run's progress, ending after its terminal event.
///
/// The stream owns the [`RunHandle`]; dropping the stream cancels the run.
fn run_events(run: RunHandle) -> impl futures::Stream<Item = Result<Event, Infallible>> {
    stream::unfold((Some(run), 0_u64), |(run, id)| async move {
        let Some(mut run) = run else {
            return None;
        };
        match run.next_event().await {
            Some(event) if event.is_terminal() => {
                Some((Ok(progress_event(id, event)), (None, id + 1)))
            }
            Some(event) => Some((Ok(progress_event(id, event)), (Some(run), id + 1))),
            None => {
                let result = run.join().await;
                let terminal = ProgressEvent::terminal(&result);
                Some((Ok(progress_event(id, terminal)), (None, id + 1)))
            }
        }
    })
}

/// A single-event stream carrying a step tool's result.
fn step_events(
    executor: ToolExecutor,
    call: ToolCall,
) -> impl futures::Stream<Item = Result<Event, Infallible>> {
    stream::once(async move {
        let event = match executor.call(&call).await {
            Ok(value) => sse_event(0, "done", value.to_string()),
            Err(err) => sse_event(0, "error", err.to_string()),
        };
        Ok(event)
    })
}
