//! Newline-delimited JSON-RPC server.
//!
//! Each line read is one request or notification. Tool calls run on their
//! own tasks so a long `createAndDeployApp` never blocks `ping`; every
//! outgoing line goes through one locked writer so messages never
//! interleave.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::executor::ToolExecutor;
use super::protocol::{self, Notification, RequestId, Response, RpcError};
use super::tools::{self, ToolCall, ToolResult};
use crate::cancellation::CancellationToken;
use crate::errors::WorkflowError;
use crate::workflow::{ProgressEvent, RunHandle};

const SERVER_NAME: &str = "appflow";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP protocol revision announced by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method name of progress notifications.
pub const PROGRESS_NOTIFICATION: &str = "notifications/progress";

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serializes writes to the client.
#[derive(Clone)]
struct Outbox {
    writer: Arc<Mutex<BoxedWriter>>,
}

impl Outbox {
    fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    async fn send<T: Serialize>(&self, message: &T) {
        let line = match protocol::to_line(message) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outgoing message");
                return;
            }
        };
        debug!(message = %line, "Sending");

        let mut writer = self.writer.lock().await;
        if let Err(e) = write_line(&mut writer, &line).await {
            warn!(error = %e, "Failed to write to client");
        }
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// The stdio tool server.
pub struct StdioServer {
    executor: ToolExecutor,
    in_flight: Arc<DashMap<RequestId, Arc<CancellationToken>>>,
}

impl StdioServer {
    /// Creates a server over `executor`.
    #[must_use]
    pub fn new(executor: ToolExecutor) -> Self {
        Self {
            executor,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Serves stdin and stdout until stdin closes.
    pub async fn run(&self) -> io::Result<()> {
        info!("Starting JSON-RPC server on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serves `reader` and `writer` until `reader` reaches end of input.
    ///
    /// Calls still running at that point are cancelled and awaited; their
    /// responses are still written.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let outbox = Outbox::new(writer);
        let mut lines = reader.lines();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("EOF received, shutting down");
                        break;
                    };
                    self.dispatch(line.trim(), &outbox, &mut tasks).await;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Tool task ended abnormally");
                    }
                }
            }
        }

        for entry in self.in_flight.iter() {
            entry.value().cancel("client disconnected");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Tool task ended abnormally");
            }
        }
        Ok(())
    }

    async fn dispatch(&self, line: &str, outbox: &Outbox, tasks: &mut JoinSet<()>) {
        if line.is_empty() {
            return;
        }
        debug!(message = %line, "Received");

        let request = match protocol::parse_request_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "Rejected message");
                outbox.send(&Response::error(RequestId::Null, err)).await;
                return;
            }
        };

        let params = request.params.unwrap_or(Value::Null);
        let Some(id) = request.id else {
            self.handle_notification(&request.method, &params);
            return;
        };

        match request.method.as_str() {
            "initialize" => {
                info!("Client connected");
                outbox.send(&Response::success(id, initialize_result())).await;
            }
            "ping" => outbox.send(&Response::success(id, json!({}))).await,
            "tools/list" => {
                let result = json!({ "tools": tools::all_tools() });
                outbox.send(&Response::success(id, result)).await;
            }
            "tools/call" => match parse_tool_call(&params) {
                Ok(call) => {
                    let progress_token = params
                        .pointer("/_meta/progressToken")
                        .cloned()
                        .unwrap_or_else(|| Value::from(id.clone()));
                    self.spawn_call(id, call, progress_token, outbox.clone(), tasks);
                }
                Err(err) => outbox.send(&Response::error(id, err)).await,
            },
            other => {
                warn!(method = other, "Unknown method");
                let err = RpcError::MethodNotFound(other.to_string());
                outbox.send(&Response::error(id, err)).await;
            }
        }
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "notifications/initialized" => debug!("Client initialized"),
            "notifications/cancelled" => {
                let Some(id) = params
                    .get("requestId")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<RequestId>(v).ok())
                else {
                    warn!("Cancellation without a request id");
                    return;
                };
                // Removing the entry also suppresses the response.
                if let Some((_, token)) = self.in_flight.remove(&id) {
                    let reason = params
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("cancelled by client");
                    info!(request_id = ?id, reason, "Cancelling request");
                    token.cancel(reason);
                }
            }
            other => debug!(method = other, "Ignoring notification"),
        }
    }

    fn spawn_call(
        &self,
        id: RequestId,
        call: ToolCall,
        progress_token: Value,
        outbox: Outbox,
        tasks: &mut JoinSet<()>,
    ) {
        let (cancel, run) = match &call {
            ToolCall::CreateAndDeployApp { prompt } => {
                let run = self.executor.start_run(prompt);
                (run.cancel_token(), Some(run))
            }
            _ => (CancellationToken::shared(), None),
        };
        self.in_flight.insert(id.clone(), Arc::clone(&cancel));

        let executor = self.executor.clone();
        let in_flight = Arc::clone(&self.in_flight);
        tasks.spawn(async move {
            debug!(request_id = ?id, tool = call.name(), "Tool call started");
            let result = match run {
                Some(run) => forward_progress(run, &progress_token, &outbox)
                    .await
                    .map(ToolResult::text),
                None => tokio::select! {
                    result = executor.call(&call) => result.map(|value| ToolResult::json(&value)),
                    () = cancel.cancelled() => Err(WorkflowError::cancelled(
                        cancel.reason().unwrap_or_else(|| "cancelled by client".to_string()),
                    )),
                },
            };

            if in_flight.remove(&id).is_none() {
                debug!(request_id = ?id, "Request was cancelled; not responding");
                return;
            }

            let tool_result = result.unwrap_or_else(|err| ToolResult::error(err.to_string()));
            let response = match serde_json::to_value(&tool_result) {
                Ok(value) => Response::success(id, value),
                Err(e) => Response::error(id, RpcError::Internal(e.to_string())),
            };
            outbox.send(&response).await;
        });
    }
}

impl std::fmt::Debug for StdioServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioServer")
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

/// Relays a run's progress lines as notifications and returns its result.
async fn forward_progress(
    mut run: RunHandle,
    progress_token: &Value,
    outbox: &Outbox,
) -> Result<String, WorkflowError> {
    let mut progress: u64 = 0;
    while let Some(event) = run.next_event().await {
        if let ProgressEvent::Progress { message } = event {
            progress += 1;
            let notification = Notification::new(
                PROGRESS_NOTIFICATION,
                json!({
                    "progressToken": progress_token,
                    "progress": progress,
                    "message": message,
                }),
            );
            outbox.send(&notification).await;
        }
    }
    run.join().await
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION,
        }
    })
}

fn parse_tool_call(params: &Value) -> Result<ToolCall, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams("missing 'name' field".to_string()))?;
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    ToolCall::parse(name, &arguments).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSettings, CredentialCache, Principal, StaticTokenProvider};
    use crate::config::PollingConfig;
    use crate::remote::RemoteApi;
    use crate::testing::ScriptedRemoteApi;
    use crate::workflow::Orchestrator;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::io::{DuplexStream, Lines};
    use tokio::task::JoinHandle;

    struct Client {
        input: Option<DuplexStream>,
        output: Lines<BufReader<DuplexStream>>,
        server: JoinHandle<io::Result<()>>,
    }

    impl Client {
        async fn send(&mut self, message: Value) {
            let input = self.input.as_mut().unwrap();
            input
                .write_all(format!("{message}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn send_raw(&mut self, line: &str) {
            let input = self.input.as_mut().unwrap();
            input.write_all(line.as_bytes()).await.unwrap();
            input.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.output.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        /// Reads until the response to `id`, returning the notifications seen first.
        async fn response_to(&mut self, id: i64) -> (Vec<Value>, Value) {
            let mut notifications = Vec::new();
            loop {
                let message = self.recv().await;
                if message.get("id") == Some(&json!(id)) {
                    return (notifications, message);
                }
                notifications.push(message);
            }
        }

        async fn close(mut self) -> io::Result<()> {
            drop(self.input.take());
            self.server.await.unwrap()
        }
    }

    fn start(remote: Arc<dyn RemoteApi>) -> Client {
        let credentials = CredentialCache::new(
            Arc::new(StaticTokenProvider::new("tok")),
            Principal::default(),
            AuthSettings::default(),
        );
        let orchestrator = Orchestrator::new(credentials, remote, "https://env-dev.outsystems.app")
            .with_polling(PollingConfig::uniform(1));
        let server = StdioServer::new(ToolExecutor::new(Arc::new(orchestrator)));

        let (client_in, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_out) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            server.serve(BufReader::new(server_in), server_out).await
        });

        Client {
            input: Some(client_in),
            output: BufReader::new(client_out).lines(),
            server,
        }
    }

    fn call(id: i64, name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        })
    }

    #[tokio::test]
    async fn test_handshake_and_listing() {
        let mut client = start(Arc::new(ScriptedRemoteApi::new()));

        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .await;
        let init = client.recv().await;
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], "appflow");

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await;
        let list = client.recv().await;
        assert_eq!(list["id"], 2);
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names[0], "createAndDeployApp");
        assert_eq!(names.len(), 7);

        client
            .send(json!({"jsonrpc": "2.0", "id": "p", "method": "ping"}))
            .await;
        assert_eq!(client.recv().await, json!({"jsonrpc": "2.0", "result": {}, "id": "p"}));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let mut client = start(Arc::new(ScriptedRemoteApi::new()));

        client.send_raw("{not json").await;
        let parse = client.recv().await;
        assert_eq!(parse["error"]["code"], -32700);
        assert_eq!(parse["id"], Value::Null);

        client
            .send(json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
            .await;
        assert_eq!(client.recv().await["error"]["code"], -32601);

        client.send(call(4, "deleteEverything", json!({}))).await;
        let unknown = client.recv().await;
        assert_eq!(unknown["error"]["code"], -32602);
        assert!(unknown["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Tool 'deleteEverything' not found."));

        client
            .send(call(5, "createAndDeployApp", json!({"description": "x"})))
            .await;
        assert_eq!(client.recv().await["error"]["code"], -32602);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_streaming_call_sends_progress_then_result() {
        let mut client = start(Arc::new(ScriptedRemoteApi::happy_path()));

        let mut request = call(7, "createAndDeployApp", json!({"prompt": "todo app"}));
        request["params"]["_meta"] = json!({"progressToken": "run-7"});
        client.send(request).await;

        let (notifications, response) = client.response_to(7).await;
        assert!(!notifications.is_empty());
        for (i, n) in notifications.iter().enumerate() {
            assert_eq!(n["method"], PROGRESS_NOTIFICATION);
            assert_eq!(n["params"]["progressToken"], "run-7");
            assert_eq!(n["params"]["progress"], i + 1);
        }
        assert_eq!(notifications[0]["params"]["message"], "Fetching API token...");
        assert_eq!(
            notifications.last().unwrap()["params"]["message"],
            "Application is live: https://env-dev.outsystems.app/app1"
        );
        assert_eq!(
            response["result"],
            json!({
                "content": [{"type": "text", "text": "https://env-dev.outsystems.app/app1"}],
                "isError": false
            })
        );

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_token_defaults_to_request_id() {
        let mut client = start(Arc::new(ScriptedRemoteApi::happy_path()));
        client
            .send(call(8, "createAndDeployApp", json!({"prompt": "todo app"})))
            .await;

        let (notifications, _) = client.response_to(8).await;
        assert_eq!(notifications[0]["params"]["progressToken"], 8);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_run_is_error_result() {
        let remote = ScriptedRemoteApi::new()
            .with_job("job-1")
            .with_job_phases(&["Failed"]);
        let mut client = start(Arc::new(remote));
        client
            .send(call(9, "createAndDeployApp", json!({"prompt": "todo app"})))
            .await;

        let (notifications, response) = client.response_to(9).await;
        let last = notifications.last().unwrap()["params"]["message"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(last.starts_with("Error during poll_ready:"));
        assert_eq!(response["result"]["isError"], true);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_step_tool_error_is_error_result() {
        let mut client = start(Arc::new(ScriptedRemoteApi::new()));
        client
            .send(call(10, "getStatus", json!({"sessionId": "nope"})))
            .await;

        let response = client.recv().await;
        assert_eq!(
            response["result"],
            json!({
                "content": [{"type": "text", "text": "Invalid or expired session ID: nope"}],
                "isError": true
            })
        );
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_request_gets_no_response() {
        let phases = vec!["Queued"; 10_000];
        let remote = Arc::new(
            ScriptedRemoteApi::new()
                .with_job("job-1")
                .with_job_phases(&phases),
        );
        let mut client = start(Arc::clone(&remote) as Arc<dyn RemoteApi>);
        client
            .send(call(11, "createAndDeployApp", json!({"prompt": "todo app"})))
            .await;

        loop {
            let message = client.recv().await;
            if message["params"]["message"] == "  -> Current status: Queued" {
                break;
            }
        }
        client
            .send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/cancelled",
                "params": {"requestId": 11, "reason": "user aborted"}
            }))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 12, "method": "ping"}))
            .await;

        let (before_ping, _) = client.response_to(12).await;
        assert!(before_ping.iter().all(|m| m.get("id").is_none()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(remote.count("getJobStatus") < 10_000);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_cancels_running_calls() {
        let phases = vec!["Queued"; 10_000];
        let remote = ScriptedRemoteApi::new()
            .with_job("job-1")
            .with_job_phases(&phases);
        let mut client = start(Arc::new(remote));
        client
            .send(call(13, "createAndDeployApp", json!({"prompt": "todo app"})))
            .await;
        let first = client.recv().await;
        assert_eq!(first["method"], PROGRESS_NOTIFICATION);

        drop(client.input.take());
        let finished = tokio::time::timeout(Duration::from_secs(5), &mut client.server).await;
        tokio_test::assert_ok!(finished.unwrap().unwrap());
    }
}
