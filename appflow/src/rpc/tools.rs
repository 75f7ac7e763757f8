//! The tool catalogue and argument parsing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::registry::SessionId;

/// Runs the whole workflow and streams progress.
pub const CREATE_AND_DEPLOY_APP: &str = "createAndDeployApp";
/// Stage 1 on its own.
pub const START_GENERATION: &str = "startGeneration";
/// One job status fetch.
pub const GET_STATUS: &str = "getStatus";
/// Stage 3 on its own.
pub const TRIGGER_GENERATION: &str = "triggerGeneration";
/// Stage 5 on its own.
pub const START_PUBLICATION: &str = "startPublication";
/// One publication status fetch.
pub const GET_PUBLICATION_STATUS: &str = "getPublicationStatus";
/// Stage 7 on its own.
pub const GET_APPLICATION_DETAILS: &str = "getApplicationDetails";

/// A tool as advertised to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Creates a tool definition.
    #[must_use]
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

fn prompt_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "prompt": {
                "type": "string",
                "description": "A detailed description of the application to build."
            }
        },
        "required": ["prompt"]
    })
}

fn session_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sessionId": {
                "type": "string",
                "description": "The session ID returned by startGeneration."
            }
        },
        "required": ["sessionId"]
    })
}

/// Returns every tool, streaming tool first.
#[must_use]
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            CREATE_AND_DEPLOY_APP,
            "Creates, generates and publishes an application from a text prompt, \
             streaming progress, and returns the live application URL.",
            prompt_schema(),
        ),
        ToolDefinition::new(
            START_GENERATION,
            "Step 1: Starts application generation from a text prompt. \
             Returns a session ID to use with the other tools.",
            prompt_schema(),
        ),
        ToolDefinition::new(
            GET_STATUS,
            "Checks the job status. Poll until 'ReadyToGenerate' before triggering \
             generation, then until 'Done'.",
            session_schema(),
        ),
        ToolDefinition::new(
            TRIGGER_GENERATION,
            "Step 3: Triggers generation for a job that is 'ReadyToGenerate'.",
            session_schema(),
        ),
        ToolDefinition::new(
            START_PUBLICATION,
            "Step 5: Publishes the generated application. Requires a job status of 'Done'.",
            session_schema(),
        ),
        ToolDefinition::new(
            GET_PUBLICATION_STATUS,
            "Checks the publication status. Poll until 'Finished'.",
            session_schema(),
        ),
        ToolDefinition::new(
            GET_APPLICATION_DETAILS,
            "Step 7: Returns the live URL of the published application.",
            session_schema(),
        ),
    ]
}

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    /// Run everything.
    CreateAndDeployApp {
        /// The application description.
        prompt: String,
    },
    /// Create the job and open a session.
    StartGeneration {
        /// The application description.
        prompt: String,
    },
    /// Fetch the job status.
    GetStatus(SessionId),
    /// Trigger generation.
    TriggerGeneration(SessionId),
    /// Start publication.
    StartPublication(SessionId),
    /// Fetch the publication status.
    GetPublicationStatus(SessionId),
    /// Resolve the live URL.
    GetApplicationDetails(SessionId),
}

/// Why a tool call could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolCallError {
    /// No tool has this name.
    #[error("Tool '{0}' not found.")]
    UnknownTool(String),
    /// The arguments do not match the tool's schema.
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments {
        /// The tool name.
        tool: String,
        /// What is wrong.
        reason: String,
    },
}

impl ToolCall {
    /// Parses a call from a tool name and its arguments.
    ///
    /// Names may carry a `tool/` prefix.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ToolCallError> {
        let name = name.strip_prefix("tool/").unwrap_or(name);
        match name {
            CREATE_AND_DEPLOY_APP => Ok(Self::CreateAndDeployApp {
                prompt: string_arg(name, arguments, "prompt")?,
            }),
            START_GENERATION => Ok(Self::StartGeneration {
                prompt: string_arg(name, arguments, "prompt")?,
            }),
            GET_STATUS => session_arg(name, arguments).map(Self::GetStatus),
            TRIGGER_GENERATION => session_arg(name, arguments).map(Self::TriggerGeneration),
            START_PUBLICATION => session_arg(name, arguments).map(Self::StartPublication),
            GET_PUBLICATION_STATUS => session_arg(name, arguments).map(Self::GetPublicationStatus),
            GET_APPLICATION_DETAILS => {
                session_arg(name, arguments).map(Self::GetApplicationDetails)
            }
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateAndDeployApp { .. } => CREATE_AND_DEPLOY_APP,
            Self::StartGeneration { .. } => START_GENERATION,
            Self::GetStatus(_) => GET_STATUS,
            Self::TriggerGeneration(_) => TRIGGER_GENERATION,
            Self::StartPublication(_) => START_PUBLICATION,
            Self::GetPublicationStatus(_) => GET_PUBLICATION_STATUS,
            Self::GetApplicationDetails(_) => GET_APPLICATION_DETAILS,
        }
    }

    /// Returns true for the tool that streams progress.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::CreateAndDeployApp { .. })
    }
}

fn string_arg(tool: &str, arguments: &Value, field: &str) -> Result<String, ToolCallError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolCallError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing string field '{field}'"),
        })
}

fn session_arg(tool: &str, arguments: &Value) -> Result<SessionId, ToolCallError> {
    string_arg(tool, arguments, "sessionId").map(SessionId::from)
}

/// Content item of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// The `tools/call` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Result content.
    pub content: Vec<ToolContent>,
    /// True if the tool failed.
    pub is_error: bool,
}

impl ToolResult {
    /// A successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A successful JSON result, rendered as text.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// A failed result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Returns the first text item.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().map(|ToolContent::Text { text }| text.as_str()).next()
    }
}
