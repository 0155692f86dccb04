//! Shared types for the inference client.
//!
//! These mirror the OpenAI Responses API types, used for both request
//! building and response parsing. Only the fields the host reads are
//! modelled; everything else in a response is ignored.

use serde::{Deserialize, Serialize};

// ─── Request Types ───────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// One item of the request `input` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// Plain text message.
    Message { role: Role, content: String },
    /// The output of a tool call, paired with the model's call id.
    FunctionCallOutput { call_id: String, output: String },
}

impl InputItem {
    pub fn user(text: impl Into<String>) -> Self {
        InputItem::Message {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        InputItem::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

/// Function tool definition sent in the request.
///
/// Serializes to the flat Responses API form:
/// `{"type": "function", "name": ..., "description": ..., "parameters": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    pub r#type: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl FunctionTool {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            r#type: "function".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Request body for `POST /responses`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionTool>,
    /// Continuation token from the previous response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// A function call the model wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Qualified tool name, e.g. `"fetch__fetch"`.
    pub name: String,
    /// Raw JSON argument text exactly as the model produced it.
    #[serde(default)]
    pub arguments: String,
    pub call_id: String,
}

/// Content part of an output message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

/// One item of the response `output` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall(FunctionCall),
    /// Reasoning, web search and other item kinds the host does not act on.
    #[serde(other)]
    Other,
}

/// Response body of `POST /responses`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelResponse {
    /// Continuation token for the next request.
    pub id: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

impl ModelResponse {
    /// Concatenated text of every message item.
    pub fn output_text(&self) -> String {
        let mut text = String::new();
        for item in &self.output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    match part {
                        OutputContent::OutputText { text: t } => text.push_str(t),
                        OutputContent::Refusal { refusal } => text.push_str(refusal),
                        OutputContent::Other => {}
                    }
                }
            }
        }
        text
    }

    /// Function calls in output order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.output
            .iter()
            .any(|item| matches!(item, OutputItem::FunctionCall(_)))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
