//! ConversationController: the interactive model/tool loop.
//!
//! Responsibilities:
//! - Read user lines and recognise exit commands
//! - Send each turn to the model with the tool catalog attached
//! - Execute every function call of a response concurrently and feed the
//!   outputs back, until the model answers with plain text
//! - Carry the model's continuation token between requests
//!
//! History lives with the model service. The controller only remembers the
//! id of the latest response.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::HostConfig;
use crate::inference::types::{FunctionTool, InputItem, ModelRequest, ModelResponse};
use crate::inference::ModelBackend;
use crate::mcp_client::registry::ToolCatalog;

use super::dispatcher::{Dispatcher, ToolInvocationRequest};
use super::errors::ConversationError;

// ─── Constants ──────────────────────────────────────────────────────────────

const USER_PROMPT: &str = "You: ";
const ASSISTANT_PREFIX: &str = "Assistant: ";

/// Shown in place of an answer when a turn hits `max_tool_rounds`.
fn round_limit_notice(rounds: u32) -> String {
    format!("I stopped after {rounds} rounds of tool calls without reaching an answer. Please rephrase or narrow the request.")
}

/// Inputs that end the session (compared case-insensitively after trimming).
const EXIT_COMMANDS: &[&str] = &["exit", "quit"];

// ─── Types ──────────────────────────────────────────────────────────────────

/// Where the controller is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingUserInput,
    AwaitingModelResponse,
    ExecutingTools,
    Terminated,
}

/// Why a conversation ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The user typed `exit` or `quit`.
    UserExit,
    /// Standard input closed.
    EndOfInput,
    /// The process was interrupted (Ctrl-C).
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationOutcome {
    pub reason: ExitReason,
    /// Completed user turns (each ended with an assistant message).
    pub turns: usize,
}

/// Model settings the controller needs from the host configuration.
#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub model: String,
    pub max_tool_rounds: u32,
}

impl From<&HostConfig> for ConversationSettings {
    fn from(config: &HostConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tool_rounds: config.max_tool_rounds,
        }
    }
}

// ─── ConversationController ─────────────────────────────────────────────────

pub struct ConversationController<'a, M: ModelBackend> {
    model: M,
    tools: Vec<FunctionTool>,
    dispatcher: Dispatcher<'a>,
    settings: ConversationSettings,
    /// Id of the latest model response; `None` before the first turn.
    previous_response_id: Option<String>,
    state: ConversationState,
    turns: usize,
}

impl<'a, M: ModelBackend> ConversationController<'a, M> {
    pub fn new(
        model: M,
        catalog: &ToolCatalog,
        dispatcher: Dispatcher<'a>,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            model,
            tools: catalog.to_function_tools(),
            dispatcher,
            settings,
            previous_response_id: None,
            state: ConversationState::Idle,
            turns: 0,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    fn set_state(&mut self, next: ConversationState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "conversation state");
            self.state = next;
        }
    }

    /// Run the read → model → tools → print loop until exit.
    ///
    /// Returns `Err` only for fatal conditions: a failed model call or
    /// console I/O failure.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<ConversationOutcome, ConversationError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.run_loop(input, &mut output).await;
        self.set_state(ConversationState::Terminated);
        match &result {
            Ok(outcome) => {
                tracing::info!(reason = ?outcome.reason, turns = outcome.turns, "conversation ended");
            }
            Err(e) => {
                tracing::error!(error = %e, turns = self.turns, "conversation aborted");
            }
        }
        result
    }

    async fn run_loop<R, W>(&mut self, input: R, output: &mut W) -> Result<ConversationOutcome, ConversationError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            self.set_state(ConversationState::AwaitingUserInput);
            output.write_all(USER_PROMPT.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                return Ok(self.outcome(ExitReason::EndOfInput));
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if is_exit_command(text) {
                return Ok(self.outcome(ExitReason::UserExit));
            }

            let reply = self.run_turn(text).await?;
            output
                .write_all(format!("{ASSISTANT_PREFIX}{reply}\n\n").as_bytes())
                .await?;
            output.flush().await?;
            self.turns += 1;
        }
    }

    /// One user turn: model call, then tool rounds until a text answer.
    ///
    /// A turn that exhausts `max_tool_rounds` ends with a notice and rewinds
    /// the continuation token to where the turn started, since the last
    /// response still holds unanswered calls.
    async fn run_turn(&mut self, user_text: &str) -> Result<String, ConversationError> {
        tracing::info!(turn = self.turns + 1, chars = user_text.len(), "user turn");

        let turn_start = self.previous_response_id.clone();
        let mut response = self.request(vec![InputItem::user(user_text)]).await?;
        let mut rounds: u32 = 0;

        while response.has_function_calls() {
            if rounds >= self.settings.max_tool_rounds {
                tracing::warn!(
                    rounds,
                    pending_calls = response.function_calls().len(),
                    "tool round limit reached, abandoning turn"
                );
                self.previous_response_id = turn_start;
                return Ok(round_limit_notice(rounds));
            }
            rounds += 1;
            self.set_state(ConversationState::ExecutingTools);

            let requests: Vec<ToolInvocationRequest> = response
                .function_calls()
                .into_iter()
                .map(ToolInvocationRequest::from)
                .collect();

            tracing::info!(
                round = rounds,
                tools = ?requests.iter().map(|r| r.qualified_name.as_str()).collect::<Vec<_>>(),
                "executing tool calls"
            );

            let results = self.dispatcher.invoke_all(&requests).await;
            let outputs = results
                .iter()
                .map(|r| InputItem::function_output(&r.call_id, r.model_output()))
                .collect();

            self.previous_response_id = Some(response.id.clone());
            response = self.request(outputs).await?;
        }

        self.previous_response_id = Some(response.id.clone());
        Ok(response.output_text())
    }

    async fn request(&mut self, input: Vec<InputItem>) -> Result<ModelResponse, ConversationError> {
        self.set_state(ConversationState::AwaitingModelResponse);
        let request = ModelRequest {
            model: self.settings.model.clone(),
            input,
            tools: self.tools.clone(),
            previous_response_id: self.previous_response_id.clone(),
        };
        Ok(self.model.respond(request).await?)
    }

    fn outcome(&self, reason: ExitReason) -> ConversationOutcome {
        ConversationOutcome {
            reason,
            turns: self.turns,
        }
    }
}

fn is_exit_command(text: &str) -> bool {
    EXIT_COMMANDS.iter().any(|c| text.eq_ignore_ascii_case(c))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::inference::InferenceError;
    use crate::mcp_client::lifecycle::ProcessSupervisor;
    use crate::testing::{provider_config, Reply, ScriptedConnector, ScriptedModel, ScriptedProvider};

    fn settings() -> ConversationSettings {
        ConversationSettings {
            model: "gpt-4.1".into(),
            max_tool_rounds: 4,
        }
    }

    async fn bmi_supervisor() -> ProcessSupervisor {
        let provider = ScriptedProvider::new("bmi")
            .with_tool("calculate", &["weight_kg", "height_m"])
            .with_tool("category", &["bmi"])
            .replying("calculate", Reply::Text("22.9".into()))
            .replying("category", Reply::ToolError("bmi must be a number".into()));
        let connector = ScriptedConnector::new().with_provider(provider);
        ProcessSupervisor::launch_all(&[provider_config("bmi")], Arc::new(connector)).await
    }

    async fn run_script(
        supervisor: &ProcessSupervisor,
        model: ScriptedModel,
        input: &str,
    ) -> (Result<ConversationOutcome, ConversationError>, String) {
        let catalog = ToolCatalog::build(supervisor.sessions());
        let mut controller =
            ConversationController::new(model, &catalog, Dispatcher::new(supervisor), settings());
        let mut output = Vec::new();
        let result = controller.run(input.as_bytes(), &mut output).await;
        assert_eq!(controller.state(), ConversationState::Terminated);
        (result, String::from_utf8(output).unwrap())
    }

    #[tokio::test]
    async fn test_text_turn_then_exit() {
        let mut sup = bmi_supervisor().await;
        let model = ScriptedModel::new().then_text("resp_1", "Hello!");
        let requests = model.request_log();

        let (result, output) = run_script(&sup, model, "hi\nQUIT\n").await;
        let outcome = result.unwrap();
        assert_eq!(outcome.reason, ExitReason::UserExit);
        assert_eq!(outcome.turns, 1);
        assert_eq!(output, "You: Assistant: Hello!\n\nYou: ");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].previous_response_id.is_none());
        assert_eq!(requests[0].model, "gpt-4.1");
        let tool_names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tool_names, vec!["bmi__calculate", "bmi__category"]);

        sup.close_all().await;
    }

    #[tokio::test]
    async fn test_multiple_calls_resolved_in_one_round() {
        let mut sup = bmi_supervisor().await;
        let model = ScriptedModel::new()
            .then_calls(
                "resp_1",
                &[
                    ("bmi__calculate", r#"{"weight_kg":"70","height_m":"1.75"}"#, "call_a"),
                    ("bmi__category", r#"{"bmi":"abc"}"#, "call_b"),
                    ("weather__forecast", "{}", "call_c"),
                ],
            )
            .then_text("resp_2", "Your BMI is 22.9.");
        let requests = model.request_log();

        let (result, output) = run_script(&sup, model, "what is my bmi?\n").await;
        let outcome = result.unwrap();
        assert_eq!(outcome.reason, ExitReason::EndOfInput);
        assert_eq!(outcome.turns, 1);
        assert_eq!(output.matches("Assistant: ").count(), 1);
        assert!(output.contains("Assistant: Your BMI is 22.9.\n\n"));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let follow_up = &requests[1];
        assert_eq!(follow_up.previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(
            follow_up.input,
            vec![
                InputItem::function_output("call_a", "22.9"),
                InputItem::function_output("call_b", "Tool Error: bmi must be a number"),
                InputItem::function_output(
                    "call_c",
                    "Tool Error: provider 'weather' is unavailable: no such provider"
                ),
            ]
        );

        sup.close_all().await;
    }

    #[tokio::test]
    async fn test_continuation_token_carries_across_turns() {
        let mut sup = bmi_supervisor().await;
        let model = ScriptedModel::new()
            .then_text("resp_1", "one")
            .then_calls("resp_2", &[("bmi__calculate", r#"{"weight_kg":"1","height_m":"1"}"#, "c1")])
            .then_text("resp_3", "two");
        let requests = model.request_log();

        let (result, output) = run_script(&sup, model, "first\n\n   \nsecond\nexit\n").await;
        assert_eq!(result.unwrap().turns, 2);
        assert_eq!(output.matches("You: ").count(), 5);

        let ids: Vec<Option<String>> = requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.previous_response_id.clone())
            .collect();
        assert_eq!(
            ids,
            vec![None, Some("resp_1".to_string()), Some("resp_2".to_string())]
        );

        sup.close_all().await;
    }

    #[tokio::test]
    async fn test_model_error_is_fatal() {
        let mut sup = bmi_supervisor().await;
        let model = ScriptedModel::new().then_error(InferenceError::HttpError {
            status: 401,
            body: "invalid api key".into(),
        });

        let (result, output) = run_script(&sup, model, "hi\nhello again\n").await;
        assert!(matches!(result, Err(ConversationError::Model(_))));
        assert!(!output.contains("Assistant:"));

        sup.close_all().await;
    }

    #[tokio::test]
    async fn test_runaway_tool_loop_ends_turn_not_session() {
        let mut sup = bmi_supervisor().await;
        let call = [("bmi__calculate", r#"{"weight_kg":"1","height_m":"1"}"#, "c")];
        let mut model = ScriptedModel::new().then_text("resp_a", "hello");
        for i in 0..5 {
            model = model.then_calls(&format!("loop_{i}"), &call);
        }
        model = model.then_text("resp_b", "still here");
        let requests = model.request_log();

        let (result, output) = run_script(&sup, model, "hi\nloop forever\nare you there?\nexit\n").await;
        let outcome = result.unwrap();
        assert_eq!(outcome.reason, ExitReason::UserExit);
        assert_eq!(outcome.turns, 3);
        assert!(output.contains(&format!("{ASSISTANT_PREFIX}{}\n\n", round_limit_notice(4))));
        assert!(output.contains("Assistant: still here\n\n"));

        let requests = requests.lock().unwrap();
        // hello, the looping turn (1 + 4 rounds), then the next turn.
        assert_eq!(requests.len(), 7);
        assert_eq!(requests[5].previous_response_id.as_deref(), Some("loop_3"));
        assert_eq!(requests[6].previous_response_id.as_deref(), Some("resp_a"));
        assert_eq!(requests[6].input, vec![InputItem::user("are you there?")]);

        sup.close_all().await;
    }

    #[tokio::test]
    async fn test_immediate_end_of_input() {
        let mut sup = bmi_supervisor().await;
        let model = ScriptedModel::new();
        let requests = model.request_log();

        let (result, output) = run_script(&sup, model, "").await;
        assert_eq!(result.unwrap().reason, ExitReason::EndOfInput);
        assert_eq!(output, "You: ");
        assert!(requests.lock().unwrap().is_empty());

        sup.close_all().await;
    }

    #[test]
    fn test_is_exit_command() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("Quit"));
        assert!(is_exit_command("EXIT"));
        assert!(!is_exit_command("exit now"));
        assert!(!is_exit_command("q"));
    }
}
