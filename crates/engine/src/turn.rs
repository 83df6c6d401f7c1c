//! The model execution loop.
//!
//! [`run_turn`] drives a bounded sequence of provider calls and tool
//! executions for one user request and returns a [`TurnResult`]. The
//! loop enforces the tool-interface contract: anti-repetition, the
//! respond_text evidence gates, empty-search advice, and the step
//! limit. Tool failures feed back into the transcript; only provider
//! failures abort the turn.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use za_domain::message::{ChatResponse, Message, ToolCall, ToolDefinition};
use za_domain::{Error, Result};
use za_providers::{ActiveModel, ProviderClient};
use za_tools::exec::is_ripgrep_command;
use za_tools::sanitize::sanitize_output;
use za_tools::ToolRegistry;

use crate::cancel::CancelState;
use crate::classify;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::sink::TurnSink;

/// Hard bound on provider-call iterations per turn.
pub const MAX_ITERATIONS: usize = 25;

/// Identical-call threshold for `bash` (one repeat is already suspect).
const BASH_REPEAT_THRESHOLD: u32 = 1;
/// Identical-call threshold for every other tool.
const OTHER_REPEAT_THRESHOLD: u32 = 3;
/// Rejected-bash-repeat budget before the turn is declared stuck.
const BASH_REJECTION_LIMIT: u32 = 2;
/// Rejected-other-repeat budget before the turn is declared stuck.
const OTHER_REJECTION_LIMIT: u32 = 6;
/// Retries granted when the model answers with neither text nor tools.
const NO_TOOL_RETRY_LIMIT: u32 = 2;
/// Consecutive empty ripgrep results before the loop suggests a
/// different strategy.
const RG_EMPTY_STREAK: u32 = 2;

const CANCELLED_RESPONSE: &str = "Operation cancelled by user.";
const STEP_LIMIT_RESPONSE: &str = "Task paused (max steps).";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured outcome of one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub response: String,
    pub reasoning: Option<String>,
    pub tool_calls: u32,
    pub error_count: u32,
    pub files_touched: Vec<String>,
}

/// A shared todo summary. Tracking beyond this one string lives outside
/// the core; the loop only surfaces it to the model.
#[derive(Default)]
pub struct TodoList {
    summary: Mutex<String>,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        *self.summary.lock() = summary.into();
    }

    pub fn summary(&self) -> String {
        self.summary.lock().clone()
    }
}

/// The provider seam. [`ProviderClient`] implements it for real calls;
/// tests drive the loop with scripted clients.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        model: &ActiveModel,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse>;
}

#[async_trait]
impl ModelClient for ProviderClient {
    async fn complete(
        &self,
        model: &ActiveModel,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        ProviderClient::complete(self, model, messages, tools).await
    }
}

/// Inputs to one turn.
pub struct TurnInput<'a> {
    pub model: &'a ActiveModel,
    /// Full replacement for the default system prompt when present.
    pub system_prompt: Option<&'a str>,
    pub user_request: &'a str,
    /// Prior context, already assembled; an optional leading system
    /// message is merged into the system prompt.
    pub prior_messages: &'a [Message],
    pub todo: &'a TodoList,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct LoopState {
    last_tool: Option<(String, String)>,
    repeat_n: u32,
    bash_rej: u32,
    other_rej: u32,
    mut_exec: u32,
    paths: Vec<String>,
    rg_empty: u32,
    no_tool_ret: u32,
    tool_calls: u32,
    reasoning: Option<String>,
}

impl LoopState {
    fn result(&self, response: impl Into<String>, error_count: u32) -> TurnResult {
        TurnResult {
            response: response.into(),
            reasoning: self.reasoning.clone(),
            tool_calls: self.tool_calls,
            error_count,
            files_touched: self.paths.clone(),
        }
    }

    fn record_path(&mut self, path: String) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }
}

/// What processing one model response decided.
enum StepOutcome {
    Continue,
    Final(TurnResult),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive one turn to completion.
///
/// Returns `Err` only for failures that abort the turn without a
/// committed result (provider errors, empty input). Everything else —
/// cancellation, the step limit, protocol violations, stuck loops —
/// comes back as a [`TurnResult`] with an explanatory response.
pub async fn run_turn(
    client: &dyn ModelClient,
    registry: &ToolRegistry,
    sink: &dyn TurnSink,
    cancel: &CancelState,
    input: TurnInput<'_>,
) -> Result<TurnResult> {
    let request = input.user_request.trim();
    if request.is_empty() {
        return Err(Error::Other("user request is empty".into()));
    }

    let mutation_request = classify::is_mutation_request(request);
    let skill_request = classify::is_skill_creation_request(request);

    let mut msgs = build_initial_messages(&input, request);
    let tool_defs = registry.definitions();
    let mut state = LoopState::default();

    for iter in 0..MAX_ITERATIONS {
        if cancel.is_cancelled() {
            return Ok(state.result(CANCELLED_RESPONSE, 0));
        }

        tracing::debug!(iter, messages = msgs.len(), "model call");
        let response = tokio::select! {
            r = client.complete(input.model, &msgs, &tool_defs) => r?,
            _ = cancel.cancelled() => return Ok(state.result(CANCELLED_RESPONSE, 0)),
        };

        if cancel.is_cancelled() {
            return Ok(state.result(CANCELLED_RESPONSE, 0));
        }

        if let Some(reasoning) = response
            .reasoning
            .as_deref()
            .filter(|r| !r.trim().is_empty())
        {
            sink.thinking(reasoning);
            state.reasoning = Some(reasoning.to_string());
        }

        msgs.push(Message::assistant_with_tools(
            response.text.clone(),
            response.tool_calls.clone(),
        ));

        if response.tool_calls.is_empty() {
            match handle_textual_response(&response, &mut state, &mut msgs, sink) {
                StepOutcome::Final(result) => return Ok(result),
                StepOutcome::Continue => continue,
            }
        }

        let outcome = process_tool_calls(
            &response.tool_calls,
            registry,
            sink,
            cancel,
            &mut state,
            &mut msgs,
            mutation_request,
            skill_request,
        )
        .await;
        if let StepOutcome::Final(result) = outcome {
            return Ok(result);
        }

        // Post-batch: nudge away from fruitless searching.
        if state.rg_empty >= RG_EMPTY_STREAK {
            let advice = "Your searches keep coming back empty. Try a different strategy: \
                          broaden the pattern, list directories, or read the likely files directly.";
            sink.event(advice);
            msgs.push(Message::user(advice));
            state.rg_empty = 0;
        }
    }

    Ok(state.result(STEP_LIMIT_RESPONSE, 0))
}

fn build_initial_messages(input: &TurnInput<'_>, request: &str) -> Vec<Message> {
    let mut system = input
        .system_prompt
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .to_string();

    let todo = input.todo.summary();
    if !todo.trim().is_empty() {
        system.push_str("\n\nCurrent todo summary:\n");
        system.push_str(&todo);
    }

    let mut prior = input.prior_messages;
    if let Some(first) = prior.first() {
        if first.role == za_domain::message::Role::System {
            system.push_str("\n\n");
            system.push_str(&first.content);
            prior = &prior[1..];
        }
    }

    let mut msgs = Vec::with_capacity(prior.len() + 2);
    msgs.push(Message::system(system));
    msgs.extend(prior.iter().cloned());
    msgs.push(Message::user(request));
    msgs
}

fn handle_textual_response(
    response: &ChatResponse,
    state: &mut LoopState,
    msgs: &mut Vec<Message>,
    sink: &dyn TurnSink,
) -> StepOutcome {
    let text = response.text.trim();
    if !text.is_empty() {
        return StepOutcome::Final(state.result(text, 0));
    }

    state.no_tool_ret += 1;
    if state.no_tool_ret <= NO_TOOL_RETRY_LIMIT {
        sink.event("model returned neither text nor tool calls; reprompting");
        msgs.push(Message::user(
            "You must use the tool interface: call a tool to make progress, \
             or finish with respond_text.",
        ));
        StepOutcome::Continue
    } else {
        StepOutcome::Final(state.result(
            "The model failed the tool-interface contract: it produced neither \
             a final answer nor a tool call after repeated retries.",
            1,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_tool_calls(
    tool_calls: &[ToolCall],
    registry: &ToolRegistry,
    sink: &dyn TurnSink,
    cancel: &CancelState,
    state: &mut LoopState,
    msgs: &mut Vec<Message>,
    mutation_request: bool,
    skill_request: bool,
) -> StepOutcome {
    for tc in tool_calls {
        if cancel.is_cancelled() {
            return StepOutcome::Final(state.result(CANCELLED_RESPONSE, 0));
        }
        state.tool_calls += 1;

        // ── Anti-repetition ────────────────────────────────────────
        let signature = (tc.tool_name.clone(), tc.arguments.clone());
        if state.last_tool.as_ref() == Some(&signature) {
            state.repeat_n += 1;
        } else {
            state.repeat_n = 0;
            state.last_tool = Some(signature);
        }

        let is_bash = tc.tool_name == "bash";
        let threshold = if is_bash {
            BASH_REPEAT_THRESHOLD
        } else {
            OTHER_REPEAT_THRESHOLD
        };
        if state.repeat_n >= threshold {
            sink.event(&format!("rejected repeated {} call", tc.tool_name));
            msgs.push(Message::tool_result(
                &tc.id,
                "repeated identical tool call rejected: vary the arguments, take a \
                 different action, or finish with respond_text",
            ));
            if is_bash {
                state.bash_rej += 1;
            } else {
                state.other_rej += 1;
            }
            if state.bash_rej >= BASH_REJECTION_LIMIT || state.other_rej >= OTHER_REJECTION_LIMIT {
                return StepOutcome::Final(state.result(
                    "Stopping: the model kept repeating the same tool call without \
                     making progress.",
                    1,
                ));
            }
            continue;
        }

        // ── respond_text gating ────────────────────────────────────
        let flags = registry.flags(&tc.tool_name).unwrap_or_default();
        if flags.is_respond_text {
            match respond_text_gate(tc, state, mutation_request, skill_request) {
                Ok(text) => return StepOutcome::Final(state.result(text, 0)),
                Err(rejection) => {
                    sink.event(&rejection);
                    msgs.push(Message::tool_result(&tc.id, rejection));
                    continue;
                }
            }
        }

        // ── Dispatch ───────────────────────────────────────────────
        sink.tool(&format!("{} {}", tc.tool_name, tc.arguments));
        match registry.dispatch(&tc.tool_name, &tc.arguments).await {
            Ok(output) => {
                if flags.is_mutating {
                    state.mut_exec += 1;
                    if let Some(path) = registry.primary_path(&tc.tool_name, &tc.arguments) {
                        state.record_path(path);
                    }
                }

                let sanitized = sanitize_output(&output);
                sink.tool(&sanitized);
                track_rg_result(tc, &sanitized, state);
                msgs.push(Message::tool_result(&tc.id, sanitized));
            }
            Err(tool_error) => {
                tracing::debug!(tool = %tc.tool_name, error = %tool_error, "tool failed");
                sink.tool(&format!("{} failed: {tool_error}", tc.tool_name));
                msgs.push(Message::tool_result(&tc.id, tool_error));
            }
        }
    }
    StepOutcome::Continue
}

/// Decide whether a respond_text call may terminate the turn, returning
/// the final text or the rejection to feed back.
fn respond_text_gate(
    tc: &ToolCall,
    state: &LoopState,
    mutation_request: bool,
    skill_request: bool,
) -> std::result::Result<String, String> {
    let text = serde_json::from_str::<Value>(&tc.arguments)
        .ok()
        .and_then(|v| v.get("text").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(
            "respond_text rejected: provide the final answer in the 'text' argument".into(),
        );
    }
    if skill_request && !state.paths.iter().any(|p| p.ends_with("SKILL.md")) {
        return Err(
            "respond_text rejected: this request asks for a skill; write the \
             SKILL.md file before finishing"
                .into(),
        );
    }
    if mutation_request && state.mut_exec == 0 {
        return Err(
            "respond_text rejected: this request requires changing files, but no \
             mutating tool has run; make the change first"
                .into(),
        );
    }
    Ok(text)
}

fn track_rg_result(tc: &ToolCall, sanitized: &str, state: &mut LoopState) {
    if tc.tool_name != "bash" {
        return;
    }
    let command = serde_json::from_str::<Value>(&tc.arguments)
        .ok()
        .and_then(|v| {
            v.get("command")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();
    if !is_ripgrep_command(&command) {
        return;
    }
    if sanitized.is_empty() || sanitized == "[exit 1]" {
        state.rg_empty += 1;
    } else {
        state.rg_empty = 0;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use std::collections::VecDeque;

    /// Scripted model: pops one response per call and records the
    /// transcript it was shown.
    struct ScriptedClient {
        responses: Mutex<VecDeque<ChatResponse>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn transcript(&self, call: usize) -> Vec<Message> {
            self.seen.lock()[call].clone()
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(
            &self,
            _model: &ActiveModel,
            messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<ChatResponse> {
            self.seen.lock().push(messages.to_vec());
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| Error::Other("scripted client exhausted".into()))
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            text: text.into(),
            ..Default::default()
        }
    }

    fn tool_response(calls: Vec<(&str, &str)>) -> ChatResponse {
        ChatResponse {
            tool_calls: calls
                .into_iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCall {
                    id: format!("call_{i}"),
                    tool_name: name.into(),
                    arguments: args.into(),
                })
                .collect(),
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        }
    }

    fn model() -> ActiveModel {
        ActiveModel {
            provider_id: "openrouter".into(),
            model_id: "test-model".into(),
            api_key: Some("k".into()),
            reasoning_effort: None,
        }
    }

    struct Harness {
        _ws: tempfile::TempDir,
        registry: ToolRegistry,
        todo: TodoList,
    }

    impl Harness {
        fn new() -> Self {
            let ws = tempfile::TempDir::new().unwrap();
            let registry = ToolRegistry::builtin(ws.path().to_path_buf());
            Self {
                _ws: ws,
                registry,
                todo: TodoList::new(),
            }
        }

        fn workspace(&self) -> &std::path::Path {
            self._ws.path()
        }

        async fn run(&self, client: &ScriptedClient, request: &str) -> Result<TurnResult> {
            let m = model();
            let cancel = CancelState::new();
            run_turn(
                client,
                &self.registry,
                &NullSink,
                &cancel,
                TurnInput {
                    model: &m,
                    system_prompt: None,
                    user_request: request,
                    prior_messages: &[],
                    todo: &self.todo,
                },
            )
            .await
        }
    }

    #[tokio::test]
    async fn happy_path_text_answer_via_respond_text() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![tool_response(vec![(
            "respond_text",
            r#"{"text":"4"}"#,
        )])]);

        let result = h.run(&client, "What is 2+2?").await.unwrap();
        assert_eq!(result.response, "4");
        assert_eq!(result.tool_calls, 1);
        assert_eq!(result.error_count, 0);
        assert!(result.files_touched.is_empty());
    }

    #[tokio::test]
    async fn mutation_request_enforces_mutating_tool_first() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![
            tool_response(vec![("respond_text", r#"{"text":"Done"}"#)]),
            tool_response(vec![(
                "write_file",
                r#"{"path":"hello.txt","content":"hi\n"}"#,
            )]),
            tool_response(vec![(
                "respond_text",
                r#"{"text":"Created hello.txt."}"#,
            )]),
        ]);

        let result = h
            .run(&client, "Create a file hello.txt containing `hi`")
            .await
            .unwrap();
        assert_eq!(result.response, "Created hello.txt.");
        assert_eq!(result.tool_calls, 3);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.files_touched, vec!["hello.txt"]);

        // The premature respond_text came back as a rejection.
        let second_call = client.transcript(1);
        let rejection = second_call
            .iter()
            .find(|m| m.content.contains("respond_text rejected"))
            .expect("rejection tool-result present");
        assert!(rejection.content.contains("no mutating tool has run"));

        // And the file really exists.
        assert_eq!(
            std::fs::read_to_string(h.workspace().join("hello.txt")).unwrap(),
            "hi\n"
        );
    }

    #[tokio::test]
    async fn repeated_bash_calls_become_a_stuck_loop() {
        let h = Harness::new();
        let ls = ("bash", r#"{"command":"ls"}"#);
        let client = ScriptedClient::new(vec![
            tool_response(vec![ls]),
            tool_response(vec![ls]),
            tool_response(vec![ls]),
        ]);

        let result = h.run(&client, "List files").await.unwrap();
        assert!(result.response.contains("repeating the same tool call"));
        assert_eq!(result.error_count, 1);
        assert_eq!(result.tool_calls, 3);
        // Two rejections were enough; a fourth model call never happened.
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn other_tools_get_three_repeats_before_rejection() {
        let h = Harness::new();
        std::fs::write(h.workspace().join("a.txt"), "data").unwrap();
        let read = (
            "read_file",
            r#"{"path":"a.txt","offset":null,"limit":null}"#,
        );
        let client = ScriptedClient::new(vec![
            tool_response(vec![read]),
            tool_response(vec![read]),
            tool_response(vec![read]),
            tool_response(vec![read]),
            text_response("done reading"),
        ]);

        let result = h.run(&client, "What does a.txt say?").await.unwrap();
        assert_eq!(result.response, "done reading");
        // The fourth identical call was rejected, not executed.
        let fifth_transcript = client.transcript(4);
        assert!(fifth_transcript
            .iter()
            .any(|m| m.content.contains("repeated identical tool call rejected")));
    }

    #[tokio::test]
    async fn plain_text_response_is_final() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![text_response("All done here.")]);
        let result = h.run(&client, "Say something").await.unwrap();
        assert_eq!(result.response, "All done here.");
        assert_eq!(result.tool_calls, 0);
    }

    #[tokio::test]
    async fn empty_responses_exhaust_into_protocol_violation() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![
            text_response(""),
            text_response(""),
            text_response(""),
        ]);

        let result = h.run(&client, "Do something").await.unwrap();
        assert_eq!(result.error_count, 1);
        assert!(result.response.contains("tool-interface contract"));
        assert_eq!(client.calls(), 3);

        // Each retry appended the corrective user message.
        let third = client.transcript(2);
        let correctives = third
            .iter()
            .filter(|m| m.content.contains("must use the tool interface"))
            .count();
        assert_eq!(correctives, 2);
    }

    #[tokio::test]
    async fn step_limit_pauses_the_task() {
        let h = Harness::new();
        // 25 distinct bash calls, then the loop must stop on its own.
        let responses: Vec<ChatResponse> = (0..MAX_ITERATIONS)
            .map(|i| {
                tool_response(vec![(
                    "bash",
                    Box::leak(format!(r#"{{"command":"echo {i}"}}"#).into_boxed_str()) as &str,
                )])
            })
            .collect();
        let client = ScriptedClient::new(responses);

        let result = h.run(&client, "Keep going").await.unwrap();
        assert_eq!(result.response, STEP_LIMIT_RESPONSE);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.tool_calls, MAX_ITERATIONS as u32);
        assert_eq!(client.calls(), MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn pre_cancelled_turn_short_circuits() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![text_response("never seen")]);
        let m = model();
        let cancel = CancelState::new();
        cancel.activate();

        let result = run_turn(
            &client,
            &h.registry,
            &NullSink,
            &cancel,
            TurnInput {
                model: &m,
                system_prompt: None,
                user_request: "anything",
                prior_messages: &[],
                todo: &h.todo,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.response, CANCELLED_RESPONSE);
        assert_eq!(result.error_count, 0);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![]);
        let err = h.run(&client, "   ").await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn empty_search_streak_triggers_advice() {
        let h = Harness::new();
        // Two rg commands over an empty workspace: both exit 1 silently.
        // (stderr is suppressed so the behavior is identical whether or
        // not ripgrep is installed on the test host.)
        let client = ScriptedClient::new(vec![
            tool_response(vec![(
                "bash",
                r#"{"command":"rg needle_one 2>/dev/null || exit 1"}"#,
            )]),
            tool_response(vec![(
                "bash",
                r#"{"command":"rg needle_two 2>/dev/null || exit 1"}"#,
            )]),
            text_response("giving a summary instead"),
        ]);

        let result = h.run(&client, "Find the needle").await.unwrap();
        assert_eq!(result.response, "giving a summary instead");

        let third = client.transcript(2);
        assert!(third
            .iter()
            .any(|m| m.content.contains("different strategy")));
    }

    #[tokio::test]
    async fn skill_request_requires_skill_file_before_finishing() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![
            tool_response(vec![("respond_text", r#"{"text":"skill created"}"#)]),
            tool_response(vec![(
                "write_file",
                r##"{"path":"skills/dates/SKILL.md","content":"# dates\n"}"##,
            )]),
            tool_response(vec![("respond_text", r#"{"text":"skill created"}"#)]),
        ]);

        let result = h
            .run(&client, "create a skill for formatting dates")
            .await
            .unwrap();
        assert_eq!(result.response, "skill created");
        assert_eq!(result.files_touched, vec!["skills/dates/SKILL.md"]);

        let second = client.transcript(1);
        assert!(second
            .iter()
            .any(|m| m.content.contains("SKILL.md")));
    }

    #[tokio::test]
    async fn tool_errors_feed_back_without_aborting() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![
            tool_response(vec![(
                "read_file",
                r#"{"path":"missing.txt","offset":null,"limit":null}"#,
            )]),
            text_response("the file does not exist"),
        ]);

        let result = h.run(&client, "What does missing.txt say?").await.unwrap();
        assert_eq!(result.response, "the file does not exist");
        assert_eq!(result.error_count, 0);

        let second = client.transcript(1);
        assert!(second
            .iter()
            .any(|m| m.content.contains("failed to read")));
    }

    #[tokio::test]
    async fn provider_errors_abort_the_turn() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![]);
        let err = h.run(&client, "hello").await.unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[tokio::test]
    async fn transcript_shape_is_preserved() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![
            tool_response(vec![("bash", r#"{"command":"echo hi"}"#)]),
            text_response("done"),
        ]);
        h.run(&client, "Run echo").await.unwrap();

        let second = client.transcript(1);
        use za_domain::message::Role;
        let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool]
        );
        assert!(!second[2].tool_calls.is_empty());
        assert_eq!(second[3].tool_call_id.as_deref(), Some("call_0"));
    }

    #[tokio::test]
    async fn system_prompt_override_replaces_default() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![text_response("ok")]);
        let m = model();
        let cancel = CancelState::new();
        run_turn(
            &client,
            &h.registry,
            &NullSink,
            &cancel,
            TurnInput {
                model: &m,
                system_prompt: Some("You are a pirate."),
                user_request: "hello",
                prior_messages: &[],
                todo: &h.todo,
            },
        )
        .await
        .unwrap();

        let first = client.transcript(0);
        assert_eq!(first[0].content, "You are a pirate.");
        assert!(!first[0].content.contains("respond_text"));
    }

    #[tokio::test]
    async fn context_preamble_merges_into_system_slot() {
        let h = Harness::new();
        let client = ScriptedClient::new(vec![text_response("ok")]);
        let m = model();
        let cancel = CancelState::new();
        let prior = vec![
            Message::system("Earlier conversation summary:\n- built the parser"),
            Message::user("old question"),
            Message::assistant("old answer"),
        ];
        run_turn(
            &client,
            &h.registry,
            &NullSink,
            &cancel,
            TurnInput {
                model: &m,
                system_prompt: None,
                user_request: "new question",
                prior_messages: &prior,
                todo: &h.todo,
            },
        )
        .await
        .unwrap();

        let first = client.transcript(0);
        use za_domain::message::Role;
        // Exactly one system message, carrying both prompt and preamble.
        assert_eq!(
            first.iter().filter(|m| m.role == Role::System).count(),
            1
        );
        assert!(first[0].content.contains("built the parser"));
        assert_eq!(first[1].content, "old question");
        assert_eq!(first.last().unwrap().content, "new question");
    }
}
