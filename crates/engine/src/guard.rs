//! The completion guard.
//!
//! A turn on an implementation-intent request must end with work
//! evidence or an explicit blocker. Anything else is insufficient
//! progress: the guard reprompts with corrective guidance up to a small
//! budget, then surfaces a reliability failure instead of a polite
//! non-answer.

use za_domain::message::Message;
use za_domain::Result;
use za_tools::ToolRegistry;

use crate::cancel::CancelState;
use crate::classify;
use crate::sink::TurnSink;
use crate::turn::{run_turn, ModelClient, TurnInput, TurnResult};

/// Default corrective-retry budget.
pub const DEFAULT_RETRY_BUDGET: u32 = 2;

/// Phrases that mark a response as an explicit blocker. Checked
/// case-insensitively against the final response text.
const BLOCKER_PHRASES: &[&str] = &[
    "cannot",
    "can't",
    "unable to",
    "blocked",
    "not possible",
    "permission denied",
    "does not exist",
    "need more information",
    "missing",
    "no access",
];

/// Guard classification of a finished turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    CompletedWithWork,
    CompletedWithBlocker,
    InsufficientProgress,
}

fn has_blocker_phrase(response: &str) -> bool {
    let lower = response.to_lowercase();
    BLOCKER_PHRASES.iter().any(|p| lower.contains(p))
}

/// Classify a turn from its evidence: touched files, response presence,
/// blocker phrasing, and error state.
///
/// Only implementation-intent requests demand work evidence; a plain
/// question answered in prose is complete as-is.
pub fn classify_outcome(result: &TurnResult, implementation_intent: bool) -> TurnOutcome {
    if result.response.trim().is_empty() {
        return TurnOutcome::InsufficientProgress;
    }
    if !result.files_touched.is_empty() {
        return TurnOutcome::CompletedWithWork;
    }
    if has_blocker_phrase(&result.response) {
        return TurnOutcome::CompletedWithBlocker;
    }
    if result.error_count > 0 || implementation_intent {
        return TurnOutcome::InsufficientProgress;
    }
    TurnOutcome::CompletedWithWork
}

/// Run a turn under the completion contract.
///
/// Non-implementation requests pass through untouched. For
/// implementation-intent requests, insufficient progress triggers a
/// corrective reprompt (the prior attempt stays in context) up to
/// `retry_budget` times; exhaustion returns an explicit reliability
/// failure. Work counters accumulate across attempts.
pub async fn run_turn_guarded(
    client: &dyn ModelClient,
    registry: &ToolRegistry,
    sink: &dyn TurnSink,
    cancel: &CancelState,
    input: TurnInput<'_>,
    retry_budget: u32,
) -> Result<TurnResult> {
    let implementation_intent = classify::is_implementation_intent(input.user_request);
    let model = input.model;
    let system_prompt = input.system_prompt;
    let user_request = input.user_request;
    let todo = input.todo;

    let mut result = run_turn(client, registry, sink, cancel, input).await?;
    if !implementation_intent {
        return Ok(result);
    }

    let mut prior: Vec<Message> = Vec::new();
    let mut attempts = 0;
    while classify_outcome(&result, true) == TurnOutcome::InsufficientProgress
        && attempts < retry_budget
        && !cancel.is_cancelled()
    {
        attempts += 1;
        tracing::info!(attempts, "completion guard reprompting for work evidence");
        sink.status("No work evidence yet; retrying with corrective guidance");

        if prior.is_empty() {
            prior.push(Message::user(user_request));
        }
        prior.push(Message::assistant(result.response.clone()));

        let corrective = format!(
            "Your previous reply finished without verifiable work. The request was: \
             \"{user_request}\". Either make the required file changes with the mutating \
             tools now, or state the concrete blocker that prevents it."
        );

        let retry = run_turn(
            client,
            registry,
            sink,
            cancel,
            TurnInput {
                model,
                system_prompt,
                user_request: &corrective,
                prior_messages: &prior,
                todo,
            },
        )
        .await?;

        // Accumulate work counters across attempts.
        let mut merged = retry;
        merged.tool_calls += result.tool_calls;
        merged.error_count += result.error_count;
        for path in &result.files_touched {
            if !merged.files_touched.contains(path) {
                merged.files_touched.push(path.clone());
            }
        }
        if merged.reasoning.is_none() {
            merged.reasoning = result.reasoning.clone();
        }
        result = merged;
    }

    if classify_outcome(&result, true) == TurnOutcome::InsufficientProgress && !cancel.is_cancelled() {
        result.error_count = result.error_count.max(1);
        result.response = format!(
            "Reliability failure: the request called for concrete changes, but {} attempt(s) \
             produced no file modifications and no explicit blocker. Last model response: {}",
            attempts + 1,
            result.response
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use crate::turn::TodoList;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use za_domain::message::{ChatResponse, ToolCall, ToolDefinition};
    use za_providers::ActiveModel;

    struct ScriptedClient {
        responses: Mutex<VecDeque<ChatResponse>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(
            &self,
            _model: &ActiveModel,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> za_domain::Result<ChatResponse> {
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| za_domain::Error::Other("scripted client exhausted".into()))
        }
    }

    fn scripted(responses: Vec<ChatResponse>) -> ScriptedClient {
        ScriptedClient {
            responses: Mutex::new(responses.into()),
        }
    }

    fn text(t: &str) -> ChatResponse {
        ChatResponse {
            text: t.into(),
            ..Default::default()
        }
    }

    fn tool_call(name: &str, args: &str) -> ChatResponse {
        ChatResponse {
            tool_calls: vec![ToolCall {
                id: "call_0".into(),
                tool_name: name.into(),
                arguments: args.into(),
            }],
            ..Default::default()
        }
    }

    fn model() -> ActiveModel {
        ActiveModel {
            provider_id: "openrouter".into(),
            model_id: "test".into(),
            api_key: Some("k".into()),
            reasoning_effort: None,
        }
    }

    async fn run_guarded(
        ws: &tempfile::TempDir,
        client: &ScriptedClient,
        request: &str,
    ) -> TurnResult {
        let registry = ToolRegistry::builtin(ws.path().to_path_buf());
        let todo = TodoList::new();
        let m = model();
        let cancel = CancelState::new();
        run_turn_guarded(
            client,
            &registry,
            &NullSink,
            &cancel,
            TurnInput {
                model: &m,
                system_prompt: None,
                user_request: request,
                prior_messages: &[],
                todo: &todo,
            },
            DEFAULT_RETRY_BUDGET,
        )
        .await
        .unwrap()
    }

    #[test]
    fn outcome_classification() {
        let work = TurnResult {
            response: "done".into(),
            files_touched: vec!["a.txt".into()],
            ..Default::default()
        };
        assert_eq!(classify_outcome(&work, true), TurnOutcome::CompletedWithWork);

        let blocker = TurnResult {
            response: "Cannot proceed: the config file does not exist".into(),
            ..Default::default()
        };
        assert_eq!(
            classify_outcome(&blocker, true),
            TurnOutcome::CompletedWithBlocker
        );

        // A prose dodge on an implementation request is not completion.
        let dodge = TurnResult {
            response: "I'll get to it".into(),
            ..Default::default()
        };
        assert_eq!(
            classify_outcome(&dodge, true),
            TurnOutcome::InsufficientProgress
        );

        let errored = TurnResult {
            response: "stuck".into(),
            error_count: 1,
            ..Default::default()
        };
        assert_eq!(
            classify_outcome(&errored, false),
            TurnOutcome::InsufficientProgress
        );

        let empty = TurnResult::default();
        assert_eq!(
            classify_outcome(&empty, false),
            TurnOutcome::InsufficientProgress
        );

        // A plain question answered in prose is complete.
        let answer = TurnResult {
            response: "4".into(),
            ..Default::default()
        };
        assert_eq!(classify_outcome(&answer, false), TurnOutcome::CompletedWithWork);
    }

    #[tokio::test]
    async fn non_implementation_requests_pass_through() {
        let ws = tempfile::TempDir::new().unwrap();
        let client = scripted(vec![text("the answer is 4")]);
        let result = run_guarded(&ws, &client, "What is 2+2?").await;
        assert_eq!(result.response, "the answer is 4");
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn guard_reprompts_until_work_appears() {
        let ws = tempfile::TempDir::new().unwrap();
        // Attempt 1 dodges with plain text; the guarded retry does the work.
        let client = scripted(vec![
            text("I'll implement that for you shortly."),
            tool_call("write_file", r#"{"path":"hello.txt","content":"hi\n"}"#),
            tool_call("respond_text", r#"{"text":"Created hello.txt."}"#),
        ]);

        let result = run_guarded(&ws, &client, "Create a file hello.txt containing hi").await;
        assert_eq!(result.response, "Created hello.txt.");
        assert_eq!(result.files_touched, vec!["hello.txt"]);
        assert_eq!(result.error_count, 0);
        assert!(ws.path().join("hello.txt").exists());
    }

    #[tokio::test]
    async fn explicit_blockers_are_accepted_without_retry() {
        let ws = tempfile::TempDir::new().unwrap();
        let client = scripted(vec![text(
            "Cannot create the file: the target directory is read-only.",
        )]);
        let result = run_guarded(&ws, &client, "Create a file hello.txt").await;
        assert!(result.response.contains("read-only"));
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn exhausted_budget_is_a_reliability_failure() {
        let ws = tempfile::TempDir::new().unwrap();
        let client = scripted(vec![
            text("working on it"),
            text("almost there"),
            text("any minute now"),
        ]);
        let result = run_guarded(&ws, &client, "Create a file hello.txt").await;
        assert!(result.response.contains("Reliability failure"));
        assert!(result.error_count >= 1);
        assert!(result.files_touched.is_empty());
    }
}
