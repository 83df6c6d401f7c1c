//! The terminal variant: a line-oriented REPL over the same engine.
//!
//! Starts a fresh conversation in the current directory; setting
//! `ZAGENT_RESTORE_CONTEXT` restores the previous session for this
//! project instead.

use rustyline::error::ReadlineError;

use za_domain::jsonutil::excerpt;
use za_engine::guard::DEFAULT_RETRY_BUDGET;
use za_engine::{run_turn_guarded, TodoList, TurnInput, TurnSink};
use za_tools::ToolRegistry;

use crate::state::AppState;

struct PrintSink;

impl TurnSink for PrintSink {
    fn status(&self, content: &str) {
        eprintln!("· {content}");
    }

    fn thinking(&self, content: &str) {
        eprintln!("· thinking: {}", excerpt(content, 200));
    }

    fn tool(&self, content: &str) {
        let first_line = content.lines().next().unwrap_or("");
        eprintln!("  › {}", excerpt(first_line, 200));
    }

    fn event(&self, content: &str) {
        eprintln!("· {content}");
    }
}

pub async fn run_repl(state: AppState) -> anyhow::Result<()> {
    let restore = std::env::var_os("ZAGENT_RESTORE_CONTEXT").is_some();
    let cwd = std::env::current_dir()?;

    let mut ctx = state.store.open_project(&cwd)?;
    for warning in &ctx.warnings {
        eprintln!("context recovery: {warning}");
    }
    if restore {
        if !ctx.window.turns.is_empty() {
            eprintln!(
                "restored session \"{}\" ({} turns)",
                ctx.window.title.as_deref().unwrap_or("untitled"),
                ctx.window.turns.len()
            );
        }
    } else {
        // The log on disk is untouched; only this conversation starts
        // clean.
        ctx.window.turns.clear();
        ctx.window.summary = None;
    }

    let registry = ToolRegistry::builtin(cwd);
    let todo = TodoList::new();

    // Ctrl-C during a turn escalates: cancel, then exit, then force.
    {
        let cancel = state.cancel.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                let level = cancel.activate();
                if level >= za_engine::cancel::LEVEL_FORCE {
                    std::process::exit(130);
                }
            }
        });
    }

    let mut rl = rustyline::DefaultEditor::new()?;
    loop {
        if state.cancel.exit_requested() {
            break;
        }

        let line = tokio::task::block_in_place(|| rl.readline("zagent> "));
        match line {
            Ok(line) => {
                let request = line.trim().to_string();
                if request.is_empty() {
                    continue;
                }
                if request == "exit" || request == "quit" {
                    break;
                }
                let _ = rl.add_history_entry(&request);
                run_one(&state, &mut ctx, &registry, &todo, &request).await;
                state.cancel.reset();
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("input error: {e}");
                break;
            }
        }
    }

    Ok(())
}

async fn run_one(
    state: &AppState,
    ctx: &mut za_context::ProjectContext,
    registry: &ToolRegistry,
    todo: &TodoList,
    request: &str,
) {
    let model = match state.resolve_active_model() {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {e}");
            return;
        }
    };

    let _run_permit = state.run_lock.lock().await;

    if let Err(e) = ctx.append_user_turn(request) {
        eprintln!("error: failed to persist turn: {e}");
        return;
    }

    let assembled = za_context::assemble::assemble(&ctx.window, &Default::default());
    let mut prior = Vec::with_capacity(assembled.history.len() + 1);
    if let Some(preamble) = &assembled.preamble {
        prior.push(za_domain::Message::system(preamble.clone()));
    }
    let history_len = assembled.history.len().saturating_sub(1);
    prior.extend(assembled.history.into_iter().take(history_len));

    let result = run_turn_guarded(
        state.client.as_ref(),
        registry,
        &PrintSink,
        &state.cancel,
        TurnInput {
            model: &model,
            system_prompt: None,
            user_request: request,
            prior_messages: &prior,
            todo,
        },
        DEFAULT_RETRY_BUDGET,
    )
    .await;

    match result {
        Ok(turn) => {
            if let Err(e) = ctx.append_assistant_turn(
                &turn.response,
                turn.reasoning.as_deref(),
                turn.tool_calls,
                turn.error_count,
                &turn.files_touched,
            ) {
                tracing::warn!(error = %e, "assistant turn persist failed");
            }
            if let Err(e) = ctx.persist() {
                tracing::warn!(error = %e, "snapshot persist failed");
            }

            println!("{}", turn.response);
            if !turn.files_touched.is_empty() {
                eprintln!("files touched: {}", turn.files_touched.join(", "));
            }
        }
        Err(e) => {
            let detail = state.client.last_error().unwrap_or_else(|| e.to_string());
            eprintln!("error: {detail}");
        }
    }
}
