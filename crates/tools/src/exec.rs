//! Shell execution via `sh -c`, rooted in the workspace.
//!
//! Stdout and stderr are merged in that order; a non-zero exit appends
//! an `[exit N]` marker. A failing command is still a successful tool
//! result — the model decides what to do with the exit marker.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

#[derive(Debug, Clone, Deserialize)]
pub struct BashRequest {
    pub command: String,
}

/// Run a shell command and return its merged output.
pub async fn bash(workspace_root: &Path, req: BashRequest) -> Result<String, String> {
    tracing::debug!(command = %req.command, "bash tool");

    let output = Command::new("sh")
        .arg("-c")
        .arg(&req.command)
        .current_dir(workspace_root)
        .output()
        .await
        .map_err(|e| format!("failed to spawn shell: {e}"))?;

    let mut merged = String::new();
    merged.push_str(&String::from_utf8_lossy(&output.stdout));
    merged.push_str(&String::from_utf8_lossy(&output.stderr));

    match output.status.code() {
        Some(0) => Ok(merged),
        Some(code) => {
            if merged.is_empty() {
                Ok(format!("[exit {code}]"))
            } else {
                if !merged.ends_with('\n') {
                    merged.push('\n');
                }
                merged.push_str(&format!("[exit {code}]"));
                Ok(merged)
            }
        }
        None => Ok(format!("{merged}\n[killed by signal]")),
    }
}

/// True when a bash command invokes ripgrep (`rg` exactly, or an `rg `
/// prefix). Used by the loop's empty-search streak detection.
pub fn is_ripgrep_command(command: &str) -> bool {
    command == "rg" || command.starts_with("rg ")
}
