//! File tools constrained to a workspace root.
//!
//! Paths containing `..`, absolute paths, and anything resolving outside
//! the workspace are rejected before any I/O happens. Writes are atomic
//! (unique temp sibling, sync, rename).

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileRequest {
    pub path: String,
    /// Line number to start from (0-indexed).
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceInFileRequest {
    pub path: String,
    pub old_text: String,
    pub new_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDirRequest {
    #[serde(default = "default_dot")]
    pub path: String,
}

fn default_dot() -> String {
    ".".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within the workspace root.
pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the workspace root (got '{requested}')"
        ));
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    let canonical_root = workspace_root.canonicalize().map_err(|e| {
        format!(
            "cannot resolve workspace root '{}': {e}",
            workspace_root.display()
        )
    })?;

    let candidate = canonical_root.join(requested_path);

    // Canonicalize what exists; append the not-yet-created tail.
    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name);
                    existing = parent;
                }
                _ => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!(
            "path '{}' resolves outside workspace root '{}'",
            requested,
            canonical_root.display()
        ));
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read a file with optional line offset and limit.
pub async fn read_file(workspace_root: &Path, req: ReadFileRequest) -> Result<String, String> {
    let path = validate_path(workspace_root, &req.path)?;

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read '{}': {e}", req.path))?;

    match (req.offset, req.limit) {
        (None, None) => Ok(content),
        (offset, limit) => {
            let offset = offset.unwrap_or(0);
            let selected: Vec<&str> = content
                .lines()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            Ok(selected.join("\n"))
        }
    }
}

/// Write or create a file atomically.
pub async fn write_file(workspace_root: &Path, req: WriteFileRequest) -> Result<String, String> {
    let path = validate_path(workspace_root, &req.path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| format!("failed to create temp file: {e}"))?;
    file.write_all(req.content.as_bytes())
        .await
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    file.flush()
        .await
        .map_err(|e| format!("failed to flush temp file: {e}"))?;
    file.sync_data()
        .await
        .map_err(|e| format!("failed to sync temp file: {e}"))?;

    fs::rename(&tmp_path, &path).await.map_err(|e| {
        let tmp = tmp_path.clone();
        tokio::spawn(async move {
            let _ = fs::remove_file(&tmp).await;
        });
        format!("failed to rename temp file into place: {e}")
    })?;

    Ok(format!("wrote {} bytes to {}", req.content.len(), req.path))
}

/// Exact-match replacement. The needle must occur exactly once.
pub async fn replace_in_file(
    workspace_root: &Path,
    req: ReplaceInFileRequest,
) -> Result<String, String> {
    let path = validate_path(workspace_root, &req.path)?;

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read '{}': {e}", req.path))?;

    let occurrences = content.matches(&req.old_text).count();
    match occurrences {
        0 => Err(format!(
            "old_text not found in '{}'; re-read the file and use an exact match",
            req.path
        )),
        1 => {
            let updated = content.replacen(&req.old_text, &req.new_text, 1);
            write_file(
                workspace_root,
                WriteFileRequest {
                    path: req.path.clone(),
                    content: updated,
                },
            )
            .await?;
            Ok(format!("replaced 1 occurrence in {}", req.path))
        }
        n => Err(format!(
            "old_text occurs {n} times in '{}'; include more surrounding context to make it unique",
            req.path
        )),
    }
}

/// List a directory, directories first, names sorted.
pub async fn list_dir(workspace_root: &Path, req: ListDirRequest) -> Result<String, String> {
    let path = validate_path(workspace_root, &req.path)?;

    let mut read_dir = fs::read_dir(&path)
        .await
        .map_err(|e| format!("failed to read directory '{}': {e}", req.path))?;

    let mut dirs: Vec<String> = Vec::new();
    let mut files: Vec<String> = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| format!("failed to read directory entry: {e}"))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(format!("{name}/"));
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();
    dirs.extend(files);
    Ok(dirs.join("\n"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ws() -> TempDir {
        TempDir::new().expect("temp workspace")
    }

    #[test]
    fn rejects_parent_traversal_and_absolute() {
        let ws = ws();
        assert!(validate_path(ws.path(), "../etc/passwd").is_err());
        assert!(validate_path(ws.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn accepts_nested_new_paths() {
        let ws = ws();
        let resolved = validate_path(ws.path(), "sub/dir/new.txt").unwrap();
        assert!(resolved.ends_with("sub/dir/new.txt"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let ws = ws();
        write_file(
            ws.path(),
            WriteFileRequest {
                path: "hello.txt".into(),
                content: "hi\n".into(),
            },
        )
        .await
        .unwrap();

        let content = read_file(
            ws.path(),
            ReadFileRequest {
                path: "hello.txt".into(),
                offset: None,
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(content, "hi\n");
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let ws = ws();
        write_file(
            ws.path(),
            WriteFileRequest {
                path: "lines.txt".into(),
                content: "l0\nl1\nl2\nl3\n".into(),
            },
        )
        .await
        .unwrap();

        let content = read_file(
            ws.path(),
            ReadFileRequest {
                path: "lines.txt".into(),
                offset: Some(1),
                limit: Some(2),
            },
        )
        .await
        .unwrap();
        assert_eq!(content, "l1\nl2");
    }

    #[tokio::test]
    async fn replace_requires_unique_match() {
        let ws = ws();
        write_file(
            ws.path(),
            WriteFileRequest {
                path: "code.rs".into(),
                content: "let x = 1;\nlet y = 1;\n".into(),
            },
        )
        .await
        .unwrap();

        // Ambiguous needle.
        let err = replace_in_file(
            ws.path(),
            ReplaceInFileRequest {
                path: "code.rs".into(),
                old_text: "= 1;".into(),
                new_text: "= 2;".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("2 times"));

        // Missing needle.
        let err = replace_in_file(
            ws.path(),
            ReplaceInFileRequest {
                path: "code.rs".into(),
                old_text: "let z".into(),
                new_text: "let w".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("not found"));

        // Unique needle succeeds.
        replace_in_file(
            ws.path(),
            ReplaceInFileRequest {
                path: "code.rs".into(),
                old_text: "let x = 1;".into(),
                new_text: "let x = 2;".into(),
            },
        )
        .await
        .unwrap();
        let content = read_file(
            ws.path(),
            ReadFileRequest {
                path: "code.rs".into(),
                offset: None,
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(content, "let x = 2;\nlet y = 1;\n");
    }

    #[tokio::test]
    async fn list_dir_orders_dirs_first() {
        let ws = ws();
        std::fs::write(ws.path().join("b.txt"), "").unwrap();
        std::fs::write(ws.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(ws.path().join("zdir")).unwrap();

        let listing = list_dir(
            ws.path(),
            ListDirRequest { path: ".".into() },
        )
        .await
        .unwrap();
        assert_eq!(listing, "zdir/\na.txt\nb.txt");
    }
}
