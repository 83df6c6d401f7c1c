//! Request classification.
//!
//! Pure, case-insensitive substring checks over the raw user request.
//! The keyword tables live here so the behavior is explicit and the
//! tests below are the contract; resist the urge to make these smarter.

const CHANGE_VERBS: &[&str] = &[
    "create", "write", "add", "make", "edit", "modify", "update", "fix", "implement", "delete",
    "remove", "rename", "refactor", "change", "append", "patch", "build",
];

const SKILL_VERBS: &[&str] = &["create", "make", "build", "write"];

/// A request that asks for file changes: a change verb together with a
/// path-like token or an explicit file reference.
pub fn is_mutation_request(request: &str) -> bool {
    let lower = request.to_lowercase();
    let has_verb = CHANGE_VERBS.iter().any(|v| lower.contains(v));
    if !has_verb {
        return false;
    }
    has_path_like_token(&lower) || lower.contains("file")
}

/// A request to author a skill: "skill" plus a creation verb, or the
/// literal skill-file markers.
pub fn is_skill_creation_request(request: &str) -> bool {
    let lower = request.to_lowercase();
    if lower.contains("skill.md") || lower.contains("/skills/") {
        return true;
    }
    lower.contains("skill") && SKILL_VERBS.iter().any(|v| lower.contains(v))
}

/// Implementation intent drives the completion guard: the user expects
/// work evidence, not prose.
pub fn is_implementation_intent(request: &str) -> bool {
    is_mutation_request(request) || is_skill_creation_request(request)
}

fn has_path_like_token(lower: &str) -> bool {
    lower.split_whitespace().any(|token| {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '/' && c != '.');
        if token.contains('/') {
            return true;
        }
        // name.ext with a short alphanumeric extension
        match token.rsplit_once('.') {
            Some((stem, ext)) => {
                !stem.is_empty()
                    && (1..=6).contains(&ext.len())
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            }
            None => false,
        }
    })
}
