//! Project identity.
//!
//! A project is keyed by a stable 64-bit hash of its canonical absolute
//! root path: the first 8 bytes of SHA-256, rendered as 16 lowercase hex
//! digits. Canonicalization resolves symlinks and strips `..`, so two
//! spellings of the same directory share one session.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use za_domain::{Error, Result};

/// Canonicalize a project root. The directory must exist.
pub fn canonical_project_root(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|e| Error::Store(format!("cannot resolve project root '{}': {e}", path.display())))
}

/// Stable 64-bit project id for a canonical path.
pub fn project_id(canonical_root: &Path) -> u64 {
    let digest = Sha256::digest(canonical_root.to_string_lossy().as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is at least 8 bytes"))
}

/// Hex form used for directory names and session ids.
pub fn project_id_hex(canonical_root: &Path) -> String {
    hex::encode(project_id(canonical_root).to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_across_calls() {
        let p = Path::new("/some/project");
        assert_eq!(project_id(p), project_id(p));
        assert_eq!(project_id_hex(p).len(), 16);
    }

    #[test]
    fn different_paths_differ() {
        assert_ne!(
            project_id(Path::new("/some/project")),
            project_id(Path::new("/some/other"))
        );
    }

    #[test]
    fn canonicalization_collapses_spellings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let spelled = dir.path().join("sub").join("..").join("sub");
        let a = canonical_project_root(&spelled).unwrap();
        let b = canonical_project_root(&dir.path().join("sub")).unwrap();
        assert_eq!(a, b);
        assert_eq!(project_id_hex(&a), project_id_hex(&b));
    }

    #[test]
    fn missing_root_is_a_store_error() {
        let err = canonical_project_root(Path::new("/definitely/not/here/xyz")).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
