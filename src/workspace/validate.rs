//! Argument validation for values that end up on a `git` command line.
//!
//! Repository identifiers and revisions come from task files, so they are
//! checked before anything is cloned or checked out.

use std::path::{Component, Path};

use crate::error::ProvisionError;

const MAX_REVISION_LEN: usize = 256;

/// Validates an `owner/name` repository identifier.
pub fn validate_repo_name(repo: &str) -> Result<(), ProvisionError> {
    let invalid = |reason: &str| ProvisionError::InvalidRepository {
        repo: repo.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = repo.split('/').collect();
    if parts.len() != 2 {
        return Err(invalid("expected 'owner/name'"));
    }

    for part in parts {
        if part.is_empty() {
            return Err(invalid("owner and name must be non-empty"));
        }
        if part.starts_with('.') || part.starts_with('-') {
            return Err(invalid("components must not start with '.' or '-'"));
        }
        if !part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid("only alphanumerics, '-', '_' and '.' are allowed"));
        }
    }

    Ok(())
}

/// Validates a commit hash, branch or tag before passing it to git.
pub fn validate_revision(revision: &str) -> Result<(), ProvisionError> {
    let invalid = |reason: &str| ProvisionError::InvalidRevision {
        revision: revision.to_string(),
        reason: reason.to_string(),
    };

    if revision.is_empty() {
        return Err(invalid("empty revision"));
    }
    if revision.len() > MAX_REVISION_LEN {
        return Err(invalid("revision too long"));
    }
    // A leading dash would be parsed as an option.
    if revision.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if revision.contains("..") {
        return Err(invalid("ranges are not allowed"));
    }
    if !revision
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '~' | '^'))
    {
        return Err(invalid("unexpected character"));
    }

    Ok(())
}

/// True when `path` is relative and stays below the directory it is joined to.
pub fn is_contained_path(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_names() {
        assert!(validate_repo_name("psf/requests").is_ok());
        assert!(validate_repo_name("scikit-learn/scikit-learn").is_ok());
        assert!(validate_repo_name("owner/repo.py").is_ok());

        for bad in ["requests", "a/b/c", "/repo", "owner/", "-x/repo", "owner/.git", "own er/repo", "a/b;rm"] {
            assert!(
                matches!(validate_repo_name(bad), Err(ProvisionError::InvalidRepository { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_revisions() {
        assert!(validate_revision("HEAD").is_ok());
        assert!(validate_revision("e6c9ff0d2b1c4e5f").is_ok());
        assert!(validate_revision("release/1.2").is_ok());
        assert!(validate_revision("HEAD~1").is_ok());

        for bad in ["", "--upload-pack=x", "main..dev", "a b", "$(id)"] {
            assert!(
                matches!(validate_revision(bad), Err(ProvisionError::InvalidRevision { .. })),
                "{bad} should be rejected"
            );
        }
        assert!(validate_revision(&"a".repeat(300)).is_err());
    }

    #[test]
    fn test_contained_paths() {
        assert!(is_contained_path("src/core/math.py"));
        assert!(is_contained_path("./README.md"));
        assert!(!is_contained_path("../escape.py"));
        assert!(!is_contained_path("src/../../escape.py"));
        assert!(!is_contained_path("/etc/passwd"));
        assert!(!is_contained_path(""));
    }
}
