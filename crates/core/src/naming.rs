//! Identifier generation and validation.
//!
//! Task and run identifiers are prefixed UUID v4 hex strings, which makes
//! them collision-free by construction and safe to use as directory names.

use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{ProjectId, RunId, TaskId};

/// Maximum accepted length for any caller-supplied identifier.
const MAX_ID_LEN: usize = 128;

/// Generate a new task identifier, e.g. `task_3f2a...`.
pub fn new_task_id() -> TaskId {
    format!("task_{}", Uuid::new_v4().simple())
}

/// Generate a new run identifier, e.g. `run_9c1e...`.
pub fn new_run_id() -> RunId {
    format!("run_{}", Uuid::new_v4().simple())
}

/// Generate a new project identifier (hyphenated UUID).
pub fn new_project_id() -> ProjectId {
    Uuid::new_v4().to_string()
}

/// Validate an identifier that will be used as a path segment or a
/// de-duplication key.
///
/// Rules:
/// - Must not be empty or exceed `MAX_ID_LEN` characters.
/// - Only ASCII alphanumerics, `-` and `_` are allowed, so the value can
///   never escape the projects root (`/`, `..`).
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() {
        return Err(CoreError::Validation(format!("{kind} must not be empty")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "{kind} must not exceed {MAX_ID_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(format!(
            "{kind} may only contain alphanumeric, hyphen, or underscore characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn task_ids_are_prefixed_and_unique() {
        let ids: HashSet<_> = (0..500).map(|_| new_task_id()).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("task_") && id.len() == 37));
    }

    #[test]
    fn run_ids_are_valid_path_segments() {
        let id = new_run_id();
        assert!(id.starts_with("run_"));
        assert!(validate_identifier("run_id", &id).is_ok());
    }

    #[test]
    fn project_ids_validate() {
        assert!(validate_identifier("project_id", &new_project_id()).is_ok());
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(validate_identifier("project_id", "../etc").is_err());
        assert!(validate_identifier("project_id", "a/b").is_err());
        assert!(validate_identifier("project_id", "").is_err());
    }

    #[test]
    fn rejects_overlong_identifier() {
        let long = "a".repeat(MAX_ID_LEN + 1);
        assert!(validate_identifier("task_id", &long).is_err());
    }
}
