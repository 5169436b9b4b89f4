use std::collections::HashSet;
use std::path::Path;

use agent_contract::TaskState;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::SessionStoreError;
use crate::schema::{StoredSession, STORE_VERSION};

/// Structural checks a persisted task must pass before it is resumed.
pub(crate) fn validate_session(
    path: &Path,
    expected_key: &str,
    session: &StoredSession,
) -> Result<(), SessionStoreError> {
    if session.version != STORE_VERSION {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: session.version,
        });
    }
    if session.session_key != expected_key {
        return Err(SessionStoreError::SessionKeyMismatch {
            path: path.to_path_buf(),
            expected: expected_key.to_string(),
            found: session.session_key.clone(),
        });
    }

    let task = &session.task;
    validate_rfc3339(path, "saved_at", &session.saved_at)?;
    validate_rfc3339(path, "task.created_at", &task.created_at)?;
    validate_rfc3339(path, "task.updated_at", &task.updated_at)?;

    let mut command_ids = HashSet::new();
    for entry in &task.history {
        if !command_ids.insert(entry.command.id.as_str()) {
            return Err(SessionStoreError::DuplicateCommandId {
                path: path.to_path_buf(),
                id: entry.command.id.clone(),
            });
        }
        if entry.result.command_id != entry.command.id {
            return Err(SessionStoreError::DanglingResult {
                path: path.to_path_buf(),
                result_id: entry.result.id.clone(),
                command_id: entry.result.command_id.clone(),
            });
        }
        validate_rfc3339(path, "result.received_at", &entry.result.received_at)?;
        if let Some(outcome) = &entry.outcome {
            if outcome.result_id != entry.result.id {
                return Err(SessionStoreError::MismatchedOutcome {
                    path: path.to_path_buf(),
                    result_id: entry.result.id.clone(),
                    found: outcome.result_id.clone(),
                });
            }
        }
    }

    if task.state == TaskState::Stopped && task.stopped.is_none() {
        return Err(SessionStoreError::MissingStoppedContext {
            path: path.to_path_buf(),
        });
    }

    let effective = match (&task.state, &task.stopped) {
        (TaskState::Stopped, Some(context)) => context.resume_to,
        (state, _) => *state,
    };
    if matches!(effective, TaskState::AwaitingApproval | TaskState::Executing)
        && task.proposal.is_none()
    {
        return Err(SessionStoreError::MissingProposal {
            path: path.to_path_buf(),
            state: effective.as_str(),
        });
    }

    Ok(())
}

pub(crate) fn validate_rfc3339(
    path: &Path,
    field: &'static str,
    value: &str,
) -> Result<(), SessionStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(SessionStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
