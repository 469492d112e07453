use sea_orm::DbErr;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error taxonomy shared by all core services.
///
/// Each service method fails with exactly one of these kinds; the
/// presentation layer maps them onto transport statuses without
/// re-deriving anything.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or out-of-range input, detected before any persistence.
    #[error("validation failed on '{field}': {message}")]
    Validation { field: String, message: String },

    /// Well-formed input blocked by a state invariant.
    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Caller lacks the role or ownership required for the action.
    #[error("{0}")]
    Forbidden(String),

    /// A collaborator call (object storage, etc.) failed; persisted
    /// state is left untouched.
    #[error("external service failure: {0}")]
    ExternalService(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl ServiceError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.to_owned(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, id: i64) -> Self {
        ServiceError::NotFound(format!("{entity} {id}"))
    }
}

/// Remap a storage-level uniqueness violation to the conflict it
/// enforces. The unique indexes are the race-safe mechanism; the
/// application-level pre-checks merely produce friendlier errors first.
pub fn on_unique_violation(err: DbErr, conflict: &str) -> ServiceError {
    let text = err.to_string();
    if text.contains("UNIQUE constraint") || text.contains("Duplicate entry") {
        ServiceError::Conflict(conflict.to_owned())
    } else {
        ServiceError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violations_become_conflicts() {
        let err = DbErr::Custom("UNIQUE constraint failed: enrollments.student_id".into());
        match on_unique_violation(err, "already enrolled") {
            ServiceError::Conflict(msg) => assert_eq!(msg, "already enrolled"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn other_db_errors_pass_through() {
        let err = DbErr::Custom("disk I/O error".into());
        assert!(matches!(
            on_unique_violation(err, "x"),
            ServiceError::Database(_)
        ));
    }
}
