use std::path::PathBuf;

/// Failures the repository orchestrator hands back to its caller.
///
/// Precondition failures (`InvalidPath`, `NotARepository`, `Blank`) are
/// reported synchronously; everything else wraps a lower-level fault.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid path: {} is not an existing directory", .0.display())]
    InvalidPath(PathBuf),

    #[error("not a Git repository: {} has no working copy with a configured remote", .0.display())]
    NotARepository(PathBuf),

    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// True for failures caused by caller input rather than by I/O.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidPath(_) | SyncError::NotARepository(_) | SyncError::Blank(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_repository_message_names_the_path() {
        let err = SyncError::NotARepository(PathBuf::from("/tmp/nowhere"));
        let msg = err.to_string();
        assert!(msg.contains("not a Git repository"));
        assert!(msg.contains("/tmp/nowhere"));
        assert!(err.is_precondition());
    }

    #[test]
    fn wrapped_faults_are_not_preconditions() {
        let err = SyncError::from(std::io::Error::other("disk full"));
        assert!(!err.is_precondition());
        assert_eq!(err.to_string(), "disk full");
    }
}
