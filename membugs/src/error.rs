use thiserror::Error;

pub const EINVAL: i32 = 22;
pub const EEXIST: i32 = 17;
pub const ENOENT: i32 = 2;
pub const ENOMEM: i32 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// Requested behavior is not available in this build, or the
    /// configuration itself is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Two catalog entries claim the same id.
    #[error("duplicate testcase id `{0}`")]
    DuplicateId(String),

    #[error("unknown testcase id `{0}`")]
    NotFound(String),

    /// A heap simulator could not get its block; no fault was performed.
    #[error("allocation of {size} bytes failed")]
    AllocationFailure { size: usize },
}

impl HarnessError {
    /// Negative errno-style status reported to the control surface.
    pub fn status(&self) -> i32 {
        match self {
            HarnessError::Configuration(_) => -EINVAL,
            HarnessError::DuplicateId(_) => -EEXIST,
            HarnessError::NotFound(_) => -ENOENT,
            HarnessError::AllocationFailure { .. } => -ENOMEM,
        }
    }

    /// Fatal errors abort initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Configuration(_) | HarnessError::DuplicateId(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_negative_errnos() {
        assert_eq!(HarnessError::Configuration("x".into()).status(), -22);
        assert_eq!(HarnessError::DuplicateId("x".into()).status(), -17);
        assert_eq!(HarnessError::NotFound("x".into()).status(), -2);
        assert_eq!(HarnessError::AllocationFailure { size: 123 }.status(), -12);
    }

    #[test]
    fn only_init_errors_are_fatal() {
        assert!(HarnessError::Configuration("x".into()).is_fatal());
        assert!(HarnessError::DuplicateId("x".into()).is_fatal());
        assert!(!HarnessError::NotFound("x".into()).is_fatal());
        assert!(!HarnessError::AllocationFailure { size: 1 }.is_fatal());
    }
}
