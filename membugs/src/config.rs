//! Harness configuration.
//!
//! Control surfaces usually fill this from a YAML file and command-line
//! flags; every field has a default so a partial file is fine.

use serde::{Deserialize, Serialize};

use crate::HarnessError;

/// Upper bound for [`HarnessConfig::repeat`].
pub const MAX_REPEAT: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Keep the sanitizer reporting after the first error for the whole
    /// harness lifetime.
    pub multi_shot: bool,
    /// Release the blocks the leak testcases would otherwise lose. Evaluated
    /// at run time so the guarded release branch survives optimization.
    pub release_leaks: bool,
    /// Number of times `run` invokes the selected testcase.
    pub repeat: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            multi_shot: false,
            release_leaks: false,
            repeat: 1,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.repeat == 0 {
            return Err(HarnessError::Configuration(
                "repeat must be at least 1".to_string(),
            ));
        }
        if self.repeat > MAX_REPEAT {
            return Err(HarnessError::Configuration(format!(
                "repeat must be at most {MAX_REPEAT}, got {}",
                self.repeat
            )));
        }
        Ok(())
    }
}
