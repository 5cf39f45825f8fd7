use crate::CoreError;

/// Substring the image backend puts in errors about a stale continuation token.
pub const DEFAULT_RECOVERY_MARKER: &str = "thought_signature";
pub const RECOVERY_NOTE: &str =
    "\n\n*(system: corrupted context detected; history was reset and this reply regenerated)*";

/// Replays a failed request with an empty history when its error mentions `marker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOnMarker {
    marker: Option<String>,
    max_attempts: u32,
}

impl Default for RetryOnMarker {
    fn default() -> Self {
        Self::new(DEFAULT_RECOVERY_MARKER)
    }
}

impl RetryOnMarker {
    /// An empty marker disables the policy.
    pub fn new(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        let marker = if marker.trim().is_empty() { None } else { Some(marker) };
        Self { marker, max_attempts: 1 }
    }

    pub fn disabled() -> Self {
        Self { marker: None, max_attempts: 0 }
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn should_retry(&self, error: &CoreError, attempts_made: u32) -> bool {
        let Some(marker) = self.marker.as_deref() else {
            return false;
        };
        if attempts_made >= self.max_attempts {
            return false;
        }
        !matches!(error, CoreError::Configuration(_)) && error.to_string().contains(marker)
    }
}
