use thiserror::Error;

use crate::templates::RenderError;

/// Failure taxonomy for the delivery chain.
///
/// Transport-level errors never escape the delivery engine; they are
/// classified here and folded into a
/// [`DeliveryOutcome`](crate::notify::DeliveryOutcome).
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("channel configuration invalid or incomplete: {0}")]
    ConfigurationInvalid(String),
    #[error("transient connectivity failure: {0}")]
    ConnectivityTransient(String),
    #[error("authentication rejected by server: {0}")]
    AuthenticationFailed(String),
    #[error("recipient rejected by server: {0}")]
    RecipientRejected(String),
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl NotifyError {
    /// Whether the next delivery tier may succeed where this one failed.
    ///
    /// Only connectivity-class failures are worth retrying on another tier; a
    /// rejected credential or recipient fails the same way everywhere.
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::ConnectivityTransient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_failures_are_transient() {
        assert!(NotifyError::ConnectivityTransient("timeout".into()).is_transient());
        assert!(!NotifyError::AuthenticationFailed("535".into()).is_transient());
        assert!(!NotifyError::RecipientRejected("550".into()).is_transient());
        assert!(!NotifyError::Permanent("554".into()).is_transient());
        assert!(!NotifyError::ConfigurationInvalid("no host".into()).is_transient());
    }

    #[test]
    fn display_includes_detail() {
        let err = NotifyError::AuthenticationFailed("535 5.7.8 rejected".into());
        assert!(err.to_string().contains("535 5.7.8 rejected"));
    }
}
