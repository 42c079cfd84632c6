//! Lifecycle of a per-connection extension negotiator.

/// Phase of a [`ServerExtensionNegotiator`](super::ServerExtensionNegotiator).
///
/// ```text
/// Idle --request--> Negotiating --response prepared--> AwaitingWriteCompletion
///                                                        |-- write ok ----> Detached
///                                                        `-- write failed -> Resident
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum NegotiationPhase {
    /// Installed in the pipeline, no upgrade request seen yet.
    #[default]
    Idle,
    /// Offers processed and transforms installed; response not yet assembled.
    Negotiating,
    /// Response handed to the write path.
    AwaitingWriteCompletion,
    /// Response delivered; the negotiator has left the pipeline.
    Detached,
    /// Response write failed; the negotiator stays in the pipeline, inert.
    Resident,
}

impl NegotiationPhase {
    /// Whether the upgrade request may be handled in this phase.
    #[must_use]
    #[inline]
    pub const fn can_handle_request(&self) -> bool {
        matches!(self, NegotiationPhase::Idle)
    }
}

impl std::fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationPhase::Idle => write!(f, "Idle"),
            NegotiationPhase::Negotiating => write!(f, "Negotiating"),
            NegotiationPhase::AwaitingWriteCompletion => write!(f, "AwaitingWriteCompletion"),
            NegotiationPhase::Detached => write!(f, "Detached"),
            NegotiationPhase::Resident => write!(f, "Resident"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_phase() {
        assert_eq!(NegotiationPhase::default(), NegotiationPhase::Idle);
    }

    #[test]
    fn test_can_handle_request() {
        assert!(NegotiationPhase::Idle.can_handle_request());
        assert!(!NegotiationPhase::Negotiating.can_handle_request());
        assert!(!NegotiationPhase::Resident.can_handle_request());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(NegotiationPhase::Idle.to_string(), "Idle");
        assert_eq!(
            NegotiationPhase::AwaitingWriteCompletion.to_string(),
            "AwaitingWriteCompletion"
        );
        assert_eq!(NegotiationPhase::Resident.to_string(), "Resident");
    }
}
