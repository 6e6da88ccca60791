//! Terminal-state classification of a finished engine process
//!
//! Precedence when a run did not succeed:
//! cancelled > timed out > fatal marker > non-zero exit / signal

use ep_scan::ScanSummary;

use crate::runner::{ExitOutcome, TerminationCause};
use crate::state::FailureReason;

/// `Ok(())` for SUCCEEDED, otherwise the failure reason.
pub fn classify(
    outcome: &ExitOutcome,
    scan: &ScanSummary,
    cancelling: bool,
) -> Result<(), FailureReason> {
    if outcome.success() && !scan.fatal {
        return Ok(());
    }

    match outcome.termination {
        Some(TerminationCause::Cancelled) => return Err(FailureReason::Cancelled),
        _ if cancelling => return Err(FailureReason::Cancelled),
        Some(TerminationCause::TimedOut { seconds }) => {
            return Err(FailureReason::TimedOut { seconds })
        }
        Some(TerminationCause::Fatal) => return Err(FailureReason::FatalError),
        None => {}
    }

    if scan.fatal {
        return Err(FailureReason::FatalError);
    }

    Err(FailureReason::EngineRuntimeFailure {
        exit_code: outcome.exit_code,
        signal: outcome.signal.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> ExitOutcome {
        ExitOutcome {
            exit_code: Some(code),
            ..Default::default()
        }
    }

    fn fatal_scan() -> ScanSummary {
        ScanSummary {
            fatal: true,
            error_lines: 1,
            first_error: Some("**  Fatal  ** boom".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_exit_zero_succeeds() {
        assert_eq!(classify(&exited(0), &ScanSummary::default(), false), Ok(()));
    }

    #[test]
    fn test_exit_zero_during_cancel_still_succeeds() {
        assert_eq!(classify(&exited(0), &ScanSummary::default(), true), Ok(()));
    }

    #[test]
    fn test_nonzero_exit() {
        assert_eq!(
            classify(&exited(1), &ScanSummary::default(), false),
            Err(FailureReason::EngineRuntimeFailure {
                exit_code: Some(1),
                signal: None
            })
        );
    }

    #[test]
    fn test_fatal_marker_overrides_exit_zero() {
        assert_eq!(
            classify(&exited(0), &fatal_scan(), false),
            Err(FailureReason::FatalError)
        );
    }

    #[test]
    fn test_killed_by_signal() {
        let outcome = ExitOutcome {
            signal: Some("SIGKILL".to_string()),
            ..Default::default()
        };
        assert_eq!(
            classify(&outcome, &ScanSummary::default(), false),
            Err(FailureReason::EngineRuntimeFailure {
                exit_code: None,
                signal: Some("SIGKILL".to_string())
            })
        );
    }

    #[test]
    fn test_termination_causes() {
        let mut outcome = exited(143);
        outcome.termination = Some(TerminationCause::TimedOut { seconds: 9 });
        assert_eq!(
            classify(&outcome, &ScanSummary::default(), false),
            Err(FailureReason::TimedOut { seconds: 9 })
        );

        outcome.termination = Some(TerminationCause::Fatal);
        assert_eq!(
            classify(&outcome, &fatal_scan(), false),
            Err(FailureReason::FatalError)
        );

        outcome.termination = Some(TerminationCause::Cancelled);
        assert_eq!(
            classify(&outcome, &fatal_scan(), false),
            Err(FailureReason::Cancelled)
        );
    }

    #[test]
    fn test_cancel_takes_precedence() {
        let mut outcome = exited(1);
        outcome.termination = Some(TerminationCause::Fatal);
        assert_eq!(
            classify(&outcome, &fatal_scan(), true),
            Err(FailureReason::Cancelled)
        );
    }
}
