//! FSM mode preconditions.
//!
//! The G1 only accepts arm gestures and locomotion while its balance
//! controller is active.  [`ModeController::ensure_mode`] is the one place
//! that check happens; every hardware-touching action plugin calls it before
//! dispatch.
//!
//! # Transition rules
//!
//! ```text
//! ZeroTorque ⇄ Damping ⇄ Ready ⇄ MainOperationControl
//!        any ──────────▶ Damping
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cortex_hal::mode::ModeController;
//! use cortex_hal::sim_session::SimSession;
//! use cortex_types::RobotMode;
//!
//! # tokio_test_block(async {
//! let session = Arc::new(SimSession::builder().connected().build());
//! let modes = ModeController::new(session, true);
//! modes.ensure_mode(RobotMode::MainOperationControl).await.unwrap();
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;

use cortex_types::{CortexError, RobotMode};
use tracing::{debug, info};

use crate::session::HardwareSession;

/// Whether the motion switcher accepts a direct `from → to` request.
pub fn can_transition(from: RobotMode, to: RobotMode) -> bool {
    from == to || to == RobotMode::Damping || from.rank().abs_diff(to.rank()) == 1
}

/// The single-step transitions that lead from `from` to `to`, excluding
/// `from` itself.  Empty when already there.
pub fn transition_path(from: RobotMode, to: RobotMode) -> Vec<RobotMode> {
    if from == to {
        return Vec::new();
    }
    if to == RobotMode::Damping {
        return vec![RobotMode::Damping];
    }
    let (a, b) = (from.rank() as usize, to.rank() as usize);
    if a < b {
        RobotMode::LADDER[a + 1..=b].to_vec()
    } else {
        RobotMode::LADDER[b..a].iter().rev().copied().collect()
    }
}

/// Precondition checker bound to one hardware session.
#[derive(Clone)]
pub struct ModeController {
    session: Arc<dyn HardwareSession>,
    auto_switch: bool,
}

impl ModeController {
    /// `auto_switch` lets [`ensure_mode`](Self::ensure_mode) walk the robot
    /// to the required mode instead of failing.
    pub fn new(session: Arc<dyn HardwareSession>, auto_switch: bool) -> Self {
        Self { session, auto_switch }
    }

    pub async fn current(&self) -> Result<RobotMode, CortexError> {
        self.session.current_mode().await
    }

    /// Verify the robot is in `required`, switching to it when allowed.
    ///
    /// # Errors
    ///
    /// [`CortexError::ModePrecondition`] when the robot is elsewhere and
    /// auto-switching is disabled, or when a switch did not take effect.
    /// Session failures are passed through unchanged.
    pub async fn ensure_mode(&self, required: RobotMode) -> Result<(), CortexError> {
        let actual = self.session.current_mode().await?;
        if actual == required {
            return Ok(());
        }
        if !self.auto_switch {
            debug!(%required, %actual, "mode precondition not met");
            return Err(CortexError::ModePrecondition { required, actual });
        }

        for step in transition_path(actual, required) {
            info!(from = %actual, to = %step, "switching robot mode");
            self.session.switch_mode(step).await?;
        }

        let reached = self.session.current_mode().await?;
        if reached == required {
            Ok(())
        } else {
            Err(CortexError::ModePrecondition {
                required,
                actual: reached,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_session::{SessionCall, SimSession};

    #[test]
    fn damping_is_reachable_from_everywhere() {
        for mode in RobotMode::LADDER {
            assert!(can_transition(mode, RobotMode::Damping), "{mode} → damping");
        }
    }

    #[test]
    fn ladder_skips_are_rejected() {
        assert!(!can_transition(RobotMode::ZeroTorque, RobotMode::Ready));
        assert!(!can_transition(RobotMode::Damping, RobotMode::MainOperationControl));
        assert!(can_transition(RobotMode::Ready, RobotMode::MainOperationControl));
        assert!(can_transition(RobotMode::MainOperationControl, RobotMode::Ready));
    }

    #[test]
    fn path_climbs_the_ladder() {
        assert_eq!(
            transition_path(RobotMode::ZeroTorque, RobotMode::MainOperationControl),
            vec![RobotMode::Damping, RobotMode::Ready, RobotMode::MainOperationControl]
        );
    }

    #[test]
    fn path_descends_the_ladder() {
        assert_eq!(
            transition_path(RobotMode::MainOperationControl, RobotMode::ZeroTorque),
            vec![RobotMode::Ready, RobotMode::Damping, RobotMode::ZeroTorque]
        );
        assert_eq!(
            transition_path(RobotMode::MainOperationControl, RobotMode::Damping),
            vec![RobotMode::Damping]
        );
        assert!(transition_path(RobotMode::Ready, RobotMode::Ready).is_empty());
    }

    #[tokio::test]
    async fn ensure_mode_is_noop_when_already_there() {
        let session = Arc::new(
            SimSession::builder()
                .connected()
                .with_mode(RobotMode::MainOperationControl)
                .build(),
        );
        let modes = ModeController::new(session.clone(), false);
        modes
            .ensure_mode(RobotMode::MainOperationControl)
            .await
            .expect("already in mode");
        assert!(
            !session.calls().iter().any(|c| matches!(c, SessionCall::SwitchMode(_))),
            "no switch expected"
        );
    }

    #[tokio::test]
    async fn ensure_mode_fails_without_auto_switch() {
        let session = Arc::new(SimSession::builder().connected().build());
        let modes = ModeController::new(session, false);
        let err = modes
            .ensure_mode(RobotMode::MainOperationControl)
            .await
            .expect_err("must fail");
        assert_eq!(
            err,
            CortexError::ModePrecondition {
                required: RobotMode::MainOperationControl,
                actual: RobotMode::Damping,
            }
        );
    }

    #[tokio::test]
    async fn ensure_mode_walks_to_required_mode() {
        let session = Arc::new(
            SimSession::builder()
                .connected()
                .with_mode(RobotMode::ZeroTorque)
                .build(),
        );
        let modes = ModeController::new(session.clone(), true);
        modes
            .ensure_mode(RobotMode::MainOperationControl)
            .await
            .expect("auto switch");
        assert_eq!(modes.current().await.unwrap(), RobotMode::MainOperationControl);

        let switches: Vec<_> = session
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SessionCall::SwitchMode(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(
            switches,
            vec![RobotMode::Damping, RobotMode::Ready, RobotMode::MainOperationControl]
        );
    }

    #[tokio::test]
    async fn ensure_mode_propagates_session_faults() {
        let session = Arc::new(SimSession::builder().build()); // never connected
        let modes = ModeController::new(session, true);
        let err = modes.ensure_mode(RobotMode::Ready).await.expect_err("disconnected");
        assert!(matches!(err, CortexError::HardwareFault { .. }));
    }
}
