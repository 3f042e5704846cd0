//! Session phase state machine shared by the client and server roles.
//!
//! Provides a `TransferPhase` enum that models the lifecycle of one
//! transfer, with validated transitions that return `Result` instead of
//! letting the engine run protocol steps out of order.

use crate::error::TrzszError;

// ── TransferPhase ────────────────────────────────────────────────

/// The current phase of a transfer session.
///
/// ```text
///          ┌──► ActionSent ─────┐
///  Idle ───┤                    ├──► ConfigExchanged ──► Transferring ──► Exited
///          └──► ActionReceived ─┘            │                 │
///                   │  (declined)            ▼                 ▼
///                   └──────────────────► Exited           Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    /// Nothing exchanged yet.
    #[default]
    Idle,

    /// Client sent its `ACT`.
    ActionSent,

    /// Server received the client's `ACT`.
    ActionReceived,

    /// `CFG` exchanged; file loops may start.
    ConfigExchanged,

    /// A send or receive loop is running.
    Transferring,

    /// `EXIT` exchanged, or the transfer was declined.
    Exited,

    /// Aborted by an error.
    Failed,
}

impl std::fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::ActionSent => write!(f, "ActionSent"),
            Self::ActionReceived => write!(f, "ActionReceived"),
            Self::ConfigExchanged => write!(f, "ConfigExchanged"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Exited => write!(f, "Exited"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl TransferPhase {
    fn violation(&self, step: &str) -> TrzszError {
        TrzszError::ProtocolViolation(format!("cannot {step} in phase {self}"))
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn action_sent(&mut self) -> Result<(), TrzszError> {
        match self {
            Self::Idle => {
                *self = Self::ActionSent;
                Ok(())
            }
            _ => Err(self.violation("send action")),
        }
    }

    /// Valid from: `Idle`.
    pub fn action_received(&mut self) -> Result<(), TrzszError> {
        match self {
            Self::Idle => {
                *self = Self::ActionReceived;
                Ok(())
            }
            _ => Err(self.violation("receive action")),
        }
    }

    /// Valid from: `ActionSent` (client), `ActionReceived` (server).
    pub fn config_exchanged(&mut self) -> Result<(), TrzszError> {
        match self {
            Self::ActionSent | Self::ActionReceived => {
                *self = Self::ConfigExchanged;
                Ok(())
            }
            _ => Err(self.violation("exchange config")),
        }
    }

    /// Valid from: `ConfigExchanged`.
    pub fn begin_transfer(&mut self) -> Result<(), TrzszError> {
        match self {
            Self::ConfigExchanged => {
                *self = Self::Transferring;
                Ok(())
            }
            _ => Err(self.violation("transfer files")),
        }
    }

    /// Back to `ConfigExchanged` once a loop completed.
    ///
    /// Valid from: `Transferring`.
    pub fn finish_transfer(&mut self) -> Result<(), TrzszError> {
        match self {
            Self::Transferring => {
                *self = Self::ConfigExchanged;
                Ok(())
            }
            _ => Err(self.violation("finish transfer")),
        }
    }

    /// Valid from any phase but `Failed`.
    pub fn exit(&mut self) -> Result<(), TrzszError> {
        match self {
            Self::Failed => Err(self.violation("exit")),
            _ => {
                *self = Self::Exited;
                Ok(())
            }
        }
    }

    /// Force `Failed` regardless of the current phase.
    pub fn fail(&mut self) {
        *self = Self::Failed;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_lifecycle() {
        let mut phase = TransferPhase::default();
        phase.action_sent().unwrap();
        phase.config_exchanged().unwrap();
        phase.begin_transfer().unwrap();
        assert_eq!(phase, TransferPhase::Transferring);
        assert!(phase.begin_transfer().is_err());
        phase.finish_transfer().unwrap();
        phase.exit().unwrap();
        assert_eq!(phase, TransferPhase::Exited);
    }

    #[test]
    fn server_lifecycle() {
        let mut phase = TransferPhase::Idle;
        phase.action_received().unwrap();
        assert_eq!(phase, TransferPhase::ActionReceived);
        phase.config_exchanged().unwrap();
        assert_eq!(phase, TransferPhase::ConfigExchanged);
    }

    #[test]
    fn declined_action_exits_directly() {
        let mut phase = TransferPhase::Idle;
        phase.action_sent().unwrap();
        phase.exit().unwrap();
        assert_eq!(phase, TransferPhase::Exited);
    }

    #[test]
    fn invalid_transitions() {
        let mut phase = TransferPhase::Idle;
        assert!(phase.begin_transfer().is_err());
        assert!(phase.config_exchanged().is_err());
        phase.action_sent().unwrap();
        assert!(phase.action_received().is_err());
        phase.fail();
        assert!(phase.exit().is_err());
        assert_eq!(phase, TransferPhase::Failed);
    }

    #[test]
    fn display_format() {
        assert_eq!(TransferPhase::Idle.to_string(), "Idle");
        assert_eq!(TransferPhase::Transferring.to_string(), "Transferring");
        assert_eq!(
            TransferPhase::ConfigExchanged.to_string(),
            "ConfigExchanged"
        );
    }
}
