//! The move-legality oracle.
//!
//! Gambit never judges chess rules itself. Whether a move is legal, what
//! the board looks like afterwards, and whether the game is over are all
//! answered by a [`MoveOracle`] supplied by the embedding application
//! (a chess library, an engine process, ...). Its verdict is
//! authoritative: the pipeline records whatever it says.

use gambit_protocol::EndReason;

/// Draw rules an oracle may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawRule {
    InsufficientMaterial,
    FiftyMove,
    ThreefoldRepetition,
}

/// Game state after a legal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ongoing,
    /// The side that just moved has won.
    Checkmate,
    Stalemate,
    Draw(DrawRule),
}

impl Outcome {
    /// The recorded end reason, or `None` while the game continues.
    pub fn end_reason(self) -> Option<EndReason> {
        match self {
            Self::Ongoing => None,
            Self::Checkmate => Some(EndReason::Checkmate),
            Self::Stalemate => Some(EndReason::Stalemate),
            Self::Draw(DrawRule::InsufficientMaterial) => {
                Some(EndReason::InsufficientMaterial)
            }
            Self::Draw(DrawRule::FiftyMove) => Some(EndReason::FiftyMoveRule),
            Self::Draw(DrawRule::ThreefoldRepetition) => {
                Some(EndReason::ThreefoldRepetition)
            }
        }
    }
}

/// The oracle's answer for a legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Board encoding after the move.
    pub position: String,
    /// Whether the side now to move is in check.
    pub check: bool,
    pub outcome: Outcome,
}

/// Why the oracle refused a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OracleRejection {
    /// Well-formed, but not playable in this position.
    #[error("move is not legal in this position")]
    Illegal,
    /// The notation could not be parsed at all.
    #[error("move notation is malformed")]
    Malformed,
}

/// Judges a move against a position.
///
/// Implementations must be pure with respect to their inputs: the same
/// `(position, notation)` always yields the same answer. The call is
/// synchronous; an oracle that needs I/O should keep its own cache or
/// run its engine on a dedicated thread.
pub trait MoveOracle: Send + Sync + 'static {
    fn evaluate(
        &self,
        position: &str,
        notation: &str,
    ) -> Result<Verdict, OracleRejection>;
}
