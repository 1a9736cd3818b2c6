//! Input handling.
//!
//! In a full client this would integrate with windowing and key bindings.
//! Here it reduces sampled key state to the discrete `GridDirection` the
//! protocol carries; the most recently pressed axis wins.

use arena_shared::protocol::{Command, GridDirection};

use crate::replica::ClientReplica;

/// Sampled key state for one frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl InputState {
    /// Reduces the sampled keys to one direction. Vertical wins ties.
    pub fn direction(self) -> GridDirection {
        if self.up {
            GridDirection::Up
        } else if self.down {
            GridDirection::Down
        } else if self.left {
            GridDirection::Left
        } else if self.right {
            GridDirection::Right
        } else {
            GridDirection::None
        }
    }
}

/// Builds the `MoveInput` command for the local pawn, echoing the replica's
/// last known cell so the server can log divergence.
pub fn build_move_command(
    replica: &ClientReplica,
    owner_id: u64,
    input: InputState,
) -> Option<Command> {
    let (entity_id, view) = replica.entity_for_owner(owner_id)?;
    Some(Command::move_input(
        replica.session_uid(),
        entity_id,
        input.direction(),
        view.cell_x,
        view.cell_y,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_priority() {
        assert_eq!(InputState::default().direction(), GridDirection::None);
        let both = InputState {
            up: true,
            left: true,
            ..Default::default()
        };
        assert_eq!(both.direction(), GridDirection::Up);
        let right = InputState {
            right: true,
            ..Default::default()
        };
        assert_eq!(right.direction(), GridDirection::Right);
    }

    #[test]
    fn no_pawn_no_command() {
        let replica = ClientReplica::new("s");
        assert!(build_move_command(&replica, 1, InputState::default()).is_none());
    }
}
