//! Transcript store - the ordered record of one session's turns.
//!
//! Turns are only ever appended. The one way to shrink the transcript is
//! [`Transcript::rollback`], which the orchestrator uses to discard a turn
//! that failed before reaching a stable end state.

use tracing::debug;

use crate::error::Error;
use crate::Result;

use super::message::{Role, Turn};

/// A position in the transcript to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Append-only list of turns.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    ///
    /// A tool turn must answer a tool call already present in the transcript.
    pub fn append(&mut self, turn: Turn) -> Result<()> {
        if turn.role == Role::Tool {
            let id = turn.tool_call_id.as_deref().ok_or_else(|| {
                Error::Transcript("tool turn without a tool_call_id".to_string())
            })?;
            if !self.has_request(id) {
                return Err(Error::Transcript(format!(
                    "tool turn references unknown call '{id}'"
                )));
            }
        }

        self.turns.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Mark the current end of the transcript.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.turns.len())
    }

    /// Discard every turn appended after `checkpoint`. Returns how many were dropped.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> usize {
        let discarded = self.turns.len().saturating_sub(checkpoint.0);
        if discarded > 0 {
            self.turns.truncate(checkpoint.0);
            debug!("Rolled back {} turn(s) to length {}", discarded, checkpoint.0);
        }
        discarded
    }

    fn has_request(&self, id: &str) -> bool {
        self.turns
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .flat_map(|t| t.requested_calls())
            .any(|call| call.id == id)
    }
}
