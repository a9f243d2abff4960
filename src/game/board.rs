//! Board and Outcome Evaluation
//!
//! The 3x3 grid, the two marks, and win/tie detection.
//! Cells are stored in row-major order (0-8).

use serde::{Serialize, Deserialize};

/// Number of cells on the board.
pub const CELL_COUNT: usize = 9;

/// The eight winning triples: 3 rows, 3 columns, 2 diagonals.
pub const WIN_LINES: [[usize; 3]; 8] = [
    // Rows
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // Columns
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // Diagonals
    [0, 4, 8],
    [2, 4, 6],
];

// =============================================================================
// MARK
// =============================================================================

/// Symbol occupying a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    /// First participant's mark (moves first).
    X,
    /// Second participant's mark.
    O,
}

// =============================================================================
// BOARD
// =============================================================================

/// Why a placement was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// Index outside `[0, 9)`.
    #[error("cell index {0} out of range")]
    OutOfRange(i64),
    /// Cell already holds a mark.
    #[error("cell {0} already occupied")]
    Occupied(usize),
}

/// The 3x3 board.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Board {
    cells: [Option<Mark>; CELL_COUNT],
}

impl Board {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark at `index`, or `None` if empty or out of range.
    pub fn get(&self, index: usize) -> Option<Mark> {
        self.cells.get(index).copied().flatten()
    }

    /// Check that `index` names an empty cell and return it as a cell index.
    pub fn check_placement(&self, index: i64) -> Result<usize, PlacementError> {
        let cell = usize::try_from(index)
            .ok()
            .filter(|&i| i < CELL_COUNT)
            .ok_or(PlacementError::OutOfRange(index))?;

        if self.cells[cell].is_some() {
            return Err(PlacementError::Occupied(cell));
        }

        Ok(cell)
    }

    /// Place `mark` at `index`. Occupied cells are never overwritten.
    pub fn place(&mut self, index: i64, mark: Mark) -> Result<usize, PlacementError> {
        let cell = self.check_placement(index)?;
        self.cells[cell] = Some(mark);
        Ok(cell)
    }

    /// Does `mark` occupy all three cells of any winning line?
    pub fn has_line(&self, mark: Mark) -> bool {
        WIN_LINES
            .iter()
            .any(|line| line.iter().all(|&i| self.cells[i] == Some(mark)))
    }

    /// Every cell occupied.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// Every cell empty.
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }

    /// Clear every cell.
    pub fn clear(&mut self) {
        self.cells = [None; CELL_COUNT];
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Result of evaluating the board after a move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The mover completed a line.
    Win(Mark),
    /// Board full, no line.
    Tie,
    /// Play continues.
    Ongoing,
}

/// Evaluate the board after `mover` placed a mark.
///
/// Only the mover's lines are checked, and the win check runs before the
/// tie check, so a full board that completes a line is a win.
pub fn evaluate(board: &Board, mover: Mark) -> Outcome {
    if board.has_line(mover) {
        Outcome::Win(mover)
    } else if board.is_full() {
        Outcome::Tie
    } else {
        Outcome::Ongoing
    }
}
