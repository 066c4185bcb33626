use std::fmt;

use crate::error::InvalidMoveError;

pub const ROWS: usize = 6;
pub const COLS: usize = 7;

/// Number of pieces in a line needed to win.
const CONNECT: usize = 4;

/// The four line directions as (row step, col step): horizontal, vertical,
/// diagonal `/` and diagonal `\`.
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (-1, 1), (1, 1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cell {
    Empty,
    Red,
    Yellow,
}

/// A 6x7 grid. Row 0 is the top, row 5 is the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Board {
    cells: [[Cell; COLS]; ROWS],
}

impl Board {
    pub fn new() -> Self {
        Board {
            cells: [[Cell::Empty; COLS]; ROWS],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Cell {
        self.cells[row][col]
    }

    /// Out-of-range columns count as full.
    pub fn is_column_full(&self, col: usize) -> bool {
        col >= COLS || self.cells[0][col] != Cell::Empty
    }

    /// Row a piece dropped into `col` would land on, if any.
    pub fn landing_row(&self, col: usize) -> Option<usize> {
        if col >= COLS {
            return None;
        }
        (0..ROWS).rev().find(|&row| self.cells[row][col] == Cell::Empty)
    }

    /// Drop a piece in a column and return the row where it landed.
    pub fn drop_piece(&mut self, col: usize, cell: Cell) -> Result<usize, InvalidMoveError> {
        if col >= COLS {
            return Err(InvalidMoveError::ColumnOutOfRange(col));
        }
        let row = self
            .landing_row(col)
            .ok_or(InvalidMoveError::ColumnFull(col))?;
        self.cells[row][col] = cell;
        Ok(row)
    }

    pub fn is_full(&self) -> bool {
        (0..COLS).all(|col| self.is_column_full(col))
    }

    pub fn piece_count(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|&&c| c != Cell::Empty)
            .count()
    }

    /// Check whether the piece at (row, col) is part of four-in-a-row.
    pub fn check_win(&self, row: usize, col: usize) -> bool {
        let cell = self.get(row, col);
        if cell == Cell::Empty {
            return false;
        }
        DIRECTIONS.iter().any(|&(dr, dc)| {
            1 + self.run_length(row, col, dr, dc, cell) + self.run_length(row, col, -dr, -dc, cell)
                >= CONNECT
        })
    }

    /// Full-board scan for four-in-a-row of `cell`, independent of move history.
    pub fn has_four(&self, cell: Cell) -> bool {
        if cell == Cell::Empty {
            return false;
        }
        (0..ROWS).any(|row| {
            (0..COLS).any(|col| {
                self.cells[row][col] == cell
                    && DIRECTIONS
                        .iter()
                        .any(|&(dr, dc)| self.run_length(row, col, dr, dc, cell) + 1 >= CONNECT)
            })
        })
    }

    /// Would dropping `cell` into `col` complete four-in-a-row?
    pub fn is_winning_drop(&self, col: usize, cell: Cell) -> bool {
        let mut trial = *self;
        match trial.drop_piece(col, cell) {
            Ok(row) => trial.check_win(row, col),
            Err(_) => false,
        }
    }

    /// Count consecutive `cell` pieces from (row, col), exclusive, stepping by (dr, dc).
    fn run_length(&self, row: usize, col: usize, dr: isize, dc: isize, cell: Cell) -> usize {
        let mut count = 0;
        let mut r = row as isize + dr;
        let mut c = col as isize + dc;
        while (0..ROWS as isize).contains(&r)
            && (0..COLS as isize).contains(&c)
            && self.cells[r as usize][c as usize] == cell
        {
            count += 1;
            r += dr;
            c += dc;
        }
        count
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            let line: String = row
                .iter()
                .map(|c| match c {
                    Cell::Empty => '.',
                    Cell::Red => 'X',
                    Cell::Yellow => 'O',
                })
                .collect();
            writeln!(f, "{line}")?;
        }
        write!(f, "0123456")
    }
}
