//! # Pattern code generator
//!
//! Derives a square module grid from a payload string so a coupon can be shown
//! as a scannable-looking image.
//!
//! ```text
//! ┌───────┐               ┌───────┐
//! │ ┌───┐ │   seeded      │ ┌───┐ │
//! │ │███│ │   cells       │ │███│ │
//! │ └───┘ │               │ └───┘ │
//! └───────┘               └───────┘
//!
//! ┌───────┐
//! │ ┌───┐ │       seeded cells
//! │ │███│ │
//! │ └───┘ │
//! └───────┘
//! ```
//!
//! The three corner finder blocks never depend on the payload. Every other cell
//! is filled iff `(seed * (row + 1) * (col + 1) + row * col) % 100 > 45`, where
//! `seed` is the wrapping sum of the payload's character codes.
//!
//! This is decorative only. There is no error correction and no encoding of the
//! payload that an optical reader could recover.

use std::fmt;

/// Number of modules along each side of the grid.
pub const GRID_SIZE: usize = 25;

/// Side length of each corner finder block.
pub const FINDER_SIZE: usize = 7;

const FILL_THRESHOLD: u32 = 45;

/// Row-major square matrix of modules; `true` means filled.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleGrid {
    cells: Vec<Vec<bool>>,
}

impl ModuleGrid {
    pub fn size(&self) -> usize {
        self.cells.len()
    }

    /// Module at (`row`, `col`), or `None` when out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<bool> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn rows(&self) -> &[Vec<bool>] {
        &self.cells
    }

    pub fn filled_count(&self) -> usize {
        self.cells
            .iter()
            .map(|row| row.iter().filter(|&&m| m).count())
            .sum()
    }
}

impl fmt::Display for ModuleGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            for &module in row {
                f.write_str(if module { "██" } else { "  " })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Build the module grid for `payload`.
///
/// Pure and deterministic. An empty payload yields seed `0`, which still
/// produces a valid grid with all three finder blocks in place.
pub fn generate(payload: &str) -> ModuleGrid {
    let seed = seed_of(payload);

    let cells = (0..GRID_SIZE)
        .map(|row| {
            (0..GRID_SIZE)
                .map(|col| match finder_cell(row, col) {
                    Some(module) => module,
                    None => seeded_cell(seed, row, col),
                })
                .collect()
        })
        .collect();

    ModuleGrid { cells }
}

/// `true` if (`row`, `col`) lies inside one of the three corner finder blocks.
pub fn is_finder(row: usize, col: usize) -> bool {
    finder_origin(row, col).is_some()
}

/// Fixed module for a finder cell, `None` for cells outside every finder block.
///
/// Each block is an outer filled ring, a one-cell empty margin, and a filled
/// 3×3 centre.
pub fn finder_cell(row: usize, col: usize) -> Option<bool> {
    let (top, left) = finder_origin(row, col)?;
    let (r, c) = (row - top, col - left);
    let ring = r == 0 || r == FINDER_SIZE - 1 || c == 0 || c == FINDER_SIZE - 1;
    let centre = (2..=4).contains(&r) && (2..=4).contains(&c);
    Some(ring || centre)
}

fn finder_origin(row: usize, col: usize) -> Option<(usize, usize)> {
    let far = GRID_SIZE - FINDER_SIZE;
    match (row < FINDER_SIZE, col < FINDER_SIZE, col >= far, row >= far) {
        (true, true, _, _) => Some((0, 0)),
        (true, _, true, _) => Some((0, far)),
        (_, true, _, true) => Some((far, 0)),
        _ => None,
    }
}

fn seed_of(payload: &str) -> u32 {
    payload
        .chars()
        .fold(0u32, |acc, ch| acc.wrapping_add(ch as u32))
}

fn seeded_cell(seed: u32, row: usize, col: usize) -> bool {
    let (r, c) = (row as u32, col as u32);
    let hash = seed
        .wrapping_mul(r + 1)
        .wrapping_mul(c + 1)
        .wrapping_add(r * c)
        % 100;
    hash > FILL_THRESHOLD
}
