use std::{fmt, ops::Range};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// Byte value of a live cell.
pub const ALIVE: u8 = 255;
/// Byte value of a dead cell.
pub const DEAD: u8 = 0;

/// A cell coordinate in global grid space.
#[derive(
    Archive,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[archive(check_bytes)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// A cell whose state changed during a turn. Flip lists are sets: the order
/// of a list carries no meaning.
pub type FlippedCell = Cell;

/// A rectangular matrix of cells, stored row-major.
///
/// Every row has the same length by construction, and the dimensions never
/// change once a grid exists.
#[derive(Archive, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

impl Grid {
    /// Creates an all-dead grid.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![DEAD; width * height],
        }
    }

    /// Builds a grid from a list of rows, rejecting empty or ragged input.
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if height == 0 || width == 0 {
            return Err(Error::Bounds(format!(
                "grid must have at least one row and column, got {}x{}",
                width, height
            )));
        }
        if let Some(y) = rows.iter().position(|row| row.len() != width) {
            return Err(Error::Bounds(format!(
                "row {} has {} cells, expected {}",
                y,
                rows[y].len(),
                width
            )));
        }
        Ok(Self {
            width,
            height,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    /// Creates a grid with the given cells alive and every other cell dead.
    pub fn with_alive(
        width: usize,
        height: usize,
        alive: impl IntoIterator<Item = Cell>,
    ) -> Result<Self> {
        let mut grid = Self::new(width, height);
        for cell in alive {
            grid.set(cell.x, cell.y, ALIVE)?;
        }
        Ok(grid)
    }

    /// Checks a grid that arrived over the wire: it must have at least one
    /// cell, and exactly `width * height` of them.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Bounds(format!(
                "grid must have at least one row and column, got {}x{}",
                self.width, self.height
            )));
        }
        if self.cells.len() != self.width * self.height {
            return Err(Error::Bounds(format!(
                "{}x{} grid carries {} cells",
                self.width,
                self.height,
                self.cells.len()
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the cell at `(x, y)`, or `None` outside the grid.
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        (x < self.width && y < self.height)
            .then(|| self.cells[y * self.width + x])
    }

    pub fn is_alive(&self, x: usize, y: usize) -> bool {
        self.get(x, y) == Some(ALIVE)
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) -> Result<()> {
        self.check_cell(x, y)?;
        self.cells[y * self.width + x] = value;
        Ok(())
    }

    /// Row `y`. Panics if `y` is outside the grid.
    pub fn row(&self, y: usize) -> &[u8] {
        &self.cells[y * self.width..(y + 1) * self.width]
    }

    /// An owned copy of row `y`. Later changes to the grid do not affect it.
    pub fn copy_row(&self, y: usize) -> Result<Vec<u8>> {
        if y >= self.height {
            return Err(Error::Bounds(format!(
                "row {} outside grid of height {}",
                y, self.height
            )));
        }
        Ok(self.row(y).to_vec())
    }

    /// Copies the rows in `range` into a grid of their own.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Self> {
        if range.start >= range.end || range.end > self.height {
            return Err(Error::Bounds(format!(
                "row range {:?} invalid for grid of height {}",
                range, self.height
            )));
        }
        Ok(Self {
            width: self.width,
            height: range.len(),
            cells: self.cells[range.start * self.width..range.end * self.width]
                .to_vec(),
        })
    }

    /// Builds the extended partition: `top`, then every row of this grid,
    /// then `bottom`.
    pub fn with_halo(&self, top: &[u8], bottom: &[u8]) -> Result<Self> {
        for (name, line) in [("top", top), ("bottom", bottom)] {
            if line.len() != self.width {
                return Err(Error::Bounds(format!(
                    "{} halo line has {} cells, expected {}",
                    name,
                    line.len(),
                    self.width
                )));
            }
        }
        let mut cells = Vec::with_capacity(self.cells.len() + 2 * self.width);
        cells.extend_from_slice(top);
        cells.extend_from_slice(&self.cells);
        cells.extend_from_slice(bottom);
        Ok(Self {
            width: self.width,
            height: self.height + 2,
            cells,
        })
    }

    /// Copies `section` into this grid with its top-left corner at `(x, y)`.
    pub fn paste(&mut self, section: &Grid, x: usize, y: usize) -> Result<()> {
        if x + section.width > self.width || y + section.height > self.height {
            return Err(Error::Bounds(format!(
                "{}x{} section at ({}, {}) does not fit a {}x{} grid",
                section.width, section.height, x, y, self.width, self.height
            )));
        }
        for row in 0..section.height {
            let start = (y + row) * self.width + x;
            self.cells[start..start + section.width]
                .copy_from_slice(section.row(row));
        }
        Ok(())
    }

    /// Swaps every listed cell between alive and dead. Nothing is changed if
    /// any cell lies outside the grid.
    pub fn apply_flips(&mut self, flips: &[FlippedCell]) -> Result<()> {
        self.apply_flips_from(flips, 0)
    }

    /// Like [`Grid::apply_flips`] for a grid holding the global rows starting
    /// at `origin_y`.
    pub fn apply_flips_from(
        &mut self,
        flips: &[FlippedCell],
        origin_y: usize,
    ) -> Result<()> {
        for cell in flips {
            let y = cell.y.checked_sub(origin_y).ok_or_else(|| {
                Error::Bounds(format!(
                    "flip at row {} is above first row {}",
                    cell.y, origin_y
                ))
            })?;
            self.check_cell(cell.x, y)?;
        }
        for cell in flips {
            self.toggle(cell.x, cell.y - origin_y);
        }
        Ok(())
    }

    /// Every alive cell, in row-major order.
    pub fn alive_cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, value)| **value == ALIVE)
            .map(|(i, _)| Cell::new(i % self.width, i / self.width))
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|value| **value == ALIVE).count()
    }

    pub(crate) fn toggle(&mut self, x: usize, y: usize) {
        let cell = &mut self.cells[y * self.width + x];
        *cell = if *cell == ALIVE { DEAD } else { ALIVE };
    }

    fn check_cell(&self, x: usize, y: usize) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(Error::Bounds(format!(
                "cell ({}, {}) outside {}x{} grid",
                x, y, self.width, self.height
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Grid {}x{}", self.width, self.height)?;
        for y in 0..self.height {
            for value in self.row(y) {
                f.write_str(if *value == ALIVE { "#" } else { "." })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(list: &[(usize, usize)]) -> Vec<Cell> {
        list.iter().map(|&(x, y)| Cell::new(x, y)).collect()
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Grid::from_rows(vec![vec![0; 3], vec![0; 2]]).unwrap_err();
        assert!(matches!(err, Error::Bounds(_)));
        assert!(matches!(Grid::from_rows(vec![]), Err(Error::Bounds(_))));
    }

    #[test]
    fn applying_flips_twice_restores_the_grid() {
        let original =
            Grid::with_alive(6, 4, cells(&[(0, 0), (3, 2), (5, 3)])).unwrap();
        let flips = cells(&[(0, 0), (1, 1), (5, 3), (2, 2)]);

        let mut grid = original.clone();
        grid.apply_flips(&flips).unwrap();
        assert_ne!(grid, original);
        assert!(!grid.is_alive(0, 0));
        assert!(grid.is_alive(1, 1));

        grid.apply_flips(&flips).unwrap();
        assert_eq!(grid, original);
    }

    #[test]
    fn out_of_range_flip_leaves_grid_untouched() {
        let mut grid = Grid::new(3, 3);
        let err = grid.apply_flips(&cells(&[(1, 1), (3, 0)])).unwrap_err();
        assert!(matches!(err, Error::Bounds(_)));
        assert_eq!(grid, Grid::new(3, 3));
    }

    #[test]
    fn flips_from_an_offset_partition() {
        let mut part = Grid::new(4, 2);
        part.apply_flips_from(&cells(&[(1, 5), (2, 6)]), 5).unwrap();
        assert!(part.is_alive(1, 0));
        assert!(part.is_alive(2, 1));
        assert!(part.apply_flips_from(&cells(&[(0, 4)]), 5).is_err());
    }

    #[test]
    fn copied_rows_do_not_follow_later_writes() {
        let mut grid = Grid::new(3, 2);
        let line = grid.copy_row(0).unwrap();
        grid.set(1, 0, ALIVE).unwrap();
        assert_eq!(line, vec![DEAD; 3]);
        assert!(grid.copy_row(2).is_err());
    }

    #[test]
    fn halo_wraps_local_rows() {
        let local = Grid::with_alive(3, 2, cells(&[(1, 0)])).unwrap();
        let extended = local.with_halo(&[ALIVE; 3], &[DEAD; 3]).unwrap();
        assert_eq!(extended.height(), 4);
        assert_eq!(extended.row(0), &[ALIVE; 3]);
        assert!(extended.is_alive(1, 1));
        assert_eq!(extended.row(3), &[DEAD; 3]);
        assert!(local.with_halo(&[DEAD; 2], &[DEAD; 3]).is_err());
    }

    #[test]
    fn slice_and_paste() {
        let grid = Grid::with_alive(4, 4, cells(&[(0, 1), (3, 2)])).unwrap();
        let middle = grid.slice_rows(1..3).unwrap();
        assert_eq!(middle.alive_cells(), cells(&[(0, 0), (3, 1)]));
        assert!(grid.slice_rows(3..3).is_err());
        assert!(grid.slice_rows(2..5).is_err());

        let mut target = Grid::new(4, 4);
        target.paste(&middle, 0, 1).unwrap();
        assert_eq!(target, grid);
        assert!(target.paste(&middle, 1, 0).is_err());
    }
}
