use std::ops::Range;

use super::grid::{Cell, Grid, ALIVE};
use crate::error::{Error, Result};

/// Row and column offsets of the eight Moore neighbours.
const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Conway's rule: survival on 2 or 3 live neighbours, birth on exactly 3.
pub fn next_cell_state(is_alive: bool, live_neighbours: u8) -> bool {
    matches!((is_alive, live_neighbours), (true, 2) | (true, 3) | (false, 3))
}

/// Counts the live Moore neighbours of `(row, col)`, wrapping around every
/// edge so the grid behaves as a torus.
pub fn count_live_neighbours(grid: &Grid, row: usize, col: usize) -> u8 {
    let rows = grid.height() as isize;
    let cols = grid.width() as isize;
    let mut live = 0;
    for (dr, dc) in NEIGHBOURS {
        let r = (row as isize + dr + rows) % rows;
        let c = (col as isize + dc + cols) % cols;
        if grid.row(r as usize)[c as usize] == ALIVE {
            live += 1;
        }
    }
    live
}

/// Cells of `rows` that change state this turn.
///
/// Local row `r` is read from grid row `r + skip` and reported at global row
/// `origin_y + r`. A worker passes `skip = 1` to step over its leading halo
/// line.
pub fn flips(
    grid: &Grid,
    rows: Range<usize>,
    skip: usize,
    origin_y: usize,
) -> Vec<Cell> {
    let mut flipped = Vec::new();
    for r in rows {
        let y = r + skip;
        let line = grid.row(y);
        for (x, value) in line.iter().enumerate() {
            let alive = *value == ALIVE;
            let live = count_live_neighbours(grid, y, x);
            if next_cell_state(alive, live) != alive {
                flipped.push(Cell::new(x, origin_y + r));
            }
        }
    }
    flipped
}

/// Advances the whole grid by one turn and returns the cells that flipped.
pub fn step(grid: &mut Grid) -> Vec<Cell> {
    let flipped = flips(grid, 0..grid.height(), 0, 0);
    for cell in &flipped {
        grid.toggle(cell.x, cell.y);
    }
    flipped
}

/// Next state of the `xs × ys` section of `world`, neighbours wrapping around
/// the full world.
pub fn next_section(
    world: &Grid,
    ys: Range<usize>,
    xs: Range<usize>,
) -> Result<Grid> {
    if ys.start >= ys.end
        || xs.start >= xs.end
        || ys.end > world.height()
        || xs.end > world.width()
    {
        return Err(Error::Bounds(format!(
            "section x {:?}, y {:?} invalid for {}x{} world",
            xs,
            ys,
            world.width(),
            world.height()
        )));
    }
    let mut section = Grid::new(xs.len(), ys.len());
    for (sy, y) in ys.enumerate() {
        for (sx, x) in xs.clone().enumerate() {
            let alive = world.row(y)[x] == ALIVE;
            if next_cell_state(alive, count_live_neighbours(world, y, x)) {
                section.toggle(sx, sy);
            }
        }
    }
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: usize, height: usize, alive: &[(usize, usize)]) -> Grid {
        Grid::with_alive(
            width,
            height,
            alive.iter().map(|&(x, y)| Cell::new(x, y)),
        )
        .unwrap()
    }

    #[test]
    fn rule_table() {
        for live in 0..=8 {
            assert_eq!(next_cell_state(true, live), live == 2 || live == 3);
            assert_eq!(next_cell_state(false, live), live == 3);
        }
    }

    #[test]
    fn neighbours_wrap_around_corners() {
        // the opposite corners are all adjacent to (0, 0) on a torus
        let g = grid(5, 5, &[(4, 4), (0, 4), (4, 0)]);
        assert_eq!(count_live_neighbours(&g, 0, 0), 3);
        assert_eq!(count_live_neighbours(&g, 2, 2), 0);
    }

    #[test]
    fn blinker_oscillates() {
        let original = grid(5, 5, &[(1, 2), (2, 2), (3, 2)]);
        let mut g = original.clone();

        let flipped = step(&mut g);
        assert_eq!(flipped.len(), 4);
        assert_eq!(g, grid(5, 5, &[(2, 1), (2, 2), (2, 3)]));

        step(&mut g);
        assert_eq!(g, original);
    }

    #[test]
    fn flips_report_global_rows() {
        let g = grid(5, 5, &[(1, 2), (2, 2), (3, 2)]);
        let extended = g.slice_rows(1..4).unwrap();
        // rows 1..=3 of the world sit at extended rows 0..3; the middle row
        // is local row 0 once the first row is treated as halo
        let local = flips(&extended, 0..1, 1, 2);
        assert_eq!(local, vec![Cell::new(1, 2), Cell::new(3, 2)]);
    }

    #[test]
    fn section_matches_full_step() {
        let world = grid(6, 6, &[(0, 0), (1, 0), (5, 0), (3, 3), (3, 4)]);
        let mut stepped = world.clone();
        step(&mut stepped);

        let section = next_section(&world, 2..5, 1..6).unwrap();
        for y in 0..3 {
            for x in 0..5 {
                assert_eq!(section.get(x, y), stepped.get(x + 1, y + 2));
            }
        }
        assert!(next_section(&world, 3..2, 0..6).is_err());
        assert!(next_section(&world, 0..7, 0..6).is_err());
    }
}
