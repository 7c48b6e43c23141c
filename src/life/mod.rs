//! The cellular automaton itself: the byte grid and Conway's rule on a torus.

mod grid;
mod rule;

pub use grid::{Cell, FlippedCell, Grid, ALIVE, DEAD};
pub use rule::{
    count_live_neighbours, flips, next_cell_state, next_section, step,
};
