use std::sync::Arc;

use futures::future::try_join_all;

use crate::{
    error::{Error, Result},
    life::{self, Cell, Grid},
    partition,
};

/// Flipped cells of every local row of `extended`, a partition wrapped in
/// one halo line above and one below.
///
/// The rows are split into up to `threads` contiguous ranges, each computed
/// on its own blocking task.
pub async fn flips_in_parallel(
    extended: Arc<Grid>,
    start_y: usize,
    threads: u32,
) -> Result<Vec<Cell>> {
    let height = extended.height().saturating_sub(2);
    if height == 0 {
        return Err(Error::Bounds("partition has no rows".into()));
    }
    let tasks = (threads as usize).min(height).max(1);
    let handles = partition::plan(height, tasks)?.into_iter().map(|rows| {
        let extended = extended.clone();
        tokio::task::spawn_blocking(move || {
            life::flips(&extended, rows, 1, start_y)
        })
    });
    let partials = try_join_all(handles)
        .await
        .map_err(|e| Error::Internal(format!("compute task failed: {}", e)))?;
    Ok(partials.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::life::ALIVE;

    fn soup(width: usize, height: usize, seed: u64) -> Grid {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut grid = Grid::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if rng.gen_bool(0.35) {
                    grid.set(x, y, ALIVE).unwrap();
                }
            }
        }
        grid
    }

    /// One turn computed the way the ring does it: every partition sees only
    /// its own rows plus its neighbours' boundary rows.
    async fn partitioned_turn(world: &Grid, parts: usize, threads: u32) -> Grid {
        let ranges = partition::plan(world.height(), parts).unwrap();
        let slices: Vec<Grid> = ranges
            .iter()
            .map(|r| world.slice_rows(r.clone()).unwrap())
            .collect();
        let mut merged = world.clone();
        for (i, range) in ranges.iter().enumerate() {
            let (prev, next) = partition::ring_neighbours(i, parts);
            let top = slices[prev].copy_row(slices[prev].height() - 1).unwrap();
            let bottom = slices[next].copy_row(0).unwrap();
            let extended = Arc::new(slices[i].with_halo(&top, &bottom).unwrap());
            let flipped = flips_in_parallel(extended, range.start, threads)
                .await
                .unwrap();
            merged.apply_flips(&flipped).unwrap();
        }
        merged
    }

    #[tokio::test]
    async fn partitioned_turns_match_the_reference() {
        for (width, height, seed) in [(7, 9, 1), (12, 12, 2), (5, 16, 3)] {
            for parts in [1, 2, 3, 4] {
                let mut reference = soup(width, height, seed);
                let mut world = reference.clone();
                for _ in 0..6 {
                    life::step(&mut reference);
                    world = partitioned_turn(&world, parts, 3).await;
                    assert_eq!(world, reference, "{} partitions", parts);
                }
            }
        }
    }

    #[tokio::test]
    async fn thread_count_does_not_change_the_result() {
        let world = soup(10, 8, 7);
        let extended = Arc::new(world.with_halo(world.row(7), world.row(0)).unwrap());
        let mut single = flips_in_parallel(extended.clone(), 0, 1).await.unwrap();
        for threads in [0, 2, 5, 64] {
            let mut split =
                flips_in_parallel(extended.clone(), 0, threads).await.unwrap();
            single.sort();
            split.sort();
            assert_eq!(split, single);
        }
    }
}
