use std::{net::SocketAddr, time::Duration};

use futures::future::join_all;
use hashbrown::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    life::Grid,
    net::{
        retry::{with_retries, RetryPolicy},
        wire::{Collected, SectionResult},
    },
};

/// A bounded response slot belonging to one worker.
struct Slot {
    tx: mpsc::Sender<SectionResult>,
    rx: Mutex<mpsc::Receiver<SectionResult>>,
}

/// A named set of per-worker response slots.
pub(crate) struct Topic {
    slots: HashMap<SocketAddr, Slot>,
}

impl Topic {
    pub fn new(workers: impl IntoIterator<Item = SocketAddr>, buffer: u32) -> Self {
        let capacity = (buffer as usize).max(1);
        let slots = workers
            .into_iter()
            .map(|addr| {
                let (tx, rx) = mpsc::channel(capacity);
                (
                    addr,
                    Slot {
                        tx,
                        rx: Mutex::new(rx),
                    },
                )
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Puts a worker's result into its slot, waiting at most `timeout` for
    /// room.
    pub async fn deposit(
        &self,
        worker: SocketAddr,
        result: SectionResult,
        timeout: Duration,
    ) -> Result<()> {
        let slot = self.slots.get(&worker).ok_or_else(|| {
            Error::Internal(format!("no response slot for {}", worker))
        })?;
        slot.tx.send_timeout(result, timeout).await.map_err(|_| {
            Error::Timeout(format!(
                "slot for {} stayed full for {:?}",
                worker, timeout
            ))
        })
    }

    /// Takes one result from every slot, waiting on all of them at once.
    /// Slots that stay empty for the whole policy are left out.
    pub async fn collect(&self, policy: RetryPolicy) -> Vec<SectionResult> {
        let waits = self.slots.iter().map(|(addr, slot)| async move {
            let result = with_retries(policy, "collect", move || async move {
                slot.rx.lock().await.recv().await.ok_or_else(|| {
                    Error::Internal(format!("slot for {} closed", addr))
                })
            })
            .await;
            match result {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(%addr, "no response collected: {}", e);
                    None
                }
            }
        });
        join_all(waits).await.into_iter().flatten().collect()
    }
}

/// Pastes every section into a fresh `width × height` grid. Sections that
/// do not fit are skipped.
pub(crate) fn merge(
    width: usize,
    height: usize,
    mut results: Vec<SectionResult>,
) -> Result<Collected> {
    if width == 0 || height == 0 {
        return Err(Error::Bounds(format!(
            "cannot collect into a {}x{} grid",
            width, height
        )));
    }
    results.sort_by_key(|r| (r.start_y, r.start_x));

    let mut world = Grid::new(width, height);
    let mut alive_cells = Vec::new();
    let mut merged = Vec::with_capacity(results.len());
    for result in results {
        if let Err(e) = world.paste(&result.section, result.start_x, result.start_y)
        {
            warn!("skipping section: {}", e);
            continue;
        }
        alive_cells.extend_from_slice(&result.alive_cells);
        merged.push(result);
    }
    debug!(sections = merged.len(), alive = alive_cells.len(), "merged");
    Ok(Collected {
        world,
        alive_cells,
        results: merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        life::{Cell, ALIVE},
        net::wire::SectionRequest,
        worker::Worker,
    };

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::builder()
            .attempts(2)
            .timeout(Duration::from_millis(30))
            .build()
    }

    fn section(y: usize) -> SectionResult {
        let mut section = Grid::new(2, 1);
        section.set(1, 0, ALIVE).unwrap();
        SectionResult {
            start_x: 0,
            end_x: 2,
            start_y: y,
            end_y: y + 1,
            section,
            alive_cells: vec![Cell::new(1, y)],
        }
    }

    #[tokio::test]
    async fn collect_returns_what_arrived() {
        let topic = Topic::new([addr(1), addr(2), addr(3)], 0);
        assert_eq!(topic.len(), 3);
        let timeout = Duration::from_millis(50);
        topic.deposit(addr(1), section(0), timeout).await.unwrap();
        topic.deposit(addr(3), section(2), timeout).await.unwrap();

        let mut results = topic.collect(quick()).await;
        results.sort_by_key(|r| r.start_y);
        assert_eq!(results, vec![section(0), section(2)]);
    }

    #[tokio::test]
    async fn full_slots_time_out() {
        let topic = Topic::new([addr(1)], 1);
        let timeout = Duration::from_millis(20);
        topic.deposit(addr(1), section(0), timeout).await.unwrap();
        let err = topic.deposit(addr(1), section(1), timeout).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(topic.deposit(addr(9), section(0), timeout).await.is_err());
    }

    #[test]
    fn misfitting_sections_are_skipped() {
        let collected = merge(2, 2, vec![section(1), section(5)]).unwrap();
        assert_eq!(collected.results, vec![section(1)]);
        assert_eq!(collected.alive_cells, vec![Cell::new(1, 1)]);
        assert!(collected.world.is_alive(1, 1));
        assert!(matches!(merge(0, 2, vec![]), Err(Error::Bounds(_))));
    }

    #[test]
    fn merged_sections_equal_the_full_step() {
        let mut world =
            Grid::with_alive(6, 6, [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)]
                .map(|(x, y)| Cell::new(x, y)))
            .unwrap();
        let results = [0..2, 2..3, 3..6]
            .into_iter()
            .map(|ys| {
                Worker::calculate_section(SectionRequest {
                    world: world.clone(),
                    start_x: 0,
                    end_x: 6,
                    start_y: ys.start,
                    end_y: ys.end,
                })
                .unwrap()
            })
            .collect();
        let collected = merge(6, 6, results).unwrap();
        crate::life::step(&mut world);
        assert_eq!(collected.world, world);
        assert_eq!(collected.alive_cells, world.alive_cells());
    }
}
