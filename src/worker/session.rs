use std::time::Duration;

use tokio::sync::{watch, RwLock};

use super::client::WorkerClient;
use crate::{
    error::{Error, Result},
    life::{Cell, Grid},
    net::retry::{with_retries, RetryPolicy},
};

/// Where a worker is in its current turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    /// Asking both neighbours for their boundary rows.
    RequestingHalo,
    /// Halo rows received; waiting until both neighbours have asked for ours.
    AwaitingOwnRequests,
    Computing,
}

/// One side of the ring. A ring of one node is its own neighbour and skips
/// the network.
#[derive(Clone)]
pub(crate) enum Neighbour {
    Local,
    Remote(WorkerClient),
}

impl Neighbour {
    async fn first_line(
        &self,
        session: &Session,
        turn: u64,
        policy: RetryPolicy,
    ) -> Result<Vec<u8>> {
        match self {
            Neighbour::Local => session.take_first_line(turn).await,
            Neighbour::Remote(client) => {
                with_retries(policy, "GetFirstLine", || client.first_line(turn))
                    .await
            }
        }
    }

    async fn last_line(
        &self,
        session: &Session,
        turn: u64,
        policy: RetryPolicy,
    ) -> Result<Vec<u8>> {
        match self {
            Neighbour::Local => session.take_last_line(turn).await,
            Neighbour::Remote(client) => {
                with_retries(policy, "GetLastLine", || client.last_line(turn))
                    .await
            }
        }
    }
}

/// Which of our boundary rows the neighbours have fetched for `turn`.
///
/// Flags, not counts: a retried request that lands twice in one turn marks
/// its row once, and a request for any other turn marks nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Barrier {
    turn: u64,
    first_taken: bool,
    last_taken: bool,
}

impl Barrier {
    fn passed(&self) -> bool {
        self.first_taken && self.last_taken
    }
}

/// Everything a worker learns from one `Init`: its rows, its neighbours, and
/// the turn barrier. Turns are counted from zero at `Init`.
pub(crate) struct Session {
    start_y: usize,
    rows: RwLock<Grid>,
    barrier: watch::Sender<Barrier>,
    previous: Neighbour,
    next: Neighbour,
}

impl Session {
    pub fn new(
        rows: Grid,
        start_y: usize,
        previous: Neighbour,
        next: Neighbour,
    ) -> Self {
        let (barrier, _) = watch::channel(Barrier::default());
        Self {
            start_y,
            rows: RwLock::new(rows),
            barrier,
            previous,
            next,
        }
    }

    pub fn start_y(&self) -> usize {
        self.start_y
    }

    /// The turn being computed next; equals the number of turns applied.
    pub fn turn(&self) -> u64 {
        self.barrier.borrow().turn
    }

    /// Copies the first owned row for a neighbour computing `turn`.
    pub async fn take_first_line(&self, turn: u64) -> Result<Vec<u8>> {
        let rows = self.rows.read().await;
        self.mark(turn, |barrier| &mut barrier.first_taken)?;
        Ok(rows.row(0).to_vec())
    }

    /// Copies the last owned row for a neighbour computing `turn`.
    pub async fn take_last_line(&self, turn: u64) -> Result<Vec<u8>> {
        let rows = self.rows.read().await;
        self.mark(turn, |barrier| &mut barrier.last_taken)?;
        Ok(rows.row(rows.height() - 1).to_vec())
    }

    /// Records a halo request. Callers hold the rows lock, so the turn
    /// cannot advance between the check and the copy.
    fn mark(&self, turn: u64, side: fn(&mut Barrier) -> &mut bool) -> Result<()> {
        let mut outcome = Ok(());
        self.barrier.send_if_modified(|barrier| {
            if barrier.turn != turn {
                outcome = Err(Error::OutOfTurn {
                    requested: turn,
                    current: barrier.turn,
                });
                return false;
            }
            !std::mem::replace(side(barrier), true)
        });
        outcome
    }

    /// The previous neighbour's last row and the next neighbour's first row.
    pub async fn fetch_halo(
        &self,
        policy: RetryPolicy,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let turn = self.turn();
        tokio::try_join!(
            self.previous.last_line(self, turn, policy),
            self.next.first_line(self, turn, policy),
        )
    }

    /// Waits until both neighbours have fetched their halo rows from us for
    /// the current turn.
    pub async fn await_own_requests(&self, deadline: Duration) -> Result<()> {
        let mut rx = self.barrier.subscribe();
        let passed = async { rx.wait_for(Barrier::passed).await.map(|_| ()) };
        match tokio::time::timeout(deadline, passed).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Internal("turn barrier dropped".into())),
            Err(_) => Err(Error::Timeout(format!(
                "neighbours did not fetch our halo rows within {:?}",
                deadline
            ))),
        }
    }

    pub async fn extended(&self, top: &[u8], bottom: &[u8]) -> Result<Grid> {
        self.rows.read().await.with_halo(top, bottom)
    }

    /// Applies the turn's flips and moves on to the next turn.
    pub async fn apply(&self, flipped: &[Cell]) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.apply_flips_from(flipped, self.start_y)?;
        self.barrier.send_modify(|barrier| {
            *barrier = Barrier {
                turn: barrier.turn + 1,
                ..Barrier::default()
            }
        });
        Ok(())
    }

    pub async fn snapshot(&self) -> Grid {
        self.rows.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::life::ALIVE;

    const SHORT: Duration = Duration::from_millis(50);

    fn session() -> Session {
        let rows = Grid::with_alive(3, 2, [Cell::new(1, 0)]).unwrap();
        Session::new(rows, 4, Neighbour::Local, Neighbour::Local)
    }

    #[tokio::test]
    async fn barrier_needs_both_rows_for_the_current_turn() {
        let session = session();
        assert!(session.await_own_requests(SHORT).await.is_err());

        assert_eq!(session.take_first_line(0).await.unwrap(), vec![0, ALIVE, 0]);
        assert!(matches!(
            session.await_own_requests(SHORT).await,
            Err(Error::Timeout(_))
        ));
        session.take_last_line(0).await.unwrap();
        session.await_own_requests(SHORT).await.unwrap();
    }

    #[tokio::test]
    async fn repeated_requests_do_not_carry_into_the_next_turn() {
        let session = session();
        for _ in 0..2 {
            session.take_first_line(0).await.unwrap();
            session.take_last_line(0).await.unwrap();
        }
        session.await_own_requests(SHORT).await.unwrap();
        session.apply(&[]).await.unwrap();
        assert_eq!(session.turn(), 1);

        // nobody has asked for turn 1 rows yet
        assert!(matches!(
            session.await_own_requests(SHORT).await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn late_requests_are_refused() {
        let session = session();
        session.take_first_line(0).await.unwrap();
        session.take_last_line(0).await.unwrap();
        session.apply(&[Cell::new(1, 4)]).await.unwrap();

        // a retried turn-0 call answered after the turn moved on
        let late = session.take_first_line(0).await.unwrap_err();
        assert!(matches!(late, Error::OutOfTurn { requested: 0, current: 1 }));
        assert!(session.take_last_line(2).await.is_err());
        assert!(session.await_own_requests(SHORT).await.is_err());

        assert_eq!(session.take_first_line(1).await.unwrap(), vec![0; 3]);
    }
}
