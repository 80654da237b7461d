// =============================================================================
// Board Actor — single writer for the board session
// =============================================================================
//
// Every mutation (snapshot results, pushed candles, interval switches, the
// auto-refresh toggle) arrives as a `BoardCommand` on one mpsc channel and is
// applied in order by one task. Readers never lock: rendered snapshots are
// published on a `watch` channel and merged push records are fanned out on a
// `broadcast` channel.
//
// Fetches run on their own tasks and report back through the same channel,
// tagged with the interval they were started for. A result whose interval is
// no longer current is discarded. A reload requested while a fetch for the
// current interval is in flight is coalesced into it.
//
// The actor holds only a weak sender to itself, so it stops once every
// `BoardHandle` is gone.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::board::merger::MergeOutcome;
use crate::board::record::{CandleRecord, RecordPayload};
use crate::board::session::{BoardSession, LoadOutcome};
use crate::board::view::BoardSnapshot;
use crate::market_data::source::{FetchError, FetchedBatch, SnapshotSource};
use crate::types::Interval;

const COMMAND_CAPACITY: usize = 256;
const CANDLE_BROADCAST_CAPACITY: usize = 256;

pub enum BoardCommand {
    Reload,
    SnapshotFetched {
        interval: Interval,
        result: Result<FetchedBatch, FetchError>,
    },
    Push {
        interval: Interval,
        record: CandleRecord,
    },
    SetInterval(Interval),
    SetAutoRefresh(bool),
}

/// A merged live record, as sent to push subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct CandlePush {
    pub interval: Interval,
    #[serde(flatten)]
    pub record: RecordPayload,
}

#[derive(Debug, Clone, Copy)]
pub struct ActorSettings {
    pub refresh_every: Duration,
    pub auto_refresh: bool,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            refresh_every: Duration::from_secs(60),
            auto_refresh: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable access to a running board.
#[derive(Clone)]
pub struct BoardHandle {
    commands: mpsc::Sender<BoardCommand>,
    snapshots: watch::Receiver<Arc<BoardSnapshot>>,
    interval: watch::Receiver<Interval>,
    candles: broadcast::Sender<CandlePush>,
}

impl BoardHandle {
    async fn send(&self, command: BoardCommand) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("board actor has stopped"))
    }

    /// Request a full reload of the current interval.
    pub async fn reload(&self) -> anyhow::Result<()> {
        self.send(BoardCommand::Reload).await
    }

    /// Offer a live record produced for `interval`.
    pub async fn push(&self, interval: Interval, record: CandleRecord) -> anyhow::Result<()> {
        self.send(BoardCommand::Push { interval, record }).await
    }

    pub async fn set_interval(&self, interval: Interval) -> anyhow::Result<()> {
        self.send(BoardCommand::SetInterval(interval)).await
    }

    pub async fn set_auto_refresh(&self, enabled: bool) -> anyhow::Result<()> {
        self.send(BoardCommand::SetAutoRefresh(enabled)).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<BoardSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<BoardSnapshot>> {
        self.snapshots.clone()
    }

    pub fn interval(&self) -> Interval {
        *self.interval.borrow()
    }

    pub fn watch_interval(&self) -> watch::Receiver<Interval> {
        self.interval.clone()
    }

    pub fn subscribe_candles(&self) -> broadcast::Receiver<CandlePush> {
        self.candles.subscribe()
    }
}

/// Start the actor for `session` and return a handle to it. An initial load
/// is issued immediately.
pub fn spawn_board<S: SnapshotSource>(
    session: BoardSession,
    source: Arc<S>,
    settings: ActorSettings,
) -> BoardHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (snap_tx, snap_rx) = watch::channel(Arc::new(session.render(0, settings.auto_refresh)));
    let (interval_tx, interval_rx) = watch::channel(session.interval());
    let (candle_tx, _) = broadcast::channel(CANDLE_BROADCAST_CAPACITY);

    let mut ticker = tokio::time::interval_at(
        Instant::now() + settings.refresh_every,
        settings.refresh_every,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let actor = BoardActor {
        session,
        source,
        commands: cmd_rx,
        loopback: cmd_tx.downgrade(),
        snapshots: snap_tx,
        interval: interval_tx,
        candles: candle_tx.clone(),
        auto_refresh: settings.auto_refresh,
        ticker,
        in_flight: None,
        version: 0,
    };
    tokio::spawn(actor.run());

    BoardHandle {
        commands: cmd_tx,
        snapshots: snap_rx,
        interval: interval_rx,
        candles: candle_tx,
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct BoardActor<S> {
    session: BoardSession,
    source: Arc<S>,
    commands: mpsc::Receiver<BoardCommand>,
    loopback: mpsc::WeakSender<BoardCommand>,
    snapshots: watch::Sender<Arc<BoardSnapshot>>,
    interval: watch::Sender<Interval>,
    candles: broadcast::Sender<CandlePush>,
    auto_refresh: bool,
    ticker: tokio::time::Interval,
    /// Interval of the fetch currently running, if any.
    in_flight: Option<Interval>,
    version: u64,
}

impl<S: SnapshotSource> BoardActor<S> {
    async fn run(mut self) {
        info!(
            interval = %self.session.interval(),
            auto_refresh = self.auto_refresh,
            "board actor started"
        );
        self.start_fetch();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = self.ticker.tick(), if self.auto_refresh => {
                    debug!("auto-refresh tick");
                    self.start_fetch();
                }
            }
        }

        info!("board actor stopped: all handles dropped");
    }

    fn handle(&mut self, command: BoardCommand) {
        match command {
            BoardCommand::Reload => self.start_fetch(),
            BoardCommand::SnapshotFetched { interval, result } => {
                self.on_snapshot(interval, result)
            }
            BoardCommand::Push { interval, record } => self.on_push(interval, record),
            BoardCommand::SetInterval(interval) => {
                if self.session.switch_interval(interval) {
                    self.interval.send_replace(interval);
                    self.publish();
                    self.start_fetch();
                }
            }
            BoardCommand::SetAutoRefresh(enabled) => {
                if enabled != self.auto_refresh {
                    self.auto_refresh = enabled;
                    if enabled {
                        self.ticker.reset();
                    }
                    info!(enabled, "auto-refresh toggled");
                    self.publish();
                }
            }
        }
    }

    fn start_fetch(&mut self) {
        let interval = self.session.interval();
        if self.in_flight == Some(interval) {
            debug!(%interval, "reload coalesced into in-flight fetch");
            return;
        }
        self.in_flight = Some(interval);

        let source = Arc::clone(&self.source);
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            let result = source.fetch(interval).await;
            if let Some(tx) = loopback.upgrade() {
                let _ = tx
                    .send(BoardCommand::SnapshotFetched { interval, result })
                    .await;
            }
        });
    }

    fn on_snapshot(&mut self, interval: Interval, result: Result<FetchedBatch, FetchError>) {
        if self.in_flight == Some(interval) {
            self.in_flight = None;
        }
        if interval != self.session.interval() {
            debug!(%interval, current = %self.session.interval(), "discarding stale snapshot");
            return;
        }
        match self.session.apply_fetch(result) {
            LoadOutcome::Loaded(retained) => debug!(%interval, retained, "snapshot applied"),
            LoadOutcome::EmptyResult => debug!(%interval, "snapshot was empty"),
            LoadOutcome::Failed => debug!(%interval, "snapshot fetch failed, keeping board"),
        }
        self.publish();
    }

    fn on_push(&mut self, interval: Interval, record: CandleRecord) {
        if interval != self.session.interval() {
            debug!(%interval, current = %self.session.interval(), "dropping push for inactive interval");
            return;
        }
        let payload = record.to_payload(self.session.settings().zone);
        match self.session.apply_update(record) {
            Ok(MergeOutcome::Evicted) => {
                debug!(time = %payload.time, "pushed record older than the working set");
            }
            Ok(outcome) => {
                debug!(?outcome, time = %payload.time, result = %payload.result, "live record merged");
                // No subscribers is fine.
                let _ = self.candles.send(CandlePush {
                    interval,
                    record: payload,
                });
                self.publish();
            }
            Err(e) => {
                warn!(error = %e, "rejected pushed record");
                self.publish();
            }
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        let snapshot = self.session.render(self.version, self.auto_refresh);
        self.snapshots.send_replace(Arc::new(snapshot));
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::record::{BaccaratResult, Timestamp};
    use crate::board::view::BoardStatus;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE: i64 = 60_000;
    const ANCHOR: i64 = 1_704_067_260_000;
    const WAIT: Duration = Duration::from_secs(2);

    fn rec(i: i64) -> CandleRecord {
        CandleRecord {
            time: Timestamp::from_millis(ANCHOR + i * MINUTE).unwrap(),
            close_time: None,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: Some(100.5),
            price: 100.5,
            volume: 1.0,
            result: BaccaratResult::Banker,
        }
    }

    fn batch(n: i64) -> Result<FetchedBatch, FetchError> {
        Ok(FetchedBatch {
            records: (0..n).map(rec).collect(),
            rejected: 0,
        })
    }

    /// Serves queued results; once the queue is empty, one record per minute
    /// of the interval length so that intervals are distinguishable.
    struct StubSource {
        queued: Mutex<VecDeque<Result<FetchedBatch, FetchError>>>,
        calls: AtomicUsize,
        delay: Duration,
        slow_interval: Option<Interval>,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                queued: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(5),
                slow_interval: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SnapshotSource for StubSource {
        async fn fetch(&self, interval: Interval) -> Result<FetchedBatch, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = if self.slow_interval == Some(interval) {
                self.delay * 40
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;
            let queued = self.queued.lock().pop_front();
            queued.unwrap_or_else(|| match interval {
                Interval::OneMinute => batch(3),
                Interval::FiveMinutes => batch(5),
                Interval::FifteenMinutes => batch(15),
                Interval::OneHour => batch(60),
            })
        }
    }

    async fn wait_until(
        handle: &BoardHandle,
        pred: impl FnMut(&Arc<BoardSnapshot>) -> bool,
    ) -> Arc<BoardSnapshot> {
        let mut rx = handle.watch_snapshots();
        let snap = tokio::time::timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("timed out waiting for snapshot")
            .expect("board actor stopped");
        Arc::clone(&snap)
    }

    fn start(source: Arc<StubSource>, settings: ActorSettings) -> BoardHandle {
        spawn_board(BoardSession::default(), source, settings)
    }

    #[tokio::test]
    async fn initial_load_publishes_ready_board() {
        let handle = start(Arc::new(StubSource::new()), ActorSettings::default());
        assert_eq!(handle.snapshot().status, BoardStatus::Loading);

        let snap = wait_until(&handle, |s| s.status == BoardStatus::Ready).await;
        assert_eq!(snap.window_len, 3);
        assert!(snap.version >= 1);
    }

    #[tokio::test]
    async fn push_merges_and_broadcasts() {
        let handle = start(Arc::new(StubSource::new()), ActorSettings::default());
        wait_until(&handle, |s| s.window_len == 3).await;

        let mut candles = handle.subscribe_candles();
        handle.push(Interval::OneMinute, rec(3)).await.unwrap();

        let pushed = tokio::time::timeout(WAIT, candles.recv()).await.unwrap().unwrap();
        assert_eq!(pushed.interval, Interval::OneMinute);
        assert_eq!(pushed.record.time, "2024-01-01 00:04:00");
        assert!(pushed.record.is_up);

        let snap = wait_until(&handle, |s| s.window_len == 4).await;
        assert_eq!(snap.working_set_len, 4);
    }

    #[tokio::test]
    async fn push_for_other_interval_is_ignored() {
        let handle = start(Arc::new(StubSource::new()), ActorSettings::default());
        let ready = wait_until(&handle, |s| s.window_len == 3).await;

        handle.push(Interval::OneHour, rec(3)).await.unwrap();
        // A valid push for the current interval acts as a barrier.
        handle.push(Interval::OneMinute, rec(1)).await.unwrap();
        let snap = wait_until(&handle, |s| s.version > ready.version).await;
        assert_eq!(snap.window_len, 3);
    }

    #[tokio::test]
    async fn stale_snapshot_after_switch_is_discarded() {
        let mut source = StubSource::new();
        source.slow_interval = Some(Interval::OneMinute);
        let handle = start(Arc::new(source), ActorSettings::default());

        handle.set_interval(Interval::FiveMinutes).await.unwrap();
        let mut intervals = handle.watch_interval();
        let switched = tokio::time::timeout(WAIT, intervals.wait_for(|iv| *iv == Interval::FiveMinutes))
            .await
            .is_ok();
        assert!(switched);

        let snap = wait_until(&handle, |s| s.status == BoardStatus::Ready).await;
        assert_eq!(snap.interval, Interval::FiveMinutes);
        assert_eq!(snap.window_len, 5);

        // Let the slow one-minute fetch land; the board must not change.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let after = handle.snapshot();
        assert_eq!(after.interval, Interval::FiveMinutes);
        assert_eq!(after.window_len, 5);
        assert_eq!(handle.interval(), Interval::FiveMinutes);
    }

    #[tokio::test]
    async fn reloads_coalesce_while_in_flight() {
        let mut source = StubSource::new();
        source.slow_interval = Some(Interval::OneMinute);
        let source = Arc::new(source);
        let handle = start(Arc::clone(&source), ActorSettings::default());

        for _ in 0..3 {
            handle.reload().await.unwrap();
        }
        wait_until(&handle, |s| s.status == BoardStatus::Ready).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_board() {
        let source = StubSource::new();
        source.queued.lock().push_back(batch(4));
        source
            .queued
            .lock()
            .push_back(Err(FetchError::Transport("connection reset".into())));
        let handle = start(Arc::new(source), ActorSettings::default());
        wait_until(&handle, |s| s.window_len == 4).await;

        handle.reload().await.unwrap();
        let snap = wait_until(&handle, |s| s.error.is_some()).await;
        assert_eq!(snap.status, BoardStatus::Ready);
        assert_eq!(snap.window_len, 4);
    }

    #[tokio::test]
    async fn auto_refresh_polls_periodically() {
        let source = Arc::new(StubSource::new());
        let handle = start(
            Arc::clone(&source),
            ActorSettings {
                refresh_every: Duration::from_millis(30),
                auto_refresh: false,
            },
        );
        wait_until(&handle, |s| s.status == BoardStatus::Ready).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls(), 1);

        handle.set_auto_refresh(true).await.unwrap();
        let snap = wait_until(&handle, |s| s.auto_refresh).await;
        assert!(snap.auto_refresh);
        tokio::time::timeout(WAIT, async {
            while source.calls() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("auto-refresh should keep fetching");
    }

    #[tokio::test]
    async fn actor_stops_when_handles_drop() {
        let handle = start(Arc::new(StubSource::new()), ActorSettings::default());
        let mut rx = handle.watch_snapshots();
        drop(handle);
        let closed = tokio::time::timeout(WAIT, async {
            while rx.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
