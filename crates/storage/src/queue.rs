//! Background flush queue with one lane per page
//!
//! A dispatcher task routes submitted snapshots to per-page lane tasks.
//! Lanes run concurrently on the tokio worker pool; within a lane, writes
//! are applied strictly in submission order. A lane that stays idle for a
//! while exits and is started again on the next write to its page.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pdf_annotator_core::PageSnapshot;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, trace, warn, Instrument};

use crate::error::{PersistenceError, PersistenceResult};
use crate::repository::AnnotationRepository;
use crate::retry::RetryPolicy;

struct FlushJob {
    snapshot: PageSnapshot,
    reply: oneshot::Sender<PersistenceResult<()>>,
}

enum Command {
    Flush(FlushJob),
    LaneCount(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Default idle time before a lane exits
pub const LANE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

struct Lane {
    sender: mpsc::UnboundedSender<FlushJob>,
    handle: JoinHandle<()>,
}

/// Completion handle for a submitted flush
#[derive(Debug)]
pub struct FlushTicket {
    page_index: u32,
    revision: u64,
    receiver: oneshot::Receiver<PersistenceResult<()>>,
}

impl FlushTicket {
    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Wait for the write; `QueueClosed` if the queue shut down first
    pub async fn wait(self) -> PersistenceResult<()> {
        self.receiver.await.map_err(|_| PersistenceError::QueueClosed)?
    }

    /// Result of the write if it already finished
    pub fn try_result(&mut self) -> Option<PersistenceResult<()>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PersistenceError::QueueClosed)),
        }
    }
}

/// Per-page write-through queue in front of a repository
///
/// Must be created inside a tokio runtime.
pub struct FlushQueue {
    commands: mpsc::UnboundedSender<Command>,
}

impl FlushQueue {
    pub fn new(repository: Arc<dyn AnnotationRepository>, retry: RetryPolicy) -> Self {
        Self::with_idle_timeout(repository, retry, LANE_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(repository: Arc<dyn AnnotationRepository>, retry: RetryPolicy, idle: Duration) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let lanes = LaneSpawner { repository, retry, idle };
        tokio::spawn(dispatch(receiver, lanes).instrument(info_span!("flush_dispatcher")));
        Self { commands }
    }

    /// Queue a snapshot without waiting for it to be written
    pub fn submit(&self, snapshot: PageSnapshot) -> FlushTicket {
        let (reply, receiver) = oneshot::channel();
        let ticket = FlushTicket { page_index: snapshot.page_index, revision: snapshot.revision, receiver };
        if self.commands.send(Command::Flush(FlushJob { snapshot, reply })).is_err() {
            // Dropped reply sender resolves the ticket to QueueClosed
            warn!(page = ticket.page_index, "flush submitted after shutdown");
        }
        ticket
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Lanes still running; 0 once the queue is closed
    pub async fn active_lanes(&self) -> usize {
        let (reply, count) = oneshot::channel();
        if self.commands.send(Command::LaneCount(reply)).is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }

    /// Stop accepting work and wait for every lane to drain
    pub async fn shutdown(&self) -> PersistenceResult<()> {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_err() {
            return Ok(());
        }
        done.await.map_err(|_| PersistenceError::QueueClosed)
    }
}

struct LaneSpawner {
    repository: Arc<dyn AnnotationRepository>,
    retry: RetryPolicy,
    idle: Duration,
}

impl LaneSpawner {
    fn spawn(&self, page: u32) -> Lane {
        let (sender, receiver) = mpsc::unbounded_channel();
        let span = info_span!("flush_lane", page);
        let handle = tokio::spawn(run_lane(receiver, self.repository.clone(), self.retry, self.idle).instrument(span));
        debug!(page, "flush lane started");
        Lane { sender, handle }
    }
}

async fn dispatch(mut commands: mpsc::UnboundedReceiver<Command>, spawner: LaneSpawner) {
    let mut lanes: HashMap<u32, Lane> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Flush(mut job) => {
                let page = job.snapshot.page_index;
                lanes.retain(|_, lane| !lane.handle.is_finished());
                loop {
                    let lane = lanes.entry(page).or_insert_with(|| spawner.spawn(page));
                    match lane.sender.send(job) {
                        Ok(()) => break,
                        Err(mpsc::error::SendError(returned)) => {
                            // The lane closed itself while idle; let it finish before replacing it
                            if let Some(lane) = lanes.remove(&page) {
                                if let Err(error) = lane.handle.await {
                                    warn!(page, %error, "flush lane panicked");
                                }
                            }
                            job = returned;
                        }
                    }
                }
            }
            Command::LaneCount(reply) => {
                lanes.retain(|_, lane| !lane.handle.is_finished());
                let _ = reply.send(lanes.len());
            }
            Command::Shutdown(ack) => {
                commands.close();
                // Remaining flushes queued behind the shutdown are rejected
                while let Ok(command) = commands.try_recv() {
                    match command {
                        Command::Flush(job) => {
                            let _ = job.reply.send(Err(PersistenceError::QueueClosed));
                        }
                        Command::LaneCount(reply) => {
                            let _ = reply.send(0);
                        }
                        Command::Shutdown(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                // Dropping the senders lets each lane finish its backlog and exit
                let handles: Vec<JoinHandle<()>> = lanes.drain().map(|(_, lane)| lane.handle).collect();
                for handle in handles {
                    if let Err(error) = handle.await {
                        warn!(%error, "flush lane panicked");
                    }
                }
                debug!("flush queue drained");
                let _ = ack.send(());
                return;
            }
        }
    }
}

async fn run_lane(
    mut jobs: mpsc::UnboundedReceiver<FlushJob>,
    repository: Arc<dyn AnnotationRepository>,
    retry: RetryPolicy,
    idle: Duration,
) {
    loop {
        let FlushJob { snapshot, reply } = match tokio::time::timeout(idle, jobs.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                // Jobs sent before the close are still received below
                jobs.close();
                trace!("flush lane idle");
                continue;
            }
        };
        let result = retry.run("write_page", || repository.write_page(&snapshot)).await;
        match &result {
            Ok(()) => trace!(revision = snapshot.revision, "flush applied"),
            Err(error) => warn!(revision = snapshot.revision, %error, "flush failed"),
        }
        // The submitter may have stopped waiting
        let _ = reply.send(result);
    }
}
