//! Reconciliation poller.
//!
//! [`ReconciliationPoller`] keeps one poll stream per non-terminal node.
//! Each stream is a task that fetches the project snapshot on a fixed
//! interval, reconciles its node into the session's
//! [`NodeStore`](comfystudio_core::store::NodeStore) and stops once the
//! node is terminal. Requests within a stream are awaited one at a time
//! and stamped with a sequence number drawn from a counter shared by every
//! stream of the poller, which the store uses to drop out-of-order results.
//! A stream restarted for the same node therefore always outranks the one
//! it replaces.
//!
//! Streams are cancelled per project ([`ReconciliationPoller::cancel_project`])
//! or all at once on [`ReconciliationPoller::shutdown`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use comfystudio_core::node::{OutputKind, Transition};
use comfystudio_core::store::{ReconcileOutcome, Sequence};
use comfystudio_core::types::{NodeId, ProjectId};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::ProjectSource;
use crate::events::StudioEvent;
use crate::state::SharedState;

/// Broadcast channel capacity for studio events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each stream to exit.
const STREAM_STOP_TIMEOUT: Duration = Duration::from_secs(5);

type StreamMap = Arc<RwLock<HashMap<NodeId, PollStream>>>;

/// Owns every active poll stream.
pub struct ReconciliationPoller {
    streams: StreamMap,
    source: Arc<dyn ProjectSource>,
    state: SharedState,
    event_tx: broadcast::Sender<StudioEvent>,
    interval: Duration,
    next_stream_id: AtomicU64,
    /// Source of poll sequence numbers for every stream.
    sequences: Arc<AtomicU64>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Bookkeeping for a single stream.
struct PollStream {
    /// Distinguishes a stream from a later one for the same node.
    stream_id: u64,
    project_id: ProjectId,
    task_handle: tokio::task::JoinHandle<()>,
    /// Per-stream token (child of the master token).
    cancel: CancellationToken,
}

/// What a stream does after one poll.
#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    Continue,
    Stop,
}

impl ReconciliationPoller {
    pub fn new(source: Arc<dyn ProjectSource>, state: SharedState, interval: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            source,
            state,
            event_tx,
            interval,
            next_stream_id: AtomicU64::new(1),
            sequences: Arc::new(AtomicU64::new(1)),
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to node updates.
    pub fn subscribe(&self) -> broadcast::Receiver<StudioEvent> {
        self.event_tx.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling `node_id` unless a stream for it is already running.
    ///
    /// Returns `true` if a new stream was started. Nodes that are terminal
    /// or not tracked in the open project are never polled.
    pub async fn start(&self, project_id: &str, node_id: &str) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let pollable = self
            .state
            .read()
            .await
            .project
            .as_ref()
            .filter(|p| p.id() == project_id)
            .and_then(|p| p.store.get(node_id))
            .is_some_and(|n| !n.is_terminal());
        if !pollable {
            tracing::debug!(project_id, node_id, "Node is not pollable");
            return false;
        }

        let mut streams = self.streams.write().await;
        if streams
            .get(node_id)
            .is_some_and(|s| !s.task_handle.is_finished())
        {
            tracing::debug!(node_id, "Poll stream already active");
            return false;
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let stream_cancel = self.cancel.child_token();
        let ctx = StreamContext {
            stream_id,
            project_id: project_id.to_string(),
            node_id: node_id.to_string(),
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
            streams: Arc::clone(&self.streams),
            event_tx: self.event_tx.clone(),
            interval: self.interval,
            sequences: Arc::clone(&self.sequences),
            cancel: stream_cancel.clone(),
        };

        let task_handle = tokio::spawn(async move {
            tracing::info!(project_id = %ctx.project_id, node_id = %ctx.node_id, "Starting poll stream");
            ctx.run().await;
        });

        streams.insert(
            node_id.to_string(),
            PollStream {
                stream_id,
                project_id: project_id.to_string(),
                task_handle,
                cancel: stream_cancel,
            },
        );
        true
    }

    /// Whether a stream for `node_id` is running.
    pub async fn is_polling(&self, node_id: &str) -> bool {
        self.streams
            .read()
            .await
            .get(node_id)
            .is_some_and(|s| !s.task_handle.is_finished())
    }

    /// Number of registered streams.
    pub async fn active_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Cancel every stream belonging to `project_id`.
    ///
    /// Returns the number of streams stopped.
    pub async fn cancel_project(&self, project_id: &str) -> usize {
        let stopped: Vec<(NodeId, PollStream)> = {
            let mut streams = self.streams.write().await;
            let ids: Vec<NodeId> = streams
                .iter()
                .filter(|(_, s)| s.project_id == project_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| streams.remove(&id).map(|s| (id, s)))
                .collect()
        };

        let count = stopped.len();
        for (node_id, stream) in stopped {
            tracing::debug!(project_id, node_id = %node_id, "Cancelling poll stream");
            stream.cancel.cancel();
            let _ = tokio::time::timeout(STREAM_STOP_TIMEOUT, stream.task_handle).await;
        }
        if count > 0 {
            tracing::info!(project_id, count, "Cancelled poll streams");
        }
        count
    }

    /// Stop all streams.
    ///
    /// Cancels the master token, then waits up to 5 seconds per stream
    /// for a clean exit. No stream can be started afterwards.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down reconciliation poller");
        self.cancel.cancel();

        let drained: Vec<(NodeId, PollStream)> = self.streams.write().await.drain().collect();
        for (node_id, stream) in drained {
            tracing::debug!(node_id = %node_id, "Stopping poll stream");
            stream.cancel.cancel();
            let _ = tokio::time::timeout(STREAM_STOP_TIMEOUT, stream.task_handle).await;
        }

        tracing::info!("Reconciliation poller shut down complete");
    }
}

// ---------------------------------------------------------------------------
// Stream task
// ---------------------------------------------------------------------------

struct StreamContext {
    stream_id: u64,
    project_id: ProjectId,
    node_id: NodeId,
    source: Arc<dyn ProjectSource>,
    state: SharedState,
    streams: StreamMap,
    event_tx: broadcast::Sender<StudioEvent>,
    interval: Duration,
    sequences: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl StreamContext {
    /// Poll on every tick until the node is terminal or the stream is
    /// cancelled, then deregister.
    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(node_id = %self.node_id, "Poll stream cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let sequence: Sequence = self.sequences.fetch_add(1, Ordering::Relaxed);
                    let step = tokio::select! {
                        _ = self.cancel.cancelled() => StreamStep::Stop,
                        step = self.poll_once(sequence) => step,
                    };
                    if step == StreamStep::Stop {
                        break;
                    }
                }
            }
        }

        self.deregister().await;
        tracing::info!(project_id = %self.project_id, node_id = %self.node_id, "Poll stream exited");
    }

    /// One request: fetch the snapshot and reconcile the node.
    async fn poll_once(&self, sequence: Sequence) -> StreamStep {
        let snapshot = match self.source.fetch_project(&self.project_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    project_id = %self.project_id,
                    node_id = %self.node_id,
                    sequence,
                    error = %e,
                    "Poll failed, retrying next tick",
                );
                let _ = self.event_tx.send(StudioEvent::PollFailed {
                    project_id: self.project_id.clone(),
                    node_id: self.node_id.clone(),
                    error: e.to_string(),
                });
                return StreamStep::Continue;
            }
        };

        let mut events = Vec::new();
        let step = {
            let mut state = self.state.write().await;
            let Some(project) = state.project_mut(&self.project_id) else {
                tracing::debug!(node_id = %self.node_id, "Project no longer open, stopping stream");
                return StreamStep::Stop;
            };

            let outcome = project
                .store
                .reconcile_snapshot(sequence, &snapshot, &self.node_id);

            match &outcome {
                ReconcileOutcome::Applied(transition) if transition.is_change() => {
                    if let Some(node) = project.store.get(&self.node_id) {
                        events.push(StudioEvent::NodeUpdated {
                            project_id: self.project_id.clone(),
                            node_id: node.id.clone(),
                            status: node.status,
                            progress: node.progress,
                        });
                        if project.is_selected(&node.id) {
                            events.push(StudioEvent::SelectedNodeProgress {
                                project_id: self.project_id.clone(),
                                node_id: node.id.clone(),
                                status: node.status,
                                progress: node.progress,
                            });
                        }
                        match transition {
                            Transition::Completed => events.push(StudioEvent::NodeCompleted {
                                project_id: self.project_id.clone(),
                                node_id: node.id.clone(),
                                filename: node.image_filename.clone().unwrap_or_default(),
                                output_kind: node.output_kind.unwrap_or(OutputKind::Image),
                            }),
                            Transition::Failed => events.push(StudioEvent::NodeFailed {
                                project_id: self.project_id.clone(),
                                node_id: node.id.clone(),
                                error: node.error.clone().unwrap_or_default(),
                            }),
                            _ => {}
                        }
                    }
                }
                ReconcileOutcome::MissingFromSnapshot => {
                    tracing::debug!(node_id = %self.node_id, sequence, "Node not in snapshot yet");
                }
                ReconcileOutcome::Stale { sequence, latest } => {
                    tracing::debug!(node_id = %self.node_id, sequence, latest, "Dropping stale poll result");
                }
                _ => {}
            }

            match project.store.get(&self.node_id) {
                Some(node) if node.is_terminal() => {
                    tracing::info!(node_id = %self.node_id, status = %node.status, "Node reached terminal state");
                    StreamStep::Stop
                }
                Some(_) => StreamStep::Continue,
                None => {
                    tracing::debug!(node_id = %self.node_id, "Node no longer tracked, stopping stream");
                    StreamStep::Stop
                }
            }
        };

        for event in events {
            let _ = self.event_tx.send(event);
        }
        step
    }

    /// Remove this stream from the registry unless a newer stream for the
    /// same node has replaced it.
    async fn deregister(&self) {
        let mut streams = self.streams.write().await;
        if streams
            .get(&self.node_id)
            .is_some_and(|s| s.stream_id == self.stream_id)
        {
            streams.remove(&self.node_id);
        }
    }
}
