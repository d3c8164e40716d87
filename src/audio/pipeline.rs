//! Audio worker: routes fragments, drives flush deadlines, owns the
//! router and consolidation state
//!
//! Single-writer discipline: this worker task is the only owner of the
//! router, the buffer, and the statistics. Playback completions come back
//! over a feedback channel instead of a shared set, and the receive loop
//! talks to the worker only through the bounded input queue. A message id
//! enters the replay registry only once its turn completed and every chunk
//! dispatched for it has finished playing.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::chunk::{AudioFragment, ConsolidatedChunk, MessageId};
use crate::audio::consolidate::ConsolidationBuffer;
use crate::audio::playback::{PlaybackFeedback, PlaybackScheduler};
use crate::audio::router::{AudioRouter, RoutingDecision};
use crate::audio::stats::{PipelineCounters, PipelineStats};
use crate::config::AudioConfig;
use crate::events::{EventSink, SessionEvent};
use crate::player::PlayerSink;

/// Items flowing from the session into the worker. Completion markers
/// ride the same queue as the fragments so they can never overtake the
/// audio they close out.
enum PipelineInput {
    Fragment(AudioFragment),
    MessageComplete(MessageId),
}

/// Dispatch accounting for one message's chunks
#[derive(Debug)]
struct MessageProgress {
    /// Chunks dispatched without a terminal report yet
    outstanding: usize,
    turn_done: bool,
    /// No dispatched chunk failed playback
    clean: bool,
}

impl MessageProgress {
    fn new() -> Self {
        Self {
            outstanding: 0,
            turn_done: false,
            clean: true,
        }
    }
}

/// Spawns the audio worker and the playback scheduler
pub struct AudioPipeline;

impl AudioPipeline {
    pub fn spawn(
        config: &AudioConfig,
        player: Arc<dyn PlayerSink>,
        events: EventSink,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let (input_tx, input_rx) = mpsc::channel(config.fragment_queue_capacity);
        let (playback_tx, playback_rx) = mpsc::channel(config.playback_queue_capacity);
        let (feedback_tx, feedback_rx) = mpsc::channel(config.playback_queue_capacity);
        let counters = Arc::new(PipelineCounters::default());

        let scheduler = PlaybackScheduler::new(
            playback_rx,
            player,
            events.clone(),
            feedback_tx,
            config.sample_rate,
            config.channels,
            cancel.child_token(),
        );
        let scheduler_task = tokio::spawn(scheduler.run());

        let worker = PipelineWorker {
            inputs: input_rx,
            router: AudioRouter::new(config),
            consolidation: ConsolidationBuffer::new(config),
            playback: playback_tx,
            feedback: feedback_rx,
            progress: HashMap::new(),
            counters: Arc::clone(&counters),
            cancel,
        };
        let worker_task = tokio::spawn(worker.run());

        PipelineHandle {
            inputs: input_tx,
            events,
            counters,
            worker: worker_task,
            scheduler: scheduler_task,
        }
    }
}

/// Producer-side handle held by the session
pub struct PipelineHandle {
    inputs: mpsc::Sender<PipelineInput>,
    events: EventSink,
    counters: Arc<PipelineCounters>,
    worker: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

impl PipelineHandle {
    /// Hands a fragment to the worker without ever blocking the caller.
    /// A full queue drops the fragment and reports it; returns whether
    /// the fragment was accepted.
    pub fn ingest(&self, fragment: AudioFragment) -> bool {
        match self.inputs.try_send(PipelineInput::Fragment(fragment)) {
            Ok(()) => true,
            Err(TrySendError::Full(PipelineInput::Fragment(fragment))) => {
                self.counters.fragments_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = %fragment.message_id,
                    bytes = fragment.len(),
                    "fragment queue full, dropping"
                );
                self.events.emit(SessionEvent::FragmentDropped {
                    message_id: fragment.message_id,
                    bytes: fragment.data.len(),
                });
                false
            }
            Err(_) => false,
        }
    }

    /// Marks a logical message as finished streaming. Once every chunk
    /// dispatched for it has played, the id counts as a replay on its
    /// next appearance.
    pub fn complete_message(&self, message_id: MessageId) {
        if let Err(err) = self
            .inputs
            .try_send(PipelineInput::MessageComplete(message_id))
        {
            debug!(error = %err, "completion marker not queued");
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Closes the inbound queue and waits for the worker to flush any
    /// pending buffer and the scheduler to drain the playback queue.
    pub async fn shutdown(self) {
        drop(self.inputs);
        let _ = self.worker.await;
        let _ = self.scheduler.await;
    }
}

struct PipelineWorker {
    inputs: mpsc::Receiver<PipelineInput>,
    router: AudioRouter,
    consolidation: ConsolidationBuffer,
    playback: mpsc::Sender<ConsolidatedChunk>,
    feedback: mpsc::Receiver<PlaybackFeedback>,
    /// Per-message dispatch accounting, feeding the replay registry
    progress: HashMap<MessageId, MessageProgress>,
    counters: Arc<PipelineCounters>,
    cancel: CancellationToken,
}

impl PipelineWorker {
    async fn run(mut self) {
        loop {
            let deadline = self.consolidation.next_deadline();
            let flush_due = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("audio worker cancelled");
                    return;
                }
                received = self.inputs.recv() => match received {
                    Some(PipelineInput::Fragment(fragment)) => self.on_fragment(fragment).await,
                    Some(PipelineInput::MessageComplete(id)) => self.on_message_complete(id).await,
                    None => break,
                },
                Some(feedback) = self.feedback.recv() => self.on_feedback(feedback),
                _ = flush_due => {
                    if let Some(chunk) = self.consolidation.maybe_flush() {
                        self.dispatch(chunk).await;
                    }
                }
            }
        }

        // Inbound queue closed: whatever accumulated still has to come
        // out as a chunk before the playback queue closes.
        if let Some(chunk) = self.consolidation.force_flush() {
            self.dispatch(chunk).await;
        }
        debug!("audio worker stopped");
    }

    async fn on_fragment(&mut self, fragment: AudioFragment) {
        // Turns are sequential on the wire, so drained accounting for
        // other messages whose completion never arrived is stale here.
        self.progress
            .retain(|id, p| *id == fragment.message_id || p.outstanding > 0);

        match self.router.route(&fragment) {
            RoutingDecision::Direct => {
                self.counters.direct_routed.fetch_add(1, Ordering::Relaxed);
                // Anything pending arrived earlier; it flushes first so
                // arrival order reaches the player intact.
                if let Some(pending) = self.consolidation.force_flush() {
                    self.dispatch(pending).await;
                }
                let chunk = self.consolidation.direct(fragment);
                self.dispatch(chunk).await;
            }
            RoutingDecision::Consolidate => {
                self.counters
                    .consolidated_routed
                    .fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_consolidated
                    .fetch_add(fragment.len() as u64, Ordering::Relaxed);
                let window = self.router.window();
                if let Some(switched) = self.consolidation.accumulate(fragment, window) {
                    self.dispatch(switched).await;
                }
                if let Some(chunk) = self.consolidation.maybe_flush() {
                    self.dispatch(chunk).await;
                }
            }
        }
    }

    async fn on_message_complete(&mut self, message_id: MessageId) {
        // The tail has nothing further to wait for
        if self.consolidation.open_message() == Some(&message_id) {
            if let Some(chunk) = self.consolidation.force_flush() {
                self.dispatch(chunk).await;
            }
        }
        if let Some(progress) = self.progress.get_mut(&message_id) {
            progress.turn_done = true;
        }
        self.try_resolve(&message_id);
    }

    fn on_feedback(&mut self, feedback: PlaybackFeedback) {
        if let Some(progress) = self.progress.get_mut(&feedback.message_id) {
            progress.outstanding = progress.outstanding.saturating_sub(1);
            progress.clean &= feedback.played;
        }
        self.try_resolve(&feedback.message_id);
    }

    /// A message whose turn completed and whose dispatched chunks all
    /// reported back enters the replay registry, unless a chunk failed.
    fn try_resolve(&mut self, message_id: &MessageId) {
        let done = self
            .progress
            .get(message_id)
            .map_or(false, |p| p.turn_done && p.outstanding == 0);
        if !done {
            return;
        }
        if let Some(progress) = self.progress.remove(message_id) {
            if progress.clean {
                debug!(message_id = %message_id, "message fully played");
                self.router.mark_played(message_id.clone());
            }
        }
    }

    async fn dispatch(&mut self, chunk: ConsolidatedChunk) {
        self.counters.chunks_dispatched.fetch_add(1, Ordering::Relaxed);
        let message_id = chunk.message_id.clone();
        if self.playback.send(chunk).await.is_err() {
            warn!("playback queue closed, chunk dropped");
            return;
        }
        self.progress
            .entry(message_id)
            .or_insert_with(MessageProgress::new)
            .outstanding += 1;
    }
}
