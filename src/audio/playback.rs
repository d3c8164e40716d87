//! Single-slot playback with one-step lookahead
//!
//! At most one chunk is physically playing at any instant, enforced by a
//! one-permit slot acquired before the player is invoked and released only
//! when the call returns. While a chunk plays, the scheduler peeks the
//! queue once; a chunk continuing the same message is prefetched so it can
//! start the instant the current call returns. A chunk for a different
//! message is carried unmodified and played next in order.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::chunk::{ConsolidatedChunk, MessageId};
use crate::events::{EventSink, SessionEvent};
use crate::player::PlayerSink;

/// Per-chunk terminal report flowing back to the audio worker
#[derive(Debug, Clone)]
pub struct PlaybackFeedback {
    pub message_id: MessageId,
    pub sequence: u64,
    /// False when the player call failed or its task panicked
    pub played: bool,
}

/// Drains the playback queue into the player, one chunk at a time
pub struct PlaybackScheduler {
    queue: mpsc::Receiver<ConsolidatedChunk>,

    /// Chunk pulled by lookahead that belongs to a different message;
    /// always played before the queue is touched again
    carry: Option<ConsolidatedChunk>,

    player: Arc<dyn PlayerSink>,
    events: EventSink,
    feedback: mpsc::Sender<PlaybackFeedback>,

    /// The single playback slot
    slot: Arc<Semaphore>,

    sample_rate: u32,
    channels: u16,
    cancel: CancellationToken,
}

impl PlaybackScheduler {
    pub fn new(
        queue: mpsc::Receiver<ConsolidatedChunk>,
        player: Arc<dyn PlayerSink>,
        events: EventSink,
        feedback: mpsc::Sender<PlaybackFeedback>,
        sample_rate: u32,
        channels: u16,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            carry: None,
            player,
            events,
            feedback,
            slot: Arc::new(Semaphore::new(1)),
            sample_rate,
            channels,
            cancel,
        }
    }

    /// Runs until the queue closes and drains, or cancellation fires.
    pub async fn run(mut self) {
        loop {
            let cancel = self.cancel.clone();
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.next_chunk() => match next {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            // Chain through same-message prefetches without touching the
            // queue between plays.
            let mut current = Some(chunk);
            while let Some(chunk) = current.take() {
                if self.cancel.is_cancelled() {
                    return;
                }
                current = self.play_one(chunk).await;
            }
        }
        debug!("playback scheduler stopped");
    }

    async fn next_chunk(&mut self) -> Option<ConsolidatedChunk> {
        if let Some(chunk) = self.carry.take() {
            return Some(chunk);
        }
        self.queue.recv().await
    }

    /// Plays one chunk to completion. Returns the prefetched follow-up
    /// when lookahead found one for the same message.
    async fn play_one(&mut self, mut chunk: ConsolidatedChunk) -> Option<ConsolidatedChunk> {
        let permit = match Arc::clone(&self.slot).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return None,
        };

        chunk.is_processing = true;
        chunk.started_at = Some(Instant::now());
        self.events.emit(SessionEvent::PlaybackStarted {
            message_id: chunk.message_id.clone(),
            sequence: chunk.sequence,
            bytes: chunk.len(),
        });
        debug!(
            message_id = %chunk.message_id,
            sequence = chunk.sequence,
            bytes = chunk.len(),
            duration = ?chunk.estimated_duration,
            "playback started"
        );

        let player = Arc::clone(&self.player);
        let data = chunk.data.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let mut playing = tokio::spawn(async move {
            let result = player.play(data, sample_rate, channels).await;
            drop(permit);
            result
        });

        // One-step lookahead: peek the queue once while the player runs.
        // Best effort; an empty queue simply means no prefetch.
        let mut prefetched = None;
        if self.carry.is_none() {
            match self.queue.try_recv() {
                Ok(next) if next.message_id == chunk.message_id => prefetched = Some(next),
                Ok(other) => self.carry = Some(other),
                Err(_) => {}
            }
        }

        let joined = tokio::select! {
            _ = self.cancel.cancelled() => {
                // The in-flight player call cannot be interrupted; its
                // completion is ignored and the slot frees when it ends.
                return None;
            }
            joined = &mut playing => joined,
        };

        let played = matches!(&joined, Ok(Ok(())));
        match joined {
            Ok(Ok(())) => {
                chunk.is_processing = false;
                chunk.is_complete = true;
                self.events.emit(SessionEvent::PlaybackCompleted {
                    message_id: chunk.message_id.clone(),
                    sequence: chunk.sequence,
                });
            }
            Ok(Err(e)) => {
                warn!(
                    message_id = %chunk.message_id,
                    sequence = chunk.sequence,
                    "playback failed: {}",
                    e
                );
                self.events.emit(SessionEvent::PlaybackFailed {
                    message_id: chunk.message_id.clone(),
                    sequence: chunk.sequence,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!("player task failed: {}", e);
                self.events.emit(SessionEvent::PlaybackFailed {
                    message_id: chunk.message_id.clone(),
                    sequence: chunk.sequence,
                    reason: e.to_string(),
                });
            }
        }

        // Failed chunks report too; the worker's per-message accounting
        // needs a terminal report for everything it dispatched.
        let _ = self.feedback.try_send(PlaybackFeedback {
            message_id: chunk.message_id.clone(),
            sequence: chunk.sequence,
            played,
        });

        prefetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::error::PlaybackError;
    use crate::events::EventEnvelope;

    #[derive(Default)]
    struct PlayerTrace {
        starts: Mutex<Vec<usize>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail_len: Option<usize>,
    }

    struct TestPlayer {
        trace: Arc<PlayerTrace>,
        delay: Duration,
    }

    #[async_trait]
    impl PlayerSink for TestPlayer {
        async fn play(
            &self,
            data: Bytes,
            _sample_rate: u32,
            _channels: u16,
        ) -> Result<(), PlaybackError> {
            let active = self.trace.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.trace.max_active.fetch_max(active, Ordering::SeqCst);
            self.trace.starts.lock().unwrap().push(data.len());
            tokio::time::sleep(self.delay).await;
            self.trace.active.fetch_sub(1, Ordering::SeqCst);
            if self.trace.fail_len == Some(data.len()) {
                Err(PlaybackError::PlayerExit(1))
            } else {
                Ok(())
            }
        }
    }

    struct Rig {
        tx: mpsc::Sender<ConsolidatedChunk>,
        events_rx: mpsc::Receiver<EventEnvelope>,
        feedback_rx: mpsc::Receiver<PlaybackFeedback>,
        trace: Arc<PlayerTrace>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn rig(trace: PlayerTrace, delay: Duration) -> Rig {
        let trace = Arc::new(trace);
        let (tx, rx) = mpsc::channel(16);
        let (events, events_rx) = EventSink::channel(64);
        let (feedback_tx, feedback_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let scheduler = PlaybackScheduler::new(
            rx,
            Arc::new(TestPlayer {
                trace: Arc::clone(&trace),
                delay,
            }),
            events,
            feedback_tx,
            24_000,
            1,
            cancel.clone(),
        );
        let task = tokio::spawn(scheduler.run());
        Rig {
            tx,
            events_rx,
            feedback_rx,
            trace,
            cancel,
            task,
        }
    }

    fn chunk(id: &str, sequence: u64, bytes: usize) -> ConsolidatedChunk {
        ConsolidatedChunk::new(
            MessageId::from(id),
            Bytes::from(vec![0u8; bytes]),
            sequence,
            24_000,
            1,
        )
    }

    fn drain_feedback(rx: &mut mpsc::Receiver<PlaybackFeedback>) -> Vec<PlaybackFeedback> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_sequentially_in_order() {
        let mut rig = rig(PlayerTrace::default(), Duration::from_millis(100));
        for (sequence, bytes) in [(0u64, 100usize), (1, 200), (2, 300), (3, 400)] {
            rig.tx.send(chunk("m1", sequence, bytes)).await.unwrap();
        }
        drop(rig.tx);
        rig.task.await.unwrap();

        assert_eq!(*rig.trace.starts.lock().unwrap(), vec![100, 200, 300, 400]);
        assert_eq!(rig.trace.max_active.load(Ordering::SeqCst), 1);
        let feedback = drain_feedback(&mut rig.feedback_rx);
        assert_eq!(feedback.len(), 4);
        assert!(feedback.iter().all(|f| f.played));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookahead_keeps_cross_message_order() {
        let rig = rig(PlayerTrace::default(), Duration::from_millis(100));
        rig.tx.send(chunk("m1", 0, 100)).await.unwrap();
        rig.tx.send(chunk("m2", 1, 200)).await.unwrap();
        rig.tx.send(chunk("m2", 2, 300)).await.unwrap();
        drop(rig.tx);
        rig.task.await.unwrap();

        // m2's first chunk was peeked during m1's playback and put back;
        // nothing overtakes anything.
        assert_eq!(*rig.trace.starts.lock().unwrap(), vec![100, 200, 300]);
        assert_eq!(rig.trace.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_releases_slot_and_continues() {
        let trace = PlayerTrace {
            fail_len: Some(200),
            ..PlayerTrace::default()
        };
        let mut rig = rig(trace, Duration::from_millis(50));
        rig.tx.send(chunk("m1", 0, 100)).await.unwrap();
        rig.tx.send(chunk("m1", 1, 200)).await.unwrap();
        rig.tx.send(chunk("m1", 2, 300)).await.unwrap();
        drop(rig.tx);
        rig.task.await.unwrap();

        assert_eq!(*rig.trace.starts.lock().unwrap(), vec![100, 200, 300]);

        // The failed chunk still reports back, flagged as not played
        let feedback = drain_feedback(&mut rig.feedback_rx);
        assert_eq!(
            feedback
                .iter()
                .map(|f| (f.sequence, f.played))
                .collect::<Vec<_>>(),
            vec![(0, true), (1, false), (2, true)]
        );

        let mut failed = Vec::new();
        while let Ok(envelope) = rig.events_rx.try_recv() {
            if let SessionEvent::PlaybackFailed { sequence, .. } = envelope.event {
                failed.push(sequence);
            }
        }
        assert_eq!(failed, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_and_completed_events_alternate() {
        let mut rig = rig(PlayerTrace::default(), Duration::from_millis(100));
        for sequence in 0..3u64 {
            rig.tx.send(chunk("m1", sequence, 64)).await.unwrap();
        }
        drop(rig.tx);
        rig.task.await.unwrap();

        let mut in_flight = false;
        let mut completed = 0;
        while let Ok(envelope) = rig.events_rx.try_recv() {
            match envelope.event {
                SessionEvent::PlaybackStarted { .. } => {
                    assert!(!in_flight, "second start before completion");
                    in_flight = true;
                }
                SessionEvent::PlaybackCompleted { .. } => {
                    assert!(in_flight);
                    in_flight = false;
                    completed += 1;
                }
                _ => {}
            }
        }
        assert!(!in_flight);
        assert_eq!(completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_after_current_chunk() {
        let rig = rig(PlayerTrace::default(), Duration::from_secs(10));
        rig.tx.send(chunk("m1", 0, 100)).await.unwrap();
        rig.tx.send(chunk("m1", 1, 200)).await.unwrap();
        rig.tx.send(chunk("m1", 2, 300)).await.unwrap();

        // Let the first playback begin, then cancel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(rig.trace.starts.lock().unwrap().len(), 1);
        rig.cancel.cancel();
        rig.task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rig.trace.starts.lock().unwrap().len(), 1);
    }
}
