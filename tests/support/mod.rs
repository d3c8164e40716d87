//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use voicelink::audio::{AudioFragment, MessageId};
use voicelink::error::{PlaybackError, TransportError};
use voicelink::events::{EventEnvelope, SessionEvent};
use voicelink::player::PlayerSink;
use voicelink::session::SessionPhase;
use voicelink::transport::{Connection, Inbound, Transport};

/// One scripted action of a mock connection's receive loop
pub enum Step {
    Yield(Inbound),
    /// Let the (paused) clock advance before the next step
    Wait(Duration),
    /// Clean end of stream
    End,
    /// Receive error
    Fail(&'static str),
}

/// What one `Transport::connect` call should do
pub enum ConnectOutcome {
    Refuse,
    /// Never resolve, exercising the connect timeout
    Hang,
    Accept(Vec<Step>),
}

#[derive(Default)]
pub struct TransportTrace {
    /// Texts successfully delivered, across all connections
    pub sent: Vec<String>,
    pub connects: usize,
    pub closes: usize,
    /// When set, send_text fails without recording the text
    pub fail_sends: bool,
}

pub struct MockTransport {
    plan: VecDeque<ConnectOutcome>,
    trace: Arc<Mutex<TransportTrace>>,
}

impl MockTransport {
    pub fn new(plan: Vec<ConnectOutcome>) -> (Self, Arc<Mutex<TransportTrace>>) {
        let trace = Arc::new(Mutex::new(TransportTrace::default()));
        (
            Self {
                plan: plan.into(),
                trace: Arc::clone(&trace),
            },
            trace,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<Box<dyn Connection>, TransportError> {
        lock_unpoisoned(&self.trace).connects += 1;
        match self.plan.pop_front() {
            Some(ConnectOutcome::Accept(steps)) => Ok(Box::new(ScriptedConnection {
                steps: steps.into(),
                trace: Arc::clone(&self.trace),
            })),
            Some(ConnectOutcome::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(ConnectOutcome::Refuse) | None => Err(TransportError::ConnectFailed(
                "connection refused".to_string(),
            )),
        }
    }
}

struct ScriptedConnection {
    steps: VecDeque<Step>,
    trace: Arc<Mutex<TransportTrace>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn receive(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            match self.steps.pop_front() {
                Some(Step::Wait(delay)) => sleep(delay).await,
                Some(Step::Yield(item)) => return Ok(Some(item)),
                Some(Step::End) => return Ok(None),
                Some(Step::Fail(reason)) => {
                    return Err(TransportError::ReceiveFailed(reason.to_string()))
                }
                // Script exhausted: hold the connection open
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let mut trace = lock_unpoisoned(&self.trace);
        if trace.fail_sends {
            return Err(TransportError::SendFailed("send rejected".to_string()));
        }
        trace.sent.push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) {
        lock_unpoisoned(&self.trace).closes += 1;
    }
}

#[derive(Default)]
pub struct PlayerTrace {
    /// Byte length of each play call, in start order
    pub plays: Vec<usize>,
    pub active: usize,
    pub max_active: usize,
}

/// Player that records every call and holds it for a fixed duration
pub struct RecordingPlayer {
    delay: Duration,
    trace: Arc<Mutex<PlayerTrace>>,
}

impl RecordingPlayer {
    pub fn new(delay: Duration) -> (Self, Arc<Mutex<PlayerTrace>>) {
        let trace = Arc::new(Mutex::new(PlayerTrace::default()));
        (
            Self {
                delay,
                trace: Arc::clone(&trace),
            },
            trace,
        )
    }
}

#[async_trait]
impl PlayerSink for RecordingPlayer {
    async fn play(
        &self,
        data: Bytes,
        _sample_rate: u32,
        _channels: u16,
    ) -> Result<(), PlaybackError> {
        {
            let mut trace = lock_unpoisoned(&self.trace);
            trace.plays.push(data.len());
            trace.active += 1;
            trace.max_active = trace.max_active.max(trace.active);
        }
        sleep(self.delay).await;
        lock_unpoisoned(&self.trace).active -= 1;
        Ok(())
    }
}

pub fn fragment(message: &str, bytes: usize) -> AudioFragment {
    AudioFragment::new(MessageId::new(message), Bytes::from(vec![0u8; bytes]))
}

pub fn audio(message: &str, bytes: usize) -> Inbound {
    Inbound::Audio {
        message_id: MessageId::new(message),
        data: Bytes::from(vec![0u8; bytes]),
    }
}

pub fn turn_started(message: &str) -> Inbound {
    Inbound::TurnStarted {
        message_id: MessageId::new(message),
    }
}

pub fn turn_complete(message: &str) -> Inbound {
    Inbound::TurnComplete {
        message_id: MessageId::new(message),
    }
}

/// Block until the watched phase reaches `want`
pub async fn wait_for_phase(phases: &mut watch::Receiver<SessionPhase>, want: SessionPhase) {
    loop {
        if *phases.borrow_and_update() == want {
            return;
        }
        if phases.changed().await.is_err() {
            panic!("session ended before reaching phase {want}");
        }
    }
}

pub fn drain_events(events: &mut mpsc::Receiver<EventEnvelope>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        drained.push(envelope.event);
    }
    drained
}

pub fn retry_schedule(events: &[SessionEvent]) -> Vec<(u32, Duration)> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::RetryScheduled { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect()
}

/// Phase transitions in emission order. The watch channel only keeps
/// the latest phase, so history checks go through the event stream.
pub fn phase_changes(events: &[SessionEvent]) -> Vec<(SessionPhase, SessionPhase)> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::SessionStateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
