//! Backend stream driver
//!
//! [`StreamSession`] owns the transport, the reconnect policy and the
//! session state, and runs as a single task. Everything else talks to
//! it through a [`SessionHandle`] (commands in, phase watch out), so
//! no lock ever guards the state machine.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{AudioFragment, PipelineHandle};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{EventSink, SessionEvent};
use crate::session::retry::ReconnectPolicy;
use crate::session::state::{SessionPhase, SessionState};
use crate::transport::{Connection, Inbound, Transport};

const COMMAND_QUEUE_CAPACITY: usize = 16;

#[derive(Debug)]
enum Command {
    SendText(String),
    Shutdown,
}

/// Outcome of one connection attempt
enum Connect {
    Connected(Box<dyn Connection>),
    Failed,
    Cancelled,
}

/// Why a live connection stopped being served
enum Served {
    Disconnected,
    Shutdown,
}

/// Cheap clonable front for a running [`StreamSession`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<SessionPhase>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Queue a user message for the backend. Texts submitted while the
    /// session is between connections are held and delivered once it
    /// reconnects.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.commands
            .send(Command::SendText(text.into()))
            .await
            .map_err(|_| SessionError::NotRunning)?;
        Ok(())
    }

    /// Ask the session to stop. Pending consolidated audio still
    /// flushes to the player before the task exits.
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            // Session task already gone, make sure workers stop too
            self.cancel.cancel();
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }
}

/// Connection lifecycle driver
///
/// Connects, serves inbound traffic into the audio pipeline, and on
/// any disconnect retries with capped exponential backoff until the
/// attempt budget runs out. A successful connection resets the budget.
pub struct StreamSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    policy: ReconnectPolicy,
    state: SessionState,
    pipeline: PipelineHandle,
    events: EventSink,
    phase_tx: watch::Sender<SessionPhase>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    /// Texts accepted while no connection was up
    outbox: Vec<String>,
}

impl<T: Transport> StreamSession<T> {
    pub fn new(
        transport: T,
        config: SessionConfig,
        pipeline: PipelineHandle,
        events: EventSink,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let policy = ReconnectPolicy::new(&config.retry);
        Self::with_policy(transport, config, policy, pipeline, events, cancel)
    }

    /// Like [`StreamSession::new`] but with a caller-built policy, so
    /// retry timing can be made deterministic.
    pub fn with_policy(
        transport: T,
        config: SessionConfig,
        policy: ReconnectPolicy,
        pipeline: PipelineHandle,
        events: EventSink,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Initializing);
        let state = SessionState::new(policy.initial_backoff());

        let handle = SessionHandle {
            commands: command_tx,
            phase: phase_rx,
            cancel: cancel.clone(),
        };
        let session = Self {
            transport,
            config,
            policy,
            state,
            pipeline,
            events,
            phase_tx,
            commands: command_rx,
            cancel,
            outbox: Vec::new(),
        };
        (session, handle)
    }

    /// Drive the session until shutdown or until the retry budget is
    /// exhausted. The audio pipeline is drained before returning, so
    /// chunks already queued still reach the player.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.pipeline.shutdown().await;
        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.set_phase(SessionPhase::Initializing);
            self.set_phase(SessionPhase::Connecting);

            // Scope token tears down per-connection work on any exit
            // from the connected states.
            let scope = self.cancel.child_token();
            match self.connect(&scope).await {
                Connect::Connected(mut connection) => {
                    let id = Uuid::new_v4();
                    self.state.mark_connected(id);
                    info!(connection = %id, "stream connected");
                    self.set_phase(SessionPhase::Ready);

                    let served = self.serve(&mut connection, &scope).await;
                    scope.cancel();
                    connection.close().await;
                    self.state.mark_disconnected();

                    if matches!(served, Served::Shutdown) {
                        self.set_phase(SessionPhase::Quitting);
                        return Ok(());
                    }
                }
                Connect::Failed => {
                    scope.cancel();
                }
                Connect::Cancelled => {
                    scope.cancel();
                    self.set_phase(SessionPhase::Quitting);
                    return Ok(());
                }
            }

            self.set_phase(SessionPhase::Retrying);
            if self.state.retry_attempt >= self.policy.max_retries() {
                error!(
                    attempts = self.state.retry_attempt,
                    "reconnect budget exhausted, giving up"
                );
                self.set_phase(SessionPhase::Error);
                return Err(SessionError::RetriesExhausted(self.state.retry_attempt).into());
            }

            self.state.retry_attempt += 1;
            let attempt = self.state.retry_attempt;
            let (delay, next_backoff) = self.policy.next_delay(attempt, self.state.backoff);
            self.state.backoff = next_backoff;
            self.events.emit(SessionEvent::RetryScheduled { attempt, delay });
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "connection lost, retry scheduled"
            );

            if !self.wait_retry(delay).await {
                self.set_phase(SessionPhase::Quitting);
                return Ok(());
            }
        }
    }

    /// One connection attempt, bounded by the configured timeout.
    /// Texts arriving meanwhile land in the outbox.
    async fn connect(&mut self, scope: &CancellationToken) -> Connect {
        let timeout = self.config.connect_timeout();
        let deadline = Instant::now() + timeout;
        let mut connecting = self.transport.connect();
        loop {
            tokio::select! {
                _ = scope.cancelled() => return Connect::Cancelled,
                _ = sleep_until(deadline) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "connect timed out");
                    return Connect::Failed;
                }
                command = self.commands.recv() => match command {
                    Some(Command::SendText(text)) => self.outbox.push(text),
                    Some(Command::Shutdown) | None => return Connect::Cancelled,
                },
                result = &mut connecting => match result {
                    Ok(connection) => return Connect::Connected(connection),
                    Err(err) => {
                        warn!(error = %err, "connect failed");
                        return Connect::Failed;
                    }
                },
            }
        }
    }

    /// Pump one live connection: outbox first, then commands and
    /// inbound traffic until either side goes away. The receive arm
    /// relies on [`Connection::receive`] being cancel safe.
    async fn serve(
        &mut self,
        connection: &mut Box<dyn Connection>,
        scope: &CancellationToken,
    ) -> Served {
        let mut queued = std::mem::take(&mut self.outbox).into_iter();
        while let Some(text) = queued.next() {
            if !self.deliver(connection, text).await {
                self.outbox.extend(queued);
                return Served::Disconnected;
            }
        }

        loop {
            tokio::select! {
                _ = scope.cancelled() => return Served::Shutdown,
                command = self.commands.recv() => match command {
                    Some(Command::SendText(text)) => {
                        if !self.deliver(connection, text).await {
                            return Served::Disconnected;
                        }
                    }
                    Some(Command::Shutdown) | None => return Served::Shutdown,
                },
                inbound = connection.receive() => match inbound {
                    Ok(Some(item)) => self.on_inbound(item),
                    Ok(None) => {
                        info!("stream ended by remote");
                        return Served::Disconnected;
                    }
                    Err(err) => {
                        warn!(error = %err, "receive failed");
                        return Served::Disconnected;
                    }
                },
            }
        }
    }

    /// Send one text. On failure the text goes back to the outbox so
    /// it is retried on the next connection.
    async fn deliver(&mut self, connection: &mut Box<dyn Connection>, text: String) -> bool {
        match connection.send_text(&text).await {
            Ok(()) => {
                self.set_phase(SessionPhase::Waiting);
                true
            }
            Err(err) => {
                warn!(error = %err, "send failed, text requeued");
                self.outbox.push(text);
                false
            }
        }
    }

    fn on_inbound(&mut self, item: Inbound) {
        match item {
            Inbound::TurnStarted { message_id } => {
                debug!(message = %message_id, "turn started");
                self.set_phase(SessionPhase::Responding);
            }
            Inbound::Audio { message_id, data } => {
                // Audio without a preceding turn marker still counts
                // as the response starting.
                self.set_phase(SessionPhase::Responding);
                self.pipeline.ingest(AudioFragment::new(message_id, data));
            }
            Inbound::TurnComplete { message_id } => {
                debug!(message = %message_id, "turn complete");
                self.pipeline.complete_message(message_id);
                self.set_phase(SessionPhase::Ready);
            }
        }
    }

    /// Sit out the backoff delay. Returns false when the session
    /// should stop instead of reconnecting.
    async fn wait_retry(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(Command::SendText(text)) => self.outbox.push(text),
                    Some(Command::Shutdown) | None => return false,
                },
            }
        }
    }

    fn set_phase(&mut self, to: SessionPhase) {
        let from = self.state.phase;
        if from == to {
            return;
        }
        self.state.phase = to;
        let _ = self.phase_tx.send(to);
        self.events.emit(SessionEvent::SessionStateChanged { from, to });
        debug!(%from, %to, "session state changed");
    }
}
