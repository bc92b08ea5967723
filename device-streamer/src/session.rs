use crate::buffer::{ChunkBuffer, ChunkProducer};
use crate::channel::StreamChannel;
use crate::config::{AppConfig, SessionConfig};
use crate::device::{CaptureDevice, PlaybackDevice};
use crate::error::{Result, StreamError};
use crate::observer::SessionObserver;
use crate::playback::PlaybackWorker;
use crate::retry::RetryPolicy;
use crate::transport::MessageTransport;
use crate::types::{
    DeviceIdentity, PlaybackState, PlaybackStats, PullOutcome, SessionReport, SessionState,
};
use bytes::Bytes;
use common::{MessageType, ProtocolMessage, StreamCreateOutcome};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Local audio hardware used by a session
pub struct SessionDevices {
    pub capture: Box<dyn CaptureDevice>,
    pub playback: Box<dyn PlaybackDevice>,
}

impl SessionDevices {
    pub fn new(
        capture: impl CaptureDevice + 'static,
        playback: impl PlaybackDevice + 'static,
    ) -> Self {
        Self {
            capture: Box::new(capture),
            playback: Box::new(playback),
        }
    }
}

/// One record-then-play round trip over a single stream.
///
/// The session opens both devices, optionally registers the device, creates
/// the stream, pushes captured frames for the capture window, then pulls the
/// stream back chunk by chunk into the playback buffer until the server
/// reports the end.
pub struct StreamSession {
    config: SessionConfig,
    retry: RetryPolicy,
    channel: StreamChannel,
    inbound: mpsc::Receiver<ProtocolMessage>,
    observer: Arc<dyn SessionObserver>,
    stream_id: String,

    capture: Box<dyn CaptureDevice>,
    capture_open: bool,
    playback: Option<Box<dyn PlaybackDevice>>,
    playback_open: bool,

    state: watch::Sender<SessionState>,
    playback_state: Option<watch::Sender<PlaybackState>>,
    playback_state_rx: watch::Receiver<PlaybackState>,
    cancel: CancellationToken,
    worker_cancel: CancellationToken,
    producer: Option<ChunkProducer>,
    worker: Option<JoinHandle<Result<PlaybackStats>>>,
    report: SessionReport,
}

impl StreamSession {
    pub fn new(
        config: &AppConfig,
        identity: DeviceIdentity,
        transport: Arc<dyn MessageTransport>,
        inbound: mpsc::Receiver<ProtocolMessage>,
        devices: SessionDevices,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (playback_state, playback_state_rx) = watch::channel(PlaybackState::Idle);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.child_token();

        Self {
            config: config.session.clone(),
            retry: RetryPolicy::new(config.retry.clone()),
            channel: StreamChannel::new(identity, transport),
            inbound,
            observer,
            stream_id: Uuid::new_v4().to_string(),
            capture: devices.capture,
            capture_open: false,
            playback: Some(devices.playback),
            playback_open: false,
            state,
            playback_state: Some(playback_state),
            playback_state_rx,
            cancel,
            worker_cancel,
            producer: None,
            worker: None,
            report: SessionReport {
                stream_id: None,
                final_state: SessionState::Idle,
                chunks_pushed: 0,
                frames_dropped: 0,
                chunks_pulled: 0,
                pull_retries: 0,
                playback: PlaybackStats::default(),
            },
        }
    }

    /// Use a fixed stream id instead of a random one
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Start the session on its own task
    pub fn begin(self) -> SessionHandle {
        let state = self.state.subscribe();
        let playback_state = self.playback_state_rx.clone();
        let cancel = self.cancel.clone();
        info!(
            "Beginning stream session {} ({})",
            self.stream_id, self.config.content_type
        );

        SessionHandle {
            state,
            playback_state,
            cancel,
            task: Some(tokio::spawn(self.run())),
        }
    }

    async fn run(mut self) -> Result<SessionReport> {
        let outcome = self.drive().await;
        self.finish(outcome).await
    }

    async fn drive(&mut self) -> Result<()> {
        self.open_devices().await?;

        if let Some(token) = self.channel.identity().specification_token.clone() {
            self.register(&token).await?;
        }

        self.create_stream().await?;
        self.record().await?;
        self.pull().await
    }

    async fn open_devices(&mut self) -> Result<()> {
        self.capture.open().await?;
        self.capture_open = true;

        if let Some(playback) = self.playback.as_mut() {
            playback.open().await?;
            self.playback_open = true;
        }
        Ok(())
    }

    async fn register(&mut self, specification_token: &str) -> Result<()> {
        self.transition(SessionState::Registering);

        let mut retries = 0;
        loop {
            match self.register_once(specification_token).await {
                Ok(_) => return Ok(()),
                Err(e @ StreamError::AckTimeout { .. }) => return Err(e),
                Err(e) => self.backoff(&mut retries, "Device registration", e).await?,
            }
        }
    }

    async fn register_once(&mut self, specification_token: &str) -> Result<()> {
        let cancel = self.cancel.clone();
        guarded(&cancel, self.channel.register_device(specification_token)).await?;

        let deadline = Instant::now() + self.config.ack_timeout;
        loop {
            let message = self.next_inbound(deadline, "registration acknowledgement").await?;
            match message.message_type {
                MessageType::RegistrationAck => {
                    self.channel.on_registration_acknowledged(&message)?;
                    return Ok(());
                }
                other => debug!("Ignoring {:?} while registering", other),
            }
        }
    }

    async fn create_stream(&mut self) -> Result<StreamCreateOutcome> {
        self.transition(SessionState::AwaitingStreamCreate);
        self.report.stream_id = Some(self.stream_id.clone());

        // Only failed sends are retried; an unanswered create is never resent
        let mut retries = 0;
        loop {
            match self.create_once().await {
                Ok(outcome) => return Ok(outcome),
                Err(e @ StreamError::AckTimeout { .. }) => return Err(e),
                Err(e) => self.backoff(&mut retries, "Stream create", e).await?,
            }
        }
    }

    async fn create_once(&mut self) -> Result<StreamCreateOutcome> {
        let cancel = self.cancel.clone();
        guarded(
            &cancel,
            self.channel
                .create_stream(None, &self.stream_id, &self.config.content_type),
        )
        .await?;

        let deadline = Instant::now() + self.config.ack_timeout;
        loop {
            let message = self
                .next_inbound(deadline, "stream create acknowledgement")
                .await?;
            match message.message_type {
                MessageType::StreamCreateAck => return self.channel.on_create_acknowledged(&message),
                other => debug!("Ignoring {:?} while awaiting stream create", other),
            }
        }
    }

    /// Push captured frames until the capture window closes or the
    /// capture device runs dry
    async fn record(&mut self) -> Result<()> {
        self.transition(SessionState::Recording);
        self.start_playback()?;

        let cancel = self.cancel.clone();
        let window_end = Instant::now() + self.config.capture_window;
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = sleep_until(window_end) => {
                    debug!("Capture window elapsed");
                    break;
                }
                frame = self.capture.read_frame() => frame?,
            };

            match frame {
                Some(frame) => self.push_frame(frame).await?,
                None => {
                    info!("Capture device exhausted");
                    break;
                }
            }
        }

        self.release_capture().await;
        info!(
            "Recording finished: {} chunks pushed, {} dropped",
            self.report.chunks_pushed, self.report.frames_dropped
        );
        Ok(())
    }

    async fn push_frame(&mut self, frame: Bytes) -> Result<()> {
        let cancel = self.cancel.clone();
        let mut retries = 0;
        loop {
            let sequence_number = self.channel.next_push_sequence();
            let error = match guarded(
                &cancel,
                self.channel.push_chunk(None, sequence_number, frame.clone()),
            )
            .await
            {
                Ok(()) => {
                    self.report.chunks_pushed += 1;
                    return Ok(());
                }
                Err(StreamError::Cancelled) => return Err(StreamError::Cancelled),
                Err(e) => e,
            };

            match self.retry.on_failure(retries, "Chunk push", error) {
                Ok(delay) => {
                    retries += 1;
                    pause(&cancel, delay).await?;
                }
                Err(e) => {
                    warn!("Dropping frame at #{}: {}", sequence_number, e);
                    self.report.frames_dropped += 1;
                    return Ok(());
                }
            }
        }
    }

    /// Pull the stream back one chunk at a time until the end marker
    async fn pull(&mut self) -> Result<()> {
        self.transition(SessionState::AwaitingChunk);
        let cancel = self.cancel.clone();

        let mut retries = 0;
        loop {
            let chunk = match self.pull_once().await {
                Ok(PullOutcome::Chunk(chunk)) => chunk,
                Ok(_) => {
                    info!("Stream {} fully pulled", self.stream_id);
                    return Ok(());
                }
                Err(e) => {
                    self.backoff(&mut retries, "Chunk pull", e).await?;
                    self.report.pull_retries += 1;
                    continue;
                }
            };

            retries = 0;
            self.report.chunks_pulled += 1;
            let producer = self.producer.as_ref().ok_or(StreamError::BufferClosed)?;
            guarded(&cancel, producer.push(chunk)).await?;
        }
    }

    async fn pull_once(&mut self) -> Result<PullOutcome> {
        let cancel = self.cancel.clone();
        let sequence_number = self.channel.next_pull_sequence();
        guarded(&cancel, self.channel.request_chunk(sequence_number)).await?;

        let deadline = Instant::now() + self.config.ack_timeout;
        loop {
            let message = self.next_inbound(deadline, "stream chunk").await?;
            if message.message_type != MessageType::StreamDataChunk {
                debug!("Ignoring {:?} while awaiting chunk", message.message_type);
                continue;
            }
            match self.channel.on_chunk_received(&message)? {
                PullOutcome::Unsolicited => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Wait out the backoff for a failed attempt, or return the error that
    /// ends the operation
    async fn backoff(&mut self, retries: &mut u32, what: &str, error: StreamError) -> Result<()> {
        let delay = self.retry.on_failure(*retries, what, error)?;
        *retries += 1;
        self.channel.expire_pending();
        pause(&self.cancel.clone(), delay).await
    }

    async fn next_inbound(
        &mut self,
        deadline: Instant,
        waiting_for: &'static str,
    ) -> Result<ProtocolMessage> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            received = timeout_at(deadline, self.inbound.recv()) => match received {
                Ok(Some(message)) => Ok(message),
                Ok(None) => Err(StreamError::InboundClosed),
                Err(_) => Err(StreamError::AckTimeout {
                    waiting_for,
                    timeout: self.config.ack_timeout,
                }),
            },
        }
    }

    fn start_playback(&mut self) -> Result<()> {
        let (producer, consumer) =
            ChunkBuffer::bounded(self.config.buffer_capacity, self.worker_cancel.clone())?;
        let device = self.playback.take().ok_or_else(|| StreamError::InvalidState {
            details: "playback already started".to_string(),
        })?;
        let state = self
            .playback_state
            .take()
            .ok_or_else(|| StreamError::InvalidState {
                details: "playback already started".to_string(),
            })?;

        let worker = PlaybackWorker::new(
            consumer,
            device,
            self.config.warmup_chunks,
            self.observer.clone(),
            state,
        );

        // A failing playback device ends the whole session
        let session_cancel = self.cancel.clone();
        self.worker = Some(tokio::spawn(async move {
            let result = worker.run().await;
            if result.is_err() {
                session_cancel.cancel();
            }
            result
        }));
        self.producer = Some(producer);
        Ok(())
    }

    async fn release_capture(&mut self) {
        if self.capture_open {
            self.capture.release().await;
            self.capture_open = false;
        }
    }

    async fn finish(mut self, outcome: Result<()>) -> Result<SessionReport> {
        // Closing the producer lets the worker drain; cancelling stops it at once
        if let Some(producer) = self.producer.take() {
            producer.close();
        }
        if outcome.is_err() {
            self.worker_cancel.cancel();
        }

        self.release_capture().await;

        let playback = match self.worker.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                Err(StreamError::InvalidState {
                    details: format!("playback task failed: {}", e),
                })
            }),
            None => {
                if let Some(mut device) = self.playback.take() {
                    if self.playback_open {
                        device.release().await;
                    }
                }
                Ok(PlaybackStats::default())
            }
        };

        let result = match (outcome, playback) {
            (Ok(()), Ok(stats)) => Ok(stats),
            (Err(StreamError::Cancelled), Err(device_error)) => Err(device_error),
            (Err(e), _) | (Ok(()), Err(e)) => Err(e),
        };

        match result {
            Ok(stats) => {
                self.report.playback = stats;
                self.report.final_state = SessionState::Finished;
                self.transition(SessionState::Finished);
                info!(
                    "✓ Session finished: {} pushed, {} pulled, {} played",
                    self.report.chunks_pushed,
                    self.report.chunks_pulled,
                    self.report.playback.chunks_played
                );
                Ok(self.report)
            }
            Err(e) => {
                match &e {
                    StreamError::Cancelled => info!("Session shut down"),
                    _ => error!("Session failed: {}", e),
                }
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    fn transition(&mut self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Session {}: {:?} -> {:?}", self.stream_id, previous, state);
            self.observer.on_session_state_changed(state);
        }
    }
}

/// Handle to a running session
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    playback_state: watch::Receiver<PlaybackState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<SessionReport>>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn playback_state(&self) -> PlaybackState {
        *self.playback_state.borrow()
    }

    /// Wait until the session reaches `target` or ends, returning the state
    /// it was in when the wait completed
    pub async fn wait_for(&self, target: SessionState) -> SessionState {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map(|s| *s);
        match reached {
            Ok(s) => s,
            Err(_) => *state.borrow(),
        }
    }

    /// Tear the session down: stop all requests, stop playback without
    /// draining and release both devices
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn join(mut self) -> Result<SessionReport> {
        let task = self.task.take().ok_or_else(|| StreamError::InvalidState {
            details: "session already joined".to_string(),
        })?;
        task.await.map_err(|e| StreamError::InvalidState {
            details: format!("session task failed: {}", e),
        })?
    }
}

/// Run `operation` unless the session is cancelled first
async fn guarded<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamError::Cancelled),
        result = operation => result,
    }
}

async fn pause(cancel: &CancellationToken, delay: std::time::Duration) -> Result<()> {
    guarded(cancel, async {
        sleep(delay).await;
        Ok(())
    })
    .await
}
