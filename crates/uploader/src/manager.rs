//! Upload manager: the single owner of the queue.
//!
//! All state lives in one actor task. Callers send commands over a channel
//! and get replies on oneshots; sessions report back over a second channel.
//! After every mutation the actor starts whatever [`QueueState::next_actions`]
//! allows and writes the state document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use partwise_protocol::UploadStatus;
use partwise_transfer::{FileSource, SpeedCalculator};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{PartTransport, UploadBackend};
use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::http::HttpBackend;
use crate::persist::{PersistedState, StateStore};
use crate::record::UploadView;
use crate::scheduler::{Action, Effect, EnqueueReport, QueueState, Rejection};
use crate::session::{SessionDeps, SessionMessage, SessionUpdate, UploadSession};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Event emitted to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UploadEvent {
    /// An upload's status or progress changed.
    Changed(UploadView),
    /// A file was refused at enqueue time.
    Rejected(Rejection),
    #[serde(rename_all = "camelCase")]
    Retrying {
        id: String,
        part_number: u32,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// Removed by [`UploadManager::clear_finished`].
    Removed { id: String },
}

/// External services used by the manager.
#[derive(Clone)]
pub struct Services {
    pub backend: Arc<dyn UploadBackend>,
    pub transport: Arc<dyn PartTransport>,
    pub store: Arc<dyn StateStore>,
}

impl Services {
    /// Uses one HTTP client for both the backend API and part uploads.
    pub fn http(backend: HttpBackend, store: Arc<dyn StateStore>) -> Self {
        let backend = Arc::new(backend);
        Self {
            backend: backend.clone(),
            transport: backend,
            store,
        }
    }
}

enum Command {
    Enqueue {
        files: Vec<Arc<dyn FileSource>>,
        reply: oneshot::Sender<EnqueueReport>,
    },
    Pause {
        id: String,
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    Resume {
        id: String,
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    Cancel {
        id: String,
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    Recover {
        id: String,
        file: Arc<dyn FileSource>,
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<UploadView>>,
    },
    ClearFinished {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the upload actor.
pub struct UploadManager {
    commands: mpsc::Sender<Command>,
    events_rx: Mutex<Option<mpsc::Receiver<UploadEvent>>>,
}

impl UploadManager {
    /// Restores saved state and spawns the actor on the current runtime.
    ///
    /// Restored uploads wait in `awaiting-file` until their file is enqueued
    /// or recovered. An unreadable state document is logged and ignored.
    pub fn start(config: UploaderConfig, services: Services) -> Self {
        let records = match services.store.load() {
            Ok(Some(state)) => {
                info!(uploads = state.uploads.len(), "restored upload state");
                state.into_records()
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable upload state");
                Vec::new()
            }
        };

        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let config = Arc::new(config);
        let actor = Actor {
            queue: QueueState::with_records(&config, records),
            deps: SessionDeps {
                backend: services.backend.clone(),
                transport: services.transport.clone(),
                config,
                updates: updates_tx,
            },
            services,
            events: events_tx,
            running: HashMap::new(),
            sessions: JoinSet::new(),
            speeds: HashMap::new(),
        };
        tokio::spawn(actor.run(commands_rx, updates_rx));

        Self {
            commands,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, UploadError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| UploadError::Closed)?;
        rx.await.map_err(|_| UploadError::Closed)
    }

    /// Queues files for upload. Files over the limits are reported, not queued.
    pub async fn enqueue(
        &self,
        files: Vec<Arc<dyn FileSource>>,
    ) -> Result<EnqueueReport, UploadError> {
        self.request(|reply| Command::Enqueue { files, reply }).await
    }

    pub async fn pause(&self, id: &str) -> Result<(), UploadError> {
        let id = id.to_string();
        self.request(|reply| Command::Pause { id, reply }).await?
    }

    pub async fn resume(&self, id: &str) -> Result<(), UploadError> {
        let id = id.to_string();
        self.request(|reply| Command::Resume { id, reply }).await?
    }

    /// Cancels an upload and asks the backend to discard its parts.
    pub async fn cancel(&self, id: &str) -> Result<(), UploadError> {
        let id = id.to_string();
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    /// Re-attaches a file to an upload that lost it.
    pub async fn recover_file(
        &self,
        id: &str,
        file: Arc<dyn FileSource>,
    ) -> Result<(), UploadError> {
        let id = id.to_string();
        self.request(|reply| Command::Recover { id, file, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<Vec<UploadView>, UploadError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Drops done and canceled uploads; returns their ids.
    pub async fn clear_finished(&self) -> Result<Vec<String>, UploadError> {
        self.request(|reply| Command::ClearFinished { reply }).await
    }

    /// Pauses running uploads, waits for their sessions, and saves state.
    pub async fn shutdown(&self) -> Result<(), UploadError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Speed bookkeeping for one uploading record.
struct SpeedTrack {
    calc: SpeedCalculator,
    /// Bytes counted so far (confirmed plus in flight).
    last_total: u64,
}

struct Actor {
    queue: QueueState,
    deps: SessionDeps,
    services: Services,
    events: mpsc::Sender<UploadEvent>,
    /// Cancellation tokens of the sessions allowed to run, by record id.
    running: HashMap<String, CancellationToken>,
    sessions: JoinSet<()>,
    speeds: HashMap<String, SpeedTrack>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut updates: mpsc::UnboundedReceiver<SessionMessage>,
    ) {
        self.promote();

        loop {
            tokio::select! {
                Some(msg) = updates.recv() => self.on_update(msg),
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown(&mut updates).await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        self.shutdown(&mut updates).await;
                        return;
                    }
                },
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "upload task failed");
                    }
                }
            }
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue { files, reply } => {
                let report = self.queue.enqueue(files);
                for rejection in &report.rejected {
                    warn!(file = %rejection.name, reason = %rejection.reason, "file rejected");
                    self.emit(UploadEvent::Rejected(rejection.clone()));
                }
                for id in report.accepted.iter().chain(&report.reattached) {
                    self.emit_changed(id);
                }
                self.after_mutation();
                let _ = reply.send(report);
            }
            Command::Pause { id, reply } => {
                let result = self.queue.pause(&id);
                if result.is_ok() {
                    info!(upload = %id, "upload paused");
                    self.stop_session(&id);
                    self.emit_changed(&id);
                    self.after_mutation();
                }
                let _ = reply.send(result);
            }
            Command::Resume { id, reply } => {
                let result = self.queue.resume(&id);
                if result.is_ok() {
                    info!(upload = %id, "upload resumed");
                    self.emit_changed(&id);
                    self.after_mutation();
                }
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                let result = self.queue.cancel(&id).map(|upload_id| {
                    info!(upload = %id, "upload canceled");
                    self.stop_session(&id);
                    if let Some(upload_id) = upload_id {
                        self.abort_backend(upload_id);
                    }
                    self.emit_changed(&id);
                    self.after_mutation();
                });
                let _ = reply.send(result);
            }
            Command::Recover { id, file, reply } => {
                let result = self.queue.recover(&id, file);
                if result.is_ok() {
                    self.emit_changed(&id);
                    self.after_mutation();
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.views());
            }
            Command::ClearFinished { reply } => {
                let removed = self.queue.clear_finished();
                for id in &removed {
                    self.speeds.remove(id);
                    self.emit(UploadEvent::Removed { id: id.clone() });
                }
                let _ = reply.send(removed);
            }
            // Handled by the run loop.
            Command::Shutdown { .. } => {}
        }
    }

    fn on_update(&mut self, msg: SessionMessage) {
        let id = msg.id.clone();
        let retry = match &msg.update {
            SessionUpdate::Retrying {
                part_number,
                attempt,
                delay,
                error,
            } => Some(UploadEvent::Retrying {
                id: id.clone(),
                part_number: *part_number,
                attempt: *attempt,
                delay_ms: delay.as_millis() as u64,
                error: error.clone(),
            }),
            _ => None,
        };
        let progress_only = matches!(msg.update, SessionUpdate::PartProgress { .. });
        let ended = matches!(
            msg.update,
            SessionUpdate::Finished { .. } | SessionUpdate::Failed { .. }
        );

        let before = self.queue.get(&id).map(|r| r.progress);
        let Some(applied) = self.queue.apply(msg) else {
            return;
        };

        for effect in applied.effects {
            match effect {
                Effect::Abort(upload_id) => self.abort_backend(upload_id),
            }
        }
        if let Some(event) = retry {
            self.emit(event);
        }
        self.track_speed(&id);

        if progress_only {
            // Only whole-percent changes are worth an event.
            if self.queue.get(&id).map(|r| r.progress) != before {
                self.emit_changed(&id);
            }
            return;
        }

        if ended {
            self.running.remove(&id);
            self.speeds.remove(&id);
        }
        self.emit_changed(&id);
        if applied.persist {
            self.persist();
        }
        self.promote();
    }

    /// Starts every session the queue allows.
    fn promote(&mut self) {
        let mut started = false;
        for Action::Start(id) in self.queue.next_actions() {
            let Some(start) = self.queue.start(&id) else {
                continue;
            };
            debug!(upload = %id, run = start.run, "starting upload session");
            let cancel = CancellationToken::new();
            self.running.insert(id.clone(), cancel.clone());
            let session = UploadSession::new(self.deps.clone(), start, cancel);
            self.sessions.spawn(session.run());
            self.emit_changed(&id);
            started = true;
        }
        if started {
            self.persist();
        }
    }

    fn after_mutation(&mut self) {
        self.persist();
        self.promote();
    }

    fn stop_session(&mut self, id: &str) {
        if let Some(cancel) = self.running.remove(id) {
            cancel.cancel();
        }
        self.speeds.remove(id);
    }

    /// Best-effort cleanup of a backend session; failures are only logged.
    fn abort_backend(&mut self, upload_id: String) {
        let backend = self.services.backend.clone();
        self.sessions.spawn(async move {
            match backend.abort(&upload_id).await {
                Ok(()) => debug!(%upload_id, "backend session aborted"),
                Err(e) => warn!(%upload_id, error = %e, "failed to abort backend session"),
            }
        });
    }

    fn track_speed(&mut self, id: &str) {
        let Some(record) = self.queue.get(id) else {
            return;
        };
        if record.status != UploadStatus::Uploading {
            return;
        }
        let total = record.uploaded_bytes + record.in_flight;
        let track = self
            .speeds
            .entry(id.to_string())
            .or_insert_with(|| SpeedTrack {
                calc: SpeedCalculator::default(),
                last_total: total,
            });
        if total > track.last_total {
            track.calc.add_sample(total - track.last_total);
        }
        track.last_total = total;
    }

    fn views(&self) -> Vec<UploadView> {
        self.queue
            .records()
            .iter()
            .map(|r| r.view(self.speeds.get(&r.id).map(|t| &t.calc)))
            .collect()
    }

    fn emit_changed(&self, id: &str) {
        if let Some(record) = self.queue.get(id) {
            let speed = self.speeds.get(id).map(|t| &t.calc);
            self.emit(UploadEvent::Changed(record.view(speed)));
        }
    }

    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("upload event dropped: {e}");
        }
    }

    fn persist(&self) {
        let state = PersistedState::capture(self.queue.records());
        if let Err(e) = self.services.store.save(&state) {
            warn!(error = %e, "failed to persist upload state");
        }
    }

    async fn shutdown(&mut self, updates: &mut mpsc::UnboundedReceiver<SessionMessage>) {
        info!(
            running = self.running.len(),
            pending = self.queue.pending(),
            "upload manager shutting down"
        );

        let ids: Vec<String> = self.running.keys().cloned().collect();
        for id in ids {
            // A completing upload is left to finish.
            if self.queue.pause(&id).is_ok() {
                self.stop_session(&id);
            }
        }

        // Apply what the sessions report while they wind down, but start
        // nothing new.
        loop {
            tokio::select! {
                Some(msg) = updates.recv() => {
                    let _ = self.queue.apply(msg);
                }
                joined = self.sessions.join_next() => match joined {
                    Some(Err(e)) => error!(error = %e, "upload task failed"),
                    Some(Ok(())) => {}
                    None => break,
                },
            }
        }
        while let Ok(msg) = updates.try_recv() {
            let _ = self.queue.apply(msg);
        }

        self.persist();
    }
}
