//! One file's multipart lifecycle: initiate, upload parts, complete.
//!
//! A session never touches the upload record. It reports every step as a
//! [`SessionUpdate`] tagged with its run id; the queue applies them, and
//! drops updates from runs that were superseded.

use std::sync::Arc;
use std::time::Duration;

use partwise_protocol::InitiateRequest;
use partwise_transfer::{
    Chunk, FileSource, checksum_part, completed_parts, effective_chunk_size, plan,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{PartTransport, ProgressFn, UploadBackend};
use crate::config::UploaderConfig;
use crate::error::{TransportError, UploadError};
use crate::transport::send_watched;

/// Progress report from a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Backend session opened and chunks planned.
    Initiated {
        upload_id: String,
        chunk_size: u64,
        chunks: Vec<Chunk>,
    },
    /// Bytes sent so far in the current attempt of chunk `index`.
    PartProgress { index: u32, sent: u64 },
    PartUploaded { index: u32, etag: String },
    /// A part attempt failed and another one is scheduled after `delay`.
    Retrying {
        part_number: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// All parts stored; finalization request in flight.
    Completing,
    Finished { location: String },
    Failed { error: String },
    /// Stopped by pause or cancel.
    Interrupted,
}

/// A [`SessionUpdate`] addressed to one upload record and run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    pub id: String,
    pub run: u64,
    pub update: SessionUpdate,
}

/// Snapshot of a record taken when a session starts.
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub id: String,
    pub run: u64,
    pub file: Arc<dyn FileSource>,
    pub upload_id: Option<String>,
    pub chunk_size: u64,
    pub chunks: Vec<Chunk>,
}

/// Services shared by every session of a manager.
#[derive(Clone)]
pub struct SessionDeps {
    pub backend: Arc<dyn UploadBackend>,
    pub transport: Arc<dyn PartTransport>,
    pub config: Arc<UploaderConfig>,
    pub updates: mpsc::UnboundedSender<SessionMessage>,
}

pub struct UploadSession {
    deps: SessionDeps,
    start: SessionStart,
    cancel: CancellationToken,
}

impl UploadSession {
    pub fn new(deps: SessionDeps, start: SessionStart, cancel: CancellationToken) -> Self {
        Self {
            deps,
            start,
            cancel,
        }
    }

    /// Drives the upload to its end and reports the outcome.
    pub async fn run(mut self) {
        let update = match self.drive().await {
            Ok(location) => {
                info!(upload = %self.start.id, %location, "upload finished");
                SessionUpdate::Finished { location }
            }
            Err(e) if e.is_interruption() => {
                debug!(upload = %self.start.id, "upload interrupted");
                SessionUpdate::Interrupted
            }
            Err(e) => {
                warn!(upload = %self.start.id, error = %e, "upload failed");
                SessionUpdate::Failed {
                    error: e.to_string(),
                }
            }
        };
        self.send(update);
    }

    async fn drive(&mut self) -> Result<String, UploadError> {
        let needs_plan = self.start.chunks.is_empty() && self.start.file.size() > 0;
        let upload_id = match self.start.upload_id.clone() {
            Some(id) if !needs_plan => id,
            _ => self.initiate().await?,
        };
        if self.cancel.is_cancelled() {
            return Err(UploadError::Interrupted);
        }

        for index in 0..self.start.chunks.len() {
            if self.start.chunks[index].uploaded {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(UploadError::Interrupted);
            }
            let etag = self.upload_part(&upload_id, index).await?;
            let chunk = &mut self.start.chunks[index];
            chunk.mark_uploaded(etag.clone());
            let index = chunk.index;
            self.send(SessionUpdate::PartUploaded { index, etag });
        }

        if self.cancel.is_cancelled() {
            return Err(UploadError::Interrupted);
        }
        self.finalize(&upload_id).await
    }

    /// Opens the backend session and plans the chunks.
    async fn initiate(&mut self) -> Result<String, UploadError> {
        let file = &self.start.file;
        let request = InitiateRequest {
            file_name: file.name().to_string(),
            mime_type: file.mime_type().to_string(),
            size: file.size(),
        };

        // Not cancellable: an opened session must be recorded so a cancel
        // can still abort it.
        let timeout = self.deps.config.limits.attempt_timeout();
        let resp = tokio::time::timeout(timeout, self.deps.backend.initiate(&request))
            .await
            .map_err(|_| TransportError::TimedOut)??;

        if let Some(reason) = resp.rejection(request.size) {
            return Err(UploadError::Rejected(reason));
        }
        if resp.upload_id.is_empty() {
            return Err(UploadError::MissingSession);
        }

        let requested = match resp.chunk_size {
            Some(size) if size > 0 => size,
            _ => self.start.chunk_size,
        };
        let chunk_size = effective_chunk_size(request.size, requested);
        let chunks = plan(
            request.size,
            chunk_size,
            &resp.already_uploaded_parts,
            &resp.parts_etags,
        );
        let resumed = chunks.iter().filter(|c| c.uploaded).count();
        info!(
            upload = %self.start.id,
            upload_id = %resp.upload_id,
            parts = chunks.len(),
            resumed,
            "upload initiated"
        );

        self.start.upload_id = Some(resp.upload_id.clone());
        self.start.chunk_size = chunk_size;
        self.start.chunks = chunks.clone();
        self.send(SessionUpdate::Initiated {
            upload_id: resp.upload_id.clone(),
            chunk_size,
            chunks,
        });
        Ok(resp.upload_id)
    }

    /// Uploads one chunk under the retry policy and returns its etag.
    async fn upload_part(&self, upload_id: &str, index: usize) -> Result<String, UploadError> {
        let chunk = &self.start.chunks[index];
        let part_number = chunk.part_number();

        // Local read failures are not retriable.
        let body = self.start.file.read_range(chunk.start, chunk.end).await?;
        let checksum = self
            .deps
            .config
            .part_checksums
            .then(|| checksum_part(&body));

        let on_retry = |attempt: u32, delay: Duration, err: &UploadError| {
            warn!(
                upload = %self.start.id,
                part = part_number,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "part attempt failed, retrying"
            );
            self.send(SessionUpdate::Retrying {
                part_number,
                attempt,
                delay,
                error: err.to_string(),
            });
        };

        self.deps
            .config
            .retry
            .run(&self.cancel, on_retry, |attempt| {
                let body = body.clone();
                let checksum = checksum.clone();
                let progress = self.progress_fn(chunk.index);
                async move {
                    // Part URLs are single-use: fetch a fresh one per attempt.
                    let timeout = self.deps.config.limits.attempt_timeout();
                    let fetch = tokio::time::timeout(
                        timeout,
                        self.deps.backend.part_url(upload_id, part_number),
                    );
                    let url = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(UploadError::Interrupted),
                        url = fetch => url.map_err(|_| TransportError::TimedOut)??,
                    };
                    debug!(upload = %self.start.id, part = part_number, attempt, "sending part");
                    let etag = send_watched(
                        self.deps.transport.as_ref(),
                        &url,
                        body,
                        checksum,
                        &self.deps.config.limits,
                        &self.cancel,
                        progress,
                    )
                    .await?;
                    Ok(etag)
                }
            })
            .await
    }

    async fn finalize(&self, upload_id: &str) -> Result<String, UploadError> {
        let parts = completed_parts(&self.start.chunks).ok_or(UploadError::Incomplete)?;
        self.send(SessionUpdate::Completing);
        debug!(upload = %self.start.id, parts = parts.len(), "completing upload");

        // Not cancellable: the backend may already be assembling the object.
        let timeout = self.deps.config.limits.attempt_timeout();
        let resp = tokio::time::timeout(timeout, self.deps.backend.complete(upload_id, &parts))
            .await
            .map_err(|_| TransportError::TimedOut)??;
        if resp.file_url.is_empty() {
            return Err(UploadError::MissingLocation);
        }
        Ok(resp.file_url)
    }

    fn progress_fn(&self, index: u32) -> ProgressFn {
        let updates = self.deps.updates.clone();
        let id = self.start.id.clone();
        let run = self.start.run;
        Arc::new(move |sent| {
            let _ = updates.send(SessionMessage {
                id: id.clone(),
                run,
                update: SessionUpdate::PartProgress { index, sent },
            });
        })
    }

    fn send(&self, update: SessionUpdate) {
        // The receiver only goes away during shutdown.
        let _ = self.deps.updates.send(SessionMessage {
            id: self.start.id.clone(),
            run: self.start.run,
            update,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use partwise_protocol::InitiateResponse;
    use partwise_transfer::MemoryFile;
    use std::collections::HashMap;

    const MIB: usize = 1024 * 1024;
    const QUARTER: u64 = (MIB / 4) as u64;

    fn deps(
        mock: &Arc<MockBackend>,
        config: UploaderConfig,
    ) -> (SessionDeps, mpsc::UnboundedReceiver<SessionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let deps = SessionDeps {
            backend: mock.clone(),
            transport: mock.clone(),
            config: Arc::new(config),
            updates: tx,
        };
        (deps, rx)
    }

    fn fresh(file: MemoryFile) -> SessionStart {
        SessionStart {
            id: "r1".into(),
            run: 1,
            file: Arc::new(file),
            upload_id: None,
            chunk_size: partwise_transfer::DEFAULT_CHUNK_SIZE,
            chunks: Vec::new(),
        }
    }

    fn one_mib() -> MemoryFile {
        MemoryFile::new("movie.mp4", vec![1u8; MIB])
    }

    async fn run_to_end(
        deps: SessionDeps,
        start: SessionStart,
        mut rx: mpsc::UnboundedReceiver<SessionMessage>,
    ) -> Vec<SessionUpdate> {
        UploadSession::new(deps, start, CancellationToken::new())
            .run()
            .await;
        let mut updates = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            assert_eq!(msg.id, "r1");
            assert_eq!(msg.run, 1);
            updates.push(msg.update);
        }
        updates
    }

    fn without_progress(updates: &[SessionUpdate]) -> Vec<&SessionUpdate> {
        updates
            .iter()
            .filter(|u| !matches!(u, SessionUpdate::PartProgress { .. }))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failing_part_then_completes() {
        let mock = MockBackend::new();
        mock.set_chunk_size(QUARTER);
        mock.fail_part(3, vec![MockBackend::http(500); 3]);
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(one_mib()), rx).await;

        assert_eq!(mock.put_attempts(3), 4);
        assert_eq!(mock.put_attempts(1), 1);
        // A fresh URL for every attempt.
        assert_eq!(mock.part_url_calls(), 7);

        let retries: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::Retrying {
                    part_number,
                    attempt,
                    ..
                } => Some((*part_number, *attempt)),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![(3, 1), (3, 2), (3, 3)]);

        let completed = mock.completed();
        assert_eq!(completed.len(), 1);
        let numbers: Vec<u32> = completed[0].iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert!(matches!(
            updates.last(),
            Some(SessionUpdate::Finished { location }) if location == "https://cdn/movie.mp4"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_session_sends_only_missing_parts() {
        let mock = MockBackend::new();
        mock.set_initiate(InitiateResponse {
            upload_id: "up-1".into(),
            chunk_size: Some(QUARTER),
            already_uploaded_parts: vec![1, 2],
            parts_etags: HashMap::from([(1, "e1".to_string()), (2, "e2".to_string())]),
            ..Default::default()
        });
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(one_mib()), rx).await;

        assert_eq!(mock.put_order("up-1"), vec![3, 4]);
        let etags: Vec<String> = mock.completed()[0].iter().map(|p| p.etag.clone()).collect();
        assert_eq!(etags, vec!["e1", "e2", "etag-up-1-3", "etag-up-1-4"]);

        match &updates[0] {
            SessionUpdate::Initiated { chunks, .. } => {
                assert_eq!(chunks.iter().filter(|c| c.uploaded).count(), 2);
            }
            other => panic!("expected Initiated, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn known_session_skips_initiate() {
        let mock = MockBackend::new();
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let mut chunks = plan(MIB as u64, QUARTER, &[], &HashMap::new());
        chunks[0].mark_uploaded("e1".into());
        let start = SessionStart {
            upload_id: Some("known".into()),
            chunk_size: QUARTER,
            chunks,
            ..fresh(one_mib())
        };

        let updates = run_to_end(deps, start, rx).await;

        assert!(mock.initiated().is_empty());
        assert_eq!(mock.put_order("known"), vec![2, 3, 4]);
        let uploaded: Vec<u32> = updates
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::PartUploaded { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(uploaded, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn parts_go_out_in_ascending_order() {
        let mock = MockBackend::new();
        mock.set_chunk_size(100);
        let (deps, rx) = deps(&mock, UploaderConfig::default());
        let file = MemoryFile::new("a.bin", vec![0u8; 1_050]);

        run_to_end(deps, fresh(file), rx).await;

        assert_eq!(mock.put_order("up-1"), (1..=11).collect::<Vec<u32>>());
        assert_eq!(mock.max_concurrent_puts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_rejection_is_fatal() {
        let mock = MockBackend::new();
        mock.set_initiate(InitiateResponse {
            upload_id: "up-1".into(),
            remaining_bytes: Some(10),
            ..Default::default()
        });
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(one_mib()), rx).await;

        assert_eq!(mock.put_order("up-1"), Vec::<u32>::new());
        match updates.as_slice() {
            [SessionUpdate::Failed { error }] => assert!(error.contains("quota exceeded")),
            other => panic!("unexpected updates: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_upload_id_is_an_error() {
        let mock = MockBackend::new();
        mock.set_initiate(InitiateResponse::default());
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(one_mib()), rx).await;
        assert_eq!(
            updates,
            vec![SessionUpdate::Failed {
                error: UploadError::MissingSession.to_string()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_part_error_is_not_retried() {
        let mock = MockBackend::new();
        mock.set_chunk_size(QUARTER);
        mock.fail_part(2, vec![MockBackend::http(404)]);
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(one_mib()), rx).await;

        assert_eq!(mock.put_attempts(2), 1);
        assert_eq!(mock.put_order("up-1"), vec![1, 2]);
        assert!(mock.completed().is_empty());
        assert!(matches!(
            updates.last(),
            Some(SessionUpdate::Failed { error }) if error.contains("404")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_etag_is_retried() {
        let mock = MockBackend::new();
        mock.fail_part(1, vec![TransportError::MissingEtag]);
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(MemoryFile::new("a.txt", "hello")), rx).await;

        assert_eq!(mock.put_attempts(1), 2);
        assert!(matches!(
            updates.last(),
            Some(SessionUpdate::Finished { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let mock = MockBackend::new();
        mock.fail_part(1, vec![TransportError::Stalled; 5]);
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(MemoryFile::new("a.txt", "hello")), rx).await;

        assert_eq!(mock.put_attempts(1), 5);
        let retries = without_progress(&updates)
            .into_iter()
            .filter(|u| matches!(u, SessionUpdate::Retrying { .. }))
            .count();
        assert_eq!(retries, 4);
        assert_eq!(
            updates.last(),
            Some(&SessionUpdate::Failed {
                error: "transfer stalled".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_part_url_times_out_and_fails() {
        let mock = MockBackend::new();
        mock.hang_part_urls();
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(MemoryFile::new("a.txt", "hello")), rx).await;

        assert_eq!(mock.part_url_calls(), 5);
        assert_eq!(mock.put_attempts(1), 0);
        let retries = updates
            .iter()
            .filter(|u| matches!(u, SessionUpdate::Retrying { .. }))
            .count();
        assert_eq!(retries, 4);
        assert_eq!(
            updates.last(),
            Some(&SessionUpdate::Failed {
                error: "attempt timed out".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_location_is_an_error() {
        let mock = MockBackend::new();
        mock.set_location("");
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(MemoryFile::new("a.txt", "hello")), rx).await;
        assert_eq!(
            updates.last(),
            Some(&SessionUpdate::Failed {
                error: UploadError::MissingLocation.to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_file_completes_with_no_parts() {
        let mock = MockBackend::new();
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        let updates = run_to_end(deps, fresh(MemoryFile::new("empty.txt", "")), rx).await;

        assert_eq!(mock.initiated().len(), 1);
        assert_eq!(mock.completed(), vec![Vec::new()]);
        assert!(matches!(
            updates.last(),
            Some(SessionUpdate::Finished { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn checksums_sent_when_enabled() {
        let mock = MockBackend::new();
        let config = UploaderConfig {
            part_checksums: true,
            ..UploaderConfig::default()
        };
        let (deps, rx) = deps(&mock, config);

        run_to_end(deps, fresh(MemoryFile::new("b.txt", "abc")), rx).await;
        assert_eq!(mock.checksums(), vec![Some(checksum_part(b"abc"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn checksums_off_by_default() {
        let mock = MockBackend::new();
        let (deps, rx) = deps(&mock, UploaderConfig::default());

        run_to_end(deps, fresh(MemoryFile::new("b.txt", "abc")), rx).await;
        assert_eq!(mock.checksums(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_between_parts() {
        let mock = MockBackend::new();
        mock.set_chunk_size(QUARTER);
        let mut entered = mock.hold_part(2);
        let (deps, mut rx) = deps(&mock, UploaderConfig::default());
        let cancel = CancellationToken::new();

        let session = UploadSession::new(deps, fresh(one_mib()), cancel.clone());
        let task = tokio::spawn(session.run());

        assert_eq!(entered.recv().await, Some(2));
        cancel.cancel();
        task.await.unwrap();

        let mut updates = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            updates.push(msg.update);
        }
        assert!(updates.contains(&SessionUpdate::PartUploaded {
            index: 0,
            etag: "etag-up-1-1".into()
        }));
        assert_eq!(updates.last(), Some(&SessionUpdate::Interrupted));
        assert!(mock.completed().is_empty());
        assert_eq!(mock.put_order("up-1"), vec![1, 2]);
    }
}
