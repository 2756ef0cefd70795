//! In-process backend double shared by the session and manager tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use partwise_protocol::{CompleteResponse, CompletedPart, InitiateRequest, InitiateResponse};
use tokio::sync::mpsc;

use crate::backend::{BackendFuture, PartFuture, PartTransport, ProgressFn, UploadBackend};
use crate::error::TransportError;

#[derive(Default)]
struct State {
    initiate: InitiateResponse,
    location: Option<String>,
    sequential_ids: bool,
    hang_part_urls: bool,
    put_delay: Duration,
    failures: HashMap<u32, VecDeque<TransportError>>,
    held: HashSet<u32>,
    entered: Option<mpsc::UnboundedSender<u32>>,

    initiated: Vec<InitiateRequest>,
    part_url_calls: usize,
    puts: Vec<(String, u32)>,
    checksums: Vec<Option<String>>,
    completed: Vec<Vec<CompletedPart>>,
    aborted: Vec<String>,
    active_puts: usize,
    max_active_puts: usize,
}

/// Scriptable backend and transport.
///
/// Initiate answers with upload id `up-1` unless told otherwise; part URLs
/// are `mock://{upload_id}/{part}/{n}` and etags `etag-{upload_id}-{part}`.
pub(crate) struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let state = State {
            initiate: InitiateResponse {
                upload_id: "up-1".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn http(status: u16) -> TransportError {
        TransportError::Status {
            status,
            body: String::new(),
        }
    }

    pub fn set_initiate(&self, response: InitiateResponse) {
        self.state.lock().unwrap().initiate = response;
    }

    pub fn set_chunk_size(&self, size: u64) {
        self.state.lock().unwrap().initiate.chunk_size = Some(size);
    }

    /// Answers each initiate with a fresh id: `up-1`, `up-2`, ...
    pub fn sequential_upload_ids(&self) {
        self.state.lock().unwrap().sequential_ids = true;
    }

    /// Part URL requests never answer.
    pub fn hang_part_urls(&self) {
        self.state.lock().unwrap().hang_part_urls = true;
    }

    pub fn set_location(&self, location: &str) {
        self.state.lock().unwrap().location = Some(location.into());
    }

    /// Every part attempt takes this long.
    pub fn set_put_delay(&self, delay: Duration) {
        self.state.lock().unwrap().put_delay = delay;
    }

    /// Fails the next attempts of `part` with `errors`, in order.
    pub fn fail_part(&self, part: u32, errors: Vec<TransportError>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(part, errors.into());
    }

    /// Makes attempts at `part` hang; the receiver reports each one.
    pub fn hold_part(&self, part: u32) -> mpsc::UnboundedReceiver<u32> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.held.insert(part);
        state.entered = Some(tx);
        rx
    }

    pub fn release_all(&self) {
        self.state.lock().unwrap().held.clear();
    }

    pub fn initiated(&self) -> Vec<InitiateRequest> {
        self.state.lock().unwrap().initiated.clone()
    }

    pub fn part_url_calls(&self) -> usize {
        self.state.lock().unwrap().part_url_calls
    }

    /// Part numbers of every attempt for `upload_id`, in start order.
    pub fn put_order(&self, upload_id: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .puts
            .iter()
            .filter(|(id, _)| id == upload_id)
            .map(|(_, part)| *part)
            .collect()
    }

    pub fn put_attempts(&self, part: u32) -> usize {
        self.state
            .lock()
            .unwrap()
            .puts
            .iter()
            .filter(|(_, p)| *p == part)
            .count()
    }

    pub fn checksums(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().checksums.clone()
    }

    pub fn completed(&self) -> Vec<Vec<CompletedPart>> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted.clone()
    }

    pub fn max_concurrent_puts(&self) -> usize {
        self.state.lock().unwrap().max_active_puts
    }
}

/// Splits `mock://{upload_id}/{part}/{n}`.
fn parse_url(url: &str) -> (String, u32) {
    let rest = url.trim_start_matches("mock://");
    let mut segments = rest.split('/');
    let upload_id = segments.next().unwrap_or_default().to_string();
    let part = segments.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (upload_id, part)
}

impl UploadBackend for MockBackend {
    fn initiate<'a>(&'a self, request: &'a InitiateRequest) -> BackendFuture<'a, InitiateResponse> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.initiated.push(request.clone());
            let mut response = state.initiate.clone();
            if state.sequential_ids {
                response.upload_id = format!("up-{}", state.initiated.len());
            }
            Ok(response)
        })
    }

    fn part_url<'a>(&'a self, upload_id: &'a str, part_number: u32) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let (hang, n) = {
                let mut state = self.state.lock().unwrap();
                state.part_url_calls += 1;
                (state.hang_part_urls, state.part_url_calls)
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(format!("mock://{upload_id}/{part_number}/{n}"))
        })
    }

    fn complete<'a>(
        &'a self,
        _upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, CompleteResponse> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.completed.push(parts.to_vec());
            let file_url = match &state.location {
                Some(location) => location.clone(),
                None => format!(
                    "https://cdn/{}",
                    state
                        .initiated
                        .last()
                        .map(|r| r.file_name.as_str())
                        .unwrap_or("file")
                ),
            };
            Ok(CompleteResponse { file_url })
        })
    }

    fn abort<'a>(&'a self, upload_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .aborted
                .push(upload_id.to_string());
            Ok(())
        })
    }
}

impl PartTransport for MockBackend {
    fn put_part<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
        checksum: Option<String>,
        progress: ProgressFn,
    ) -> PartFuture<'a> {
        Box::pin(async move {
            let (upload_id, part) = parse_url(url);
            let (delay, held, failure) = {
                let mut state = self.state.lock().unwrap();
                state.puts.push((upload_id.clone(), part));
                state.checksums.push(checksum);
                state.active_puts += 1;
                state.max_active_puts = state.max_active_puts.max(state.active_puts);
                let held = state.held.contains(&part);
                if held && let Some(entered) = &state.entered {
                    let _ = entered.send(part);
                }
                let failure = state.failures.get_mut(&part).and_then(VecDeque::pop_front);
                (state.put_delay, held, failure)
            };
            let _active = ActiveGuard(self);

            if held {
                std::future::pending::<()>().await;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = failure {
                return Err(err);
            }
            progress(body.len() as u64);
            Ok(format!("etag-{upload_id}-{part}"))
        })
    }
}

/// Decrements the active-put counter when an attempt ends or is dropped.
struct ActiveGuard<'a>(&'a MockBackend);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.state.lock() {
            state.active_puts -= 1;
        }
    }
}
