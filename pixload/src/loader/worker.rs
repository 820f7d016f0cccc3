//! A single background thread draining a FIFO of load requests

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Cursor};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::bitmap::Bitmap;
use crate::error::LoadError;
use crate::image::convert_stream_to_bitmap;
use crate::net::Downloader;
use crate::request::{ImageAttributes, ResourceId, ResourceRequest, ResourceSource};

use super::cancel::{CancelToken, InterruptionPoint};
use super::{CompletionQueues, FailedResource, LoadedResource};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Operation {
    /// Read a local file
    Load,
    /// Fetch a url, then decode it
    Download,
    /// Decode bytes already in memory
    Decode,
}

#[derive(Debug)]
pub(crate) struct WorkItem {
    pub request: ResourceRequest,
    pub operation: Operation,
    /// Tells apart two requests issued under the same id
    pub ticket: u64,
}

/// How remote sources are fetched.
#[derive(Clone)]
pub(crate) struct DownloadPolicy {
    pub downloader: Arc<dyn Downloader>,
    pub max_bytes: u64,
}

#[derive(Default)]
struct WorkQueue {
    items: VecDeque<WorkItem>,
    paused: bool,
    terminating: bool,
}

struct Shared {
    queue: Mutex<WorkQueue>,
    wake: Condvar,
    token: CancelToken,
}

pub(crate) struct WorkerThread {
    name: String,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub(crate) fn spawn(
        name: &str,
        paused: bool,
        policy: DownloadPolicy,
        completions: Arc<CompletionQueues>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(WorkQueue {
                paused,
                ..Default::default()
            }),
            wake: Condvar::new(),
            token: CancelToken::new(),
        });

        let handle = {
            let shared = Arc::clone(&shared);
            let name = name.to_string();
            thread::Builder::new()
                .name(format!("pixload-{name}"))
                .spawn(move || run(&name, &shared, &policy, &completions))?
        };

        log::debug!("Started {name} worker");
        Ok(Self {
            name: name.to_string(),
            shared,
            handle: Some(handle),
        })
    }

    pub(crate) fn add_request(&self, request: ResourceRequest, operation: Operation, ticket: u64) {
        let mut queue = self.shared.queue.lock();
        let was_empty = queue.items.is_empty();
        queue.items.push_back(WorkItem {
            request,
            operation,
            ticket,
        });
        if was_empty && !queue.paused {
            self.shared.wake.notify_one();
        }
    }

    /// Drops a queued request, or flags it when it may already be running.
    ///
    /// Returns whether the request was still queued.
    pub(crate) fn cancel_request(&self, id: ResourceId) -> bool {
        let mut queue = self.shared.queue.lock();
        if let Some(index) = queue.items.iter().position(|item| item.request.id == id) {
            queue.items.remove(index);
            return true;
        }

        self.shared.token.cancel(id);
        log::debug!(
            "{} worker: {id} not queued, flagged as cancelled (in flight: {:?})",
            self.name,
            self.shared.token.in_flight()
        );
        false
    }

    pub(crate) fn pause(&self) {
        self.shared.queue.lock().paused = true;
    }

    pub(crate) fn resume(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.paused {
            queue.paused = false;
            self.shared.wake.notify_one();
        }
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    /// Stops the thread after its current operation. Queued work is dropped.
    pub(crate) fn terminate(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        {
            let mut queue = self.shared.queue.lock();
            queue.terminating = true;
            self.shared.wake.notify_all();
        }

        if handle.join().is_err() {
            log::error!("{} worker thread panicked", self.name);
        }
        log::debug!("Stopped {} worker", self.name);
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run(
    name: &str,
    shared: &Shared,
    policy: &DownloadPolicy,
    completions: &CompletionQueues,
) {
    loop {
        let item = {
            let mut queue = shared.queue.lock();
            while !queue.terminating && (queue.items.is_empty() || queue.paused) {
                shared.wake.wait(&mut queue);
            }
            if queue.terminating {
                let dropped = queue.items.len();
                if dropped > 0 {
                    log::debug!("{name} worker exiting with {dropped} queued requests");
                }
                return;
            }
            let Some(item) = queue.items.pop_front() else {
                continue;
            };
            shared.token.begin(item.request.id);
            item
        };

        process(name, shared, policy, completions, item);
        shared.token.finish();
    }
}

fn process(
    name: &str,
    shared: &Shared,
    policy: &DownloadPolicy,
    completions: &CompletionQueues,
    item: WorkItem,
) {
    let WorkItem {
        request,
        operation,
        ticket,
    } = item;
    let id = request.id;
    let span = tracing::debug_span!("request", worker = name, id, ?operation);
    let _guard = span.enter();

    let interruption = shared.token.interruption(id);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        execute(&request, operation, policy, &interruption)
    }))
    .unwrap_or_else(|payload| Err(LoadError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(bitmap) => {
            log::debug!(
                "Loaded {id}: {}x{} {}",
                bitmap.width(),
                bitmap.height(),
                bitmap.format()
            );
            completions.add_loaded(LoadedResource {
                id,
                ticket,
                kind: request.kind,
                bitmap,
            });
        }
        Err(e) => match e.failure_kind() {
            None => log::debug!("Request {id} cancelled while executing"),
            Some(failure) => {
                log::warn!("Request {id} failed: {e}");
                completions.add_failed(FailedResource {
                    id,
                    ticket,
                    kind: request.kind,
                    failure,
                });
            }
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs one request to completion on the calling thread.
pub(crate) fn execute(
    request: &ResourceRequest,
    operation: Operation,
    policy: &DownloadPolicy,
    interruption: &dyn InterruptionPoint,
) -> Result<Bitmap, LoadError> {
    let attributes = &request.attributes;
    match (&request.source, operation) {
        (ResourceSource::Memory(bytes), _) => decode_memory(bytes, attributes, interruption),
        (ResourceSource::Location(url), Operation::Download) => {
            download(url, policy, attributes, interruption)
        }
        (ResourceSource::Location(path), _) => load_file(path, attributes, interruption),
    }
}

fn load_file(
    path: &str,
    attributes: &ImageAttributes,
    interruption: &dyn InterruptionPoint,
) -> Result<Bitmap, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::FileNotFound {
        path: path.into(),
        source,
    })?;
    let mut stream = BufReader::new(file);
    let bitmap = convert_stream_to_bitmap(&mut stream, Some(path), attributes, interruption)?;
    interruption.check()?;
    Ok(bitmap)
}

fn download(
    url: &str,
    policy: &DownloadPolicy,
    attributes: &ImageAttributes,
    interruption: &dyn InterruptionPoint,
) -> Result<Bitmap, LoadError> {
    let bytes = policy
        .downloader
        .fetch(url, policy.max_bytes)
        .map_err(LoadError::Download)?;
    if bytes.is_empty() {
        return Err(LoadError::EmptyBuffer);
    }
    convert_stream_to_bitmap(&mut Cursor::new(bytes), Some(url), attributes, interruption)
}

fn decode_memory(
    bytes: &[u8],
    attributes: &ImageAttributes,
    interruption: &dyn InterruptionPoint,
) -> Result<Bitmap, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::EmptyBuffer);
    }
    convert_stream_to_bitmap(&mut Cursor::new(bytes), None, attributes, interruption)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use imageproc::image::{DynamicImage, ImageFormat};

    use super::*;
    use crate::error::FailureKind;
    use crate::loader::NeverInterrupted;
    use crate::request::{ImageAttributes, ResourceRequest};

    struct PanickingDownloader;

    impl Downloader for PanickingDownloader {
        fn fetch(&self, url: &str, _max_bytes: u64) -> anyhow::Result<Vec<u8>> {
            panic!("no network for {url}");
        }
    }

    fn policy() -> DownloadPolicy {
        DownloadPolicy {
            downloader: Arc::new(PanickingDownloader),
            max_bytes: 1024,
        }
    }

    fn png() -> Arc<[u8]> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(8, 8)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner().into()
    }

    fn wait_for(
        completions: &CompletionQueues,
        count: usize,
    ) -> (Vec<LoadedResource>, Vec<FailedResource>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let (mut loaded, mut failed) = (Vec::new(), Vec::new());
        while loaded.len() + failed.len() < count && Instant::now() < deadline {
            let (l, f) = completions.drain();
            loaded.extend(l);
            failed.extend(f);
            thread::sleep(Duration::from_millis(5));
        }
        (loaded, failed)
    }

    #[test]
    fn paused_worker_keeps_queue_until_resumed() {
        let completions = Arc::new(CompletionQueues::default());
        let mut worker =
            WorkerThread::spawn("test", true, policy(), Arc::clone(&completions)).unwrap();

        let bytes = png();
        for id in 0..4 {
            let request =
                ResourceRequest::from_memory(id, bytes.clone(), ImageAttributes::default());
            worker.add_request(request, Operation::Decode, id as u64);
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(worker.queued(), 4);
        assert!(completions.drain().0.is_empty());

        assert!(worker.cancel_request(2));
        assert!(!worker.cancel_request(99));
        assert_eq!(worker.queued(), 3);

        worker.resume();
        let (loaded, failed) = wait_for(&completions, 3);
        let mut ids: Vec<_> = loaded.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 3]);
        assert!(failed.is_empty());

        worker.terminate();
    }

    #[test]
    fn panics_are_reported_as_unknown() {
        let completions = Arc::new(CompletionQueues::default());
        let worker =
            WorkerThread::spawn("test", false, policy(), Arc::clone(&completions)).unwrap();

        let request = ResourceRequest::from_location(
            5,
            "https://example.invalid/a.png",
            ImageAttributes::default(),
        );
        worker.add_request(request, Operation::Download, 0);
        let request = ResourceRequest::from_memory(6, png(), ImageAttributes::default());
        worker.add_request(request, Operation::Decode, 1);

        let (loaded, failed) = wait_for(&completions, 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 5);
        assert_eq!(failed[0].failure, FailureKind::Unknown);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, 6);
    }

    /// Holds every fetch until the test lets it through.
    struct GatedDownloader {
        started: Mutex<mpsc::Sender<String>>,
        release: Mutex<mpsc::Receiver<()>>,
        body: Vec<u8>,
    }

    impl Downloader for GatedDownloader {
        fn fetch(&self, url: &str, _max_bytes: u64) -> anyhow::Result<Vec<u8>> {
            self.started.lock().send(url.to_string())?;
            self.release.lock().recv_timeout(Duration::from_secs(10))?;
            Ok(self.body.clone())
        }
    }

    fn gated() -> (DownloadPolicy, mpsc::Receiver<String>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let downloader = GatedDownloader {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
            body: png().to_vec(),
        };
        let policy = DownloadPolicy {
            downloader: Arc::new(downloader),
            max_bytes: 1 << 20,
        };
        (policy, started_rx, release_tx)
    }

    fn remote(id: ResourceId) -> ResourceRequest {
        let url = format!("https://example.com/{id}.png");
        ResourceRequest::from_location(id, url, ImageAttributes::default())
    }

    #[test]
    fn cancelling_an_executing_request_reports_nothing() {
        let (policy, started, release) = gated();
        let completions = Arc::new(CompletionQueues::default());
        let worker = WorkerThread::spawn("test", false, policy, Arc::clone(&completions)).unwrap();

        worker.add_request(remote(1), Operation::Download, 0);
        worker.add_request(remote(2), Operation::Download, 1);

        let url = started.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(url.ends_with("/1.png"));
        assert!(!worker.cancel_request(1));
        release.send(()).unwrap();

        let url = started.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(url.ends_with("/2.png"));
        assert!(completions.drain().0.is_empty());
        release.send(()).unwrap();

        let (loaded, failed) = wait_for(&completions, 1);
        assert_eq!(loaded.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
        assert!(failed.is_empty());

        thread::sleep(Duration::from_millis(50));
        let (loaded, failed) = completions.drain();
        assert!(loaded.is_empty() && failed.is_empty());
    }

    #[test]
    fn same_id_runs_again_after_a_late_cancel() {
        let (policy, started, release) = gated();
        let completions = Arc::new(CompletionQueues::default());
        let worker = WorkerThread::spawn("test", false, policy, Arc::clone(&completions)).unwrap();

        worker.add_request(remote(4), Operation::Download, 0);
        started.recv_timeout(Duration::from_secs(10)).unwrap();
        release.send(()).unwrap();
        let (loaded, _) = wait_for(&completions, 1);
        assert_eq!(loaded.len(), 1);

        // Cancelled only after it finished, so the flag is left behind
        assert!(!worker.cancel_request(4));

        worker.add_request(remote(4), Operation::Download, 1);
        started.recv_timeout(Duration::from_secs(10)).unwrap();
        release.send(()).unwrap();
        let (loaded, failed) = wait_for(&completions, 1);
        assert_eq!(loaded.len(), 1);
        assert_eq!((loaded[0].id, loaded[0].ticket), (4, 1));
        assert!(failed.is_empty());
    }

    #[test]
    fn missing_files_and_empty_buffers() {
        let attributes = ImageAttributes::default();
        let missing = ResourceRequest::from_location(1, "/definitely/not/here.png", attributes);
        let err = execute(&missing, Operation::Load, &policy(), &NeverInterrupted).unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound { .. }));

        let empty = ResourceRequest::from_memory(2, Vec::<u8>::new(), attributes);
        let err = execute(&empty, Operation::Decode, &policy(), &NeverInterrupted).unwrap_err();
        assert!(matches!(err, LoadError::EmptyBuffer));
    }
}
