//! Asynchronous resource loading
//!
//! A [`ResourceLoader`] owns two worker threads, one for local files and
//! in-memory buffers and one for network downloads. Results are collected
//! into shared queues and handed to a [`ResourceCache`] when the owner calls
//! [`ResourceLoader::get_resources`].

mod cancel;
mod router;
mod worker;

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;

use crate::bitmap::Bitmap;
use crate::config::LoaderConfig;
use crate::error::{FailureKind, LoadError};
use crate::image::{
    closest_image_size, closest_image_size_from_buffer, closest_image_size_from_stream,
};
use crate::net::{is_remote, Downloader, HttpDownloader};
use crate::request::{
    ImageAttributes, ImageDimensions, ResourceId, ResourceKind, ResourceRequest, ResourceSource,
};

pub use cancel::{InterruptionPoint, NeverInterrupted};

use router::RequestRouter;
use worker::{DownloadPolicy, Operation};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    CompletelyLoaded,
}

/// Receives the outcome of every request that was not cancelled.
pub trait ResourceCache {
    fn load_response(
        &mut self,
        id: ResourceId,
        kind: ResourceKind,
        bitmap: Bitmap,
        status: LoadStatus,
    );
    fn load_failed(&mut self, id: ResourceId, failure: FailureKind);
}

#[derive(Debug)]
pub struct LoadedResource {
    pub id: ResourceId,
    pub(crate) ticket: u64,
    pub kind: ResourceKind,
    pub bitmap: Bitmap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResource {
    pub id: ResourceId,
    pub(crate) ticket: u64,
    pub kind: ResourceKind,
    pub failure: FailureKind,
}

#[derive(Default)]
struct Completions {
    loaded: VecDeque<LoadedResource>,
    failed: VecDeque<FailedResource>,
}

/// Outcomes written by the workers, read by the loader's owner.
#[derive(Default)]
pub(crate) struct CompletionQueues {
    inner: Mutex<Completions>,
}

impl CompletionQueues {
    pub(crate) fn add_loaded(&self, resource: LoadedResource) {
        self.inner.lock().loaded.push_back(resource);
    }

    pub(crate) fn add_failed(&self, resource: FailedResource) {
        self.inner.lock().failed.push_back(resource);
    }

    /// Takes everything queued so far in one critical section.
    pub(crate) fn drain(&self) -> (VecDeque<LoadedResource>, VecDeque<FailedResource>) {
        let mut inner = self.inner.lock();
        (
            std::mem::take(&mut inner.loaded),
            std::mem::take(&mut inner.failed),
        )
    }
}

struct PendingRequest {
    request: ResourceRequest,
    operation: Operation,
    ticket: u64,
}

pub struct ResourceLoader {
    router: RequestRouter,
    completions: Arc<CompletionQueues>,
    pending: HashMap<ResourceId, PendingRequest>,
    next_ticket: u64,
    policy: DownloadPolicy,
}

impl ResourceLoader {
    /// Starts the workers with an HTTP client built from `config`.
    pub fn new(config: &LoaderConfig) -> anyhow::Result<Self> {
        let downloader = HttpDownloader::new(&config.http_user_agent)?;
        Self::with_downloader(config, Arc::new(downloader))
    }

    pub fn with_downloader(
        config: &LoaderConfig,
        downloader: Arc<dyn Downloader>,
    ) -> anyhow::Result<Self> {
        let policy = DownloadPolicy {
            downloader,
            max_bytes: config.max_download_bytes,
        };
        let completions = Arc::new(CompletionQueues::default());
        let router = RequestRouter::new(
            &config.local_thread_name,
            &config.remote_thread_name,
            config.start_paused,
            policy.clone(),
            &completions,
        )
        .context("spawning loader threads")?;

        Ok(Self {
            router,
            completions,
            pending: HashMap::new(),
            next_ticket: 0,
            policy,
        })
    }

    /// Queues a request. The outcome arrives through [`Self::get_resources`].
    pub fn load_resource(&mut self, request: ResourceRequest) {
        let id = request.id;
        if let Some(previous) = self.pending.remove(&id) {
            log::warn!("Request {id} reissued while pending, replacing it");
            self.router.cancel(id, previous.operation);
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let operation = self.router.route(request.clone(), ticket);
        self.pending.insert(
            id,
            PendingRequest {
                request,
                operation,
                ticket,
            },
        );
    }

    /// Once this returns, no notification for `id` reaches the cache.
    ///
    /// A load already executing is asked to stop at its next safe point.
    pub fn cancel_load(&mut self, id: ResourceId, kind: ResourceKind) {
        match self.pending.remove(&id) {
            Some(pending) if pending.request.kind == kind => {
                self.router.cancel(id, pending.operation);
            }
            Some(pending) => {
                log::debug!("Cancel for {id} names the wrong kind, ignoring");
                self.pending.insert(id, pending);
            }
            None => log::debug!("Cancel for unknown request {id}"),
        }
    }

    /// Hands every finished load to `cache`, loaded ones first.
    ///
    /// Returns the number of notifications delivered.
    pub fn get_resources(&mut self, cache: &mut dyn ResourceCache) -> usize {
        let (loaded, failed) = self.completions.drain();
        let mut delivered = 0;

        for resource in loaded {
            if !self.resolve(resource.id, resource.ticket) {
                log::debug!("Dropping result for resolved request {}", resource.id);
                continue;
            }
            cache.load_response(
                resource.id,
                resource.kind,
                resource.bitmap,
                LoadStatus::CompletelyLoaded,
            );
            delivered += 1;
        }

        for resource in failed {
            if !self.resolve(resource.id, resource.ticket) {
                log::debug!("Dropping failure for resolved request {}", resource.id);
                continue;
            }
            cache.load_failed(resource.id, resource.failure);
            delivered += 1;
        }

        delivered
    }

    /// Forgets the pending request a worker result belongs to. False for
    /// results of cancelled or replaced requests.
    fn resolve(&mut self, id: ResourceId, ticket: u64) -> bool {
        match self.pending.get(&id) {
            Some(pending) if pending.ticket == ticket => {
                self.pending.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Runs a request on the calling thread, bypassing the queues.
    pub fn load_resource_synchronously(
        &self,
        request: &ResourceRequest,
    ) -> Result<Bitmap, LoadError> {
        let operation = router::classify(&request.source);
        worker::execute(request, operation, &self.policy, &NeverInterrupted)
    }

    pub fn pause(&self) {
        self.router.pause();
    }

    pub fn resume(&self) {
        self.router.resume();
    }

    /// Requests issued but not yet delivered or cancelled.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Dimensions a load of `source` with `attributes` would produce, from
    /// the image header alone. Zero when the header is unreadable.
    pub fn closest_image_size(
        &self,
        source: &ResourceSource,
        attributes: &ImageAttributes,
    ) -> ImageDimensions {
        match source {
            ResourceSource::Memory(bytes) => closest_image_size_from_buffer(bytes, attributes),
            ResourceSource::Location(url) if is_remote(url) => {
                match self.policy.downloader.fetch(url, self.policy.max_bytes) {
                    Ok(bytes) => closest_image_size_from_stream(
                        &mut Cursor::new(bytes),
                        Some(url.as_str()),
                        attributes,
                    ),
                    Err(e) => {
                        log::debug!("Cannot size {url}: {e:#}");
                        ImageDimensions::ZERO
                    }
                }
            }
            ResourceSource::Location(path) => closest_image_size(Path::new(path), attributes),
        }
    }
}

impl Drop for ResourceLoader {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("Shutting down with {} pending requests", self.pending.len());
        }
        self.router.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(id: ResourceId) -> LoadedResource {
        LoadedResource {
            id,
            ticket: 0,
            kind: ResourceKind::Bitmap,
            bitmap: Bitmap::packed(1, 1, crate::bitmap::PixelFormat::L8),
        }
    }

    #[test]
    fn drain_takes_both_queues_in_arrival_order() {
        let queues = CompletionQueues::default();
        queues.add_loaded(loaded(3));
        queues.add_failed(FailedResource {
            id: 1,
            ticket: 0,
            kind: ResourceKind::Bitmap,
            failure: FailureKind::FileNotFound,
        });
        queues.add_loaded(loaded(2));

        let (ok, failed) = queues.drain();
        assert_eq!(ok.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(failed.len(), 1);

        let (ok, failed) = queues.drain();
        assert!(ok.is_empty() && failed.is_empty());
    }
}
