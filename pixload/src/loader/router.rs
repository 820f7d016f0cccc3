//! Splits requests between the local and remote workers

use std::io;
use std::sync::Arc;

use crate::net::is_remote;
use crate::request::{ResourceId, ResourceRequest, ResourceSource};

use super::worker::{DownloadPolicy, Operation, WorkerThread};
use super::CompletionQueues;

pub(crate) fn classify(source: &ResourceSource) -> Operation {
    match source {
        ResourceSource::Memory(_) => Operation::Decode,
        ResourceSource::Location(location) if is_remote(location) => Operation::Download,
        ResourceSource::Location(_) => Operation::Load,
    }
}

/// Owns both workers. Network fetches never queue behind disk reads.
pub(crate) struct RequestRouter {
    local: WorkerThread,
    remote: WorkerThread,
}

impl RequestRouter {
    pub(crate) fn new(
        local_name: &str,
        remote_name: &str,
        paused: bool,
        policy: DownloadPolicy,
        completions: &Arc<CompletionQueues>,
    ) -> io::Result<Self> {
        let local =
            WorkerThread::spawn(local_name, paused, policy.clone(), Arc::clone(completions))?;
        let remote = WorkerThread::spawn(remote_name, paused, policy, Arc::clone(completions))?;
        Ok(Self { local, remote })
    }

    pub(crate) fn route(&self, request: ResourceRequest, ticket: u64) -> Operation {
        let operation = classify(&request.source);
        self.worker(operation).add_request(request, operation, ticket);
        operation
    }

    /// Only the worker `operation` was routed to can know `id`.
    pub(crate) fn cancel(&self, id: ResourceId, operation: Operation) {
        if self.worker(operation).cancel_request(id) {
            log::debug!("Removed queued request {id}");
        }
    }

    fn worker(&self, operation: Operation) -> &WorkerThread {
        match operation {
            Operation::Download => &self.remote,
            Operation::Load | Operation::Decode => &self.local,
        }
    }

    pub(crate) fn pause(&self) {
        self.local.pause();
        self.remote.pause();
    }

    pub(crate) fn resume(&self) {
        self.local.resume();
        self.remote.resume();
    }

    pub(crate) fn terminate(&mut self) {
        self.local.terminate();
        self.remote.terminate();
    }
}

#[test]
fn sources_are_classified_by_location() {
    let memory = ResourceSource::Memory(Arc::from(vec![1u8, 2, 3]));
    assert_eq!(classify(&memory), Operation::Decode);
    assert_eq!(
        classify(&ResourceSource::Location("https://example.com/a.png".into())),
        Operation::Download
    );
    assert_eq!(
        classify(&ResourceSource::Location("/tmp/a.png".into())),
        Operation::Load
    );
}
