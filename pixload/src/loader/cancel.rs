//! Cooperative cancellation of the request a worker is executing

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::LoadError;
use crate::request::ResourceId;

/// Safe point inside a long running load.
pub trait InterruptionPoint {
    /// `Err(LoadError::Cancelled)` once the load should be abandoned.
    fn check(&self) -> Result<(), LoadError>;
}

/// For loads that run on the caller's thread and cannot be cancelled.
pub struct NeverInterrupted;

impl InterruptionPoint for NeverInterrupted {
    fn check(&self) -> Result<(), LoadError> {
        Ok(())
    }
}

pub(crate) const NO_REQUEST_IN_FLIGHT: ResourceId = u32::MAX;
pub(crate) const NO_REQUEST_CANCELLED: ResourceId = u32::MAX - 1;

/// Ids shared between a worker thread and the threads cancelling its work.
///
/// Only the most recent cancellation is remembered, so cancelling two
/// executing requests in quick succession may let the first one finish.
#[derive(Debug)]
pub(crate) struct CancelToken {
    in_flight: AtomicU32,
    cancelled: AtomicU32,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: AtomicU32::new(NO_REQUEST_IN_FLIGHT),
            cancelled: AtomicU32::new(NO_REQUEST_CANCELLED),
        }
    }

    /// Marks `id` as executing and forgets any earlier cancellation.
    ///
    /// Must be called under the same lock that guards queued cancellation,
    /// so a cancel for `id` either removes it from the queue or lands here.
    pub(crate) fn begin(&self, id: ResourceId) {
        self.cancelled.store(NO_REQUEST_CANCELLED, Ordering::SeqCst);
        self.in_flight.store(id, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self) {
        self.in_flight.store(NO_REQUEST_IN_FLIGHT, Ordering::SeqCst);
    }

    pub(crate) fn in_flight(&self) -> Option<ResourceId> {
        match self.in_flight.load(Ordering::SeqCst) {
            NO_REQUEST_IN_FLIGHT => None,
            id => Some(id),
        }
    }

    pub(crate) fn cancel(&self, id: ResourceId) {
        self.cancelled.store(id, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self, id: ResourceId) -> bool {
        self.cancelled.load(Ordering::SeqCst) == id
    }

    pub(crate) fn interruption(&self, id: ResourceId) -> RequestInterruption<'_> {
        RequestInterruption { token: self, id }
    }
}

pub(crate) struct RequestInterruption<'a> {
    token: &'a CancelToken,
    id: ResourceId,
}

impl InterruptionPoint for RequestInterruption<'_> {
    fn check(&self) -> Result<(), LoadError> {
        if self.token.is_cancelled(self.id) {
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }
}

#[test]
fn only_the_cancelled_id_is_interrupted() {
    let token = CancelToken::new();
    assert_eq!(token.in_flight(), None);
    token.begin(7);
    assert_eq!(token.in_flight(), Some(7));

    let seven = token.interruption(7);
    let eight = token.interruption(8);
    assert!(seven.check().is_ok());

    token.cancel(7);
    assert!(seven.check().unwrap_err().is_cancelled());
    assert!(eight.check().is_ok());

    token.cancel(8);
    assert!(seven.check().is_ok());

    token.finish();
    assert_eq!(token.in_flight(), None);
    assert!(NeverInterrupted.check().is_ok());
}

#[test]
fn starting_a_request_clears_a_stale_cancellation() {
    let token = CancelToken::new();
    token.begin(3);
    token.finish();

    // Cancelled after it finished, then issued again under the same id
    token.cancel(3);
    token.begin(3);
    assert!(token.interruption(3).check().is_ok());

    token.cancel(3);
    assert!(token.interruption(3).check().unwrap_err().is_cancelled());
}
