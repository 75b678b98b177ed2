//! Background jobs: range expiry sweep and regulator status poll.
//!
//! Each job is a [`PeriodicJob`] on its own thread. Jobs call the services
//! directly, so they need a blocking context (the Postgres store blocks on
//! the runtime handle).

pub mod executor;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::allocator::SequenceAllocator;
use crate::workflow::DocumentWorkflow;

pub use executor::{JobHandle, JobStats, PeriodicJob};

/// Expire active ranges whose expiration date has passed.
pub fn spawn_expiry_sweep(
    allocator: Arc<SequenceAllocator>,
    interval: Duration,
) -> io::Result<JobHandle> {
    PeriodicJob::new("ecf-expiry-sweep", interval).spawn(move || {
        let now = Utc::now();
        allocator.expire_due_ranges(now.date_naive(), now);
    })
}

/// Refresh up to `batch` documents still waiting for the regulator.
pub fn spawn_status_poll(
    workflow: Arc<DocumentWorkflow>,
    interval: Duration,
    batch: usize,
) -> io::Result<JobHandle> {
    PeriodicJob::new("ecf-status-poll", interval).spawn(move || {
        workflow.poll_pending(batch, Utc::now());
    })
}
