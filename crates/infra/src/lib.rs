//! Infrastructure layer: event store, locks, services, jobs, config.
//!
//! The domain crates decide; this crate persists what they decide, serializes
//! access to each record and wires the document workflow to the allocator,
//! the credit ledger and the signing service.

pub mod allocator;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod external;
pub mod jobs;
pub mod ledger;
pub mod locks;
pub mod read_model;
pub mod transaction_log;
pub mod workers;
pub mod workflow;

pub use allocator::{Allocation, AllocationError, NewRange, RangeRevision, SequenceAllocator};
pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatcher};
pub use ledger::{CreditLedger, LedgerError, NoopReconciler, ReconcileError, Reconciler};
pub use locks::{LockBusy, LockKey, RecordLocks};
pub use transaction_log::{Transaction, TransactionLog};
pub use workflow::{DocumentWorkflow, NewDocument, PollSummary, WorkflowError};
