//! Clients for services outside this process.

pub mod signing;

pub use signing::{
    Environment, HttpSigningService, InMemorySigningService, MicroserviceConfig, ServiceCall,
    ServiceRoute, SigningError, SigningService, StatusReport, Submission, SubmissionReceipt,
    format_messages, status_from_code, submission_status,
};
