//! Job queue, dispatch workers, and infrastructure retry.

pub mod backoff;
pub mod worker;

pub use backoff::{BackoffPolicy, RetryExhausted, retry_with_backoff};
pub use worker::{
    DispatchEvent, DispatchJob, JobQueue, JobReceiver, WorkerPool, WorkerSettings,
    dispatch_with_retry, job_queue,
};
