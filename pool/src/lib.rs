pub mod config;
pub mod counters;
pub mod daemon;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod shares;

pub use error::{DaemonError, PoolError, ShareError, TemplateError};
pub use manager::{JobEvent, JobManager};
pub use pool::{Pool, PoolEvent, Severity};
