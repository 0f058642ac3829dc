pub mod backoff;
pub mod poller;

pub use backoff::BackoffPolicy;
pub use poller::{PollError, PollLimit, PollOutcome, Poller, RetryState};
