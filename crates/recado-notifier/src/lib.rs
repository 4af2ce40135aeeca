pub mod backoff;
pub mod dedup;
pub mod notifier;
pub mod transport;
