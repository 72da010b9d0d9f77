// Shared engine utilities
pub mod constants;
mod errors;
mod pacing;
mod timeout;
mod wait_for_ready;

pub use errors::ScrapeError;
pub use pacing::{backoff, jitter, jitter_duration, sleep_or_cancel};
pub use timeout::{validate_navigation_timeout, validate_ready_timeout};
pub use wait_for_ready::wait_for_ready;
