//! `ruuvitag-relay` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The forwarding pipeline lives in [`crate::pipeline`],
//! driven by the background loop in [`crate::listener`]; [`crate::app`] wires
//! both to injected collaborators so every flow can be tested without
//! Bluetooth hardware or network access.

pub mod app;
pub mod config;
pub mod credentials;
pub mod device;
pub mod history;
pub mod identity;
pub mod interest;
pub mod listener;
pub mod pipeline;
pub mod reading;
pub mod remote;
pub mod scanner;
pub mod session;
pub mod settings;
pub mod throttle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use credentials::{CredentialState, Credentials};
pub use device::DeviceId;
pub use history::{HistoryBuffer, HistoryEntry};
pub use interest::InterestSet;
pub use listener::{Listener, ListenerState};
pub use pipeline::{Outcome, Pipeline};
pub use reading::Reading;
pub use scanner::{DecodeError, ReadingResult, ScanError, Scanner, decode_ruuvi_data};
pub use throttle::{ForwardInterval, RateLimiter};
