//! ChitraScan - Protocol engine for ESC/FS-family sheet and film scanners
//!
//! This library drives the scanner's wire protocol end to end: command
//! encoding, capability negotiation, scan geometry planning, block
//! streaming over TCP, SCSI, or USB transports, and color realignment of
//! the raw sensor data.
//!
//! A scan is one session: negotiate capabilities once, then configure,
//! start, and read image bytes until the device reports the end of the
//! scan area.

pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod scan;
pub mod session;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use protocol::capability::{DeviceCapabilities, RetryPolicy};
pub use registry::DeviceRegistry;
pub use scan::plan::{ColorMode, ScanParameters, ScanRequest, Source};
pub use session::{CancelHandle, ScanSession, SessionState};
