//! osdburn OSD Model
//!
//! Defines the data contracts for OSD overlay rendering:
//! - **Log:** The binary OSD frame log recorded alongside FPV video
//! - **Stats:** Flight summary scraped from the first frame's text screen
//! - **Text:** Time-indexed telemetry text (status bar) suppliers
//!
//! Every frame in a log is a complete 53×20 snapshot of the flight
//! controller's character grid; there are no deltas to merge.

pub mod log;
pub mod stats;
pub mod text;

pub use log::*;
pub use stats::*;
pub use text::*;
