//! Heartbeat recorder firmware core.
//!
//! Samples a stethoscope microphone at a fixed rate, writes the samples into
//! a WAV file on the SD card and POSTs that file to the collector, once per
//! cycle, forever. Hardware bring-up lives in the binary; everything here
//! runs on the device and on a desktop host alike.

pub mod clock;
pub mod config;
pub mod cycle;
pub mod error;
pub mod http;
pub mod net;
pub mod sensor;
pub mod storage;
pub mod wav;

pub use config::Config;
pub use cycle::{CycleController, CycleOutcome, CycleState};
pub use error::Error;
