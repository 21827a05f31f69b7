//! Round-trip time and throughput probing over TCP.
//!
//! A client opens a session with a HELLO frame that fixes the measurement
//! kind, probe count, payload size and server-side delay, sends numbered
//! probes one at a time, and closes with BYE. The server echoes every
//! in-sequence probe after the requested delay.

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod params;
pub mod sequencer;
pub mod server;
pub mod stats;

#[cfg(test)]
mod testing;

pub use client::{
    run_session, run_sweep, run_sweep_with, ClientOptions, ResendPolicy, Session,
    SessionReport,
};
pub use error::{ClientError, DecodeError, FrameError, HandshakeError};
pub use params::{MeasurementKind, SessionParameters};
pub use server::{Server, SessionHandler, SessionSummary};
pub use stats::{SampleSet, Statistics};
