//! Call-control channel of the voice platform

mod client;

pub use client::CallControlClient;
