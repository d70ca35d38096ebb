//! CLI module for the callflow engine
//!
//! - `serve`: run the HTTP API and webhook receiver
//! - `validate`: check a workflow definition file

pub mod serve;
pub mod validate;

use clap::{Parser, Subcommand};

/// Callflow Engine - scripted conversation workflows for voice calls
#[derive(Parser)]
#[command(name = "callflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server
    Serve,

    /// Validate a workflow definition and print its graph
    Validate(validate::ValidateArgs),
}
