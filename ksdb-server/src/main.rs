//! ksdb - karaoke song database
//!
//! Serves an UltraStar song library over HTTP: songs with their notes and
//! metadata, media files (audio, video, cover, background) and bulk
//! uploads that a background worker imports into the library.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use ksdb_server::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    cli::run(Cli::parse()).await
}
