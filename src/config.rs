//! Runtime-tunable parameters (SPEC_FULL.md §4.H).

use std::path::PathBuf;

use clap::Parser;

/// Everything a `Server` needs besides the wiring it builds itself.
#[derive(Debug, Clone, Parser)]
#[command(name = "chatserver", about = "Single-threaded WebSocket chat relay")]
pub struct Config {
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Directory static GETs are served from.
    #[arg(long, default_value = "static")]
    pub static_root: PathBuf,

    /// Maximum accepted WebSocket frame payload, in bytes.
    #[arg(long, default_value_t = 65_536)]
    pub max_payload: u64,

    /// Timeout for a single `poll()` wait, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub poll_timeout_ms: u64,

    /// Idle read timeout before a client is dropped, in seconds.
    #[arg(long, default_value_t = 30)]
    pub read_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            static_root: PathBuf::from("static"),
            max_payload: 65_536,
            poll_timeout_ms: 5_000,
            read_timeout_secs: 30,
        }
    }
}
