// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server configuration, parsed from CLI flags with environment variable
//! fallbacks (`clap`'s `derive` + `env` features, as the original daemon
//! CLI used for its own flags).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct AppConfig {
    /// Address and port to listen on.
    #[arg(long, env = "SCRIPTORIUM_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Directory to persist idle documents in. If unset, documents are
    /// never archived and are lost once their session is evicted.
    #[arg(long, env = "SCRIPTORIUM_ARCHIVE_DIR")]
    pub archive_dir: Option<PathBuf>,

    /// How often the registry sweeps for idle sessions to evict, in seconds.
    #[arg(long, env = "SCRIPTORIUM_EVICTION_INTERVAL_SECS", default_value_t = 300)]
    pub eviction_interval_secs: u64,

    /// How long a connection may sit without sending a frame before the
    /// driver treats it as idle and closes it, in seconds.
    #[arg(long, env = "SCRIPTORIUM_IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Minimum shard count for the document registry's concurrent map.
    #[arg(long, env = "SCRIPTORIUM_SHARD_COUNT", default_value_t = 16)]
    pub shard_count: usize,

    /// Enable debug-level logging.
    #[arg(long, env = "SCRIPTORIUM_DEBUG")]
    pub debug: bool,
}

impl AppConfig {
    #[must_use]
    pub const fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
