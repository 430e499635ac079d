//! Configuration via environment variables (prefix `WASIMOFF_`) or the
//! equivalent command-line flags. A `.env` file is loaded first if present.

use clap::Parser;

use crate::provider::cloud::CloudConfig;

#[derive(Parser, Clone, Debug)]
#[command(name = "wasimoff-broker", version, about = "Broker for browser-resident compute providers")]
pub struct Configuration {
    /// Listening address for the HTTP server.
    #[arg(long, env = "WASIMOFF_HTTP_LISTEN", default_value = "localhost:4080")]
    pub http_listen: String,

    /// Allowed Origin headers for provider WebSocket upgrades, comma
    /// separated; "*" permits anything.
    #[arg(long, env = "WASIMOFF_ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// File storage URL: ":memory:", "memory://", "sled://path" or
    /// "dirfs://path" (a bare path means dirfs).
    #[arg(long, env = "WASIMOFF_FILE_STORAGE", default_value = ":memory:")]
    pub file_storage: String,

    /// Serve static frontend files on "/" from this directory.
    #[arg(long, env = "WASIMOFF_STATIC_FILES", default_value = "../webprovider/dist/")]
    pub static_files: String,

    /// Benchmarking mode keeping n synthetic tasks in flight (0 = off).
    #[arg(long, env = "WASIMOFF_BENCHMODE", default_value_t = 0)]
    pub benchmode: usize,

    /// Enable the Prometheus exporter on /metrics.
    #[arg(long, env = "WASIMOFF_METRICS")]
    pub metrics: bool,

    /// Verbose debug logging.
    #[arg(long, env = "WASIMOFF_DEBUG")]
    pub debug: bool,

    /// Path to a credentials file with a bearer token for the cloud
    /// function.
    #[arg(long, env = "WASIMOFF_CLOUD_CREDENTIALS")]
    pub cloud_credentials: Option<String>,

    /// URL of the cloud function used for Wasip1 offloading.
    #[arg(long, env = "WASIMOFF_CLOUD_FUNCTION")]
    pub cloud_function: Option<String>,

    /// Maximum concurrent cloud invocations (0 disables offloading).
    #[arg(long, env = "WASIMOFF_CLOUD_CONCURRENCY", default_value_t = 0)]
    pub cloud_concurrency: usize,
}

impl Configuration {
    pub fn load() -> Self {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::parse()
    }

    /// Cloud runner settings, when a function URL and concurrency are set.
    pub fn cloud(&self) -> Option<CloudConfig> {
        match (&self.cloud_function, self.cloud_concurrency) {
            (Some(function), concurrency) if concurrency > 0 => Some(CloudConfig {
                credentials: self.cloud_credentials.clone(),
                function: function.clone(),
                concurrency,
            }),
            _ => None,
        }
    }
}
