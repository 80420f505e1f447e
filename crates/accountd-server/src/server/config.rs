use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `accountd` binary.
///
/// Every flag can also be set through the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "accountd",
    version,
    about = "A gRPC user service with bounded-concurrency bulk create/update"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/accountd.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Maximum number of store operations a single bulk request may have in
    /// flight at once.
    ///
    /// Environment variable: `CONCURRENCY_LIMIT`
    #[arg(long, env = "CONCURRENCY_LIMIT", default_value_t = 10)]
    pub concurrency_limit: usize,

    /// Largest number of users accepted in one `BulkUsers` call.
    ///
    /// Environment variable: `MAX_BATCH_SIZE`
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 1000)]
    pub max_batch_size: usize,

    /// Deadline for a whole bulk batch in milliseconds. Items still running
    /// when it passes are reported as timed out. `0` disables the deadline.
    ///
    /// Environment variable: `BULK_TIMEOUT_MS`
    #[arg(long, env = "BULK_TIMEOUT_MS", default_value_t = 0)]
    pub bulk_timeout_ms: u64,

    /// Seconds to wait for in-flight batches during shutdown before
    /// cancelling them.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// PostgreSQL connection string. Without it users are kept in memory.
    ///
    /// Environment variable: `DATABASE_URL`
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub concurrency_limit: usize,
    pub max_batch_size: usize,
    pub bulk_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    #[cfg(feature = "postgres")]
    pub database_url: Option<String>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.concurrency_limit == 0 {
            bail!("CONCURRENCY_LIMIT must be greater than 0");
        }

        if args.max_batch_size == 0 {
            bail!("MAX_BATCH_SIZE must be greater than 0");
        }

        let bulk_timeout =
            (args.bulk_timeout_ms > 0).then(|| Duration::from_millis(args.bulk_timeout_ms));

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            concurrency_limit: args.concurrency_limit,
            max_batch_size: args.max_batch_size,
            bulk_timeout,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            #[cfg(feature = "postgres")]
            database_url: args.database_url,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:50051"),
            uds: false,
            concurrency_limit: 10,
            max_batch_size: 1000,
            bulk_timeout: None,
            shutdown_timeout: Duration::from_secs(5),
            #[cfg(feature = "postgres")]
            database_url: None,
        }
    }
}
