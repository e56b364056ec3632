//! # Command Line Interface
//!
//! `secret-populator populate` resolves every `ExternalSecret` definition in
//! a namespace and writes the resulting values into their backends.
//!
//! ```bash
//! # Populate from the cluster with default backoff
//! secret-populator populate --namespace platform
//!
//! # Populate from a directory of definition files before a cluster exists
//! secret-populator populate --source filesystem --dir ./secrets --namespace platform --no-wait
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::RetryPolicy;

const SCHEMA_FILE_NAME: &str = "secret-schema.yaml";

#[derive(Parser)]
#[command(name = "secret-populator", version, about = "Populate secret stores from ExternalSecret definitions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and write every definition in the namespace
    Populate(PopulateArgs),
}

/// Where the definitions to populate come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// ExternalSecret resources listed from the cluster
    Cluster,
    /// YAML files under `<dir>/<namespace>/`
    Filesystem,
}

#[derive(Args)]
pub struct PopulateArgs {
    /// Directory holding filesystem definitions and the secret schema
    #[arg(long)]
    pub dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = SourceKind::Cluster)]
    pub source: SourceKind,

    /// Namespace the definitions live in
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Namespace holding the boot/source secrets templates read from
    /// (defaults to --namespace)
    #[arg(long)]
    pub boot_secret_namespace: Option<String>,

    /// Single resolve attempt per definition, no waiting on missing sources
    #[arg(long)]
    pub no_wait: bool,

    /// Resolve attempts per definition
    #[arg(long, default_value_t = 5)]
    pub backoff_steps: u32,

    /// Base wait between attempts, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub backoff_duration_ms: u64,

    /// Multiplicative wait growth per attempt
    #[arg(long, default_value_t = 2.0)]
    pub backoff_factor: f64,

    /// Jitter fraction applied to each wait
    #[arg(long, default_value_t = 0.1)]
    pub backoff_jitter: f64,
}

impl PopulateArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            steps: self.backoff_steps,
            duration: Duration::from_millis(self.backoff_duration_ms),
            factor: self.backoff_factor,
            jitter: self.backoff_jitter,
        }
    }

    /// Schema file next to the definitions, if one exists.
    pub fn schema_file(&self) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(SCHEMA_FILE_NAME))
            .filter(|path| path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["secret-populator", "populate"]);
        let Commands::Populate(args) = cli.command;
        assert_eq!(args.source, SourceKind::Cluster);
        assert_eq!(args.namespace, "default");
        assert!(!args.no_wait);
        let policy = args.retry_policy();
        assert_eq!(policy.steps, 5);
        assert_eq!(policy.duration, Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_flags() {
        let cli = Cli::parse_from([
            "secret-populator",
            "populate",
            "--no-wait",
            "--backoff-steps",
            "3",
            "--backoff-duration-ms",
            "500",
            "--backoff-jitter",
            "0",
        ]);
        let Commands::Populate(args) = cli.command;
        assert!(args.no_wait);
        let policy = args.retry_policy();
        assert_eq!(policy.steps, 3);
        assert_eq!(policy.duration, Duration::from_millis(500));
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn test_filesystem_source() {
        let cli = Cli::parse_from([
            "secret-populator",
            "populate",
            "--source",
            "filesystem",
            "--dir",
            "/tmp/defs",
            "--namespace",
            "platform",
        ]);
        let Commands::Populate(args) = cli.command;
        assert_eq!(args.source, SourceKind::Filesystem);
        assert_eq!(args.dir.as_deref(), Some(std::path::Path::new("/tmp/defs")));
    }
}
