use clap::{Args, Parser};
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub const NAME: &str = "forkguard";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "Fork bomb detection and termination daemon")]
#[clap(version)]
#[clap(disable_help_subcommand = true)]
pub struct Opts {
    #[command(flatten)]
    pub daemon_opts: ForkguardDaemonOpts,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

/// Options overriding the `[detector]` section of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ForkguardDaemonOpts {
    #[clap(long)]
    pub config_file: Option<String>,

    /// Generations between a new process and the ancestor it's compared to
    #[clap(long)]
    pub ancestor_depth: Option<usize>,

    /// Creations closer than this many nanoseconds are a burst
    #[clap(long)]
    pub min_interval_ns: Option<u64>,

    /// Report kill decisions without terminating anything
    #[clap(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn parse_overrides() {
        let opts = Opts::parse_from([
            NAME,
            "--config-file",
            "/tmp/forkguard.ini",
            "--ancestor-depth",
            "4",
            "--min-interval-ns",
            "500000000",
            "--dry-run",
        ]);
        let daemon_opts = opts.daemon_opts;
        assert_eq!(daemon_opts.config_file.as_deref(), Some("/tmp/forkguard.ini"));
        assert_eq!(daemon_opts.ancestor_depth, Some(4));
        assert_eq!(daemon_opts.min_interval_ns, Some(500_000_000));
        assert!(daemon_opts.dry_run);
    }

    #[test]
    fn no_overrides_by_default() {
        let opts = Opts::parse_from([NAME]);
        assert!(opts.daemon_opts.config_file.is_none());
        assert!(opts.daemon_opts.ancestor_depth.is_none());
        assert!(!opts.daemon_opts.dry_run);
    }

    #[test]
    fn depth_must_be_a_number() {
        assert!(Opts::try_parse_from([NAME, "--ancestor-depth", "three"]).is_err());
    }
}
