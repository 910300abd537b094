use clap::Parser;
use forkguard::cli::Opts;

#[tokio::main]
async fn main() {
    let opts = Opts::parse();

    forkguard::init_logger(Some(opts.verbosity.log_level_filter()));

    match forkguard::daemon::forkguard_daemon_run(&opts.daemon_opts).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            forkguard::utils::report_error(&e);
            std::process::exit(1);
        }
    }
}
