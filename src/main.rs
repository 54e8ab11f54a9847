use docker_registry_browser::cli::{Args, Runner};
use docker_registry_browser::logging::init_logging;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_args();

    if let Err(e) = init_logging(args.verbose, args.quiet) {
        eprintln!("{}", e);
    }

    match Runner::new(args).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}
