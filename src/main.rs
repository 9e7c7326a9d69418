// src/main.rs

use pipeloop::errors::PipeloopError;
use pipeloop::types::ExitStatus;
use pipeloop::{cli, logging, run};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(status) => status.code(),
        Err(err) => {
            eprintln!("pipeloop error: {err:?}");
            exit_status_for(&err).code()
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<ExitStatus> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}

fn exit_status_for(err: &anyhow::Error) -> ExitStatus {
    match err.downcast_ref::<PipeloopError>() {
        Some(PipeloopError::AlreadyRunning(_)) => ExitStatus::AlreadyRunning,
        _ => ExitStatus::Fatal,
    }
}
