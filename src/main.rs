mod completion;
mod config;
mod error;
mod progress;
mod relay;
mod response;

use anyhow::Context;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use structopt::StructOpt;

use completion::Completion;
use config::GenerationConfig;
use error::{ErrorCode, RelayError};
use progress::{Emitter, Message};
use relay::ServiceRelay;

/// `PODCASTFY_*` variables.
#[derive(Deserialize, Debug, Default)]
struct Environment {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

impl Environment {
    fn from_env() -> anyhow::Result<Self> {
        envy::prefixed("PODCASTFY_")
            .from_env::<Self>()
            .context("Failed to read PODCASTFY_* environment variables")
    }
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "podcast-relay",
    about = "Relay a podcast generation job to a Podcastfy service, reporting progress as NDJSON"
)]
struct Args {
    /// Path to the JSON job configuration file
    #[structopt(short = "c", long)]
    config: PathBuf,

    /// Podcastfy service URL (overrides PODCASTFY_URL and the config's service_url)
    #[structopt(short = "u", long)]
    url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::from_args();

    let mut emitter = Emitter::new(std::io::stdout());

    match run(&args, &mut emitter).await {
        Ok(completion) => {
            emitter.emit(&Message::from(completion));
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::debug!("Relay failed with {err}");
            emitter.emit(&Message::from(err));
            ExitCode::FAILURE
        }
    }
}

/// Everything up to, but not including, the terminal line.
async fn run<W: Write>(args: &Args, emitter: &mut Emitter<W>) -> Result<Completion, RelayError> {
    let config = GenerationConfig::load(&args.config).await?;

    let environment = Environment::from_env()
        .map_err(|err| RelayError::new(ErrorCode::GeneralError, format!("{err:#}")))?;

    let service_url = relay::resolve_service_url(
        args.url.as_deref(),
        environment.url.as_deref(),
        config.service_url(),
    );
    let timeout = environment
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(relay::DEFAULT_TIMEOUT);

    ServiceRelay::new(&service_url, timeout)?
        .generate(&config, emitter)
        .await
}
