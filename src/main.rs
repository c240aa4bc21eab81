mod ai;
mod capture;
mod error;
mod pipeline;
mod storyboard;
mod video;

use std::path::PathBuf;
use std::time::Duration;

use ai::{ExtractorSettings, Provider};
use capture::VideoDecoder;
use clap::{ArgAction, Parser};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "teardown")]
#[command(about = "Teardown: Video to Storyboard CLI", long_about = None)]
struct Cli {
    /// Path to the video file
    video: PathBuf,
    /// Output directory
    #[arg(short, long, default_value = "teardown_export")]
    output: PathBuf,
    /// Inference API flavour
    #[arg(long, value_enum, default_value_t = Provider::Gemini)]
    provider: Provider,
    /// Model name sent to the inference service
    #[arg(short, long, default_value = ai::DEFAULT_MODEL)]
    model: String,
    /// Override the service base URL
    #[arg(long)]
    api_base: Option<String>,
    /// Give up on the inference request after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let timeout = Duration::from_secs(cli.timeout_secs);
    let provider = cli.provider;
    let result = pipeline::teardown(
        std::env::var(pipeline::API_KEY_VAR).ok(),
        &cli.video,
        &cli.output,
        |api_key| {
            ai::extractor(
                provider,
                ExtractorSettings {
                    api_key,
                    model: cli.model,
                    api_base: cli.api_base,
                    timeout,
                },
            )
        },
        VideoDecoder::open,
    )
    .await;

    match result {
        Ok(report) => report.print_summary(),
        Err(e) if e.is_precondition() => println!("Error: {e}"),
        Err(e) => {
            error!(error = %e, "teardown failed");
            println!("Critical Error: {e}");
        }
    }

    Ok(())
}
