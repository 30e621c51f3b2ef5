use anyhow::Result;
use candle_core::Device;
use clap::{Parser, ValueEnum};
use lmrl_api::{
    builders::{ModelSource, SessionBuilder, TokenizerSource},
    http::{AppState, router},
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Preset {
    /// Byte-level toy model, trains in milliseconds on a CPU
    Tiny,
    /// GPT-2 small shape, randomly initialised
    Gpt2,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DeviceKind {
    Cpu,
    Cuda,
}

impl DeviceKind {
    fn device(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda => Ok(Device::new_cuda(0)?),
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Serve a language model that learns from rewards posted over HTTP")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 5000)]
    port: u16,

    #[arg(long, value_enum, default_value = "tiny")]
    preset: Preset,

    /// GPT-2 style config.json, overrides --preset
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// HuggingFace tokenizer.json, byte-level tokenizer when absent
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    #[arg(long, default_value_t = 20)]
    max_new_tokens: usize,

    #[arg(long, default_value_t = 1e-4)]
    learning_rate: f64,

    #[arg(long, default_value_t = 0.01)]
    weight_decay: f64,

    /// Clip the global gradient norm before each update
    #[arg(long)]
    max_grad_norm: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum, default_value = "cpu")]
    device: DeviceKind,
}

impl Args {
    fn session_builder(&self) -> Result<SessionBuilder> {
        let model = match (&self.model_config, self.preset) {
            (Some(path), _) => ModelSource::ConfigFile(path.clone()),
            (None, Preset::Tiny) => ModelSource::Tiny,
            (None, Preset::Gpt2) => ModelSource::Gpt2,
        };
        let tokenizer = match &self.tokenizer {
            Some(path) => TokenizerSource::File(path.clone()),
            None => TokenizerSource::Bytes,
        };
        Ok(SessionBuilder {
            model,
            tokenizer,
            max_new_tokens: self.max_new_tokens,
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            max_grad_norm: self.max_grad_norm,
            seed: self.seed,
            device: self.device.device()?,
        })
    }
}

/// `RUST_LOG` directives when they parse, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| "info".into())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "parsed arguments");

    let session = args.session_builder()?.build()?;
    let app = router(AppState::new(session));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{addr}");
    tracing::info!("  POST /generate  {{\"prompt\": string}}");
    tracing::info!("  POST /train     {{\"reward\": number}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
