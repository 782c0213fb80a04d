//! predika binary: live sermon translation from the command line.

use anyhow::{Context, bail};
use clap::Parser;
use predika::config::RuntimeConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "predika", version, about = "Real-time sermon translation")]
struct Cli {
    /// Configuration file (default: ~/.config/predika/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture device name (overrides config)
    #[arg(long)]
    device: Option<String>,

    /// Target language (overrides config)
    #[arg(long)]
    target_language: Option<String>,

    /// Whisper model path
    #[arg(long, default_value = "models/ggml-small.bin")]
    model: PathBuf,

    /// Listener endpoint port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// List models available on the translation server and exit
    #[arg(long)]
    list_models: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(RuntimeConfig::default_path);
    let mut config = RuntimeConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
        .with_env_overrides();

    if let Some(device) = cli.device {
        config.audio.device = Some(device);
    }
    if let Some(target) = cli.target_language {
        config.translation.target_language = target;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    config.validate().context("invalid configuration")?;

    if cli.list_models {
        return list_models(&config).await;
    }

    run(config, cli.model).await
}

#[cfg(feature = "remote-providers")]
async fn list_models(config: &RuntimeConfig) -> anyhow::Result<()> {
    let translator = predika::providers::ollama::OllamaTranslator::new(
        &config.translation.server_url,
        &config.translation.model,
    );
    let models = translator
        .list_models()
        .await
        .context("could not reach the translation server")?;
    for model in models {
        println!("{}", model);
    }
    Ok(())
}

#[cfg(not(feature = "remote-providers"))]
async fn list_models(_config: &RuntimeConfig) -> anyhow::Result<()> {
    bail!("built without the remote-providers feature")
}

#[cfg(all(feature = "remote-providers", feature = "cpal-audio"))]
async fn run(config: RuntimeConfig, model_path: PathBuf) -> anyhow::Result<()> {
    use predika::audio::capture::CpalAudioSource;
    use predika::output::sink::{NullAudioSink, StdoutDisplay};
    use predika::pipeline::coordinator::Pipeline;
    use predika::providers::kokoro::KokoroSynthesizer;
    use predika::providers::ollama::OllamaTranslator;
    use predika::providers::{ServiceHealth, WhisperConfig, WhisperRecognizer};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::{error, warn};

    let engine = WhisperRecognizer::new(WhisperConfig {
        model_path,
        threads: None,
    })
    .context("loading recognition model")?;

    let translator = Arc::new(OllamaTranslator::new(
        &config.translation.server_url,
        &config.translation.model,
    ));
    let synthesizer: Option<Arc<dyn predika::providers::SynthesisProvider>> =
        config.synthesis.enabled.then(|| {
            Arc::new(KokoroSynthesizer::new(&config.synthesis.server_url))
                as Arc<dyn predika::providers::SynthesisProvider>
        });

    let source = CpalAudioSource::new(config.audio.device.clone(), config.audio.sample_rate);

    info!(
        target = %config.translation.target_language,
        port = config.listener.port,
        "starting live translation"
    );
    let translation_url = config.translation.server_url.clone();
    let synthesis_url = config.synthesis.server_url.clone();
    let pipeline = Pipeline::new(config)?;
    let handle = pipeline
        .start(
            source,
            engine,
            translator,
            synthesizer,
            Arc::new(StdoutDisplay),
            Arc::new(NullAudioSink),
        )
        .await?;

    // Run until interrupted or the audio device dies, probing the backend
    // services along the way so an outage is visible to the operator.
    let health = ServiceHealth::new();
    let mut services_ok = true;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = watchdog.tick() => {
                if !handle.is_running() {
                    if let Some(e) = handle.device_error() {
                        error!("audio device failed: {}", e);
                        handle.shutdown().await?;
                        bail!("audio device failed");
                    }
                    break;
                }

                let status = health.check(&translation_url, &synthesis_url).await;
                if status.all_ok() != services_ok {
                    services_ok = status.all_ok();
                    if services_ok {
                        info!("backend services recovered");
                    } else {
                        warn!("service degradation: {}", status.detail());
                    }
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

#[cfg(not(all(feature = "remote-providers", feature = "cpal-audio")))]
async fn run(_config: RuntimeConfig, _model_path: PathBuf) -> anyhow::Result<()> {
    bail!("this binary needs the remote-providers and cpal-audio features")
}
