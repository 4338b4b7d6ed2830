use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use content_client::HttpContentApi;
use inference_client::StreamingClient;
use tickerscout_common::{
    CancelToken, Config, EngineSettings, ModelProfile, ScanEvent, ScanRequest, ScanResult,
};
use tickerscout_engine::{
    export_result, import_result, BackendClient, JsonFileStore, ScanEngine, SignalStore,
};

#[derive(Parser, Debug)]
#[command(name = "tickerscout", about = "Scan social accounts for trading signals")]
struct Args {
    /// Account handles to scan, without the @.
    accounts: Vec<String>,

    /// How many days back to look.
    #[arg(long, default_value_t = 7)]
    window_days: u32,

    /// Model id override (defaults to TICKERSCOUT_MODEL).
    #[arg(long)]
    model: Option<String>,

    /// Path of the local store file.
    #[arg(long, default_value = "tickerscout.json")]
    store: PathBuf,

    /// Resume an interrupted scan instead of starting a new one.
    #[arg(long)]
    resume: bool,

    /// Print the last scan result as a shareable payload and exit.
    #[arg(long)]
    export: bool,

    /// Import a shared scan payload, store it as current, and exit.
    #[arg(long, value_name = "PAYLOAD")]
    import: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let store = Arc::new(JsonFileStore::open(&args.store).await?);

    if let Some(payload) = &args.import {
        let result = import_result(payload)?;
        store.set_current(&result).await?;
        info!(signals = result.signals.len(), "Imported shared scan result");
        print_result(&result);
        return Ok(());
    }
    if args.export {
        let result = store
            .current()
            .await?
            .ok_or_else(|| anyhow!("no scan result to export yet"))?;
        println!("{}", export_result(&result)?);
        return Ok(());
    }

    let config = Config::from_env();
    let model = ModelProfile::new(args.model.as_deref().unwrap_or(&config.model_id));
    let settings = EngineSettings::default();

    let content = Arc::new(HttpContentApi::new(&config.backend_url, &config.backend_api_key));
    let completer: Arc<dyn inference_client::Completer> = if config.byok {
        info!("Using direct provider inference (BYOK)");
        Arc::new(StreamingClient::direct(&config.provider_api_key))
    } else {
        Arc::new(StreamingClient::managed(&config.backend_url, &config.backend_api_key))
    };
    let backend = Arc::new(BackendClient::new(&config.backend_url, &config.backend_api_key));

    let engine = ScanEngine::new(
        content,
        completer,
        backend.clone(),
        backend,
        store,
        settings,
        model,
        config.prompt_override,
    );
    engine.hydrate_cache().await?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling scan");
                cancel.cancel();
            }
        });
    }

    let (events_tx, mut events_rx) = unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                ScanEvent::Phase { phase } => info!(%phase, "Phase"),
                ScanEvent::Inference { elapsed_ms, output_tokens } => {
                    tracing::debug!(elapsed_ms, output_tokens, "Inference progress");
                }
                ScanEvent::Status { message } => info!("{message}"),
                ScanEvent::Warning { message } => warn!("{message}"),
            }
        }
    });

    let result = if args.resume {
        engine
            .resume(&cancel, Some(&events_tx))
            .await
            .context("resume failed")?
            .ok_or_else(|| anyhow!("no interrupted scan to resume"))?
    } else {
        if args.accounts.is_empty() {
            return Err(anyhow!("no accounts given; pass one or more handles"));
        }
        let request = ScanRequest {
            accounts: args.accounts.clone(),
            window_days: args.window_days,
        };
        engine.scan(&request, &cancel, Some(&events_tx)).await?
    };

    drop(events_tx);
    let _ = progress.await;

    print_result(&result);
    Ok(())
}

fn print_result(result: &ScanResult) {
    println!(
        "\n{} signals from {} posts across {} accounts ({}d window)\n",
        result.signals.len(),
        result.total_posts,
        result.accounts.len(),
        result.window_days,
    );
    for signal in &result.signals {
        let tickers: Vec<String> = signal
            .tickers
            .iter()
            .map(|t| format!("{} {}", t.symbol, t.action))
            .collect();
        println!("• {} [{}]", signal.title, tickers.join(", "));
        println!("  {}", signal.summary);
        if let Some(url) = &signal.post_url {
            println!("  {url}");
        }
        println!();
    }
    for warning in &result.warnings {
        println!("warning: {warning}");
    }
}
