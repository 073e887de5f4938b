/*
researcher - main.rs
Loads configuration, prepares the history database and the LLM provider, then runs
the Rocket HTTP server until shutdown.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::{init_db_pool, Config};
use researcher::history::HistoryStore;
use researcher::llm::remote::RemoteLlmProvider;
use researcher::llm::LlmProvider;
use researcher::research::Researcher;
use researcher::server::launch_rocket;

#[derive(Parser, Debug)]
#[command(name = "researcher", about = "Web research service: search, scrape, summarize, remember")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Pick up GEMINI_API_KEY and friends from a local .env, if any
    if let Ok(path) = dotenv::dotenv() {
        info!(path = ?path, "loaded environment file");
    }

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    info!(db_path = %config.database.path, "opening history database");
    let pool = init_db_pool(&config.database.path).await?;
    let history = HistoryStore::new(pool);
    history.init().await?;

    let llm = create_llm_provider(&config)?;
    let researcher = Researcher::from_config(&config, history, llm).context("failed to build research pipeline")?;

    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(&config, researcher).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Create the LLM provider from configuration. API key and model override are read
/// from the environment here, once.
fn create_llm_provider(config: &Config) -> anyhow::Result<Option<Arc<dyn LlmProvider>>> {
    let llm_config = config.llm.clone().unwrap_or_default();
    let adapter = llm_config.adapter.as_deref().unwrap_or("remote");
    match adapter {
        "remote" => {
            match RemoteLlmProvider::from_config(llm_config.remote.as_ref(), |key| std::env::var(key).ok())? {
                Some(provider) => {
                    info!("LLM provider initialized: remote ({})", provider.model());
                    Ok(Some(Arc::new(provider) as Arc<dyn LlmProvider>))
                }
                None => {
                    warn!("LLM API key not set; summaries will be failure placeholders");
                    Ok(None)
                }
            }
        }
        "none" => {
            info!("LLM adapter disabled by configuration");
            Ok(None)
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}
