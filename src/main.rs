use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod error;
mod gateway;
mod models;
mod persona;
mod prompt;
mod server;
mod session;
mod settings;
mod summary;

use models::OpenAICompatible;
use persona::PersonaCatalog;
use settings::{ModelOverrides, ModelParams, ServerSettings};

#[derive(Debug, Parser)]
#[command(name = "persona_relay")]
#[command(about = "Persona chat relay for a text-completion backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Start {
        #[arg(long, default_value = "127.0.0.1:8000")]
        listen: String,
        /// Persona catalog (JSON array)
        #[arg(long, default_value = "characters.json")]
        characters: PathBuf,
        #[arg(long)]
        model: Option<String>,
        /// OpenAI-compatible API root; falls back to OPENAI_BASE_URL
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        top_p: Option<f32>,
        /// Repeat for each origin; defaults to the bundled front-end origins
        #[arg(long = "allowed-origin")]
        allowed_origins: Vec<String>,
        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics_listen: Option<String>,
    },
}

fn build_settings(command: Commands) -> anyhow::Result<ServerSettings> {
    let Commands::Start {
        listen,
        characters,
        model,
        base_url,
        temperature,
        max_tokens,
        top_p,
        allowed_origins,
        metrics_listen,
    } = command;

    let params = ModelParams { temperature, max_tokens, top_p };
    let cli = ModelOverrides {
        model,
        model_params: (params != ModelParams::default()).then_some(params),
    };
    let env = ModelOverrides::from_env()?;

    Ok(ServerSettings {
        listen: listen.parse()?,
        characters,
        base_url: base_url.as_deref().map(settings::validate_base_url).transpose()?,
        allowed_origins,
        metrics_listen: metrics_listen.map(|m| m.parse::<SocketAddr>()).transpose()?,
        model: settings::resolve_model_settings(&env, &cli),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = build_settings(cli.command)?;

    if let Some(addr) = settings.metrics_listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    let catalog = PersonaCatalog::load(&settings.characters)?;
    catalog.validate(&prompt::PromptBuilder)?;

    let mut backend = OpenAICompatible::from_env(settings.model.clone());
    if let Some(base_url) = &settings.base_url {
        backend.base_url = base_url.clone();
    }
    settings::validate_base_url(&backend.base_url)?;
    if backend.api_key.is_none() {
        tracing::warn!("no GEMINI_API_KEY or OPENAI_API_KEY set; requests will be unauthenticated");
    }
    tracing::info!(model = %settings.model.model, base_url = %backend.base_url, "completion backend configured");

    let state = server::AppState::new(catalog, Arc::new(backend));
    server::serve(settings.listen, state, &settings.origins()).await?;
    Ok(())
}
