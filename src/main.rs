use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dealflow_agent::{
    AgentBackend, CollabService, Envelope, Plan, PlanExecutor, StoreAuditSink, Workflows,
};
use dealflow_core::config::{AppConfig, ModelConfig};
use dealflow_core::event::EventBus;
use dealflow_core::traits::LlmClient;
use dealflow_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "dealflow", version, about = "Brand collaboration email workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "dealflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve,
    /// Search a user's mailbox for collaboration emails
    Search {
        /// Whose profile and mailbox to use
        #[arg(long)]
        user: String,
    },
    /// Analyze one stored email and draft a reply
    Analyze {
        #[arg(long)]
        user: String,
        email_id: String,
    },
    /// Print both workflow plans as JSON
    Plans,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dealflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Plans need neither config nor a backend
    if let Commands::Plans = cli.command {
        let workflows = Workflows::new()?;
        let plans: Vec<&Plan> = workflows.all().into_iter().map(|p| &**p).collect();
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let service = build_service(&config)?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Interrupted, cancelling...");
        cancel_clone.cancel();
    });

    match cli.command {
        Commands::Serve => {
            let gateway_config = config.gateway.clone().unwrap_or_default();
            info!(bind = %gateway_config.bind, "Starting HTTP gateway");
            let server = dealflow_gateway::GatewayServer::new(gateway_config, service);
            server.run(cancel).await?;
        }
        Commands::Search { user } => {
            let envelope = service.search_emails(&user, cancel).await?;
            print_envelope(&envelope)?;
        }
        Commands::Analyze { user, email_id } => {
            let envelope = service.analyze_email(&user, &email_id, cancel).await?;
            print_envelope(&envelope)?;
        }
        Commands::Plans | Commands::Config => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // Check for config in the home directory
    if let Some(home_config) = dirs_home().map(|h| h.join(".dealflow").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    warn!("No config file found, using environment defaults");
    eprintln!("Warning: No config file found. Set GEMINI_API_KEY or create dealflow.toml");
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    let (provider, model_id, api_key) = match (
        std::env::var("GEMINI_API_KEY").ok(),
        std::env::var("OPENAI_API_KEY").ok(),
    ) {
        (Some(key), _) => ("gemini", "gemini-2.0-flash", Some(key)),
        (None, Some(key)) => ("openai", "gpt-4o", Some(key)),
        (None, None) => ("ollama", "llama3.2", None),
    };

    let base_url = (provider == "ollama")
        .then(|| "http://localhost:11434/v1/chat/completions".to_string());

    AppConfig {
        model: ModelConfig {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            api_key,
            base_url,
            max_tokens: 8192,
            temperature: 0.0,
            retry: None,
        },
        fallback_models: vec![],
        executor: Default::default(),
        storage: Default::default(),
        tools: Default::default(),
        gateway: None,
        log: None,
    }
}

/// Wire store, tools, LLM, executor, and audit sink into a service.
fn build_service(config: &AppConfig) -> anyhow::Result<Arc<CollabService>> {
    let store = dealflow_memory::open_store(&config.storage)?;
    let tools = Arc::new(ToolRegistry::with_builtins(&config.tools));
    let llm: Arc<dyn LlmClient> = Arc::from(dealflow_llm::client_from_config(config)?);
    let backend = Arc::new(AgentBackend::new(llm, config.model.clone(), tools));
    let event_bus = Arc::new(EventBus::default());

    let executor = PlanExecutor::new(backend, config.executor.clone())
        .with_audit_sink(Arc::new(StoreAuditSink::new(store.clone())))
        .with_event_bus(event_bus.clone());

    let mut service = CollabService::new(Arc::new(executor), store, Workflows::new()?);
    if let Some(log) = &config.log {
        service = service.with_run_log(event_bus, log.clone());
    }
    Ok(Arc::new(service))
}

fn print_envelope(envelope: &Envelope) -> anyhow::Result<()> {
    if let Some(summary) = &envelope.summary {
        eprintln!("{}", summary);
    }
    println!("{}", serde_json::to_string_pretty(&envelope.value)?);
    Ok(())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
