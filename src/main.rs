use clap::{Parser, Subcommand};
use anyhow::{Context, Result, anyhow, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gemini_chat::app::App;
use gemini_chat::config::Config;
use gemini_chat::error::GatewayError;
use gemini_chat::gemini::{ChatGateway, GeminiGateway};
use gemini_chat::persistence::{
    deserialize_history, serialize_history, FileStorage, MemoryStorage, PersistenceBridge, Storage,
};
use gemini_chat::session::{ActiveSession, Rejection};
use gemini_chat::state::Role;
use gemini_chat::store::ConversationStore;
use gemini_chat::{handler, logging, tui, ui};

#[derive(Parser)]
#[command(name = "gemini-chat")]
#[command(about = "Terminal chat client for Gemini with local conversation history")]
#[command(version)]
struct Cli {
    /// Gemini model to use (overrides the config file)
    #[arg(short, long)]
    model: Option<String>,
    /// Directory for conversation history and logs
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Keep history in memory only
    #[arg(long)]
    ephemeral: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// Send one prompt and print the reply
    Ask {
        /// The prompt text
        prompt: String,
        /// Continue the conversation at this index instead of starting a new one
        #[arg(short, long)]
        conversation: Option<usize>,
    },
    /// List saved conversations
    List,
    /// Print a saved conversation
    Show {
        index: usize,
    },
    /// Delete a saved conversation
    Delete {
        index: usize,
    },
    /// Delete all saved conversations
    Clear,
    /// Append conversations from a history snapshot file
    Import {
        path: PathBuf,
    },
    /// Print the history snapshot as JSON
    Export,
    /// Update the config file
    Config {
        /// Default model
        #[arg(long)]
        model: Option<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// API key stored in the config file
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring unreadable config file: {}", e);
        Config::new()
    });

    let data_dir = match cli.data_dir.clone().or_else(|| config.data_dir.clone()) {
        Some(dir) => dir,
        None => FileStorage::default_dir()?,
    };
    logging::init(&data_dir)?;
    tracing::debug!(data_dir = %data_dir.display(), "Using data directory");

    // CLI overrides apply to this run only, never to the saved file
    let mut run_config = config.clone();
    if let Some(model) = cli.model {
        run_config.model = Some(model);
    }

    let storage: Box<dyn Storage> = if cli.ephemeral {
        Box::new(MemoryStorage::new())
    } else {
        Box::new(FileStorage::new(data_dir))
    };

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_tui(&run_config, storage).await?,
        Commands::Ask { prompt, conversation } => {
            ask(&run_config, storage, &prompt, conversation).await?
        }
        Commands::List => list_conversations(storage),
        Commands::Show { index } => show_conversation(storage, index)?,
        Commands::Delete { index } => delete_conversation(storage, index)?,
        Commands::Clear => clear_history(storage),
        Commands::Import { path } => import_history(storage, &path)?,
        Commands::Export => export_history(storage)?,
        Commands::Config { model, timeout, api_key } => {
            update_config(config, model, timeout, api_key)?
        }
    }

    Ok(())
}

fn build_gateway(config: &Config) -> Result<Arc<dyn ChatGateway>, GatewayError> {
    let gateway = GeminiGateway::new(config.resolve_api_key(), config.gemini_config())?;
    Ok(Arc::new(gateway))
}

fn open_store(storage: Box<dyn Storage>) -> (ConversationStore, PersistenceBridge) {
    let mut store = ConversationStore::new();
    let mut bridge = PersistenceBridge::new(storage);
    bridge.load(&mut store);
    (store, bridge)
}

async fn run_tui(config: &Config, storage: Box<dyn Storage>) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let mut app = App::new(storage, build_gateway(config), events.sender());

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event),
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    app.persist();
    tracing::info!("Exiting gemini-chat");
    result
}

async fn ask(
    config: &Config,
    storage: Box<dyn Storage>,
    prompt: &str,
    conversation: Option<usize>,
) -> Result<()> {
    let gateway = build_gateway(config)?;
    let (mut store, mut bridge) = open_store(storage);
    let mut session = ActiveSession::new();

    if let Some(index) = conversation {
        if !store.set_active_index(Some(index)) {
            bail!("No conversation at index {} ({} saved)", index, store.len());
        }
        session.observe(&mut store);
    }

    session.set_input(prompt);
    let reply = session
        .submit(&mut store, gateway.as_ref())
        .await
        .map_err(|rejection| match rejection {
            Rejection::EmptyInput => anyhow!("Prompt is empty"),
            Rejection::Busy => anyhow!("A request is already pending"),
        })?;
    bridge.flush(&store);

    println!("{}", reply.text);
    eprintln!("\n{}", reply.metadata);
    if reply.is_error() {
        bail!("Gemini request failed");
    }
    Ok(())
}

fn list_conversations(storage: Box<dyn Storage>) {
    let (store, _) = open_store(storage);

    if store.is_empty() {
        println!("No saved conversations");
        return;
    }

    for index in 0..store.len() {
        let turns = store.get(index).map_or(0, |c| c.len());
        let title = store.title(index).unwrap_or_default();
        println!("{:>3}  {:<22} ({} turns)", index, title, turns);
    }
}

fn show_conversation(storage: Box<dyn Storage>, index: usize) -> Result<()> {
    let (store, _) = open_store(storage);
    let conversation = store
        .get(index)
        .ok_or_else(|| anyhow!("No conversation at index {} ({} saved)", index, store.len()))?;

    for turn in conversation {
        let label = match turn.role {
            Role::User => "You",
            Role::Model => "Gemini",
        };
        println!("{}:\n{}\n", label, turn.text);
    }
    Ok(())
}

fn delete_conversation(storage: Box<dyn Storage>, index: usize) -> Result<()> {
    let (mut store, mut bridge) = open_store(storage);
    let removed = store
        .delete_at(index)
        .ok_or_else(|| anyhow!("No conversation at index {} ({} saved)", index, store.len()))?;
    bridge.flush(&store);

    tracing::info!(index, "Deleted conversation");
    println!("Deleted conversation {} ({} turns)", index, removed.len());
    Ok(())
}

fn clear_history(storage: Box<dyn Storage>) {
    let (mut store, mut bridge) = open_store(storage);
    let count = store.len();
    store.reset();
    bridge.flush(&store);

    tracing::info!(count, "Cleared conversation history");
    println!("Cleared {} conversations", count);
}

fn import_history(storage: Box<dyn Storage>, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let imported = deserialize_history(&raw)
        .with_context(|| format!("{} is not a conversation history snapshot", path.display()))?;

    let (mut store, mut bridge) = open_store(storage);
    let count = imported.len();
    store.import(imported);
    bridge.flush(&store);

    tracing::info!(count, path = %path.display(), "Imported conversations");
    println!("Imported {} conversations ({} total)", count, store.len());
    Ok(())
}

fn export_history(storage: Box<dyn Storage>) -> Result<()> {
    let (store, _) = open_store(storage);
    println!("{}", serialize_history(store.conversations())?);
    Ok(())
}

fn update_config(
    mut config: Config,
    model: Option<String>,
    timeout: Option<u64>,
    api_key: Option<String>,
) -> Result<()> {
    if model.is_none() && timeout.is_none() && api_key.is_none() {
        // Never echo the stored key
        config.api_key = config.api_key.map(|_| "<set>".to_string());
        println!("Config file: {}", Config::get_config_path()?.display());
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if model.is_some() {
        config.model = model;
    }
    if timeout.is_some() {
        config.request_timeout_secs = timeout;
    }
    if api_key.is_some() {
        config.api_key = api_key;
    }
    config.save()?;
    println!("Saved {}", Config::get_config_path()?.display());
    Ok(())
}
