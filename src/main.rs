mod cache;
mod config;
mod coze;
mod json;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::coze::{ChatBackend, CozeClient};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "coze-relay",
    about = "Relay FChat / FPT bot webhooks to a Coze bot",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send one message to the Coze bot and print the result
    Ask {
        /// The message text
        text: String,

        /// User id sent to Coze
        #[arg(short, long, default_value = "cli-user")]
        user: String,

        /// Conversation id to continue
        #[arg(short, long, default_value = "")]
        conversation: String,
    },
    /// Show the effective configuration
    Config,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = config::load_config()?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(h) = host {
                config.host = h;
            }
            if let Some(p) = port {
                config.port = p;
            }
            config.validate()?;
            server::serve(&config).await
        }
        Commands::Ask {
            text,
            user,
            conversation,
        } => {
            config.validate()?;
            cmd_ask(&config, &text, &user, &conversation).await
        }
        Commands::Config => cmd_config(&config),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("coze_relay=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_ask(config: &config::Config, text: &str, user: &str, conversation: &str) -> Result<()> {
    let client = CozeClient::new(&config.coze)?;
    let result = client.ask(user, text, conversation).await?;

    if result.answer.is_empty() {
        println!("(no answer)");
    } else {
        println!("{}", result.answer);
    }
    eprintln!("\nconversation_id: {}", result.conversation_id);
    if !result.debug_info.is_empty() {
        eprintln!("debug: {}", result.debug_info);
    }
    Ok(())
}

fn cmd_config(config: &config::Config) -> Result<()> {
    let set = |v: &Option<String>| {
        if v.as_ref().is_some_and(|s| !s.trim().is_empty()) {
            "set"
        } else {
            "not set"
        }
    };

    println!("Listen: {}:{}", config.host, config.port);
    println!("Conversation TTL: {}s", config.conversation_ttl_secs);
    println!("Coze base URL: {}", config.coze.base_url);
    println!("Coze PAT: {}", set(&config.coze.pat));
    println!("Coze bot id: {}", config.coze.bot_id.as_deref().unwrap_or("not set"));
    println!("Coze timeout: {}s", config.coze.timeout_secs);
    println!("FChat base URL: {}", config.fchat.base_url);
    println!("FChat token: {}", set(&config.fchat.token));
    println!("FChat timeout: {}s", config.fchat.timeout_secs);
    println!("FPT webhook secret: {}", set(&config.fpt.webhook_secret));
    Ok(())
}
