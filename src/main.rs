use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use collabdoc::client::remote::{confirm_edit, next_event, ws_url};
use collabdoc::client::{Client, HttpClient};
use collabdoc::config::{Backend, Config, CONFIG_FILE};
use collabdoc::sync::FanOut;
use collabdoc::{storage, DocumentId, NewDocument, ServerMessage};
use colored::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collabdoc")]
#[command(about = "Real-time collaborative document server with last-write-wins sync", version)]
struct Cli {
    /// Log filter, e.g. "info" or "collabdoc=debug". RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the database
    Init {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Start the collaboration server
    Serve {
        #[arg(short, long, default_value = CONFIG_FILE)]
        config: PathBuf,

        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,

        /// Keep documents in memory only
        #[arg(long)]
        memory: bool,

        /// Only send updates to clients that have the document open
        #[arg(long)]
        interested_only: bool,

        /// Do not echo an edit back to the client that sent it
        #[arg(long)]
        no_echo: bool,
    },

    /// List documents on a running server
    List {
        #[arg(short, long, default_value = "http://localhost:5000")]
        server: String,
    },

    /// Create a document on a running server
    Create {
        #[arg(short, long, default_value = "http://localhost:5000")]
        server: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        content: String,
    },

    /// Print document updates as they arrive
    Watch {
        #[arg(short, long, default_value = "http://localhost:5000")]
        server: String,

        /// Open this document so its editor view follows updates
        #[arg(long)]
        open: Option<DocumentId>,
    },

    /// Replace a document's content
    Edit {
        #[arg(short, long, default_value = "http://localhost:5000")]
        server: String,

        #[arg(long)]
        id: DocumentId,

        #[arg(short, long)]
        content: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Init { path } => {
            println!("{}", "🚀 Initializing CollabDoc...".cyan().bold());
            let config = storage::init(&path).await?;
            println!("{} Config written to {}", "✓".green(), path.join(CONFIG_FILE).display());
            println!("{} Database at {}", "✓".green(), config.storage.path.display());
            println!("\n{}", "Next steps:".yellow());
            println!("  1. {} - Start the server", "collabdoc serve".bright_white());
            println!(
                "  2. {} - Create a document",
                "collabdoc create -t \"Notes\" -c \"hello\"".bright_white()
            );
        }

        Commands::Serve {
            config,
            host,
            port,
            db,
            memory,
            interested_only,
            no_echo,
        } => {
            let mut cfg = Config::load(&config)?;
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            if let Some(db) = db {
                cfg.storage.path = db;
            }
            if memory {
                cfg.storage.backend = Backend::Memory;
            }
            if interested_only {
                cfg.sync.fan_out = FanOut::Interested;
            }
            if no_echo {
                cfg.sync.echo_to_origin = false;
            }

            println!(
                "{}",
                format!("🌐 Starting server on port {}...", cfg.server.port)
                    .cyan()
                    .bold()
            );
            collabdoc::server::start(cfg).await?;
        }

        Commands::List { server } => {
            let docs = HttpClient::new(&server)?.list().await?;

            println!("{}", "Documents".cyan().bold());
            println!("{}", "═".repeat(80).bright_black());
            for doc in docs {
                println!(
                    "{} {} {}",
                    doc.id.to_string().bright_black(),
                    doc.title.bright_white().bold(),
                    format!("(last updated: {})", doc.updated_at.format("%Y-%m-%d %H:%M:%S")).bright_black()
                );
            }
        }

        Commands::Create {
            server,
            title,
            content,
        } => {
            let doc = HttpClient::new(&server)?
                .create(&NewDocument::new(title, content))
                .await?;
            println!("{} Created document {}", "✓".green(), doc.id.to_string().bright_yellow());
        }

        Commands::Watch { server, open } => {
            let http = HttpClient::new(&server)?;
            let client = Client::connect(&ws_url(&server)?).await?;
            client.load(http.list().await?);
            if let Some(id) = open {
                let doc = http.get(id).await?.with_context(|| format!("no document {id}"))?;
                client.open(&doc)?;
            }

            let mut events = client.subscribe();
            println!("{}", "👁  Watching for document updates...".cyan().bold());
            while let Some(event) = next_event(&mut events).await {
                if let ServerMessage::DocumentUpdated(doc) = event {
                    println!(
                        "{} {} {}",
                        format!("[{}]", doc.updated_at.format("%H:%M:%S%.3f")).bright_black(),
                        doc.title.bright_white().bold(),
                        doc.id.to_string().bright_black()
                    );
                    if client.view().selected() == Some(doc.id) {
                        println!("{}", "─".repeat(80).bright_black());
                        println!("{}", doc.content);
                        println!("{}", "─".repeat(80).bright_black());
                    }
                }
            }
        }

        Commands::Edit {
            server,
            id,
            content,
        } => {
            let http = HttpClient::new(&server)?;
            let doc = http.get(id).await?.with_context(|| format!("no document {id}"))?;

            let client = Client::connect(&ws_url(&server)?).await?;
            let mut events = client.subscribe();
            client.open(&doc)?;
            client.type_content(content.clone())?;

            // Wait for the outcome; with echo disabled nothing may come back.
            let outcome =
                tokio::time::timeout(Duration::from_secs(3), confirm_edit(&mut events, id, &content)).await;

            match outcome {
                Ok(Ok(updated)) => println!(
                    "{} Updated {} at {}",
                    "✓".green(),
                    updated.title.bright_white(),
                    updated.updated_at.to_rfc3339().bright_black()
                ),
                Ok(Err(err)) => return Err(err),
                Err(_) => println!("{} Edit sent (no confirmation received)", "•".yellow()),
            }
            client.shutdown();
        }
    }

    Ok(())
}
