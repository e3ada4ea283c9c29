mod app;
mod config;
mod logging;
mod metrics;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::app::App;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "factgraph",
    version,
    about = "Question answering over a fact graph and a chunk index"
)]
struct Cli {
    /// Configuration file (defaults to $FACTGRAPH_CONFIG, then ./factgraph.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Bind address, overrides SERVER_ADDR
        #[arg(long)]
        addr: Option<String>,
    },
    /// Ingest a document directory and print the run's statistics
    Ingest {
        /// Overrides DOCUMENT_DIR
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Empty both stores first
        #[arg(long)]
        fresh: bool,
    },
    /// Ask questions interactively; `exit` ends the session
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init(&config.log)?;

    match cli.command {
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.server.addr.clone());
            let app = Arc::new(App::build(config).await?);
            server::serve(app, &addr).await
        }
        Command::Ingest { dir, fresh } => {
            let dir = dir.unwrap_or_else(|| config.documents.dir.clone());
            let app = App::build(config).await?;
            let stats = app.pipeline.run(&dir, fresh).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Chat => chat(App::build(config).await?).await,
    }
}

async fn chat(app: App) -> Result<()> {
    info!(
        graph = app.graph.backend_name(),
        index = app.chunks.index_name(),
        "chat session started"
    );
    println!("Ask a question about your documents. Type 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        let answer = app.router.ask(question).await;
        println!("{answer}\n");
    }

    println!("{}", serde_json::to_string_pretty(&app.metrics.snapshot())?);
    Ok(())
}
