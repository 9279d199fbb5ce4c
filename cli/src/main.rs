//! CLI entrypoint for ragline
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

use anyhow::{Context, Result, bail};
use clap::Parser;
use ragline_application::ports::conversation_logger::{ConversationLogger, NoConversationLogger};
use ragline_application::ports::inference::InferenceClient;
use ragline_application::ports::knowledge_store::KnowledgeStore;
use ragline_application::{AnswerOrchestrator, AnswerStream};
use ragline_domain::StreamEvent;
use ragline_infrastructure::{
    ConfigLoader, HttpInferenceClient, HttpKnowledgeStore, InMemoryKnowledgeStore,
    InMemorySessionStore, JsonlConversationLogger,
};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Retrieval-augmented chat over a knowledge base, with safety and topic
/// guardrails in front of generation.
#[derive(Debug, Parser)]
#[command(name = "ragline", version, about)]
struct Cli {
    /// Question to answer (omit for interactive chat)
    question: Option<String>,

    /// Path to a config file (overrides discovered configs)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ignore all config files and use built-in defaults
    #[arg(long)]
    no_config: bool,

    /// Session id — reuse one to keep conversation history across turns
    #[arg(short, long, default_value = "default")]
    session: String,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting ragline");

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_ref())
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("failed to load configuration")?
    };
    config.validate().context("invalid configuration")?;

    // === Dependency Injection ===
    let inference: Arc<dyn InferenceClient> = Arc::new(HttpInferenceClient::new(
        &config.inference.base_url,
        &config.inference.generate_model,
        &config.inference.classifier_model,
        &config.inference.embedding_model,
        config.inference.request_timeout(),
    ));

    let store: Arc<dyn KnowledgeStore> = match &config.retrieval.store_url {
        Some(url) => Arc::new(HttpKnowledgeStore::new(
            url,
            config.inference.request_timeout(),
        )),
        // No store configured — answer from model knowledge alone
        None => Arc::new(InMemoryKnowledgeStore::new()),
    };

    let sessions = Arc::new(InMemorySessionStore::new());

    let logger: Arc<dyn ConversationLogger> = match &config.logging.conversation_log {
        Some(path) => match JsonlConversationLogger::new(path) {
            Some(logger) => Arc::new(logger),
            None => Arc::new(NoConversationLogger),
        },
        None => Arc::new(NoConversationLogger),
    };

    let orchestrator = AnswerOrchestrator::with_logger(
        inference,
        store,
        sessions,
        config.pipeline_params(),
        logger,
    );

    match cli.question {
        Some(question) => {
            let stream = orchestrator.handle(&cli.session, &question).await?;
            print_stream(stream).await?;
        }
        None => chat_loop(&orchestrator, &cli.session).await?,
    }

    Ok(())
}

/// Interactive chat loop: one line in, one streamed answer out.
async fn chat_loop(orchestrator: &AnswerOrchestrator, session: &str) -> Result<()> {
    println!("ragline — type a question, or 'exit' to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match orchestrator.handle(session, line).await {
            Ok(stream) => print_stream(stream).await?,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}

/// Print a streamed answer to stdout, token by token.
async fn print_stream(mut stream: AnswerStream) -> Result<()> {
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Token { content } => {
                print!("{content}");
                std::io::stdout().flush()?;
            }
            StreamEvent::Refusal { message } => {
                println!("{message}");
            }
            StreamEvent::Done => {
                println!();
                return Ok(());
            }
            StreamEvent::Error { message } => {
                println!();
                bail!("request failed: {message}");
            }
        }
    }
    // Stream ended without a terminal event
    println!();
    Ok(())
}
