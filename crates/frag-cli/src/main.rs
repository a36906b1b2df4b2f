//! Frag CLI - prompt-to-fragment code agents
//!
//! Usage:
//!   frag init [path]                      Write the default configuration
//!   frag run --project <id> <prompt>      Submit a prompt and run the job
//!   frag history --project <id>           List a project's messages
//!   frag tree --project <id>              Show the latest fragment's files

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frag_agent::OpenAiClient;
use frag_core::config::FRAG_DIR;
use frag_core::{file_tree, FragConfig, MessageKind, TreeItem};
use frag_orchestrator::{
    submit_prompt, AgentModels, CodeAgentJob, FileStore, JobRunner, MessageStore,
};
use frag_sandbox::LocalProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "frag")]
#[command(author, version, about = "Prompt-to-fragment code agents")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Project root (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Submit a prompt and run the code agent on it
    Run {
        /// Project the prompt belongs to
        #[arg(short, long)]
        project: String,

        /// What to build
        prompt: String,
    },

    /// List stored messages of a project, oldest first
    History {
        #[arg(short, long)]
        project: String,
    },

    /// Show the file tree of the project's latest fragment
    Tree {
        #[arg(short, long)]
        project: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path).await,
        Commands::Run { project, prompt } => cmd_run(project, prompt).await,
        Commands::History { project } => cmd_history(project).await,
        Commands::Tree { project } => cmd_tree(project).await,
    }
}

fn frag_dir() -> PathBuf {
    PathBuf::from(FRAG_DIR)
}

fn message_store() -> FileStore {
    FileStore::new(frag_dir().join("messages"))
}

fn load_config() -> Result<FragConfig> {
    FragConfig::load_or_default(Path::new(".")).context("Failed to load configuration")
}

async fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing Frag in {:?}", path);

    let config_path = FragConfig::write_default(&path).context("Failed to write config")?;
    let frag_dir = path.join(FRAG_DIR);
    for dir in ["messages", "journals", "jobs", "templates"] {
        tokio::fs::create_dir_all(frag_dir.join(dir)).await?;
    }

    println!("Initialized Frag in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    println!("  .frag/messages/");
    println!("  .frag/journals/");
    println!("  .frag/jobs/");
    println!("  .frag/templates/   (copied into new sandboxes by template name)");

    Ok(())
}

async fn cmd_run(project: String, prompt: String) -> Result<()> {
    let config = load_config()?;
    let client = OpenAiClient::from_config(&config).context("Model client unavailable")?;

    let sandbox = LocalProvider::new(&config.sandbox.root)
        .with_template_root(frag_dir().join("templates"))
        .with_host_template(&config.sandbox.host_template);
    let store = Arc::new(message_store());

    let event = submit_prompt(store.as_ref(), &prompt, &project)
        .await
        .context("Prompt rejected")?;

    let job = CodeAgentJob::new(
        config,
        Arc::new(sandbox),
        store,
        AgentModels::shared(Arc::new(client)),
    )
    .with_activity_root(frag_dir().join("jobs"));
    let runner = JobRunner::new(job).with_journal_dir(frag_dir().join("journals"));

    let result = runner.run(&event).await.context("Job failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

async fn cmd_history(project: String) -> Result<()> {
    let messages = message_store()
        .messages(&project)
        .await
        .context("Failed to read messages")?;

    if messages.is_empty() {
        println!("No messages for project {}", project);
        return Ok(());
    }

    for message in messages {
        let marker = match message.kind {
            MessageKind::Error => " [error]",
            MessageKind::Result if message.fragment.is_some() => " [fragment]",
            MessageKind::Result => "",
        };
        println!(
            "{} {:?}{}: {}",
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            message.role,
            marker,
            message.content
        );
        if let Some(fragment) = &message.fragment {
            println!("    {} -> {}", fragment.title, fragment.sandbox_url);
        }
    }

    Ok(())
}

async fn cmd_tree(project: String) -> Result<()> {
    let messages = message_store()
        .messages(&project)
        .await
        .context("Failed to read messages")?;

    let Some(fragment) = messages.iter().rev().find_map(|m| m.fragment.as_ref()) else {
        println!("No fragments for project {}", project);
        return Ok(());
    };

    println!("{} ({})", fragment.title, fragment.sandbox_url);
    print_tree(&file_tree(&fragment.files), 1);

    Ok(())
}

fn print_tree(items: &[TreeItem], depth: usize) {
    let indent = "  ".repeat(depth);
    for item in items {
        match item {
            TreeItem::File(name) => println!("{}{}", indent, name),
            TreeItem::Dir(name, children) => {
                println!("{}{}/", indent, name);
                print_tree(children, depth + 1);
            }
        }
    }
}
