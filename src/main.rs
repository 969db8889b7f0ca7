//! repo-bridge - read and write GitHub repository files from the command line
//!
//! # Usage
//! ```bash
//! repo-bridge ls acme/widgets src                       # List a directory
//! repo-bridge cat acme/widgets src/config.json          # Print a file
//! repo-bridge info acme/widgets                         # Default branch and visibility
//! repo-bridge put acme/widgets notes.md -m "notes" --content "hi"
//! repo-bridge invoke call.json                          # Run a tool call
//! ```

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use repo_content_bridge::{
    error_payload, tool_definitions, BridgeConfig, BridgeError, ContentBridge, ContentRef,
    DeleteRequest, RepositoryLocation, ToolRequest, UpsertRequest,
};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Read and write files in GitHub repositories with optimistic concurrency
#[derive(Parser)]
#[command(name = "repo-bridge")]
#[command(about = "Safe GitHub contents API access", long_about = None)]
struct Cli {
    /// TOML config file; GITHUB_TOKEN and friends override it
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Default branch for commands that name none
    #[arg(short, long, global = true)]
    branch: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        /// Repository as owner/repo
        repo: String,
        #[arg(default_value = "")]
        path: String,
        #[arg(long = "ref")]
        reference: Option<String>,
    },
    /// Print a file's content
    Cat {
        repo: String,
        path: String,
        #[arg(long = "ref")]
        reference: Option<String>,
        /// Print metadata as JSON instead of raw content
        #[arg(long)]
        json: bool,
    },
    /// Show repository metadata, including its default branch
    Info { repo: String },
    /// List the whole repository tree
    Tree {
        repo: String,
        #[arg(long = "ref")]
        reference: Option<String>,
    },
    /// Create or update a file
    Put {
        repo: String,
        path: String,
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Inline content
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        /// Read content from a local file (`-` for stdin)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Fail with a conflict unless the remote file still has this sha
        #[arg(long)]
        expected_sha: Option<String>,
    },
    /// Delete a file
    Rm {
        repo: String,
        path: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Run a tool call given as JSON (`{"tool": "...", ...}`), from a file or `-` for stdin
    Invoke { input: PathBuf },
    /// Print the tool definitions handed to a model
    Tools,
}

fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::from_env()?,
    };
    if let Some(branch) = &cli.branch {
        config.default_branch = Some(branch.clone());
    }
    Ok(config)
}

fn read_input(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli, bridge: &ContentBridge) -> anyhow::Result<()> {
    match cli.command {
        Commands::Ls { repo, path, reference } => {
            let location = RepositoryLocation::parse(&repo)?;
            let target = ContentRef::new(&path).with_reference(reference);
            let listing = bridge.list_directory(&location, &target).await?;
            print_json(&serde_json::to_value(listing)?)
        }
        Commands::Cat {
            repo,
            path,
            reference,
            json,
        } => {
            let location = RepositoryLocation::parse(&repo)?;
            let target = ContentRef::new(&path).with_reference(reference);
            let file = bridge.read_file(&location, &target).await?;
            if json {
                let text = file.text().map(str::to_string);
                print_json(&json!({
                    "path": file.path,
                    "name": file.name,
                    "sha": file.sha,
                    "size": file.size,
                    "encoding": file.encoding,
                    "html_url": file.source_url,
                    "content": text,
                }))
            } else {
                std::io::stdout().write_all(&file.content)?;
                Ok(())
            }
        }
        Commands::Info { repo } => {
            let location = RepositoryLocation::parse(&repo)?;
            let info = bridge.repository_info(&location).await?;
            print_json(&serde_json::to_value(info)?)
        }
        Commands::Tree { repo, reference } => {
            let location = RepositoryLocation::parse(&repo)?;
            let tree = bridge
                .list_tree_recursive(&location, reference.as_deref())
                .await?;
            print_json(&serde_json::to_value(tree)?)
        }
        Commands::Put {
            repo,
            path,
            message,
            content,
            file,
            expected_sha,
        } => {
            let location = RepositoryLocation::parse(&repo)?;
            let bytes = match (content, file) {
                (Some(content), _) => content.into_bytes(),
                (None, Some(file)) => read_input(&file)?,
                (None, None) => anyhow::bail!("either --content or --file is required"),
            };
            let mut request = UpsertRequest::new(path, bytes, message);
            request.expected_sha = expected_sha;
            let outcome = bridge.upsert_file(&location, request).await?;
            print_json(&serde_json::to_value(outcome)?)
        }
        Commands::Rm {
            repo,
            path,
            message,
        } => {
            let location = RepositoryLocation::parse(&repo)?;
            let mut request = DeleteRequest::new(path);
            request.message = message;
            let outcome = bridge.delete_file(&location, request).await?;
            print_json(&serde_json::to_value(outcome)?)
        }
        Commands::Invoke { input } => {
            let raw = read_input(&input)?;
            let value: Value = serde_json::from_slice(&raw).context("tool call is not JSON")?;
            let request = ToolRequest::from_value(value)?;
            let result = request.invoke(bridge).await?;
            print_json(&result)
        }
        Commands::Tools => print_json(&Value::Array(tool_definitions())),
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let bridge = ContentBridge::from_config(&config)?;
    run(cli, &bridge).await
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "repo_content_bridge=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<BridgeError>() {
                Some(bridge_err) => {
                    let payload = error_payload(bridge_err);
                    eprintln!(
                        "{}",
                        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| bridge_err.to_string())
                    );
                }
                None => eprintln!("error: {err:#}"),
            }
            std::process::ExitCode::FAILURE
        }
    }
}
