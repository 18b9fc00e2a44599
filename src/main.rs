//! Command-line front end for the document store.
//!
//! Every subcommand maps to one store, OCR or search operation and prints its
//! result as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use docvault_lib::commands::{file_commands, search_commands};
use docvault_lib::{init_tracing, AppState, Config};

#[derive(Parser)]
#[command(name = "docvault")]
#[command(about = "Document store with cached OCR and full-text search")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "DOCVAULT_CONFIG", default_value = "docvault.toml")]
    config: PathBuf,

    /// Store root, overrides the configuration file and DOCVAULT_ROOT
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the direct children of a directory
    List {
        /// Directory relative to the root (empty for the root)
        #[arg(default_value = "")]
        path: String,
    },

    /// Print the whole tree of primary files
    Tree,

    /// Write the primary file of a document to a local path
    Get {
        path: String,
        /// Local file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a directory
    Mkdir { path: String },

    /// Copy a document or directory into a destination directory
    Copy { item: String, destination: String },

    /// Move a document or directory into a destination directory
    Move { item: String, destination: String },

    /// Rename a document or directory in place
    Rename { path: String, new_name: String },

    /// Delete a document or directory
    Delete { item: String },

    /// Store a local file as a new document
    Upload {
        /// Local file to read
        file: PathBuf,
        /// Destination directory relative to the root
        #[arg(default_value = "")]
        directory: String,
        /// Name to store under (defaults to the local file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Return the OCR layout of a document, analyzing it on first request
    Ocr {
        path: String,
        /// Display height the rectangles are scaled to
        #[arg(long)]
        height: u32,
        /// Display width the rectangles are scaled to
        #[arg(long)]
        width: u32,
    },

    /// Find documents whose OCR text contains the query
    Search { query: String },

    /// List every matching text box of one document
    SearchFile { query: String, file: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    let mut config = Config::load(Some(&cli.config))
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = cli.root {
        config.store.root = root;
    }

    let state = AppState::new(config).context("opening document store")?;

    match cli.command {
        Commands::List { path } => print_json(&file_commands::list_directory(&state, path).await?),
        Commands::Tree => print_json(&file_commands::get_structure(&state).await?),
        Commands::Get { path, output } => {
            let file = file_commands::get_file(&state, path).await?;
            tokio::fs::write(&output, &file.bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            print_json(&serde_json::json!({
                "fileName": file.file_name,
                "contentType": file.content_type,
                "bytes": file.bytes.len(),
                "output": output,
            }))
        }
        Commands::Mkdir { path } => print_json(&file_commands::create_folder(&state, path).await?),
        Commands::Copy { item, destination } => {
            print_json(&file_commands::copy_item(&state, item, destination).await?)
        }
        Commands::Move { item, destination } => {
            print_json(&file_commands::move_item(&state, item, destination).await?)
        }
        Commands::Rename { path, new_name } => {
            print_json(&file_commands::rename_item(&state, path, new_name).await?)
        }
        Commands::Delete { item } => print_json(&file_commands::delete_item(&state, item).await?),
        Commands::Upload {
            file,
            directory,
            name,
        } => {
            let file_name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("upload source has no file name")?,
            };
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            print_json(&file_commands::upload_file(&state, directory, file_name, content).await?)
        }
        Commands::Ocr {
            path,
            height,
            width,
        } => print_json(&file_commands::get_ocr(&state, path, height, width).await?),
        Commands::Search { query } => print_json(&search_commands::search(&state, query).await?),
        Commands::SearchFile { query, file } => {
            print_json(&search_commands::search_file(&state, query, file).await?)
        }
    }
}
