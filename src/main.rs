// src/main.rs
mod api;
mod auth;
mod config;
mod db;
mod error;
mod importer;
mod models;
mod quotes;
mod sp500;
mod thread;
mod votes;

use crate::api::AppState;
use crate::config::Config;
use crate::db::{MemoryRepository, Repository, ScyllaRepository};
use crate::importer::{ImportReport, Importer};
use crate::quotes::TwelveDataClient;
use crate::thread::{build_comment_tree, CommentNode};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{error, info, LevelFilter};
use reqwest::Client;
use std::fmt::Display;
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;

#[derive(Parser)]
#[command(name = "stock_forum", version, about = "Stock discussion forum API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (the default)
    Serve {
        /// Keep everything in process memory instead of ScyllaDB
        #[arg(long)]
        in_memory: bool,
    },
    /// Import every S&P 500 symbol that is not stored yet
    ImportSp500 {
        #[arg(long, default_value = "system")]
        owner: String,
    },
    /// Refresh prices for all stored symbols
    UpdatePrices,
    ListSymbols,
    ListComments,
    /// Delete every comment
    ResetComments,
    /// Issue a development token for a user id
    Token { user_id: String },
}

fn or_exit<T, E: Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("{}: {}", context, e);
            process::exit(1);
        }
    }
}

async fn connect(config: &Config) -> Arc<dyn Repository> {
    let node = or_exit(config.scylla_node(), "Missing database configuration");
    let repo = or_exit(
        ScyllaRepository::connect(node).await,
        "Failed to initialize database",
    );
    info!("Connected to database...");
    Arc::new(repo)
}

fn build_importer(config: &Config, repo: Arc<dyn Repository>) -> Arc<Importer> {
    let api_key = or_exit(config.api_key(), "Missing quote API configuration");
    let provider = TwelveDataClient::new(Client::new(), Arc::new(api_key.to_string()));
    Arc::new(Importer::new(Arc::new(provider), repo, config.import.clone()))
}

fn log_report(what: &str, report: &ImportReport) {
    info!(
        "{} complete: {} imported, {} updated, {} skipped, {} errors",
        what,
        report.imported_count,
        report.updated_count,
        report.skipped_count,
        report.error_count
    );
    for failure in &report.failures {
        error!("  {}: {}", failure.symbol, failure.reason);
    }
}

fn print_thread(node: &CommentNode, depth: usize) {
    let who = match (&node.comment.author, node.comment.is_anonymous) {
        (Some(author), false) => author.as_str(),
        _ => "anonymous",
    };
    println!(
        "{}[{}] {} ({}): {}",
        "  ".repeat(depth),
        node.comment.stock_id,
        node.comment.id,
        who,
        node.comment.content
    );
    for reply in &node.replies {
        print_thread(reply, depth + 1);
    }
}

async fn serve(config: Config, in_memory: bool) {
    let jwt_secret = Arc::new(or_exit(config.jwt_secret(), "Missing auth configuration").to_string());
    let repo: Arc<dyn Repository> = if in_memory {
        info!("Using in-memory storage; data is lost on exit");
        Arc::new(MemoryRepository::new())
    } else {
        connect(&config).await
    };
    let importer = build_importer(&config, repo.clone());

    let (tx, rx) = mpsc::channel(16);
    task::spawn(importer::worker(importer.clone(), rx));
    if let Some(every) = config.refresh_interval {
        info!("Refreshing prices every {} seconds", every.as_secs());
        task::spawn(importer::refresh_loop(importer.clone(), every));
    }

    let state = Arc::new(AppState {
        repo,
        importer,
        jobs: tx,
        jwt_secret,
    });

    info!("Server running on http://{}", config.addr);
    warp::serve(api::routes(state)).run(config.addr).await;
}

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = or_exit(Config::load(), "Invalid configuration");

    match cli.command.unwrap_or(Command::Serve { in_memory: false }) {
        Command::Serve { in_memory } => serve(config, in_memory).await,
        Command::ImportSp500 { owner } => {
            let repo = connect(&config).await;
            let importer = build_importer(&config, repo);
            let report = or_exit(
                importer.import_symbols(&sp500::sp500_symbols(), &owner).await,
                "S&P 500 import failed",
            );
            log_report("S&P 500 import", &report);
        }
        Command::UpdatePrices => {
            let repo = connect(&config).await;
            let importer = build_importer(&config, repo);
            let report = or_exit(importer.refresh_all().await, "Price update failed");
            log_report("Price update", &report);
        }
        Command::ListSymbols => {
            let repo = connect(&config).await;
            let symbols = or_exit(repo.list_symbols().await, "Failed to list symbols");
            for symbol in &symbols {
                println!("{}", symbol);
            }
            info!("{} symbols stored", symbols.len());
        }
        Command::ListComments => {
            let repo = connect(&config).await;
            let comments = or_exit(repo.list_comments().await, "Failed to list comments");
            let threads = build_comment_tree(comments);
            for thread in &threads {
                print_thread(thread, 0);
            }
            let total: usize = threads.iter().map(CommentNode::len).sum();
            info!("{} comments in {} threads", total, threads.len());
        }
        Command::ResetComments => {
            let repo = connect(&config).await;
            let removed = or_exit(repo.delete_all_comments().await, "Failed to delete comments");
            info!("Deleted {} comments", removed);
        }
        Command::Token { user_id } => {
            let secret = or_exit(config.jwt_secret(), "Missing auth configuration");
            let token = or_exit(auth::create_token(&user_id, secret), "Failed to create token");
            println!("{}", token);
        }
    }
}
