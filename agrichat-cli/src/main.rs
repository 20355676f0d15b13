//! agrichat-cli — command-line frontend for the AgriChat HTTP API
//!
//! # Subcommands
//! - `status`                                  — show server health
//! - `analyze <query>`                         — run the supervisor classifier
//! - `new <user_id> [--category <c>]`          — create a chat session
//! - `send <session_id> <user_id> <message>`   — send a message, print the reply
//! - `history <session_id> [-n <limit>]`       — print chat history
//! - `sessions <user_id>`                      — list a user's sessions
//! - `stats <user_id>`                         — per-user statistics

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const DEFAULT_LIMIT: usize = 20;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "agrichat-cli",
    version,
    about = "AgriChat agriculture-assistance chat — command-line frontend"
)]
struct Cli {
    /// AgriChat HTTP server URL (overrides AGRICHAT_HTTP_URL env var)
    #[arg(long, env = "AGRICHAT_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show AgriChat server status
    Status,

    /// Classify a query with the supervisor agent
    Analyze {
        /// Query text to classify
        query: String,
    },

    /// Create a new chat session
    New {
        /// Owning user id
        user_id: String,

        /// Session category: general, plant_doctor or knowledge
        #[arg(long, default_value = "general")]
        category: String,
    },

    /// Send a message and print the routed reply
    Send {
        /// Session id (UUID)
        session_id: String,

        /// Owning user id
        user_id: String,

        /// Message text
        message: String,
    },

    /// Print chat history for a session
    History {
        /// Session id (UUID)
        session_id: String,

        /// Maximum number of messages to print
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },

    /// List a user's active and archived sessions
    Sessions {
        /// User id
        user_id: String,
    },

    /// Show per-user statistics
    Stats {
        /// User id
        user_id: String,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageView {
    role: String,
    content: String,
    seq: i64,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    messages: Vec<MessageView>,
}

#[derive(Debug, Deserialize)]
struct SessionView {
    id: String,
    category: String,
    status: String,
    message_count: i64,
}

#[derive(Debug, Deserialize)]
struct UserSessionsResponse {
    active_sessions: Vec<SessionView>,
    archived_sessions: Vec<SessionView>,
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn make_client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}

/// Send a request and bail out with the server's error body on non-2xx.
fn expect_success(
    resp: Result<reqwest::blocking::Response, reqwest::Error>,
    url: &str,
) -> reqwest::blocking::Response {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            eprintln!("agrichat-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("agrichat-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }
    resp
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    let url = format!("{}/health", server);
    let resp = expect_success(client.get(&url).send(), &url);
    let body: serde_json::Value = resp.json().unwrap_or_default();
    println!("AgriChat server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("PostgreSQL:      {}", body["postgresql"].as_str().unwrap_or("?"));
    println!("Cache:           {}", body["cache"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_analyze(server: &str, query: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    let url = format!("{}/analyze", server);
    let resp = expect_success(
        client.post(&url).json(&serde_json::json!({ "query": query })).send(),
        &url,
    );
    let body: serde_json::Value = resp.json()?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn do_new(server: &str, user_id: &str, category: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    let url = format!("{}/chat/sessions", server);
    let resp = expect_success(
        client
            .post(&url)
            .json(&serde_json::json!({ "user_id": user_id, "category": category }))
            .send(),
        &url,
    );
    let body: serde_json::Value = resp.json()?;
    println!(
        "Created {} session {}",
        body["category"].as_str().unwrap_or("?"),
        body["session_id"].as_str().unwrap_or("?")
    );
    Ok(())
}

fn do_send(server: &str, session_id: &str, user_id: &str, message: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    let url = format!("{}/chat/message", server);
    let resp = expect_success(
        client
            .post(&url)
            .json(&serde_json::json!({
                "session_id": session_id,
                "user_id": user_id,
                "message": message,
            }))
            .send(),
        &url,
    );
    let body: serde_json::Value = resp.json()?;
    println!("{}", body["bot_response"]["content"].as_str().unwrap_or(""));
    Ok(())
}

fn do_history(server: &str, session_id: &str, limit: usize) -> anyhow::Result<()> {
    let client = make_client()?;
    let url = format!("{}/chat/sessions/{}/history?limit={}", server, session_id, limit);
    let resp = expect_success(client.get(&url).send(), &url);
    let history: HistoryResponse = resp.json()?;
    if history.messages.is_empty() {
        eprintln!("No messages in session {}", session_id);
        return Ok(());
    }
    for m in &history.messages {
        println!("[{:>3}] {:<9} {}", m.seq, m.role, m.content);
    }
    Ok(())
}

fn print_sessions(label: &str, sessions: &[SessionView]) {
    println!("{} ({}):", label, sessions.len());
    for s in sessions {
        println!(
            "  {}  {:<12} {:<8} {} messages",
            s.id, s.category, s.status, s.message_count
        );
    }
}

fn do_sessions(server: &str, user_id: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    let url = format!("{}/chat/users/{}/sessions", server, user_id);
    let resp = expect_success(client.get(&url).send(), &url);
    let body: UserSessionsResponse = resp.json()?;
    print_sessions("Active", &body.active_sessions);
    print_sessions("Archived", &body.archived_sessions);
    Ok(())
}

fn do_stats(server: &str, user_id: &str) -> anyhow::Result<()> {
    let client = make_client()?;
    let url = format!("{}/chat/users/{}/statistics", server, user_id);
    let resp = expect_success(client.get(&url).send(), &url);
    let body: serde_json::Value = resp.json()?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Analyze { query } => do_analyze(&server, &query),
        Commands::New { user_id, category } => do_new(&server, &user_id, &category),
        Commands::Send {
            session_id,
            user_id,
            message,
        } => do_send(&server, &session_id, &user_id, &message),
        Commands::History { session_id, limit } => do_history(&server, &session_id, limit),
        Commands::Sessions { user_id } => do_sessions(&server, &user_id),
        Commands::Stats { user_id } => do_stats(&server, &user_id),
    };

    if let Err(e) = result {
        eprintln!("agrichat-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
