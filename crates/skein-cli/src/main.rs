//! # skein
//!
//! Command line client for a running skein node. Every command is a thin
//! wrapper over the node's HTTP API and prints the JSON it gets back.

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use skein_shared::constants::{HTTP_API_VERSION, PIN_AUDIENCE};
use skein_shared::identity::Identity;
use skein_shared::token::{self, Claims};

#[derive(Parser)]
#[command(version, about = "Talk to a skein node")]
struct Opts {
    /// Base URL of the node's HTTP API
    #[arg(long, env = "SKEIN_API", default_value = "http://127.0.0.1:40600")]
    api: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage threads
    #[command(subcommand)]
    Threads(ThreadsCommand),
    /// Post a text message to a thread
    Message { thread: String, body: String },
    /// Comment on a block
    Comment { block: String, body: String },
    /// Like a block
    Like { block: String },
    /// Hide a block from listings
    Ignore { block: String },
    /// Invite someone into a thread, or accept an invite
    #[command(subcommand)]
    Invites(InvitesCommand),
    /// Issue a pin token signed with the node's key
    Token {
        /// Node repo holding identity.key
        #[arg(long, env = "REPO_PATH", default_value = "./skein-repo")]
        repo: PathBuf,
        /// Who the token is for
        #[arg(long, default_value = "cli")]
        subject: String,
        /// Validity in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[derive(Subcommand)]
enum ThreadsCommand {
    /// Create a thread
    Add {
        name: String,
        /// Application key to find the thread again
        #[arg(long)]
        key: Option<String>,
        /// Let any member invite others (default private)
        #[arg(short, long)]
        open: bool,
        /// Content hash of a schema
        #[arg(long)]
        schema: Option<String>,
    },
    /// List threads
    Ls,
    /// Show one thread
    Get { id: String },
    /// Show the node's default thread
    Default,
    /// List the peers a thread delivers to
    Peers { id: String },
    /// List a thread's blocks, newest first
    Blocks {
        id: String,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Leave and forget a thread
    Rm { id: String },
    /// Follow new blocks in a thread
    Updates {
        id: String,
        /// Start after this index sequence number
        #[arg(long, default_value_t = 0)]
        since: i64,
        /// Ask for server-sent events instead of newline-delimited JSON
        #[arg(long)]
        events: bool,
    },
}

#[derive(Subcommand)]
enum InvitesCommand {
    /// Invite a peer directly, or create an invite code when no peer is given
    Create {
        thread: String,
        #[arg(long)]
        peer: Option<String>,
    },
    /// List invites waiting for an answer
    Ls,
    /// Accept a direct invite by its block id
    Accept { id: String },
    /// Join a thread with an invite code
    Join { code: String },
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(api: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("{}/api/{}", api.trim_end_matches('/'), HTTP_API_VERSION),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<Value> {
        let response = request.send().await.context("Node unreachable")?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(text);
            bail!("{status}: {message}");
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.http.get(self.url(path))).await
    }

    async fn post(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        self.send(self.http.post(self.url(path)).json(&body)).await
    }

    async fn delete(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.http.delete(self.url(path))).await
    }

    /// Print each update as it arrives until the node hangs up. Event
    /// streams are reduced to their `data:` payloads.
    async fn follow(&self, path: &str, events: bool) -> anyhow::Result<()> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .context("Node unreachable")?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                let json = if events {
                    match line.strip_prefix("data:") {
                        Some(data) => data.trim(),
                        None => continue,
                    }
                } else {
                    line
                };
                if json.is_empty() {
                    continue;
                }
                let update: Value = serde_json::from_str(json)?;
                println!("{update}");
            }
        }
        Ok(())
    }
}

fn thread_type(open: bool) -> &'static str {
    if open {
        "open"
    } else {
        "private"
    }
}

fn print(value: &Value) -> anyhow::Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn issue_token(repo: &std::path::Path, subject: String, hours: i64) -> anyhow::Result<String> {
    let path = repo.join("identity.key");
    if !path.exists() {
        bail!("No identity at {}", path.display());
    }
    let identity = Identity::load_or_generate(&path)?;
    let claims = Claims {
        subject,
        audience: PIN_AUDIENCE.to_string(),
        expires_at: Utc::now() + Duration::hours(hours),
    };
    Ok(token::issue(&identity, &claims)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    let client = Client::new(&opts.api);

    match opts.command {
        Command::Threads(cmd) => match cmd {
            ThreadsCommand::Add {
                name,
                key,
                open,
                schema,
            } => {
                let body = json!({
                    "name": name,
                    "key": key,
                    "type": thread_type(open),
                    "schema": schema,
                });
                print(&client.post("threads", body).await?)
            }
            ThreadsCommand::Ls => print(&client.get("threads").await?),
            ThreadsCommand::Get { id } => print(&client.get(&format!("threads/{id}")).await?),
            ThreadsCommand::Default => print(&client.get("threads/default").await?),
            ThreadsCommand::Peers { id } => print(&client.get(&format!("threads/{id}/peers")).await?),
            ThreadsCommand::Blocks { id, offset, limit } => print(
                &client
                    .get(&format!("threads/{id}/blocks?offset={offset}&limit={limit}"))
                    .await?,
            ),
            ThreadsCommand::Rm { id } => print(&client.delete(&format!("threads/{id}")).await?),
            ThreadsCommand::Updates { id, since, events } => {
                client
                    .follow(&format!("threads/{id}/updates?since={since}&events={events}"), events)
                    .await
            }
        },
        Command::Message { thread, body } => print(
            &client
                .post(&format!("threads/{thread}/messages"), json!({ "body": body }))
                .await?,
        ),
        Command::Comment { block, body } => print(
            &client
                .post(&format!("blocks/{block}/comments"), json!({ "body": body }))
                .await?,
        ),
        Command::Like { block } => {
            print(&client.post(&format!("blocks/{block}/likes"), Value::Null).await?)
        }
        Command::Ignore { block } => {
            print(&client.post(&format!("blocks/{block}/ignore"), Value::Null).await?)
        }
        Command::Invites(cmd) => match cmd {
            InvitesCommand::Create { thread, peer } => print(
                &client
                    .post(&format!("threads/{thread}/invites"), json!({ "peer": peer }))
                    .await?,
            ),
            InvitesCommand::Ls => print(&client.get("invites").await?),
            InvitesCommand::Accept { id } => {
                print(&client.post(&format!("invites/{id}/accept"), Value::Null).await?)
            }
            InvitesCommand::Join { code } => {
                print(&client.post("invites", json!({ "code": code })).await?)
            }
        },
        Command::Token {
            repo,
            subject,
            hours,
        } => {
            println!("{}", issue_token(&repo, subject, hours)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_parse_threads_add() {
        let opts = Opts::try_parse_from([
            "skein",
            "--api",
            "http://node:1",
            "threads",
            "add",
            "photos",
        ])
        .unwrap();
        assert_eq!(opts.api, "http://node:1");
        match opts.command {
            Command::Threads(ThreadsCommand::Add { name, open, .. }) => {
                assert_eq!(name, "photos");
                assert_eq!(thread_type(open), "private");
            }
            _ => panic!("wrong command"),
        }

        let opts = Opts::try_parse_from(["skein", "threads", "add", "party", "-o"]).unwrap();
        match opts.command {
            Command::Threads(ThreadsCommand::Add { open, .. }) => {
                assert_eq!(thread_type(open), "open")
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_parse_listing_commands() {
        let opts = Opts::try_parse_from(["skein", "threads", "default"]).unwrap();
        assert!(matches!(opts.command, Command::Threads(ThreadsCommand::Default)));

        let opts =
            Opts::try_parse_from(["skein", "threads", "blocks", "t1", "--limit", "5"]).unwrap();
        match opts.command {
            Command::Threads(ThreadsCommand::Blocks { id, offset, limit }) => {
                assert_eq!((id.as_str(), offset, limit), ("t1", 0, 5));
            }
            _ => panic!("wrong command"),
        }

        let opts = Opts::try_parse_from(["skein", "ignore", "abc"]).unwrap();
        assert!(matches!(opts.command, Command::Ignore { block } if block == "abc"));
    }

    #[test]
    fn test_client_urls() {
        let client = Client::new("http://127.0.0.1:40600/");
        assert_eq!(
            client.url("threads/abc/updates?since=3"),
            "http://127.0.0.1:40600/api/v0/threads/abc/updates?since=3"
        );
    }
}
