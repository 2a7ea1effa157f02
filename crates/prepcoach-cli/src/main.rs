mod config;
mod replay;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::PrepcoachConfig;
use prepcoach_feedback::{ClaudeCompletion, ConvaiClient, ConversationPoller, FeedbackResolver};
use prepcoach_gateway::{compute_signature, WebhookServer, WebhookState};
use prepcoach_store::{
    CredentialRecords, CredentialsChain, FileKeyValueStore, KeyValueStore, MemoryStore,
    PersistenceGateway, SupabaseStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prepcoach", about = "PrepCoach — negotiation practice feedback")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "prepcoach.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate feedback for a saved transcript
    Feedback {
        /// JSON file: `[{role, message}]` or a provider conversation record
        transcript: PathBuf,
        /// Conversation id to poll the provider for and log under
        #[arg(long)]
        conversation_id: Option<String>,
    },
    /// Manage voice-agent credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
    /// Look up a stored PREP score by feedback id
    Lookup { feedback_id: String },
    /// Query the voice-agent provider
    Conversations {
        #[command(subcommand)]
        action: ConversationsAction,
    },
    /// Print a signature header for a webhook body
    Sign {
        body: PathBuf,
        /// Unix seconds (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Show the credentials the chain resolves to
    Show,
    /// Save credentials to every writable tier
    Set {
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        agent_id: String,
    },
}

#[derive(Subcommand)]
enum ConversationsAction {
    /// List the agent's past conversations
    List,
    /// Print a signed URL for starting a conversation
    SignedUrl,
}

/// Datastore and local mirror shared by every command.
struct Stores {
    kv: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn PersistenceGateway>,
    records: Arc<dyn CredentialRecords>,
}

impl Stores {
    async fn open(config: &PrepcoachConfig) -> anyhow::Result<Self> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(config.kv_path()).await?);
        let (gateway, records): (Arc<dyn PersistenceGateway>, Arc<dyn CredentialRecords>) =
            match &config.datastore {
                Some(ds) => {
                    let store = Arc::new(SupabaseStore::new(ds.clone()));
                    (store.clone(), store)
                }
                None => {
                    warn!("No datastore configured, records are kept in memory only");
                    let store = Arc::new(MemoryStore::new());
                    (store.clone(), store)
                }
            };
        Ok(Self {
            kv,
            gateway,
            records,
        })
    }

    fn credentials(&self, config: &PrepcoachConfig) -> CredentialsChain {
        CredentialsChain::standard(
            self.kv.clone(),
            self.records.clone(),
            config.convai.fallback_credentials(),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = PrepcoachConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            let stores = Stores::open(&config).await?;
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            if config.webhook.secret.is_none() {
                warn!("WEBHOOK_SECRET is not set, every webhook will be refused");
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("PrepCoach webhook server listening on {addr}");

            let state = Arc::new(WebhookState {
                config: config.webhook,
                gateway: stores.gateway,
            });
            WebhookServer::serve(listener, state).await?;
        }
        Commands::Feedback {
            transcript,
            conversation_id,
        } => {
            let raw = tokio::fs::read_to_string(&transcript)
                .await
                .with_context(|| format!("Failed to read '{}'", transcript.display()))?;
            let turns = replay::parse_transcript(&raw)?;

            let stores = Stores::open(&config).await?;
            let api_key = match stores.credentials(&config).load().await {
                Ok(creds) => creds.api_key,
                Err(e) => {
                    warn!(error = %e, "No voice-agent credentials, provider transcript unavailable");
                    String::new()
                }
            };

            let source = Arc::new(ConvaiClient::new(&config.convai.api, api_key));
            let poller = Arc::new(ConversationPoller::new(source, stores.gateway.clone()));
            let completion = Arc::new(ClaudeCompletion::new(config.analysis));
            let resolver = FeedbackResolver::standard(
                poller,
                completion,
                config.polling.transcript,
                config.polling.retry,
            );

            let status =
                replay::replay(resolver, stores.gateway, conversation_id.as_deref(), &turns)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Credentials { action } => {
            let stores = Stores::open(&config).await?;
            let chain = stores.credentials(&config);
            match action {
                CredentialsAction::Show => {
                    let creds = chain.load().await?;
                    println!("agent_id: {}", creds.agent_id);
                    println!("api_key:  {}", mask(&creds.api_key));
                }
                CredentialsAction::Set { api_key, agent_id } => {
                    if chain.save(&api_key, &agent_id).await {
                        println!("Credentials saved.");
                    } else {
                        println!("Credentials could not be stored durably; see log for details.");
                    }
                }
            }
        }
        Commands::Lookup { feedback_id } => {
            let stores = Stores::open(&config).await?;
            match stores.gateway.lookup_prep_score(&feedback_id).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("No PREP score found for '{}'", feedback_id.trim()),
            }
        }
        Commands::Conversations { action } => {
            let stores = Stores::open(&config).await?;
            let creds = stores.credentials(&config).load().await?;
            let client = ConvaiClient::new(&config.convai.api, creds.api_key);
            match action {
                ConversationsAction::List => {
                    let conversations = client.list_conversations(&creds.agent_id).await?;
                    if conversations.is_empty() {
                        println!("No conversations found.");
                    }
                    for conversation in &conversations {
                        println!("{conversation}");
                    }
                }
                ConversationsAction::SignedUrl => {
                    println!("{}", client.signed_url(&creds.agent_id).await?);
                }
            }
        }
        Commands::Sign { body, timestamp } => {
            let secret = config
                .webhook
                .secret
                .context("no webhook secret configured (set WEBHOOK_SECRET)")?;
            let raw = tokio::fs::read_to_string(&body).await?;
            let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
            let sig = compute_signature(&secret, &timestamp.to_string(), &raw)?;
            println!("X-Signature: t={timestamp},{sig}");
        }
    }

    Ok(())
}

fn mask(secret: &str) -> String {
    let shown: String = secret.chars().take(4).collect();
    format!("{shown}…")
}
