use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{Duration as RetentionWindow, Utc};
use clap::{Parser, Subcommand};
use resume_match_core::{
    sweep_expired, ApiKey, CharacterNgramEmbedder, ChatModel, Embedder, IngestCoordinator,
    IngestPipeline, IngestionOptions, InstructorEmbedder, JobStore, LlmReranker, QdrantStore,
    RetentionPolicy, SearchCoordinator, SearchError, SearchOptions, SearchQuery, SqliteStore,
    StructuredParser,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "resume-match", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database URL
    #[arg(long, env = "RESUME_DATABASE_URL", default_value = "sqlite://resume-match.db")]
    database_url: String,

    /// Qdrant base URL
    #[arg(long, env = "RESUME_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "RESUME_QDRANT_COLLECTION", default_value = "resumes")]
    qdrant_collection: String,

    /// Instructor embedding service; the local encoder is used when unset
    #[arg(long, env = "RESUME_EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding dimension
    #[arg(long, env = "RESUME_EMBEDDING_DIM", default_value_t = 768)]
    embedding_dim: usize,

    /// OpenAI-compatible chat API base URL
    #[arg(long, env = "RESUME_LLM_URL", default_value = "https://api.groq.com/openai/v1")]
    llm_url: String,

    /// Chat model name
    #[arg(long, env = "RESUME_LLM_MODEL", default_value = "llama-3.3-70b-versatile")]
    llm_model: String,

    /// Ordered, comma-separated model API keys
    #[arg(long, env = "RESUME_LLM_API_KEYS", value_delimiter = ',', hide_env_values = true)]
    llm_api_keys: Vec<String>,

    /// Timeout for index, model and embedding calls
    #[arg(long, env = "RESUME_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a zip archive of PDF/DOCX resumes and wait for the job to settle.
    Ingest {
        /// Zip archive containing resumes.
        #[arg(long)]
        archive: PathBuf,
    },
    /// Print the status of an ingestion job.
    Status {
        #[arg(long)]
        job_id: String,
    },
    /// Rank stored candidates against a job description.
    Search {
        /// Job description text.
        #[arg(long)]
        query: String,
        /// Number of candidates to return.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Delete profiles older than the retention window.
    Cleanup {
        #[arg(long, default_value_t = 24)]
        retention_hours: i64,
    },
}

/// Runtime choice between the HTTP encoder and the local fallback.
enum ConfiguredEmbedder {
    Local(CharacterNgramEmbedder),
    Instructor(InstructorEmbedder),
}

#[async_trait]
impl Embedder for ConfiguredEmbedder {
    fn dimensions(&self) -> usize {
        match self {
            ConfiguredEmbedder::Local(embedder) => embedder.dimensions(),
            ConfiguredEmbedder::Instructor(embedder) => embedder.dimensions(),
        }
    }

    async fn embed(&self, instruction: &str, text: &str) -> Result<Vec<f32>, SearchError> {
        match self {
            ConfiguredEmbedder::Local(embedder) => embedder.embed(instruction, text).await,
            ConfiguredEmbedder::Instructor(embedder) => embedder.embed(instruction, text).await,
        }
    }
}

impl Cli {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn embedder(&self) -> anyhow::Result<ConfiguredEmbedder> {
        Ok(match &self.embedding_url {
            Some(url) => ConfiguredEmbedder::Instructor(InstructorEmbedder::new(
                url,
                self.embedding_dim,
                self.timeout(),
            )?),
            None => ConfiguredEmbedder::Local(CharacterNgramEmbedder::new(self.embedding_dim)),
        })
    }

    fn index(&self) -> anyhow::Result<QdrantStore> {
        Ok(QdrantStore::new(
            &self.qdrant_url,
            &self.qdrant_collection,
            self.embedding_dim,
            self.timeout(),
        )?)
    }

    fn chat_model(&self) -> anyhow::Result<ChatModel> {
        Ok(ChatModel::new(&self.llm_url, &self.llm_model, self.timeout())?)
    }

    fn credentials(&self) -> anyhow::Result<Vec<ApiKey>> {
        let keys: Vec<ApiKey> = self
            .llm_api_keys
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .map(ApiKey::new)
            .collect();
        if keys.is_empty() {
            bail!("no model API keys configured (set RESUME_LLM_API_KEYS)");
        }
        Ok(keys)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "resume-match boot"
    );

    let store = SqliteStore::connect(&cli.database_url)
        .await
        .with_context(|| format!("opening {}", cli.database_url))?;

    match &cli.command {
        Command::Ingest { archive } => {
            let parser = StructuredParser::new(cli.chat_model()?, cli.credentials()?)?;
            let pipeline = IngestPipeline::new(
                store.clone(),
                cli.index()?,
                cli.embedder()?,
                parser,
                IngestionOptions::default(),
            );
            let coordinator = IngestCoordinator::new(pipeline);
            coordinator
                .prepare()
                .await
                .context("preparing vector collection")?;

            let ticket = coordinator.submit(archive).await?;
            let job_id = ticket.job_id.clone();
            loop {
                let report = coordinator.status(&job_id).await?;
                println!("{}", serde_json::to_string(&report)?);
                if report.done {
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            ticket.wait().await?;
        }
        Command::Status { job_id } => {
            let report = store.job(job_id).await?.report();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search { query, top_k } => {
            let credential = cli
                .credentials()?
                .into_iter()
                .next()
                .context("no model API keys configured")?;
            let coordinator = SearchCoordinator::new(
                cli.embedder()?,
                cli.index()?,
                LlmReranker::new(cli.chat_model()?, credential),
                store.clone(),
                SearchOptions::default(),
            );
            coordinator
                .prepare()
                .await
                .context("preparing vector collection")?;

            let matches = coordinator.search(&SearchQuery::new(query, *top_k)).await?;
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
        Command::Cleanup { retention_hours } => {
            if *retention_hours < 0 {
                bail!("retention window must not be negative");
            }
            let max_age = RetentionWindow::try_hours(*retention_hours)
                .context("retention window is out of range")?;
            let policy = RetentionPolicy { max_age };
            let report = sweep_expired(&store, &cli.index()?, &policy).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
