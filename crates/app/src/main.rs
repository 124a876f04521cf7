use chrono::Utc;
use clap::{Parser, ValueEnum};
use doc_audit_core::{
    parse_discrepancies, reports_no_discrepancies, AuditOptions, AuditPipeline,
    CharacterNgramEmbedder, DiskIndexService, Embedder, LopdfExtractor, MemoryIndexService,
    OllamaClient, OllamaEmbedder, OllamaGenerator, QdrantStore, VectorIndexService,
    DEFAULT_AUDIT_QUERY, DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATION_MODEL, DEFAULT_OLLAMA_URL,
    DEFAULT_REFERENCE_MAX_CHARS, DEFAULT_TIMEOUT_SECS,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Ollama embedding model.
    Ollama,
    /// Offline hashed character trigrams.
    Ngram,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IndexBackend {
    Memory,
    Disk,
    Qdrant,
}

#[derive(Parser)]
#[command(name = "doc-audit", version)]
#[command(about = "Report factual discrepancies between a reference PDF and a suspect PDF")]
struct Cli {
    /// Reference (master) PDF
    #[arg(long)]
    reference: PathBuf,

    /// Suspect (audited) PDF
    #[arg(long)]
    suspect: PathBuf,

    /// Also write the report to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_URL)]
    ollama_url: String,

    /// Embedding model served by Ollama
    #[arg(long, env = "DOC_AUDIT_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Generation model served by Ollama
    #[arg(long, env = "DOC_AUDIT_GENERATION_MODEL", default_value = DEFAULT_GENERATION_MODEL)]
    generation_model: String,

    #[arg(long, value_enum, default_value_t = EmbedderKind::Ollama)]
    embedder: EmbedderKind,

    #[arg(long, value_enum, default_value_t = IndexBackend::Memory)]
    index_backend: IndexBackend,

    /// Root directory for disk-backed session indices
    #[arg(long, env = "DOC_AUDIT_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Maximum characters per suspect chunk
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters repeated between consecutive chunks
    #[arg(long, default_value = "100")]
    chunk_overlap: usize,

    /// Number of suspect chunks passed to the model
    #[arg(long, default_value = "6")]
    k: usize,

    /// Candidates fetched before diversity selection
    #[arg(long, default_value = "10")]
    fetch_k: usize,

    /// Relevance/diversity balance for retrieval
    #[arg(long, default_value = "0.5")]
    mmr_lambda: f32,

    /// Character budget for the reference excerpt
    #[arg(long, default_value_t = DEFAULT_REFERENCE_MAX_CHARS)]
    reference_max_chars: usize,

    /// Sampling seed for the generation model
    #[arg(long, env = "DOC_AUDIT_SEED")]
    seed: Option<u64>,

    /// Timeout for each Ollama and Qdrant request
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

impl Cli {
    fn options(&self) -> AuditOptions {
        AuditOptions {
            chunk_max_chars: self.chunk_size,
            chunk_overlap_chars: self.chunk_overlap,
            retrieval_k: self.k,
            retrieval_fetch_k: self.fetch_k,
            mmr_lambda: self.mmr_lambda,
            reference_max_chars: self.reference_max_chars,
            audit_query: DEFAULT_AUDIT_QUERY.to_string(),
        }
    }

    fn index_service(&self) -> anyhow::Result<Box<dyn VectorIndexService>> {
        Ok(match self.index_backend {
            IndexBackend::Memory => Box::new(MemoryIndexService::default()),
            IndexBackend::Disk => {
                let root = self
                    .index_dir
                    .clone()
                    .unwrap_or_else(|| std::env::temp_dir().join("doc-audit"));
                let service = DiskIndexService::new(root);
                info!(root = %service.root().display(), "disk session index");
                Box::new(service)
            }
            IndexBackend::Qdrant => {
                info!(endpoint = %self.qdrant_url, "qdrant session index");
                Box::new(QdrantStore::new(&self.qdrant_url, self.timeout_secs)?)
            }
        })
    }

    fn embedder(&self, client: &OllamaClient) -> Box<dyn Embedder> {
        match self.embedder {
            EmbedderKind::Ollama => {
                let embedder = OllamaEmbedder::new(client.clone(), self.embedding_model.clone());
                info!(model = embedder.model(), "ollama embeddings");
                Box::new(embedder)
            }
            EmbedderKind::Ngram => Box::new(CharacterNgramEmbedder::default()),
        }
    }

    fn generator(&self, client: OllamaClient) -> OllamaGenerator {
        let generator = OllamaGenerator::new(client, self.generation_model.clone());
        let generator = match self.seed {
            Some(seed) => generator.with_seed(seed),
            None => generator,
        };
        info!(model = generator.model(), seed = ?self.seed, "ollama generation");
        generator
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-audit boot"
    );

    let client = OllamaClient::new(&cli.ollama_url, cli.timeout_secs)?;
    let pipeline = AuditPipeline::new(
        LopdfExtractor,
        cli.embedder(&client),
        cli.generator(client),
        cli.index_service()?,
        cli.options(),
    )?;

    let options = pipeline.options();
    info!(
        chunk_max_chars = options.chunk_max_chars,
        chunk_overlap_chars = options.chunk_overlap_chars,
        k = options.retrieval_k,
        fetch_k = options.retrieval_fetch_k,
        mmr_lambda = options.mmr_lambda,
        reference_max_chars = options.reference_max_chars,
        "audit configured"
    );

    let report = tokio::select! {
        result = pipeline.audit(&cli.reference, &cli.suspect) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("interrupted, releasing index session");
            pipeline.finish_pending_releases().await;
            anyhow::bail!("audit interrupted");
        }
    };

    for warning in &report.warnings {
        warn!(%warning, "audit warning");
    }
    match parse_discrepancies(&report.text) {
        Ok(lines) => info!(
            session = %report.session_id,
            discrepancies = lines.len(),
            clean = reports_no_discrepancies(&report.text),
            retrieved_chunks = report.retrieved_chunks,
            "audit complete"
        ),
        Err(error) => warn!(error = %error, "could not summarise report"),
    }

    println!("{}", report.text);

    if let Some(path) = &cli.output {
        tokio::fs::write(path, &report.text).await?;
        info!(path = %path.display(), "report exported");
    }

    Ok(())
}
