use crate::chunking::{chunk_document, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::{AuditError, CapabilityError};
use crate::extractor::PdfExtractor;
use crate::generation::Generator;
use crate::models::{AuditOptions, AuditReport, AuditWarning, Chunk, Document, DocumentRole};
use crate::prompt::{build_audit_prompt, join_context};
use crate::reference::trim_reference;
use crate::retrieval::{retrieve, RetrievalConfig};
use crate::session::SessionId;
use crate::traits::VectorIndexService;
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pipeline stages, in the only order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStage {
    Idle,
    ExtractSuspect,
    Chunk,
    Index,
    ExtractReference,
    Trim,
    Retrieve,
    Generate,
    Done,
}

impl AuditStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ExtractSuspect => "extract_suspect",
            Self::Chunk => "chunk",
            Self::Index => "index",
            Self::ExtractReference => "extract_reference",
            Self::Trim => "trim",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
            Self::Done => "done",
        }
    }
}

struct SessionOutcome {
    text: String,
    retrieved_chunks: usize,
}

type PendingReleases = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Holds an open index session. `release` is the normal exit; if the audit
/// future is dropped first (caller deadline, Ctrl-C) the release is spawned
/// on the current runtime instead.
struct SessionGuard<I: VectorIndexService + 'static> {
    index: Arc<I>,
    session: Option<SessionId>,
    pending: PendingReleases,
}

impl<I: VectorIndexService + 'static> SessionGuard<I> {
    async fn release(mut self) {
        if let Some(session) = self.session.take() {
            release_logged(self.index.as_ref(), &session).await;
        }
    }

    fn disarm(mut self) {
        self.session = None;
    }
}

impl<I: VectorIndexService + 'static> Drop for SessionGuard<I> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    session = %session,
                    backend = self.index.backend(),
                    "audit dropped mid-session, releasing index in background"
                );
                let index = Arc::clone(&self.index);
                let task = handle.spawn(async move {
                    release_logged(index.as_ref(), &session).await;
                });
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                pending.retain(|earlier| !earlier.is_finished());
                pending.push(task);
            }
            Err(_) => warn!(
                session = %session,
                backend = self.index.backend(),
                "no async runtime left to release index session"
            ),
        }
    }
}

async fn release_logged<I: VectorIndexService + ?Sized>(index: &I, session: &SessionId) {
    if let Err(error) = index.release_session(session).await {
        warn!(
            session = %session,
            backend = index.backend(),
            error = %error,
            "index session cleanup failed"
        );
    }
}

/// Compares a reference PDF with a suspect PDF. All collaborators are owned by
/// the pipeline; the index service may be shared by concurrent audits because
/// every audit works in its own session.
pub struct AuditPipeline<X, E, G, I> {
    extractor: Arc<X>,
    embedder: E,
    generator: G,
    index: Arc<I>,
    options: AuditOptions,
    pending_releases: PendingReleases,
}

impl<X, E, G, I> AuditPipeline<X, E, G, I>
where
    X: PdfExtractor + 'static,
    E: Embedder,
    G: Generator,
    I: VectorIndexService + 'static,
{
    pub fn new(
        extractor: X,
        embedder: E,
        generator: G,
        index: I,
        options: AuditOptions,
    ) -> Result<Self, AuditError> {
        options.validate()?;
        Ok(Self {
            extractor: Arc::new(extractor),
            embedder,
            generator,
            index: Arc::new(index),
            options,
            pending_releases: PendingReleases::default(),
        })
    }

    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Waits for session releases handed to the runtime by audits that were
    /// dropped before they finished.
    pub async fn finish_pending_releases(&self) {
        let tasks = std::mem::take(
            &mut *self
                .pending_releases
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(error) = task.await {
                warn!(error = %error, "background session release did not finish");
            }
        }
    }

    /// Returns only the report text.
    pub async fn audit_documents(
        &self,
        reference_path: &Path,
        suspect_path: &Path,
    ) -> Result<String, AuditError> {
        Ok(self.audit(reference_path, suspect_path).await?.text)
    }

    pub async fn audit(
        &self,
        reference_path: &Path,
        suspect_path: &Path,
    ) -> Result<AuditReport, AuditError> {
        let mut warnings = Vec::new();
        enter(AuditStage::Idle, None);

        enter(AuditStage::ExtractSuspect, None);
        let suspect = self
            .extract(DocumentRole::Suspect, suspect_path, &mut warnings)
            .await?;

        enter(AuditStage::Chunk, None);
        let chunks = chunk_document(&suspect, ChunkingConfig::from(&self.options))?;
        info!(
            stage = AuditStage::Chunk.as_str(),
            pages = suspect.pages.len(),
            chunks = chunks.len(),
            "suspect chunked"
        );

        let session = SessionId::generate();
        enter(AuditStage::Index, Some(&session));
        // Armed before opening so a drop during `open_session` is covered too.
        let guard = SessionGuard {
            index: Arc::clone(&self.index),
            session: Some(session.clone()),
            pending: Arc::clone(&self.pending_releases),
        };
        if let Err(error) = self.index.open_session(&session).await {
            guard.disarm();
            return Err(AuditError::IndexBuild(error));
        }

        let outcome = self
            .run_session(&session, &chunks, reference_path, &mut warnings)
            .await;
        guard.release().await;

        let outcome = outcome?;
        enter(AuditStage::Done, Some(&session));

        Ok(AuditReport {
            text: outcome.text,
            session_id: session.to_string(),
            suspect_chunks: chunks.len(),
            retrieved_chunks: outcome.retrieved_chunks,
            warnings,
            completed_at: Utc::now(),
        })
    }

    /// Everything that runs while the session index exists.
    async fn run_session(
        &self,
        session: &SessionId,
        chunks: &[Chunk],
        reference_path: &Path,
        warnings: &mut Vec<AuditWarning>,
    ) -> Result<SessionOutcome, AuditError> {
        self.build_index(session, chunks).await?;

        enter(AuditStage::ExtractReference, Some(session));
        let reference = self
            .extract(DocumentRole::Reference, reference_path, warnings)
            .await?;

        enter(AuditStage::Trim, Some(session));
        let excerpt = trim_reference(&reference, self.options.reference_max_chars);

        enter(AuditStage::Retrieve, Some(session));
        let retrieved = if chunks.is_empty() {
            Vec::new()
        } else {
            retrieve(
                self.index.as_ref(),
                session,
                &self.embedder,
                &self.options.audit_query,
                RetrievalConfig::from(&self.options),
            )
            .await
            .map_err(AuditError::Retrieval)?
        };
        info!(
            stage = AuditStage::Retrieve.as_str(),
            session = %session,
            retrieved = retrieved.len(),
            excerpt_chars = excerpt.chars().count(),
            "context assembled"
        );

        enter(AuditStage::Generate, Some(session));
        let prompt = build_audit_prompt(&excerpt, &join_context(&retrieved));
        debug!(session = %session, prompt_chars = prompt.chars().count(), "invoking generator");
        let text = self
            .generator
            .generate(&prompt)
            .await
            .map_err(AuditError::Generation)?;
        if text.trim().is_empty() {
            return Err(AuditError::Generation(CapabilityError::EmptyResponse(
                "generator returned no report text".to_string(),
            )));
        }

        Ok(SessionOutcome {
            text,
            retrieved_chunks: retrieved.len(),
        })
    }

    async fn build_index(&self, session: &SessionId, chunks: &[Chunk]) -> Result<(), AuditError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(AuditError::IndexBuild)?;

        self.index
            .index_chunks(session, chunks, &embeddings)
            .await
            .map_err(AuditError::IndexBuild)?;

        info!(
            stage = AuditStage::Index.as_str(),
            session = %session,
            backend = self.index.backend(),
            indexed = chunks.len(),
            "session index built"
        );
        Ok(())
    }

    /// PDF parsing is blocking work, so it runs on the blocking pool.
    async fn extract(
        &self,
        role: DocumentRole,
        path: &Path,
        warnings: &mut Vec<AuditWarning>,
    ) -> Result<Document, AuditError> {
        let extraction_error = |details: String| AuditError::Extraction {
            role,
            path: path.display().to_string(),
            details,
        };

        let extractor = Arc::clone(&self.extractor);
        let owned_path = path.to_path_buf();
        let document = tokio::task::spawn_blocking(move || extractor.extract_document(&owned_path))
            .await
            .map_err(|error| extraction_error(format!("extraction task failed: {error}")))?
            .map_err(|error| extraction_error(error.to_string()))?;

        if document.is_blank() {
            let warning = AuditWarning::EmptyDocument {
                role,
                path: path.display().to_string(),
            };
            warn!(%warning, "continuing without comparable text");
            warnings.push(warning);
        }

        Ok(document)
    }
}

fn enter(stage: AuditStage, session: Option<&SessionId>) {
    match session {
        Some(session) => debug!(stage = stage.as_str(), session = %session, "audit stage"),
        None => debug!(stage = stage.as_str(), "audit stage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{CapabilityError, ExtractError};
    use crate::models::ScoredChunk;
    use crate::prompt::NO_DISCREPANCIES;
    use crate::report::parse_discrepancies;
    use crate::stores::MemoryIndexService;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use crate::stores::DiskIndexService;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeExtractor {
        documents: HashMap<String, Vec<String>>,
    }

    impl FakeExtractor {
        fn with(mut self, path: &str, pages: &[&str]) -> Self {
            self.documents.insert(
                path.to_string(),
                pages.iter().map(|page| page.to_string()).collect(),
            );
            self
        }
    }

    impl PdfExtractor for FakeExtractor {
        fn extract_document(&self, path: &Path) -> Result<Document, ExtractError> {
            let key = path.to_string_lossy().to_string();
            self.documents
                .get(&key)
                .map(|pages| Document::from_texts(key.clone(), pages.clone()))
                .ok_or_else(|| ExtractError::PdfParse(format!("corrupt pdf {key}")))
        }
    }

    /// Answers like a well-behaved model: compares `Label: value` pairs found
    /// in the reference and suspect sections of the prompt.
    #[derive(Default)]
    struct ComparingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    fn labelled_values(section: &str) -> Vec<(String, String)> {
        section
            .split([',', '\n'])
            .filter_map(|part| part.split_once(':'))
            .map(|(label, value)| (label.trim().to_string(), value.trim().to_string()))
            .filter(|(label, value)| !label.is_empty() && !value.is_empty())
            .collect()
    }

    #[async_trait]
    impl Generator for ComparingGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
            self.prompts
                .lock()
                .map_err(|_| CapabilityError::Request("poisoned".to_string()))?
                .push(prompt.to_string());

            let section = |start: &str, end: &str| {
                prompt
                    .split_once(start)
                    .and_then(|(_, rest)| rest.split_once(end))
                    .map(|(body, _)| body.to_string())
                    .unwrap_or_default()
            };
            let reference = labelled_values(&section("Reference Truth:", "Context (Suspect Data):"));
            let suspect: HashMap<String, String> =
                labelled_values(&section("Context (Suspect Data):", "INSTRUCTIONS:"))
                    .into_iter()
                    .collect();

            let lines: Vec<String> = reference
                .into_iter()
                .filter_map(|(label, expected)| {
                    suspect
                        .get(&label)
                        .filter(|found| **found != expected)
                        .map(|found| format!("- [{label}]: {expected} vs {found}"))
                })
                .collect();

            if lines.is_empty() {
                Ok(NO_DISCREPANCIES.to_string())
            } else {
                Ok(lines.join("\n"))
            }
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, CapabilityError> {
            Err(CapabilityError::Request("model offline".to_string()))
        }
    }

    struct BlankGenerator;

    #[async_trait]
    impl Generator for BlankGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, CapabilityError> {
            Ok("  \n".to_string())
        }
    }

    /// Stands in for a model that takes far longer than the caller is willing
    /// to wait.
    struct StalledGenerator;

    #[async_trait]
    impl Generator for StalledGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(NO_DISCREPANCIES.to_string())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
            Err(CapabilityError::Request("embedding model offline".to_string()))
        }
    }

    /// Memory index that remembers every session it was asked to open.
    #[derive(Default)]
    struct RecordingIndex {
        inner: MemoryIndexService,
        opened: Mutex<Vec<SessionId>>,
    }

    #[async_trait]
    impl VectorIndexService for RecordingIndex {
        fn backend(&self) -> &'static str {
            "recording"
        }

        async fn open_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
            self.opened
                .lock()
                .map_err(|_| CapabilityError::Request("poisoned".to_string()))?
                .push(session.clone());
            self.inner.open_session(session).await
        }

        async fn index_chunks(
            &self,
            session: &SessionId,
            chunks: &[Chunk],
            embeddings: &[Vec<f32>],
        ) -> Result<(), CapabilityError> {
            self.inner.index_chunks(session, chunks, embeddings).await
        }

        async fn nearest(
            &self,
            session: &SessionId,
            query_vector: &[f32],
            limit: usize,
        ) -> Result<Vec<ScoredChunk>, CapabilityError> {
            self.inner.nearest(session, query_vector, limit).await
        }

        async fn release_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
            self.inner.release_session(session).await
        }
    }

    fn pipeline<G: Generator>(
        extractor: FakeExtractor,
        generator: G,
    ) -> Result<AuditPipeline<FakeExtractor, CharacterNgramEmbedder, G, RecordingIndex>, AuditError>
    {
        AuditPipeline::new(
            extractor,
            CharacterNgramEmbedder::default(),
            generator,
            RecordingIndex::default(),
            AuditOptions::default(),
        )
    }

    #[tokio::test]
    async fn changed_rate_is_reported_and_unchanged_start_is_not() -> Result<(), AuditError> {
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &["Rate: $50/hr, Start: Jan 1"])
            .with("suspect.pdf", &["Rate: $55/hr, Start: Jan 1"]);
        let pipeline = pipeline(extractor, ComparingGenerator::default())?;

        let report = pipeline
            .audit(Path::new("ref.pdf"), Path::new("suspect.pdf"))
            .await?;

        let lines = parse_discrepancies(&report.text)
            .map_err(|error| AuditError::InvalidConfig(error.to_string()))?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].category, "Rate");
        assert_eq!(lines[0].reference_value, "$50/hr");
        assert_eq!(lines[0].suspect_value, "$55/hr");
        assert!(!report.text.contains("Start"));
        assert_eq!(report.suspect_chunks, 1);
        assert_eq!(report.retrieved_chunks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn identical_documents_yield_the_sentinel() -> Result<(), AuditError> {
        let text = "Rate: $50/hr, Start: Jan 1, Staff: 4";
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &[text])
            .with("suspect.pdf", &[text]);
        let pipeline = pipeline(extractor, ComparingGenerator::default())?;

        let report = pipeline
            .audit_documents(Path::new("ref.pdf"), Path::new("suspect.pdf"))
            .await?;
        assert_eq!(report, NO_DISCREPANCIES);
        Ok(())
    }

    #[tokio::test]
    async fn empty_suspect_completes_with_empty_context() -> Result<(), AuditError> {
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &["Rate: $50/hr"])
            .with("suspect.pdf", &["", "  "]);
        let generator = ComparingGenerator::default();
        let pipeline = pipeline(extractor, generator)?;

        let report = pipeline
            .audit(Path::new("ref.pdf"), Path::new("suspect.pdf"))
            .await?;

        assert_eq!(report.suspect_chunks, 0);
        assert_eq!(report.retrieved_chunks, 0);
        assert_eq!(report.text, NO_DISCREPANCIES);
        assert_eq!(
            report.warnings,
            vec![AuditWarning::EmptyDocument {
                role: DocumentRole::Suspect,
                path: "suspect.pdf".to_string(),
            }]
        );

        let prompts = pipeline
            .generator
            .prompts
            .lock()
            .map_err(|_| AuditError::InvalidConfig("poisoned".to_string()))?;
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Context (Suspect Data): \n"));
        Ok(())
    }

    #[tokio::test]
    async fn generator_is_invoked_once_with_trimmed_reference() -> Result<(), AuditError> {
        let long_reference = "Fee: $1,000. ".repeat(1_000);
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &[long_reference.as_str()])
            .with("suspect.pdf", &["Fee: $1,000."]);
        let pipeline = pipeline(extractor, ComparingGenerator::default())?;

        pipeline
            .audit(Path::new("ref.pdf"), Path::new("suspect.pdf"))
            .await?;

        let prompts = pipeline
            .generator
            .prompts
            .lock()
            .map_err(|_| AuditError::InvalidConfig("poisoned".to_string()))?;
        assert_eq!(prompts.len(), 1);
        let expected: String = long_reference.chars().take(8_000).collect();
        assert!(prompts[0].contains(&format!("Reference Truth: {expected}\n")));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_suspect_aborts_before_indexing() -> Result<(), AuditError> {
        let extractor = FakeExtractor::default().with("ref.pdf", &["Rate: $50/hr"]);
        let pipeline = pipeline(extractor, ComparingGenerator::default())?;

        let result = pipeline
            .audit(Path::new("ref.pdf"), Path::new("missing.pdf"))
            .await;

        assert!(matches!(
            result,
            Err(AuditError::Extraction {
                role: DocumentRole::Suspect,
                ..
            })
        ));
        assert_eq!(pipeline.index().inner.open_sessions().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_reference_releases_the_session() -> Result<(), AuditError> {
        let extractor = FakeExtractor::default().with("suspect.pdf", &["Rate: $55/hr"]);
        let pipeline = pipeline(extractor, ComparingGenerator::default())?;

        let result = pipeline
            .audit(Path::new("missing.pdf"), Path::new("suspect.pdf"))
            .await;

        assert!(matches!(
            result,
            Err(AuditError::Extraction {
                role: DocumentRole::Reference,
                ..
            })
        ));
        assert_eq!(pipeline.index().inner.open_sessions().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn generation_failure_releases_the_session() -> Result<(), AuditError> {
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &["Rate: $50/hr"])
            .with("suspect.pdf", &["Rate: $55/hr"]);
        let pipeline = pipeline(extractor, FailingGenerator)?;

        let result = pipeline
            .audit(Path::new("ref.pdf"), Path::new("suspect.pdf"))
            .await;

        assert!(matches!(result, Err(AuditError::Generation(_))));
        assert_eq!(pipeline.index().inner.open_sessions().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn blank_generation_is_an_error_and_releases_the_session() -> Result<(), AuditError> {
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &["Rate: $50/hr"])
            .with("suspect.pdf", &["Rate: $55/hr"]);
        let pipeline = pipeline(extractor, BlankGenerator)?;

        let result = pipeline
            .audit_documents(Path::new("ref.pdf"), Path::new("suspect.pdf"))
            .await;

        assert!(matches!(
            result,
            Err(AuditError::Generation(CapabilityError::EmptyResponse(_)))
        ));
        assert_eq!(pipeline.index().inner.open_sessions().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn deadline_drop_still_removes_the_disk_session() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &["Rate: $50/hr"])
            .with("suspect.pdf", &["Rate: $55/hr"]);
        let pipeline = AuditPipeline::new(
            extractor,
            CharacterNgramEmbedder::default(),
            StalledGenerator,
            DiskIndexService::new(root.path()),
            AuditOptions::default(),
        )?;

        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            pipeline.audit(Path::new("ref.pdf"), Path::new("suspect.pdf")),
        )
        .await;
        assert!(outcome.is_err());

        pipeline.finish_pending_releases().await;

        let leftover: Vec<String> = std::fs::read_dir(root.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("audit_session_"))
            .collect();
        assert!(leftover.is_empty(), "session directories left behind: {leftover:?}");
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_is_an_index_build_error() -> Result<(), AuditError> {
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &["Rate: $50/hr"])
            .with("suspect.pdf", &["Rate: $55/hr"]);
        let pipeline = AuditPipeline::new(
            extractor,
            FailingEmbedder,
            ComparingGenerator::default(),
            MemoryIndexService::default(),
            AuditOptions::default(),
        )?;

        let result = pipeline
            .audit(Path::new("ref.pdf"), Path::new("suspect.pdf"))
            .await;

        assert!(matches!(result, Err(AuditError::IndexBuild(_))));
        assert_eq!(pipeline.index().open_sessions().await, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_audits_use_distinct_sessions() -> Result<(), Box<dyn std::error::Error>> {
        let extractor = FakeExtractor::default()
            .with("ref.pdf", &["Rate: $50/hr, Start: Jan 1"])
            .with("suspect.pdf", &["Rate: $55/hr, Start: Jan 1"]);
        let pipeline = Arc::new(pipeline(extractor, ComparingGenerator::default())?);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let pipeline = Arc::clone(&pipeline);
            tasks.spawn(async move {
                pipeline
                    .audit(Path::new("ref.pdf"), Path::new("suspect.pdf"))
                    .await
            });
        }

        let mut reported = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            reported.insert(joined??.session_id);
        }

        let opened = pipeline
            .index()
            .opened
            .lock()
            .map_err(|_| "poisoned")?
            .iter()
            .map(|session| session.to_string())
            .collect::<HashSet<_>>();
        assert_eq!(reported.len(), 16);
        assert_eq!(opened, reported);
        assert_eq!(pipeline.index().inner.open_sessions().await, 0);
        Ok(())
    }

    #[test]
    fn invalid_options_are_rejected_at_construction() {
        let options = AuditOptions {
            chunk_overlap_chars: 2_000,
            ..AuditOptions::default()
        };
        let result = AuditPipeline::new(
            FakeExtractor::default(),
            CharacterNgramEmbedder::default(),
            FailingGenerator,
            MemoryIndexService::default(),
            options,
        );
        assert!(matches!(result, Err(AuditError::InvalidConfig(_))));
    }
}
