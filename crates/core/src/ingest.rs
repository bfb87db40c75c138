use crate::dedup::content_document_id;
use crate::embeddings::{Embedder, RESUME_INSTRUCTION};
use crate::extractor::{DocumentExtractor, ResumeExtractor};
use crate::llm::TextModel;
use crate::models::{IngestionOptions, JobStatus, JobStatusReport, Profile, VectorRecord};
use crate::parser::StructuredParser;
use crate::traits::{Distance, JobStore, ProfileStore, VectorIndex};
use crate::{IngestError, SearchError, StoreError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const ARCHIVE_FILE_NAME: &str = "upload.zip";
const MEMBERS_DIR_NAME: &str = "members";

/// Supported members of an unpacked archive, sorted by path. Resource-fork
/// entries written by macOS archivers are ignored.
pub fn discover_resume_files(folder: &Path, options: &IngestionOptions) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != "__MACOSX")
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_fork = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("._"));
        let is_supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| options.supports(ext));

        if is_supported && !is_fork {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Extracts every regular entry of a zip archive under `destination`.
/// Entries whose names would escape the destination are skipped.
pub fn unpack_archive(archive: &Path, destination: &Path) -> Result<usize, IngestError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    fs::create_dir_all(destination)?;

    let mut written = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = match entry.enclosed_name() {
            Some(relative) => relative,
            None => {
                warn!(entry = %entry.name(), "skipping archive entry with unsafe path");
                continue;
            }
        };

        let target = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut output = File::create(&target)?;
        std::io::copy(&mut entry, &mut output)?;
        written += 1;
    }

    Ok(written)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Stored { document_id: String },
    /// Content already known; parsing was skipped and the vector refreshed.
    Duplicate { document_id: String },
}

impl DocumentOutcome {
    pub fn document_id(&self) -> &str {
        match self {
            DocumentOutcome::Stored { document_id } | DocumentOutcome::Duplicate { document_id } => {
                document_id
            }
        }
    }
}

/// Per-document stages shared by every job.
pub struct IngestPipeline<S, V, E, M> {
    store: S,
    index: V,
    embedder: E,
    parser: StructuredParser<M>,
    extractor: ResumeExtractor,
    options: IngestionOptions,
}

impl<S, V, E, M> IngestPipeline<S, V, E, M>
where
    S: ProfileStore + JobStore + Send + Sync,
    V: VectorIndex + Send + Sync,
    E: Embedder + Send + Sync,
    M: TextModel + Send + Sync,
{
    pub fn new(
        store: S,
        index: V,
        embedder: E,
        parser: StructuredParser<M>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            parser,
            extractor: ResumeExtractor,
            options,
        }
    }

    /// extract -> dedup check -> parse -> persist -> embed -> index.
    pub async fn process_document(&self, path: &Path) -> Result<DocumentOutcome, IngestError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("path has no file name: {}", path.display()))
            })?;

        let bytes = tokio::fs::read(path).await?;
        let extractor = self.extractor;
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &filename))
            .await
            .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))??;

        let document_id = content_document_id(&text);
        if let Some(existing) = self.store.profile(&document_id).await? {
            self.index_profile(&existing).await?;
            return Ok(DocumentOutcome::Duplicate { document_id });
        }

        let parsed = self.parser.parse(&text).await?;
        let profile = Profile::from_parsed(document_id.clone(), parsed);
        self.store.upsert_profile(&profile).await?;
        self.index_profile(&profile).await?;

        Ok(DocumentOutcome::Stored { document_id })
    }

    async fn index_profile(&self, profile: &Profile) -> Result<(), IngestError> {
        let vector = self
            .embedder
            .embed(RESUME_INSTRUCTION, &profile.embedding_summary())
            .await
            .map_err(|error| IngestError::Embedding(error.to_string()))?;

        self.index
            .upsert(VectorRecord {
                id: profile.document_id.clone(),
                vector,
                payload: profile.payload(),
            })
            .await
            .map_err(|error| IngestError::IndexUnavailable(error.to_string()))
    }

    async fn run_job(&self, job_id: &str, workspace: TempDir) {
        match self.execute_job(job_id, workspace.path()).await {
            Ok(status) => info!(job_id, %status, "ingestion job finished"),
            Err(failure) => {
                error!(job_id, error = %failure, "ingestion job failed");
                if let Err(store_error) = self.store.finish_job(job_id, JobStatus::Failed).await {
                    error!(job_id, error = %store_error, "could not record job failure");
                }
            }
        }

        if let Err(cleanup_error) = workspace.close() {
            warn!(job_id, error = %cleanup_error, "could not remove job workspace");
        }
    }

    async fn execute_job(&self, job_id: &str, workspace: &Path) -> Result<JobStatus, IngestError> {
        self.store.mark_processing(job_id).await?;

        let archive = workspace.join(ARCHIVE_FILE_NAME);
        let members = workspace.join(MEMBERS_DIR_NAME);
        let options = self.options.clone();
        let files = tokio::task::spawn_blocking(move || {
            unpack_archive(&archive, &members)?;
            Ok::<_, IngestError>(discover_resume_files(&members, &options))
        })
        .await
        .map_err(|error| IngestError::Archive(format!("unpack task failed: {error}")))??;

        let total_files = u32::try_from(files.len()).map_err(|_| {
            IngestError::Archive(format!("archive holds too many members: {}", files.len()))
        })?;
        self.store.set_total_files(job_id, total_files).await?;
        info!(job_id, total_files, "archive unpacked");

        if total_files == 0 {
            warn!(job_id, "archive contains no supported documents");
            self.store.finish_job(job_id, JobStatus::Failed).await?;
            return Ok(JobStatus::Failed);
        }

        let mut processed_files = 0u32;
        for path in &files {
            match self.process_document(path).await {
                Ok(outcome) => {
                    processed_files += 1;
                    self.store.record_processed(job_id).await?;
                    info!(
                        job_id,
                        document_id = outcome.document_id(),
                        duplicate = matches!(outcome, DocumentOutcome::Duplicate { .. }),
                        "document ingested"
                    );
                }
                Err(failure) => {
                    warn!(
                        job_id,
                        path = %path.display(),
                        reason = %failure,
                        "skipped document"
                    );
                }
            }
        }

        let status = JobStatus::settle(processed_files, total_files);
        self.store.finish_job(job_id, status).await?;
        Ok(status)
    }
}

/// Handle to a submitted job. The job keeps running if the ticket is dropped.
pub struct IngestionTicket {
    pub job_id: String,
    handle: JoinHandle<()>,
}

impl IngestionTicket {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<(), IngestError> {
        let IngestionTicket { job_id, handle } = self;
        handle.await.map_err(|error| {
            let cause = if error.is_panic() { "panicked" } else { "was cancelled" };
            IngestError::Task(format!("job {job_id} {cause}"))
        })
    }
}

/// Owns the ingestion job lifecycle and runs each job on its own task.
pub struct IngestCoordinator<S, V, E, M> {
    pipeline: Arc<IngestPipeline<S, V, E, M>>,
}

impl<S, V, E, M> Clone for IngestCoordinator<S, V, E, M> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<S, V, E, M> IngestCoordinator<S, V, E, M>
where
    S: ProfileStore + JobStore + Send + Sync + 'static,
    V: VectorIndex + Send + Sync + 'static,
    E: Embedder + Send + Sync + 'static,
    M: TextModel + Send + Sync + 'static,
{
    pub fn new(pipeline: IngestPipeline<S, V, E, M>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Creates the vector collection when it does not exist yet.
    pub async fn prepare(&self) -> Result<(), SearchError> {
        self.pipeline
            .index
            .ensure_collection(self.pipeline.embedder.dimensions(), Distance::Cosine)
            .await
    }

    /// Registers a job, copies the archive into a job-scoped directory and
    /// starts processing in the background. Returns as soon as the job exists.
    pub async fn submit(&self, archive: &Path) -> Result<IngestionTicket, IngestError> {
        let job_id = Uuid::new_v4().to_string();
        self.pipeline.store.create_job(&job_id).await?;

        let workspace = match stage_archive(archive).await {
            Ok(workspace) => workspace,
            Err(failure) => {
                self.pipeline
                    .store
                    .finish_job(&job_id, JobStatus::Failed)
                    .await?;
                return Err(failure);
            }
        };

        info!(job_id = %job_id, archive = %archive.display(), "ingestion job accepted");

        let pipeline = Arc::clone(&self.pipeline);
        let task_job_id = job_id.clone();
        let handle = tokio::spawn(async move {
            pipeline.run_job(&task_job_id, workspace).await;
        });

        Ok(IngestionTicket { job_id, handle })
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatusReport, StoreError> {
        Ok(self.pipeline.store.job(job_id).await?.report())
    }
}

async fn stage_archive(archive: &Path) -> Result<TempDir, IngestError> {
    let workspace = tempfile::Builder::new().prefix("resume-job-").tempdir()?;
    tokio::fs::copy(archive, workspace.path().join(ARCHIVE_FILE_NAME)).await?;
    Ok(workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::tests::docx_bytes;
    use crate::llm::{ApiKey, ModelError};
    use crate::models::VectorHit;
    use crate::parser::tests::ScriptedModel;
    use crate::stores::SqliteStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    /// Fails any prompt containing `UNPARSEABLE`; otherwise returns a fixed resume.
    #[derive(Default)]
    struct PromptModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextModel for PromptModel {
        async fn complete_json(
            &self,
            _credential: &ApiKey,
            prompt: &str,
            _temperature: f32,
        ) -> Result<Value, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.contains("UNPARSEABLE") {
                return Err(ModelError::Fatal("model rejected the document".to_string()));
            }
            Ok(json!({
                "name": "Candidate",
                "email": "NA",
                "years_experience": 4,
                "skills": ["Rust", "PostgreSQL"],
                "roles": ["Backend Engineer"]
            }))
        }
    }

    #[derive(Default)]
    struct MemoryIndex {
        records: Mutex<HashMap<String, VectorRecord>>,
        unavailable: bool,
    }

    impl MemoryIndex {
        fn len(&self) -> usize {
            self.records.lock().map(|records| records.len()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl VectorIndex for MemoryIndex {
        async fn ensure_collection(&self, _dimension: usize, _distance: Distance) -> Result<(), SearchError> {
            Ok(())
        }

        async fn upsert(&self, record: VectorRecord) -> Result<(), SearchError> {
            if self.unavailable {
                return Err(SearchError::Request("index offline".to_string()));
            }
            if let Ok(mut records) = self.records.lock() {
                records.insert(record.id.clone(), record);
            }
            Ok(())
        }

        async fn query(&self, _vector: &[f32], _threshold: f64, _limit: usize) -> Result<Vec<VectorHit>, SearchError> {
            Ok(Vec::new())
        }

        async fn delete(&self, ids: &[String]) -> Result<(), SearchError> {
            if let Ok(mut records) = self.records.lock() {
                for id in ids {
                    records.remove(id);
                }
            }
            Ok(())
        }

        async fn delete_collection(&self) -> Result<(), SearchError> {
            Ok(())
        }
    }

    type TestCoordinator<M = PromptModel> =
        IngestCoordinator<SqliteStore, MemoryIndex, CharacterNgramEmbedder, M>;

    async fn coordinator(index: MemoryIndex) -> (TestCoordinator, SqliteStore) {
        coordinator_with(PromptModel::default(), &["key-1"], index).await
    }

    async fn coordinator_with<M>(
        model: M,
        keys: &[&str],
        index: MemoryIndex,
    ) -> (TestCoordinator<M>, SqliteStore)
    where
        M: TextModel + Send + Sync + 'static,
    {
        let store = SqliteStore::in_memory().await.expect("in-memory store");
        let credentials = keys.iter().map(|key| ApiKey::new(*key)).collect();
        let parser = StructuredParser::new(model, credentials).expect("parser");
        let pipeline = IngestPipeline::new(
            store.clone(),
            index,
            CharacterNgramEmbedder::new(16),
            parser,
            IngestionOptions::default(),
        );
        (IngestCoordinator::new(pipeline), store)
    }

    fn write_archive(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("zip entry should start");
            writer.write_all(bytes).expect("zip entry should be written");
        }
        let bytes = writer.finish().expect("zip should finish").into_inner();
        fs::write(path, bytes).expect("archive should be written");
    }

    async fn run<M>(coordinator: &TestCoordinator<M>, archive: &Path) -> JobStatusReport
    where
        M: TextModel + Send + Sync + 'static,
    {
        let ticket = coordinator.submit(archive).await.expect("job should be accepted");
        let job_id = ticket.job_id.clone();
        ticket.wait().await.expect("job task should not panic");
        coordinator.status(&job_id).await.expect("job should exist")
    }

    #[test]
    fn discovery_filters_extensions_and_resource_forks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        fs::create_dir_all(base.join("nested"))?;
        fs::create_dir_all(base.join("__MACOSX"))?;
        fs::write(base.join("a.pdf"), b"%PDF")?;
        fs::write(base.join("nested").join("b.DOCX"), b"zip")?;
        fs::write(base.join("notes.txt"), b"text")?;
        fs::write(base.join("._a.pdf"), b"fork")?;
        fs::write(base.join("__MACOSX").join("c.pdf"), b"fork")?;

        let files = discover_resume_files(base, &IngestionOptions::default());
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn unpack_skips_entries_escaping_destination() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let archive = dir.path().join("upload.zip");
        write_archive(
            &archive,
            &[("../escape.docx", b"x".to_vec()), ("inside/ok.docx", b"y".to_vec())],
        );

        let destination = dir.path().join("out");
        let written = unpack_archive(&archive, &destination)?;
        assert_eq!(written, 1);
        assert!(destination.join("inside").join("ok.docx").exists());
        assert!(!dir.path().join("escape.docx").exists());
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_members_are_not_counted() {
        let (coordinator, store) = coordinator(MemoryIndex::default()).await;
        let dir = tempdir().expect("tempdir");
        let archive = dir.path().join("batch.zip");
        write_archive(
            &archive,
            &[
                ("alice.docx", docx_bytes(&["Alice", "Rust engineer"])),
                ("bob.docx", docx_bytes(&["Bob", "Go engineer"])),
                ("carol.docx", docx_bytes(&["Carol", "Data engineer"])),
                ("cover-letter.txt", b"not a resume".to_vec()),
            ],
        );

        let report = run(&coordinator, &archive).await;
        assert_eq!(report.total, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.status, JobStatus::Completed);
        assert!(report.done);
        assert_eq!(store.count_profiles().await.expect("count"), 3);
        assert_eq!(coordinator.pipeline.index.len(), 3);
    }

    #[tokio::test]
    async fn identical_content_is_stored_once() {
        let (coordinator, store) = coordinator(MemoryIndex::default()).await;
        let dir = tempdir().expect("tempdir");
        let archive = dir.path().join("batch.zip");
        write_archive(
            &archive,
            &[
                ("alice.docx", docx_bytes(&["Alice", "Rust engineer"])),
                ("alice-copy.docx", docx_bytes(&["Alice", "Rust engineer"])),
            ],
        );

        let first = run(&coordinator, &archive).await;
        assert_eq!(first.status, JobStatus::Completed);
        let second = run(&coordinator, &archive).await;
        assert_eq!(second.status, JobStatus::Completed);

        assert_eq!(store.count_profiles().await.expect("count"), 1);
        assert_eq!(coordinator.pipeline.index.len(), 1);
        assert_eq!(coordinator.pipeline.parser.model().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_document_does_not_stop_the_batch() {
        let (coordinator, _store) = coordinator(MemoryIndex::default()).await;
        let dir = tempdir().expect("tempdir");
        let archive = dir.path().join("batch.zip");
        write_archive(
            &archive,
            &[
                ("alice.docx", docx_bytes(&["Alice"])),
                ("broken.pdf", b"%PDF-1.4\n%broken".to_vec()),
                ("mallory.docx", docx_bytes(&["UNPARSEABLE"])),
            ],
        );

        let report = run(&coordinator, &archive).await;
        assert_eq!(report.total, 3);
        assert_eq!(report.processed, 1);
        assert_eq!(report.status, JobStatus::CompletedWithErrors);
    }

    #[tokio::test]
    async fn index_outage_keeps_relational_rows() {
        let index = MemoryIndex {
            unavailable: true,
            ..MemoryIndex::default()
        };
        let (coordinator, store) = coordinator(index).await;
        let dir = tempdir().expect("tempdir");
        let archive = dir.path().join("batch.zip");
        write_archive(&archive, &[("alice.docx", docx_bytes(&["Alice"]))]);

        let report = run(&coordinator, &archive).await;
        assert_eq!(report.processed, 0);
        assert_eq!(report.status, JobStatus::CompletedWithErrors);
        assert_eq!(store.count_profiles().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn archive_without_supported_members_fails() {
        let (coordinator, _store) = coordinator(MemoryIndex::default()).await;
        let dir = tempdir().expect("tempdir");
        let archive = dir.path().join("batch.zip");
        write_archive(&archive, &[("notes.txt", b"hello".to_vec())]);

        let report = run(&coordinator, &archive).await;
        assert_eq!(report.total, 0);
        assert_eq!(report.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn corrupt_archive_fails_the_job() {
        let (coordinator, _store) = coordinator(MemoryIndex::default()).await;
        let dir = tempdir().expect("tempdir");
        let archive = dir.path().join("batch.zip");
        fs::write(&archive, b"this is not a zip file").expect("write");

        let report = run(&coordinator, &archive).await;
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.done);
    }

    #[tokio::test]
    async fn missing_archive_is_rejected_and_recorded() {
        let (coordinator, _store) = coordinator(MemoryIndex::default()).await;
        let result = coordinator.submit(Path::new("/definitely/not/here.zip")).await;
        assert!(matches!(result, Err(IngestError::Io(_))));
    }

    #[tokio::test]
    async fn rate_limited_first_key_still_completes_the_job() {
        let resume = json!({
            "name": "Jane Doe",
            "skills": ["Rust"],
            "roles": ["Backend Engineer"]
        });
        let model = ScriptedModel::default()
            .with("key-1", Err(ModelError::Retriable("rate limit reached".to_string())))
            .with("key-2", Ok(resume));
        let (coordinator, store) =
            coordinator_with(model, &["key-1", "key-2"], MemoryIndex::default()).await;

        let dir = tempdir().expect("tempdir");
        let archive = dir.path().join("batch.zip");
        write_archive(
            &archive,
            &[
                ("alice.docx", docx_bytes(&["Alice", "Rust engineer"])),
                ("bob.docx", docx_bytes(&["Bob", "Go engineer"])),
            ],
        );

        let report = run(&coordinator, &archive).await;
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.processed, report.total);
        assert_eq!(report.total, 2);
        assert_eq!(store.count_profiles().await.expect("count"), 2);
        assert_eq!(
            coordinator.pipeline.parser.model().calls(),
            vec!["key-1", "key-2", "key-1", "key-2"]
        );
    }

    #[tokio::test]
    async fn panicked_job_task_is_reported_as_task_failure() {
        let ticket = IngestionTicket {
            job_id: "job-1".to_string(),
            handle: tokio::spawn(async { panic!("worker crashed") }),
        };

        match ticket.wait().await {
            Err(IngestError::Task(message)) => assert!(message.contains("job-1 panicked")),
            other => panic!("expected a task failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_job_is_reported_as_not_found() {
        let (coordinator, _store) = coordinator(MemoryIndex::default()).await;
        assert!(matches!(
            coordinator.status("no-such-job").await,
            Err(StoreError::JobNotFound(_))
        ));
    }
}
