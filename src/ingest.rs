//! Ingestion: file → text → chunks → vectors → memory.
//!
//! [`IngestionPipeline::ingest`] is the single write path into the
//! [`VectorMemory`]. Uploads ([`ingest_upload`]) and the startup directory
//! preload ([`preload_directory`]) both go through it, keyed by the
//! filename-derived identifier from [`document_id`].
//!
//! A document is embedded completely before the memory is touched, so a
//! failure at any step leaves the previously stored version (and the
//! current-document marker) exactly as it was.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::context::AppContext;
use crate::embedding::{validate_batch, EmbeddingProvider};
use crate::error::{Error, LoadError};
use crate::extract::{content_type_for, load_document_blocking};
use crate::hash::document_id;
use crate::memory::VectorMemory;
use crate::models::IngestReport;

/// Loader, chunker, embedder and memory wired together.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    memory: Arc<VectorMemory>,
    max_tokens: usize,
    overlap_tokens: usize,
    batch_size: usize,
    max_file_bytes: u64,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        memory: Arc<VectorMemory>,
        config: &Config,
    ) -> Self {
        Self {
            embedder,
            memory,
            max_tokens: config.chunking.max_tokens,
            overlap_tokens: config.chunking.overlap_tokens,
            batch_size: config.embedding.batch_size.max(1),
            max_file_bytes: config.ingest.max_file_bytes,
        }
    }

    /// Loads `path`, embeds every chunk, and replaces whatever the memory
    /// held under `identifier`.
    pub async fn ingest(&self, path: &Path, identifier: &str) -> Result<IngestReport, Error> {
        let doc = load_document_blocking(
            path.to_path_buf(),
            identifier.to_string(),
            self.max_file_bytes,
        )
        .await?;

        let chunks = chunk_text(&doc.id, &doc.text, self.max_tokens, self.overlap_tokens);
        debug!(
            identifier,
            chunks = chunks.len(),
            content_type = %doc.content_type,
            "document chunked"
        );

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            vectors.extend(validate_batch(batch.len(), self.embedder.dims(), embedded)?);
        }

        let chunk_count = self
            .memory
            .upsert(identifier, chunks.into_iter().zip(vectors).collect())?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        info!(
            identifier,
            filename = %filename,
            bytes = doc.byte_count,
            chunks = chunk_count,
            "document ingested"
        );

        Ok(IngestReport {
            identifier: identifier.to_string(),
            filename,
            location: path.display().to_string(),
            byte_count: doc.byte_count,
            chunk_count,
            ingested_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Reduces a client-supplied file name to its final path component.
pub fn sanitize_file_name(file_name: &str) -> Result<String, LoadError> {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(LoadError::InvalidName(file_name.to_string()));
    }
    Ok(name.to_string())
}

/// Stores an uploaded file under `server.upload_dir` and ingests it.
///
/// The identifier is the hash of the (sanitized) file name, so uploading
/// the same name again replaces the earlier version. The bytes are staged
/// in a hidden sibling file and only moved over `<upload_dir>/<name>` once
/// ingestion has succeeded; a failed upload leaves the stored file, the
/// memory and the current document as they were.
pub async fn ingest_upload(
    ctx: &AppContext,
    file_name: &str,
    bytes: &[u8],
) -> Result<IngestReport, Error> {
    let name = sanitize_file_name(file_name)?;
    content_type_for(Path::new(&name))?;

    let dir = &ctx.config.server.upload_dir;
    let location = dir.join(&name);
    // Keeps the extension last so format detection still works.
    let staged = dir.join(format!(".{}.{}", Uuid::new_v4(), name));

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| LoadError::Io {
            path: dir.clone(),
            source,
        })?;
    tokio::fs::write(&staged, bytes)
        .await
        .map_err(|source| LoadError::Io {
            path: staged.clone(),
            source,
        })?;

    let identifier = document_id(&name);
    let result = commit_upload(ctx, &staged, &location, &identifier).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staged.display(), error = %e, "failed to remove staged upload");
            }
        }
    }
    let mut report = result?;

    report.filename = name;
    report.location = location.display().to_string();
    ctx.set_current_document(&identifier);
    Ok(report)
}

async fn commit_upload(
    ctx: &AppContext,
    staged: &Path,
    location: &Path,
    identifier: &str,
) -> Result<IngestReport, Error> {
    let report = ctx.pipeline().ingest(staged, identifier).await?;
    tokio::fs::rename(staged, location)
        .await
        .map_err(|source| LoadError::Io {
            path: location.to_path_buf(),
            source,
        })?;
    Ok(report)
}

/// Ingests every matching file under `dir`, in sorted path order.
///
/// Individual failures are logged and skipped; only an unreadable root or
/// invalid glob pattern fails the whole preload.
pub async fn preload_directory(ctx: &AppContext, dir: &Path) -> anyhow::Result<Vec<IngestReport>> {
    let files = scan_directory(
        dir,
        &ctx.config.ingest.include_globs,
        &ctx.config.ingest.exclude_globs,
    )?;
    info!(dir = %dir.display(), files = files.len(), "preloading documents");

    let pipeline = ctx.pipeline();
    let mut reports = Vec::new();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let identifier = document_id(&name);
        match pipeline.ingest(&path, &identifier).await {
            Ok(report) => {
                ctx.set_current_document(&identifier);
                reports.push(report);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping file"),
        }
    }
    Ok(reports)
}

/// Lists files under `root` matching `include` and not `exclude`, relative
/// paths matched against the globs.
pub fn scan_directory(
    root: &Path,
    include: &[String],
    exclude: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Preload directory does not exist: {}", root.display());
    }

    let include_set = build_globset(include)?;
    let mut default_excludes = vec!["**/.git/**".to_string()];
    default_excludes.extend(exclude.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(&*rel_str) || !include_set.is_match(&*rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::error::EmbeddingError;

    fn pipeline(memory: Arc<VectorMemory>) -> IngestionPipeline {
        let mut config = Config::minimal();
        config.chunking.max_tokens = 3;
        config.chunking.overlap_tokens = 0;
        config.embedding.batch_size = 2;
        IngestionPipeline::new(Arc::new(HashingProvider::new(32)), memory, &config)
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/notes.txt").unwrap(), "notes.txt");
        assert_eq!(sanitize_file_name("C:\\books\\moby.pdf").unwrap(), "moby.pdf");
        assert!(sanitize_file_name("uploads/..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }

    #[tokio::test]
    async fn reingesting_replaces_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let memory = Arc::new(VectorMemory::new(50, 32));
        let pipeline = pipeline(Arc::clone(&memory));

        std::fs::write(&path, "alpha beta\n\ngamma delta\n\nepsilon zeta").unwrap();
        let first = pipeline.ingest(&path, "id").await.unwrap();
        assert_eq!(first.chunk_count, 3);

        std::fs::write(&path, "omega").unwrap();
        let second = pipeline.ingest(&path, "id").await.unwrap();
        assert_eq!(second.chunk_count, 1);
        assert_eq!(memory.len(), 1);

        let query = HashingProvider::new(32).embed_query("alpha").await.unwrap();
        let texts: Vec<_> = memory
            .search(&query, 50)
            .into_iter()
            .map(|r| r.chunk.text)
            .collect();
        assert_eq!(texts, vec!["omega".to_string()]);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("notes.txt");
        std::fs::write(&good, "kept text").unwrap();
        let memory = Arc::new(VectorMemory::new(5, 32));
        let pipeline = pipeline(Arc::clone(&memory));
        pipeline.ingest(&good, "id").await.unwrap();

        let blank = dir.path().join("blank.txt");
        std::fs::write(&blank, "   ").unwrap();
        let err = pipeline.ingest(&blank, "id").await.unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::Empty(_))));
        assert_eq!(memory.documents()[0].chunk_count, 1);
    }

    #[tokio::test]
    async fn embedding_dimension_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "some text").unwrap();
        let memory = Arc::new(VectorMemory::new(5, 16));
        let err = pipeline(Arc::clone(&memory))
            .ingest(&path, "id")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Embedding(EmbeddingError::DimensionMismatch { .. })
        ));
        assert!(memory.is_empty());
    }

    #[test]
    fn scan_respects_globs_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::create_dir_all(dir.path().join("drafts")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "c").unwrap();
        std::fs::write(dir.path().join("drafts/d.txt"), "d").unwrap();
        std::fs::write(dir.path().join("image.png"), "x").unwrap();

        let files = scan_directory(
            dir.path(),
            &["**/*.txt".to_string(), "**/*.md".to_string()],
            &["drafts/**".to_string()],
        )
        .unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.md", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn scan_missing_root_fails() {
        assert!(scan_directory(Path::new("/no/such/dir"), &[], &[]).is_err());
    }
}
