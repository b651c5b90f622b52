//! Offline indexing phase: read → chunk → embed → build → persist.
//!
//! Chunks that cannot be embedded are skipped and counted; the build only
//! fails when the document cannot be chunked, when nothing at all could be
//! embedded, or when the files cannot be written. A failed build leaves the
//! previous knowledge base untouched.

use anyhow::{bail, Result};
use apidoc_rag_core::embedding::{BatchPolicy, Embedder, TokenCounter};
use apidoc_rag_core::index::{BuildReport, KnowledgeBase};
use apidoc_rag_core::{Category, Corpus};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::embedding;
use crate::progress::{BuildProgressEvent, BuildProgressReporter};
use crate::source_chunk::{load_corpus, SourceFormat};
use crate::store::{self, Manifest};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub input: PathBuf,
    pub format: Option<SourceFormat>,
    pub batch_size: Option<usize>,
    /// Chunk only; report counts without embedding or writing.
    pub dry_run: bool,
}

/// Embed a corpus and build the in-memory knowledge base.
pub async fn build_knowledge_base(
    embedder: &dyn Embedder,
    counter: &dyn TokenCounter,
    corpus: &Corpus,
    policy: BatchPolicy,
    progress: &dyn BuildProgressReporter,
) -> Result<(KnowledgeBase, BuildReport)> {
    let mut on_batch = |category: Category, n: usize, total: usize| {
        progress.report(BuildProgressEvent::Embedding {
            category,
            n: n as u64,
            total: total as u64,
        })
    };
    let (kb, report) =
        KnowledgeBase::build_with_progress(embedder, counter, corpus, policy, &mut on_batch)
            .await?;

    let indexed = report.classes.indexed + report.methods.indexed;
    if indexed == 0 && !corpus.is_empty() {
        bail!(
            "None of the {} chunks could be embedded; check the [embedding] settings",
            corpus.len()
        );
    }
    Ok((kb, report))
}

/// Run `apidoc build`.
pub async fn run_build(
    config: &Config,
    opts: &BuildOptions,
    progress: &dyn BuildProgressReporter,
) -> Result<()> {
    let corpus = load_corpus(&opts.input, opts.format, config.chunking.boundary)?;
    progress.report(BuildProgressEvent::Chunked {
        classes: corpus.classes.len() as u64,
        methods: corpus.methods.len() as u64,
    });

    if opts.dry_run {
        println!("build index (dry-run)");
        println!("  source: {}", opts.input.display());
        println!("  classes: {}", corpus.classes.len());
        println!("  methods: {}", corpus.methods.len());
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let counter = embedding::create_token_counter();
    let mut policy = config.embedding.batch_policy();
    if let Some(batch_size) = opts.batch_size {
        if batch_size == 0 {
            bail!("--batch-size must be > 0");
        }
        policy.batch_size = batch_size;
    }

    let (kb, report) =
        build_knowledge_base(provider.as_ref(), counter.as_ref(), &corpus, policy, progress)
            .await?;

    let mut rows = BTreeMap::new();
    for category in Category::ALL {
        rows.insert(category.as_str().to_string(), kb.get(category).len());
    }
    let manifest = Manifest {
        model: provider.model_name().to_string(),
        dims: provider.dims(),
        built_at: chrono::Utc::now().timestamp(),
        source: opts.input.display().to_string(),
        rows,
    };

    store::save(&config.index.dir, &kb, &manifest)?;
    progress.report(BuildProgressEvent::Saved {
        dir: config.index.dir.display().to_string(),
    });

    println!("build index");
    println!("  source: {}", opts.input.display());
    println!("  model: {}", manifest.model);
    for category in Category::ALL {
        let r = report.get(category);
        println!(
            "  {}: {} indexed / {} chunks ({} skipped)",
            category.as_str().to_lowercase(),
            r.indexed,
            r.chunks,
            r.skipped
        );
    }
    println!("  saved: {}", config.index.dir.display());

    Ok(())
}
