//! On-disk knowledge base.
//!
//! Each category is persisted as a pair of files in the index directory:
//!
//! | File | Content |
//! |------|---------|
//! | `kb_<Category>.idx` | binary embedding matrix |
//! | `kb_<Category>_chunks.jsonl` | one JSON string per line, the chunk text of row `i` |
//!
//! A `kb_manifest.json` next to them records the model and build time.
//!
//! # Index file layout
//!
//! All integers are little-endian.
//!
//! ```text
//! magic    8 bytes  "APIDOCKB"
//! version  u32      1
//! dims     u32
//! count    u64      number of rows
//! sha256   32 bytes digest of the matching chunks file
//! data     count × dims × f32
//! ```
//!
//! The digest ties the two files together: a chunks file from another build
//! is refused even when its row count happens to match.
//!
//! Writes go to `*.tmp` files first and are renamed into place only after
//! both files of every category are complete, so an interrupted build never
//! leaves a half-written pair behind.

use anyhow::{bail, Context, Result};
use apidoc_rag_core::embedding::{blob_to_vec, vec_to_blob};
use apidoc_rag_core::index::{CategoryIndex, FlatL2Index, KnowledgeBase};
use apidoc_rag_core::{Category, RagError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"APIDOCKB";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 8 + 32;
const MANIFEST_FILE: &str = "kb_manifest.json";

/// Paths of one category's file pair.
#[derive(Debug, Clone)]
pub struct CategoryPaths {
    pub index: PathBuf,
    pub chunks: PathBuf,
}

pub fn category_paths(dir: &Path, category: Category) -> CategoryPaths {
    CategoryPaths {
        index: dir.join(format!("kb_{}.idx", category.as_str())),
        chunks: dir.join(format!("kb_{}_chunks.jsonl", category.as_str())),
    }
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Build metadata stored next to the index files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub model: String,
    pub dims: usize,
    /// Unix timestamp of the build.
    pub built_at: i64,
    pub source: String,
    /// Row count per category name.
    pub rows: BTreeMap<String, usize>,
}

/// Whether every file of a knowledge base is present in `dir`.
pub fn exists(dir: &Path) -> bool {
    Category::ALL.iter().all(|&c| {
        let paths = category_paths(dir, c);
        paths.index.exists() && paths.chunks.exists()
    })
}

fn encode_chunks(texts: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for text in texts {
        out.extend_from_slice(serde_json::to_string(text)?.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

fn decode_chunks(bytes: &[u8], path: &Path) -> Result<Vec<String>> {
    let content = std::str::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<String>(line)
                .with_context(|| format!("{}:{}: invalid chunk row", path.display(), i + 1))
        })
        .collect()
}

fn encode_index(index: &FlatL2Index, digest: &[u8]) -> Result<Vec<u8>> {
    let dims = u32::try_from(index.dims()).context("dimension too large")?;
    let mut out = Vec::with_capacity(HEADER_LEN + index.as_flat().len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&dims.to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    out.extend_from_slice(digest);
    out.extend_from_slice(&vec_to_blob(index.as_flat()));
    Ok(out)
}

struct IndexHeader {
    dims: usize,
    count: usize,
    digest: [u8; 32],
}

fn decode_header(bytes: &[u8], path: &Path) -> Result<IndexHeader> {
    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        bail!("{} is not an apidoc index file", path.display());
    }
    let version = u32::from_le_bytes(bytes[8..12].try_into()?);
    if version != FORMAT_VERSION {
        bail!(
            "{} has format version {}, expected {}",
            path.display(),
            version,
            FORMAT_VERSION
        );
    }
    Ok(IndexHeader {
        dims: u32::from_le_bytes(bytes[12..16].try_into()?) as usize,
        count: u64::from_le_bytes(bytes[16..24].try_into()?) as usize,
        digest: bytes[24..56].try_into()?,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Persist a knowledge base, replacing whatever `dir` held before.
pub fn save(dir: &Path, kb: &KnowledgeBase, manifest: &Manifest) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();

    for category in Category::ALL {
        let idx = kb.get(category);
        let paths = category_paths(dir, category);

        let chunks = encode_chunks(idx.texts())?;
        let digest = Sha256::digest(&chunks);
        let index = encode_index(idx.index(), digest.as_slice())?;

        for (path, bytes) in [(&paths.chunks, &chunks), (&paths.index, &index)] {
            let tmp = tmp_path(path);
            std::fs::write(&tmp, bytes)
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            staged.push((tmp, path.clone()));
        }
    }

    let manifest_file = manifest_path(dir);
    let tmp = tmp_path(&manifest_file);
    std::fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    staged.push((tmp, manifest_file));

    for (tmp, dest) in staged {
        std::fs::rename(&tmp, &dest)
            .with_context(|| format!("Failed to move {} into place", dest.display()))?;
    }

    tracing::info!(dir = %dir.display(), "knowledge base saved");
    Ok(())
}

/// Load one category, verifying that both files describe the same rows.
pub fn load_category(dir: &Path, category: Category) -> Result<CategoryIndex> {
    let paths = category_paths(dir, category);

    let chunk_bytes = std::fs::read(&paths.chunks)
        .with_context(|| format!("Failed to read {}", paths.chunks.display()))?;
    let index_bytes = std::fs::read(&paths.index)
        .with_context(|| format!("Failed to read {}", paths.index.display()))?;

    let texts = decode_chunks(&chunk_bytes, &paths.chunks)?;
    let header = decode_header(&index_bytes, &paths.index)?;

    let desync = RagError::IndexDesync {
        category,
        vectors: header.count,
        texts: texts.len(),
    };
    if header.count != texts.len() {
        return Err(desync.into());
    }
    if Sha256::digest(&chunk_bytes).as_slice() != &header.digest[..] {
        return Err(anyhow::Error::new(desync).context(format!(
            "{} does not belong to {}",
            paths.chunks.display(),
            paths.index.display()
        )));
    }

    let expected_len = HEADER_LEN + header.count * header.dims * 4;
    if index_bytes.len() != expected_len {
        bail!(
            "{} is truncated: {} bytes, expected {}",
            paths.index.display(),
            index_bytes.len(),
            expected_len
        );
    }

    let data = blob_to_vec(&index_bytes[HEADER_LEN..]);
    let index = FlatL2Index::from_flat(header.dims, data)?;
    Ok(CategoryIndex::new(category, index, texts)?)
}

/// Load the whole knowledge base from `dir`.
pub fn load(dir: &Path) -> Result<KnowledgeBase> {
    if !exists(dir) {
        bail!(
            "No knowledge base in {}. Run `apidoc build <document>` first.",
            dir.display()
        );
    }
    let classes = load_category(dir, Category::Classes)?;
    let methods = load_category(dir, Category::Methods)?;

    if !classes.is_empty() && !methods.is_empty() && classes.index().dims() != methods.index().dims()
    {
        return Err(RagError::DimensionMismatch {
            expected: classes.index().dims(),
            actual: methods.index().dims(),
        }
        .into());
    }

    Ok(KnowledgeBase::new(classes, methods))
}

pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = manifest_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Some(serde_json::from_slice(&bytes).with_context(|| {
        format!("Failed to parse {}", path.display())
    })?))
}
