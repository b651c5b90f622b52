//! Chunking of source modules and document loading.
//!
//! Python modules are parsed with tree-sitter. Every class becomes a class
//! chunk and every function defined directly in a class body becomes a
//! method chunk. Module-level functions become function chunks, which share
//! the method corpus. Bodies of functions are not searched, so nested
//! helpers do not leak into the API surface.
//!
//! [`load_corpus`] is the single entry point used by the CLI: it picks the
//! markdown chunker or the Python chunker based on [`SourceFormat`].

use anyhow::{anyhow, Context, Result};
use apidoc_rag_core::chunk::{
    chunk_markdown, declaration_chunk, render_markdown, BoundaryMode, ChunkIds,
};
use apidoc_rag_core::{Chunk, ChunkKind, Corpus, RagError};
use std::path::Path;
use tree_sitter::{Language, Node, Parser};

/// Input document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceFormat {
    /// Markdown with `## Class` / `### Method` headings.
    Markdown,
    /// A Python module.
    Python,
}

impl SourceFormat {
    /// Guess from the file extension: `.py` is Python, anything else is
    /// treated as markdown.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") | Some("pyi") => SourceFormat::Python,
            _ => SourceFormat::Markdown,
        }
    }
}

/// Read and chunk a document.
pub fn load_corpus(
    path: &Path,
    format: Option<SourceFormat>,
    boundary: BoundaryMode,
) -> Result<Corpus> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let corpus = match format.unwrap_or_else(|| SourceFormat::detect(path)) {
        SourceFormat::Markdown => chunk_markdown(&text, boundary)
            .with_context(|| format!("Failed to chunk {}", path.display()))?,
        SourceFormat::Python => Corpus::from_chunks(
            chunk_python_source(&text)
                .with_context(|| format!("Failed to chunk {}", path.display()))?,
        ),
    };

    tracing::info!(
        path = %path.display(),
        classes = corpus.classes.len(),
        methods = corpus.methods.len(),
        "document chunked"
    );
    Ok(corpus)
}

/// Chunk a Python module, in source order.
///
/// A module with syntax errors yields [`RagError::Parse`] pointing at the
/// first error node.
pub fn chunk_python_source(source: &str) -> Result<Vec<Chunk>> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);

    let language: Language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser.set_language(&language)?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("Failed to parse source"))?;
    let root = tree.root_node();

    if root.has_error() {
        let (line, column) = first_error(root).unwrap_or((1, 1));
        return Err(RagError::parse(line, column, "Python syntax error").into());
    }

    let mut ids = ChunkIds::default();
    let mut chunks = Vec::new();
    visit_block(root, source.as_bytes(), None, &mut ids, &mut chunks);
    Ok(chunks)
}

/// Convert a Python module into the markdown API form understood by the
/// markdown chunker. Returns the number of chunks rendered.
pub fn convert_source_to_markdown(input: &Path, output: &Path) -> Result<usize> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let chunks = chunk_python_source(&source)
        .with_context(|| format!("Failed to chunk {}", input.display()))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(output, render_markdown(&chunks))
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(chunks.len())
}

fn first_error(node: Node) -> Option<(usize, usize)> {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        return Some((pos.row + 1, pos.column + 1));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(pos) = first_error(child) {
                return Some(pos);
            }
        }
    }
    None
}

/// Walk the statements of a module or class body.
fn visit_block(
    block: Node,
    src: &[u8],
    class_name: Option<&str>,
    ids: &mut ChunkIds,
    chunks: &mut Vec<Chunk>,
) {
    let mut cursor = block.walk();
    for child in block.named_children(&mut cursor) {
        let definition = if child.kind() == "decorated_definition" {
            child.child_by_field_name("definition")
        } else {
            Some(child)
        };
        let Some(definition) = definition else {
            continue;
        };

        match definition.kind() {
            "class_definition" => visit_class(definition, src, ids, chunks),
            "function_definition" => visit_function(definition, src, class_name, ids, chunks),
            _ => {}
        }
    }
}

fn visit_class(node: Node, src: &[u8], ids: &mut ChunkIds, chunks: &mut Vec<Chunk>) {
    let Some(name) = field_text(node, "name", src) else {
        return;
    };
    let body = node.child_by_field_name("body");
    let doc = body.and_then(|b| docstring(b, src)).unwrap_or_default();

    chunks.push(declaration_chunk(
        ids,
        ChunkKind::Class,
        name,
        None,
        Vec::new(),
        doc,
    ));

    if let Some(body) = body {
        visit_block(body, src, Some(name), ids, chunks);
    }
}

fn visit_function(
    node: Node,
    src: &[u8],
    class_name: Option<&str>,
    ids: &mut ChunkIds,
    chunks: &mut Vec<Chunk>,
) {
    let Some(name) = field_text(node, "name", src) else {
        return;
    };
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| parameter_names(p, src))
        .unwrap_or_default();
    let doc = node
        .child_by_field_name("body")
        .and_then(|b| docstring(b, src))
        .unwrap_or_default();

    // declaration_chunk turns a method without a class into a function
    chunks.push(declaration_chunk(
        ids,
        ChunkKind::Method,
        name,
        class_name,
        parameters,
        doc,
    ));
}

fn field_text<'a>(node: Node, field: &str, src: &'a [u8]) -> Option<&'a str> {
    node.child_by_field_name(field)?.utf8_text(src).ok()
}

/// Named positional and keyword parameters; `*args`, `**kwargs` and
/// separators are left out.
fn parameter_names(params: Node, src: &[u8]) -> Vec<String> {
    let mut cursor = params.walk();
    params
        .named_children(&mut cursor)
        .filter_map(|p| {
            let ident = match p.kind() {
                "identifier" => Some(p),
                "typed_parameter" => p.named_child(0).filter(|n| n.kind() == "identifier"),
                "default_parameter" | "typed_default_parameter" => p.child_by_field_name("name"),
                _ => None,
            }?;
            ident.utf8_text(src).ok().map(str::to_string)
        })
        .collect()
}

/// Raw text of the docstring literal opening `body`, quotes included.
fn docstring<'a>(body: Node, src: &'a [u8]) -> Option<&'a str> {
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first.named_child(0)?;
    if literal.kind() != "string" {
        return None;
    }
    literal.utf8_text(src).ok()
}
