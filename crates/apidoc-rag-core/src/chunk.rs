//! API-document chunker.
//!
//! Splits a markdown-like reference document into one chunk per class and
//! one chunk per method. Headings are recognised by line prefix:
//!
//! | Prefix | Effect |
//! |--------|--------|
//! | `## Class` | opens a new class chunk |
//! | `### Method` | opens a new method chunk |
//! | `## Functions` | stops chunking (free functions come from the source form) |
//!
//! # Algorithm
//!
//! Lines are scanned in order with two independent "open chunk" states.
//! Blank lines are skipped and lines before the first heading are dropped.
//!
//! - A class heading starts a new class chunk. Later lines that are not
//!   headings append to it.
//! - A method heading starts a new method chunk. Every later line that is
//!   not a class heading appends to it, so a method keeps absorbing lines
//!   until the next method heading, even across a class description.
//!
//! [`BoundaryMode::Strict`] tightens both rules: a method heading stops the
//! open class chunk from absorbing, and a class heading closes the open
//! method chunk.
//!
//! The same module also formats chunks for declarations found in source
//! modules ([`declaration_chunk`]) and renders a chunk list back to the
//! markdown convention ([`render_markdown`]).
//!
//! # Example
//!
//! ```rust
//! use apidoc_rag_core::chunk::{chunk_markdown, BoundaryMode};
//!
//! let doc = "## Class Actor\nBase class.\n### Method Actor.destroy()\nRemoves it.";
//! let corpus = chunk_markdown(doc, BoundaryMode::Lenient).unwrap();
//! assert_eq!(corpus.classes.len(), 1);
//! assert_eq!(corpus.methods.len(), 1);
//! assert_eq!(corpus.classes[0].text, "## Class Actor\nBase class.");
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::RagError;
use crate::models::{Chunk, ChunkKind, ChunkMetadata, Corpus};

pub const CLASS_MARKER: &str = "## Class";
pub const METHOD_MARKER: &str = "### Method";
pub const FUNCTIONS_MARKER: &str = "## Functions";

/// How far an open chunk keeps absorbing lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    #[default]
    Lenient,
    Strict,
}

impl FromStr for BoundaryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lenient" => Ok(BoundaryMode::Lenient),
            "strict" => Ok(BoundaryMode::Strict),
            other => Err(format!(
                "unknown boundary mode '{}'. Use lenient or strict.",
                other
            )),
        }
    }
}

/// Lines collected for one chunk before it is finalised.
struct Draft<'a> {
    line_no: usize,
    heading: &'a str,
    body: Vec<&'a str>,
    /// Owning class at the time the heading was seen (methods only).
    enclosing_class: Option<String>,
}

impl<'a> Draft<'a> {
    fn new(line_no: usize, heading: &'a str, enclosing_class: Option<String>) -> Self {
        Self {
            line_no,
            heading,
            body: Vec::new(),
            enclosing_class,
        }
    }

    fn text(&self) -> String {
        let mut lines = Vec::with_capacity(self.body.len() + 1);
        lines.push(self.heading);
        lines.extend(self.body.iter().copied());
        lines.join("\n")
    }
}

/// Chunk a markdown-form API document.
///
/// Returns [`RagError::Parse`] if a heading carries no declaration name;
/// nothing is returned for the rest of the document in that case.
pub fn chunk_markdown(text: &str, mode: BoundaryMode) -> Result<Corpus, RagError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut classes: Vec<Draft> = Vec::new();
    let mut methods: Vec<Draft> = Vec::new();
    let mut class_open = false;
    let mut method_open = false;
    let mut current_class: Option<String> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(FUNCTIONS_MARKER) {
            break;
        }

        let is_class = line.starts_with(CLASS_MARKER);
        let is_method = line.starts_with(METHOD_MARKER);

        if is_class {
            let name = class_heading_name(line)
                .ok_or_else(|| RagError::parse(line_no, CLASS_MARKER.len() + 1, "class heading has no name"))?;
            current_class = Some(name);
            classes.push(Draft::new(line_no, line, None));
            class_open = true;
            if mode == BoundaryMode::Strict {
                method_open = false;
            }
        } else if is_method {
            if mode == BoundaryMode::Strict {
                class_open = false;
            }
        } else if class_open {
            if let Some(draft) = classes.last_mut() {
                draft.body.push(line);
            }
        }

        if is_method {
            methods.push(Draft::new(line_no, line, current_class.clone()));
            method_open = true;
        } else if !is_class && method_open {
            if let Some(draft) = methods.last_mut() {
                draft.body.push(line);
            }
        }
    }

    let mut class_ids = ChunkIds::default();
    let mut method_ids = ChunkIds::default();
    let mut corpus = Corpus::default();

    for draft in &classes {
        corpus.classes.push(finish_class(draft, &mut class_ids)?);
    }
    for draft in &methods {
        corpus.methods.push(finish_method(draft, &mut method_ids)?);
    }

    Ok(corpus)
}

fn finish_class(draft: &Draft, ids: &mut ChunkIds) -> Result<Chunk, RagError> {
    let name = class_heading_name(draft.heading)
        .ok_or_else(|| RagError::parse(draft.line_no, 1, "class heading has no name"))?;
    let docstring = normalize_docstring(&draft.body.join("\n"));

    Ok(Chunk {
        id: ids.allocate(format!("class_{}", name)),
        text: draft.text(),
        metadata: ChunkMetadata {
            kind: ChunkKind::Class,
            name,
            class_name: None,
            parameters: Vec::new(),
            docstring,
        },
    })
}

fn finish_method(draft: &Draft, ids: &mut ChunkIds) -> Result<Chunk, RagError> {
    let signature = strip_code_ticks(&draft.heading[METHOD_MARKER.len()..]);
    let (qualified, mut parameters) = split_signature(signature);
    if qualified.is_empty() {
        return Err(RagError::parse(
            draft.line_no,
            METHOD_MARKER.len() + 1,
            "method heading has no name",
        ));
    }

    let (class_name, name) = match qualified.rsplit_once('.') {
        Some((class, name)) => (Some(class.to_string()), name.to_string()),
        None => (draft.enclosing_class.clone(), qualified.to_string()),
    };

    let mut doc_lines = Vec::new();
    for line in &draft.body {
        if let Some(rest) = line.trim().strip_prefix("**Parameters:**") {
            if parameters.is_empty() {
                parameters = parse_parameter_list(strip_code_ticks(rest));
            }
        } else {
            let line = line.trim();
            doc_lines.push(line.strip_prefix("**Description:**").unwrap_or(line));
        }
    }
    let docstring = normalize_docstring(&doc_lines.join("\n"));

    let (kind, id) = match &class_name {
        Some(class) => (ChunkKind::Method, format!("method_{}_{}", class, name)),
        None => (ChunkKind::Function, format!("function_{}", name)),
    };

    Ok(Chunk {
        id: ids.allocate(id),
        text: draft.text(),
        metadata: ChunkMetadata {
            kind,
            name,
            class_name,
            parameters,
            docstring,
        },
    })
}

fn class_heading_name(line: &str) -> Option<String> {
    let rest = strip_code_ticks(line.get(CLASS_MARKER.len()..)?);
    rest.split_whitespace()
        .next()
        .map(|n| n.trim_matches('`').to_string())
        .filter(|n| !n.is_empty())
}

fn strip_code_ticks(s: &str) -> &str {
    s.trim().trim_matches('`').trim()
}

/// Split `Actor.move(speed, dir)` into `("Actor.move", ["speed", "dir"])`.
fn split_signature(signature: &str) -> (&str, Vec<String>) {
    match signature.split_once('(') {
        Some((name, rest)) => {
            let inner = rest.rsplit_once(')').map(|(p, _)| p).unwrap_or(rest);
            (name.trim(), parse_parameter_list(inner))
        }
        None => (
            signature.split_whitespace().next().unwrap_or_default(),
            Vec::new(),
        ),
    }
}

fn parse_parameter_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Normalise a docstring: strip quoting delimiters, trim every line, drop
/// blank lines, and join the rest with single spaces.
///
/// ```rust
/// use apidoc_rag_core::chunk::normalize_docstring;
///
/// let raw = "r\"\"\"\n    Spawns an actor.\n\n    Returns the handle.\n    \"\"\"";
/// assert_eq!(normalize_docstring(raw), "Spawns an actor. Returns the handle.");
/// ```
pub fn normalize_docstring(raw: &str) -> String {
    let mut cleaned = raw.trim();

    let unprefixed = cleaned.trim_start_matches(['r', 'R', 'u', 'U', 'b', 'B']);
    for delim in ["\"\"\"", "'''", "\"", "'"] {
        if unprefixed.len() >= 2 * delim.len()
            && unprefixed.starts_with(delim)
            && unprefixed.ends_with(delim)
        {
            cleaned = &unprefixed[delim.len()..unprefixed.len() - delim.len()];
            break;
        }
    }

    cleaned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hands out deterministic ids, suffixing repeats (`_2`, `_3`, …) so ids
/// stay unique within a category.
#[derive(Debug, Default)]
pub struct ChunkIds {
    seen: HashMap<String, usize>,
}

impl ChunkIds {
    pub fn allocate(&mut self, base: String) -> String {
        let count = self.seen.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            base
        } else {
            format!("{}_{}", base, count)
        }
    }
}

/// Render the snippet text for a declaration.
pub fn format_snippet(
    kind: ChunkKind,
    name: &str,
    class_name: Option<&str>,
    parameters: &[String],
    docstring: &str,
) -> String {
    let mut lines = Vec::new();

    match kind {
        ChunkKind::Class => {
            lines.push(format!("## Class `{}`", name));
            if !docstring.is_empty() {
                lines.push(format!("\n{}", docstring));
            }
            return lines.join("\n");
        }
        ChunkKind::Method => {
            lines.push(format!(
                "### Method `{}.{}()`",
                class_name.unwrap_or_default(),
                name
            ));
        }
        ChunkKind::Function => lines.push(format!("### Function `{}()`", name)),
    }

    if !parameters.is_empty() {
        lines.push(format!("\n**Parameters:** `{}`", parameters.join(", ")));
    }
    if !docstring.is_empty() {
        lines.push(format!("\n**Description:** {}", docstring));
    }
    lines.join("\n")
}

/// Build a chunk for a declaration found in a source module.
///
/// `raw_docstring` is normalised with [`normalize_docstring`]. A method
/// without an enclosing class is recorded as a function.
pub fn declaration_chunk(
    ids: &mut ChunkIds,
    kind: ChunkKind,
    name: &str,
    class_name: Option<&str>,
    parameters: Vec<String>,
    raw_docstring: &str,
) -> Chunk {
    let docstring = normalize_docstring(raw_docstring);
    let kind = match (kind, class_name) {
        (ChunkKind::Method, None) => ChunkKind::Function,
        (ChunkKind::Function, Some(_)) => ChunkKind::Method,
        (k, _) => k,
    };

    let id = match kind {
        ChunkKind::Class => format!("class_{}", name),
        ChunkKind::Method => format!("method_{}_{}", class_name.unwrap_or_default(), name),
        ChunkKind::Function => format!("function_{}", name),
    };

    let class_name = match kind {
        ChunkKind::Class => None,
        _ => class_name.map(str::to_string),
    };

    Chunk {
        id: ids.allocate(id),
        text: format_snippet(kind, name, class_name.as_deref(), &parameters, &docstring),
        metadata: ChunkMetadata {
            kind,
            name: name.to_string(),
            class_name,
            parameters,
            docstring,
        },
    }
}

/// Render chunks as an API markdown document.
///
/// Classes come first, each followed by its methods; methods whose class
/// is not among the chunks are left out. Free functions go under a trailing
/// `## Functions` section.
pub fn render_markdown(chunks: &[Chunk]) -> String {
    let mut class_order: Vec<&Chunk> = Vec::new();
    let mut methods_by_class: HashMap<&str, Vec<&Chunk>> = HashMap::new();
    let mut functions: Vec<&Chunk> = Vec::new();

    for chunk in chunks {
        match chunk.metadata.kind {
            ChunkKind::Class => {
                if !class_order
                    .iter()
                    .any(|c| c.metadata.name == chunk.metadata.name)
                {
                    class_order.push(chunk);
                }
            }
            ChunkKind::Method => {
                if let Some(class) = chunk.metadata.class_name.as_deref() {
                    methods_by_class.entry(class).or_default().push(chunk);
                }
            }
            ChunkKind::Function => functions.push(chunk),
        }
    }

    let mut out = String::from("# API Documentation\n\n");
    for class in class_order {
        out.push_str(&class.text);
        out.push_str("\n\n");
        if let Some(methods) = methods_by_class.get(class.metadata.name.as_str()) {
            for method in methods {
                out.push_str(&method.text);
                out.push_str("\n\n");
            }
        }
    }

    if !functions.is_empty() {
        out.push_str(FUNCTIONS_MARKER);
        out.push_str("\n\n");
        for func in functions {
            out.push_str(&func.text);
            out.push_str("\n\n");
        }
    }

    out
}
