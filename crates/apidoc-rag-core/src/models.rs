//! Core data models shared by the chunker, the index, and the retrieval
//! pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of declaration a chunk describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Class,
    Method,
    Function,
}

impl ChunkKind {
    /// Classes go to the class corpus; methods and free functions share
    /// the method corpus.
    pub fn category(self) -> Category {
        match self {
            ChunkKind::Class => Category::Classes,
            ChunkKind::Method | ChunkKind::Function => Category::Methods,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKind::Class => write!(f, "class"),
            ChunkKind::Method => write!(f, "method"),
            ChunkKind::Function => write!(f, "function"),
        }
    }
}

/// The two corpora a knowledge base is split into. One index is built per
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Classes,
    Methods,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Classes, Category::Methods];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Classes => "Classes",
            Category::Methods => "Methods",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of the declaration behind a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub docstring: String,
}

/// A self-contained snippet describing one class, method, or function.
///
/// `id` is unique within its category (`class_<name>`,
/// `method_<class>_<name>`, `function_<name>`). Chunks are never mutated
/// after creation; the stored `text` is what retrieval hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn category(&self) -> Category {
        self.metadata.kind.category()
    }
}

/// Class and method chunks in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub classes: Vec<Chunk>,
    pub methods: Vec<Chunk>,
}

impl Corpus {
    /// Group chunks by category, preserving their relative order.
    pub fn from_chunks(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        let mut corpus = Corpus::default();
        for chunk in chunks {
            corpus.push(chunk);
        }
        corpus
    }

    pub fn push(&mut self, chunk: Chunk) {
        match chunk.category() {
            Category::Classes => self.classes.push(chunk),
            Category::Methods => self.methods.push(chunk),
        }
    }

    pub fn get(&self, category: Category) -> &[Chunk] {
        match category {
            Category::Classes => &self.classes,
            Category::Methods => &self.methods,
        }
    }

    /// Chunk texts of one category, in corpus order.
    pub fn texts(&self, category: Category) -> Vec<String> {
        self.get(category).iter().map(|c| c.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.classes.len() + self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.methods.is_empty()
    }
}

/// Final answer set for one query, most relevant first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub classes: Vec<String>,
    pub methods: Vec<String>,
}

impl RetrievalResult {
    /// Render the result as a prompt block for downstream prompting.
    pub fn to_prompt_block(&self) -> String {
        let mut out = String::from("## Class Results:\n");
        for class in &self.classes {
            out.push_str(class);
            out.push('\n');
        }
        out.push_str("\n## Method Results:\n");
        for method in &self.methods {
            out.push_str(method);
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(kind: ChunkKind, name: &str) -> Chunk {
        Chunk {
            id: format!("{}_{}", kind, name),
            text: name.to_string(),
            metadata: ChunkMetadata {
                kind,
                name: name.to_string(),
                class_name: None,
                parameters: Vec::new(),
                docstring: String::new(),
            },
        }
    }

    #[test]
    fn test_corpus_groups_by_category_in_order() {
        let corpus = Corpus::from_chunks(vec![
            chunk(ChunkKind::Class, "A"),
            chunk(ChunkKind::Method, "m1"),
            chunk(ChunkKind::Function, "f"),
            chunk(ChunkKind::Class, "B"),
        ]);
        assert_eq!(corpus.texts(Category::Classes), vec!["A", "B"]);
        assert_eq!(corpus.texts(Category::Methods), vec!["m1", "f"]);
        assert_eq!(corpus.len(), 4);
    }

    #[test]
    fn test_metadata_serializes_type_field() {
        let c = chunk(ChunkKind::Function, "spawn");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["metadata"]["type"], "function");
        assert!(json["metadata"].get("class_name").is_none());
    }

    #[test]
    fn test_prompt_block_layout() {
        let result = RetrievalResult {
            classes: vec!["## Class Actor".to_string()],
            methods: vec!["### Method Actor.move()".to_string()],
        };
        let block = result.to_prompt_block();
        assert!(block.starts_with("## Class Results:\n## Class Actor\n"));
        assert!(block.contains("\n## Method Results:\n### Method Actor.move()\n"));
    }
}
