//! Document chunking.
//!
//! Each policy turns one document into ordered text nodes with stable
//! character offsets. Chunking never fails a document outright: a policy
//! that produces nothing falls back to a single whole-document node, and
//! semantic chunking degrades to fixed-size when no embedding client is
//! available or sentence embedding fails.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::Row;
use crate::embedding::convert::Document;
use crate::embedding::provider::{cosine_similarity, EmbeddingClient};

/// How documents are split before embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ChunkingPolicy {
    /// Fixed-length character windows with optional overlap.
    FixedSize { chunk_size: usize, overlap: usize },
    /// Sentence-preserving packing up to a character limit.
    SentenceAware { max_chars: usize },
    /// Sentence groups split at semantic breakpoints, detected by a drop
    /// in adjacent-sentence embedding similarity below the threshold.
    Semantic { max_chars: usize, breakpoint_threshold: f32 },
    /// One node per document.
    None,
}

impl ChunkingPolicy {
    pub fn method_name(&self) -> &'static str {
        match self {
            ChunkingPolicy::FixedSize { .. } => "fixed_size",
            ChunkingPolicy::SentenceAware { .. } => "sentence_aware",
            ChunkingPolicy::Semantic { .. } => "semantic",
            ChunkingPolicy::None => "none",
        }
    }
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        ChunkingPolicy::SentenceAware { max_chars: 1000 }
    }
}

/// One chunk of a document, carrying its provenance and, after the batch
/// stage, either an embedding or an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextNode {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    pub content_hash: String,
    pub chunking_method: String,
    pub metadata: Row,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_error: Option<String>,
}

impl TextNode {
    fn new(doc: &Document, method: &str, start_char: usize, text: String) -> Self {
        let end_char = start_char + text.chars().count();
        let content_hash = hex::encode(Sha256::digest(text.as_bytes()));
        Self {
            id: format!("node_{}", Uuid::new_v4().simple()),
            document_id: doc.id.clone(),
            chunk_index: 0,
            chunk_total: 0,
            start_char,
            end_char,
            text,
            content_hash,
            chunking_method: method.to_string(),
            metadata: doc.metadata.clone(),
            embedding: None,
            embedding_model: None,
            embedding_error: None,
        }
    }

    /// Records a successful embedding, clearing any earlier error.
    pub fn set_embedding(&mut self, vector: Vec<f32>, model: &str) {
        self.embedding = Some(vector);
        self.embedding_model = Some(model.to_string());
        self.embedding_error = None;
    }

    /// Flags the node as failed, clearing any earlier embedding.
    pub fn set_embedding_error(&mut self, reason: impl Into<String>) {
        self.embedding = None;
        self.embedding_model = None;
        self.embedding_error = Some(reason.into());
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Sentence boundary: run of end punctuation followed by whitespace or
/// end of text.
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(\s+|$)").expect("sentence boundary regex"));

/// A sentence with its starting character offset in the document.
#[derive(Debug, Clone)]
struct SentenceSpan {
    start_char: usize,
    text: String,
}

pub struct TextChunker {
    policy: ChunkingPolicy,
    client: Option<Arc<dyn EmbeddingClient>>,
}

impl TextChunker {
    pub fn new(policy: ChunkingPolicy) -> Self {
        Self {
            policy,
            client: None,
        }
    }

    /// Supplies the client used for semantic breakpoint detection.
    pub fn with_client(mut self, client: Arc<dyn EmbeddingClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Splits one document into ordered nodes. Always returns at least
    /// one node for a document with non-empty text.
    pub async fn chunk_document(&self, doc: &Document) -> Vec<TextNode> {
        let mut nodes = match &self.policy {
            ChunkingPolicy::FixedSize { chunk_size, overlap } => {
                fixed_size_nodes(doc, *chunk_size, *overlap)
            }
            ChunkingPolicy::SentenceAware { max_chars } => sentence_nodes(doc, *max_chars),
            ChunkingPolicy::Semantic {
                max_chars,
                breakpoint_threshold,
            } => self.semantic_nodes(doc, *max_chars, *breakpoint_threshold).await,
            ChunkingPolicy::None => vec![TextNode::new(doc, "none", 0, doc.text.clone())],
        };

        if nodes.is_empty() {
            // Whole-document fallback keeps every convertible record in
            // the index.
            debug!(document_id = %doc.id, "chunking produced nothing, emitting whole document");
            nodes = vec![TextNode::new(doc, "whole_document", 0, doc.text.clone())];
        }

        let total = nodes.len();
        for (index, node) in nodes.iter_mut().enumerate() {
            node.chunk_index = index;
            node.chunk_total = total;
        }
        nodes
    }

    async fn semantic_nodes(
        &self,
        doc: &Document,
        max_chars: usize,
        threshold: f32,
    ) -> Vec<TextNode> {
        let client = match &self.client {
            Some(client) => Arc::clone(client),
            // No client to measure similarity with, so degrade for this
            // document only.
            None => {
                debug!(document_id = %doc.id, "semantic chunking without client, using fixed-size");
                return fixed_size_nodes(doc, max_chars, 0);
            }
        };

        let sentences = split_sentences(&doc.text);
        if sentences.len() < 2 {
            return sentence_nodes(doc, max_chars);
        }

        let texts: Vec<String> = sentences.iter().map(|s| s.text.clone()).collect();
        let results = client.embed_batch(&texts).await;
        let mut vectors = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(v) => vectors.push(v),
                Err(reason) => {
                    warn!(
                        document_id = %doc.id,
                        reason = %reason,
                        "sentence embedding failed, falling back to fixed-size chunking"
                    );
                    return fixed_size_nodes(doc, max_chars, 0);
                }
            }
        }

        // A breakpoint before sentence i means similarity(i-1, i) fell
        // below the threshold.
        let mut nodes = Vec::new();
        let mut group: Vec<&SentenceSpan> = vec![&sentences[0]];
        let mut group_chars = sentences[0].text.chars().count();
        for i in 1..sentences.len() {
            let sentence = &sentences[i];
            let chars = sentence.text.chars().count();
            let similar = cosine_similarity(&vectors[i - 1], &vectors[i]) >= threshold;
            if similar && group_chars + chars + 1 <= max_chars {
                group.push(sentence);
                group_chars += chars + 1;
            } else {
                nodes.push(group_to_node(doc, "semantic", &group));
                group = vec![sentence];
                group_chars = chars;
            }
        }
        nodes.push(group_to_node(doc, "semantic", &group));
        nodes
    }
}

fn fixed_size_nodes(doc: &Document, chunk_size: usize, overlap: usize) -> Vec<TextNode> {
    if chunk_size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = doc.text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut nodes = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let text: String = chars[start..end].iter().collect();
        if !text.trim().is_empty() {
            nodes.push(TextNode::new(doc, "fixed_size", start, text));
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    nodes
}

fn sentence_nodes(doc: &Document, max_chars: usize) -> Vec<TextNode> {
    let sentences = split_sentences(&doc.text);
    if sentences.is_empty() {
        return Vec::new();
    }
    let mut nodes = Vec::new();
    let mut group: Vec<&SentenceSpan> = Vec::new();
    let mut group_chars = 0usize;
    for sentence in &sentences {
        let chars = sentence.text.chars().count();
        if !group.is_empty() && group_chars + chars + 1 > max_chars {
            nodes.push(group_to_node(doc, "sentence_aware", &group));
            group.clear();
            group_chars = 0;
        }
        group_chars += chars + if group.is_empty() { 0 } else { 1 };
        group.push(sentence);
    }
    if !group.is_empty() {
        nodes.push(group_to_node(doc, "sentence_aware", &group));
    }
    nodes
}

fn group_to_node(doc: &Document, method: &str, group: &[&SentenceSpan]) -> TextNode {
    let start_char = group[0].start_char;
    let text = group
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let mut node = TextNode::new(doc, method, start_char, text);
    // The joined text collapses inter-sentence whitespace, so the end
    // offset comes from the last source span, not the joined length.
    let last = group[group.len() - 1];
    node.end_char = last.start_char + last.text.chars().count();
    node
}

/// Splits text at sentence-ending punctuation, preserving the punctuation
/// with its sentence and tracking character offsets.
fn split_sentences(text: &str) -> Vec<SentenceSpan> {
    let mut spans = Vec::new();
    let mut last_byte = 0usize;
    let mut last_char = 0usize;
    let mut push = |start_byte: usize, end_byte: usize, start_char: usize| -> usize {
        let raw = &text[start_byte..end_byte];
        let chars = raw.chars().count();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let lead = raw.chars().take_while(|c| c.is_whitespace()).count();
            spans.push(SentenceSpan {
                start_char: start_char + lead,
                text: trimmed.to_string(),
            });
        }
        start_char + chars
    };
    for boundary in SENTENCE_END.find_iter(text) {
        last_char = push(last_byte, boundary.end(), last_char);
        last_byte = boundary.end();
    }
    if last_byte < text.len() {
        push(last_byte, text.len(), last_char);
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(text: &str) -> Document {
        let mut metadata = Row::new();
        metadata.insert("entity_type".into(), json!("property"));
        Document {
            id: "p1".to_string(),
            text: text.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_fixed_size_splits_long_document_into_three_chunks() {
        let text = "x".repeat(250);
        let chunker = TextChunker::new(ChunkingPolicy::FixedSize {
            chunk_size: 100,
            overlap: 0,
        });
        let nodes = chunker.chunk_document(&doc(&text)).await;
        assert_eq!(nodes.len(), 3);
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.chunk_index, i);
            assert_eq!(node.chunk_total, 3);
            assert_eq!(node.chunking_method, "fixed_size");
        }
        assert_eq!(nodes[0].text.len(), 100);
        assert_eq!(nodes[2].text.len(), 50);
        assert_eq!(nodes[1].start_char, 100);
        assert_eq!(nodes[2].end_char, 250);
    }

    #[tokio::test]
    async fn test_fixed_size_overlap_repeats_tail_characters() {
        let text: String = ('a'..='z').collect();
        let chunker = TextChunker::new(ChunkingPolicy::FixedSize {
            chunk_size: 10,
            overlap: 4,
        });
        let nodes = chunker.chunk_document(&doc(&text)).await;
        assert!(nodes.len() > 2);
        let first_tail: String = nodes[0].text.chars().skip(6).collect();
        let second_head: String = nodes[1].text.chars().take(4).collect();
        assert_eq!(first_tail, second_head);
    }

    #[tokio::test]
    async fn test_sentence_aware_keeps_sentences_intact() {
        let text = "First sentence here. Second one follows! Third asks a question? Fourth closes.";
        let chunker = TextChunker::new(ChunkingPolicy::SentenceAware { max_chars: 45 });
        let nodes = chunker.chunk_document(&doc(text)).await;
        assert!(nodes.len() >= 2);
        for node in &nodes {
            assert!(node.text.ends_with('.') || node.text.ends_with('!') || node.text.ends_with('?'));
        }
        assert_eq!(nodes[0].text, "First sentence here. Second one follows!");
    }

    #[tokio::test]
    async fn test_short_document_yields_single_node() {
        let chunker = TextChunker::new(ChunkingPolicy::SentenceAware { max_chars: 1000 });
        let nodes = chunker.chunk_document(&doc("Tiny listing.")).await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].chunk_total, 1);
        assert_eq!(nodes[0].start_char, 0);
    }

    #[tokio::test]
    async fn test_none_policy_emits_whole_document() {
        let chunker = TextChunker::new(ChunkingPolicy::None);
        let text = "One. Two. Three.";
        let nodes = chunker.chunk_document(&doc(text)).await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, text);
        assert_eq!(nodes[0].chunking_method, "none");
    }

    #[tokio::test]
    async fn test_semantic_without_client_degrades_to_fixed_size() {
        let text = "Alpha sentence. ".repeat(20);
        let chunker = TextChunker::new(ChunkingPolicy::Semantic {
            max_chars: 80,
            breakpoint_threshold: 0.5,
        });
        let nodes = chunker.chunk_document(&doc(&text)).await;
        assert!(!nodes.is_empty());
        assert!(nodes.iter().all(|n| n.chunking_method == "fixed_size"));
    }

    #[tokio::test]
    async fn test_semantic_with_client_labels_chunks() {
        use crate::embedding::provider::MockEmbeddingClient;
        let text = "The house has a garage. The house has a deck. Zoning differs downtown.";
        let chunker = TextChunker::new(ChunkingPolicy::Semantic {
            max_chars: 200,
            breakpoint_threshold: 0.99,
        })
        .with_client(Arc::new(MockEmbeddingClient::new(16)));
        let nodes = chunker.chunk_document(&doc(text)).await;
        assert!(!nodes.is_empty());
        assert!(nodes.iter().all(|n| n.chunking_method == "semantic"));
    }

    #[tokio::test]
    async fn test_node_offsets_track_characters_not_bytes() {
        let text = "Café near the Señorial plaza. A second sentence follows here.";
        let chunker = TextChunker::new(ChunkingPolicy::SentenceAware { max_chars: 35 });
        let nodes = chunker.chunk_document(&doc(text)).await;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].start_char, 0);
        let expected = text.chars().count() - nodes[1].text.chars().count();
        assert_eq!(nodes[1].start_char, expected);
    }

    #[tokio::test]
    async fn test_end_offset_follows_source_spans_through_extra_whitespace() {
        let text = "First sentence here.   Second sentence follows.\n\nThird one ends it.";
        let chunker = TextChunker::new(ChunkingPolicy::SentenceAware { max_chars: 1000 });
        let nodes = chunker.chunk_document(&doc(text)).await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].start_char, 0);
        // The joined node text is shorter than the source slice, but the
        // offsets still address the original document.
        assert_eq!(nodes[0].end_char, text.chars().count());
        assert!(nodes[0].text.chars().count() < text.chars().count());
    }

    #[test]
    fn test_embedding_and_error_are_mutually_exclusive() {
        let document = doc("Some text.");
        let mut node = TextNode::new(&document, "none", 0, document.text.clone());
        node.set_embedding(vec![0.1, 0.2], "model-a");
        assert!(node.is_embedded());
        assert!(node.embedding_error.is_none());
        node.set_embedding_error("provider down");
        assert!(!node.is_embedded());
        assert!(node.embedding_model.is_none());
        node.set_embedding(vec![0.3], "model-a");
        assert!(node.embedding_error.is_none());
    }

    #[test]
    fn test_content_hash_is_stable_per_text() {
        let document = doc("Same text.");
        let a = TextNode::new(&document, "none", 0, "Same text.".to_string());
        let b = TextNode::new(&document, "none", 0, "Same text.".to_string());
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.id, b.id);
    }
}
