//! Semantic chunker.
//!
//! Splits a source document into chunks of 128-512 tokens with a 50-token
//! overlap. Boundaries prefer semantic breaks: a new chunk starts where the
//! cosine similarity of adjacent sentences drops below the configured
//! threshold. Fenced code blocks, numbered list items, and markdown headings
//! are atomic segments and are never split. Each chunk carries the source
//! path, the headings stack in effect, and the document frontmatter.

use std::sync::Arc;

use crate::config::ChunkingConfig;
use crate::embeddings::{cosine_similarity, EmbeddingService};
use crate::error::{CoreError, Result};

/// One chunk cut from a source document, before indexing.
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub text: String,
    pub ordinal: usize,
    /// Headings in effect at the start of this chunk, outermost first
    pub headings: Vec<String>,
    /// Raw YAML frontmatter, if the document had any
    pub frontmatter: Option<String>,
}

/// A segment of the document that may not be split further.
#[derive(Debug)]
struct Segment {
    text: String,
    /// Atomic segments (code fences, list items, headings) never merge with
    /// the semantic-boundary rule; they are placed whole.
    atomic: bool,
    /// Heading level if this segment is a heading line (1-6)
    heading_level: Option<usize>,
}

fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Strip and return YAML frontmatter delimited by `---` lines.
fn split_frontmatter(text: &str) -> (Option<String>, &str) {
    let trimmed = text.trim_start_matches('\u{feff}');
    if !trimmed.starts_with("---") {
        return (None, text);
    }
    let after = &trimmed[3..];
    if let Some(end) = after.find("\n---") {
        let fm = after[..end].trim().to_string();
        let rest_start = end + 4;
        let rest = after[rest_start..].trim_start_matches(['\r', '\n']);
        if !fm.is_empty() {
            return (Some(fm), rest);
        }
    }
    (None, text)
}

/// Split plain prose into sentences. Terminators keep their punctuation.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if chars.peek().is_none_or(|n| n.is_whitespace()) {
                let s = current.trim();
                if !s.is_empty() {
                    sentences.push(s.to_string());
                }
                current.clear();
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn is_numbered_list_item(line: &str) -> bool {
    let t = line.trim_start();
    let digits: String = t.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    t[digits.len()..].starts_with('.') || t[digits.len()..].starts_with(')')
}

fn heading_level(line: &str) -> Option<usize> {
    let t = line.trim_start();
    let hashes = t.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) && t.chars().nth(hashes).is_some_and(|c| c == ' ') {
        Some(hashes)
    } else {
        None
    }
}

/// Parse the document body into an ordered list of segments.
fn segment_document(body: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut prose = String::new();
    let mut code_block: Option<String> = None;

    let mut flush_prose = |buf: &mut String, segments: &mut Vec<Segment>| {
        for sentence in split_sentences(buf) {
            segments.push(Segment {
                text: sentence,
                atomic: false,
                heading_level: None,
            });
        }
        buf.clear();
    };

    for line in body.lines() {
        if let Some(block) = code_block.as_mut() {
            block.push('\n');
            block.push_str(line);
            if line.trim_start().starts_with("```") {
                segments.push(Segment {
                    text: code_block.take().unwrap_or_default(),
                    atomic: true,
                    heading_level: None,
                });
            }
            continue;
        }

        if line.trim_start().starts_with("```") {
            flush_prose(&mut prose, &mut segments);
            code_block = Some(line.to_string());
        } else if let Some(level) = heading_level(line) {
            flush_prose(&mut prose, &mut segments);
            segments.push(Segment {
                text: line.trim().to_string(),
                atomic: true,
                heading_level: Some(level),
            });
        } else if is_numbered_list_item(line) {
            flush_prose(&mut prose, &mut segments);
            segments.push(Segment {
                text: line.trim().to_string(),
                atomic: true,
                heading_level: None,
            });
        } else if line.trim().is_empty() {
            flush_prose(&mut prose, &mut segments);
        } else {
            if !prose.is_empty() {
                prose.push(' ');
            }
            prose.push_str(line.trim());
        }
    }

    // Unclosed fence: keep what we have
    if let Some(block) = code_block.take() {
        segments.push(Segment {
            text: block,
            atomic: true,
            heading_level: None,
        });
    }
    flush_prose(&mut prose, &mut segments);

    segments
}

/// Semantic document chunker
pub struct SemanticChunker {
    config: ChunkingConfig,
    embedder: Arc<EmbeddingService>,
}

impl SemanticChunker {
    pub fn new(config: ChunkingConfig, embedder: Arc<EmbeddingService>) -> Self {
        Self { config, embedder }
    }

    /// Split a document into chunks.
    pub fn chunk_document(&self, text: &str) -> Result<Vec<ChunkPiece>> {
        if text.trim().is_empty() {
            return Err(CoreError::Input("document is empty".to_string()));
        }

        let (frontmatter, body) = split_frontmatter(text);
        let segments = segment_document(body);
        if segments.is_empty() {
            return Err(CoreError::Input("document has no content".to_string()));
        }

        // Embed prose segments once for the boundary rule. Atomic segments
        // never participate in similarity decisions.
        let prose_texts: Vec<&str> = segments
            .iter()
            .filter(|s| !s.atomic)
            .map(|s| s.text.as_str())
            .collect();
        let prose_embeddings = if prose_texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed_batch(&prose_texts)
                .map_err(|e| CoreError::Storage(format!("embedding failed: {}", e)))?
        };

        let mut chunks: Vec<ChunkPiece> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;
        let mut headings_stack: Vec<(usize, String)> = Vec::new();
        let mut chunk_headings: Vec<String> = Vec::new();
        let mut prev_prose_idx: Option<usize> = None;
        let mut prose_idx = 0usize;

        let snapshot_headings =
            |stack: &[(usize, String)]| stack.iter().map(|(_, h)| h.clone()).collect::<Vec<_>>();

        macro_rules! flush {
            () => {
                if !current.trim().is_empty() {
                    chunks.push(ChunkPiece {
                        text: current.trim().to_string(),
                        ordinal: chunks.len(),
                        headings: chunk_headings.clone(),
                        frontmatter: frontmatter.clone(),
                    });
                }
                current.clear();
                current_tokens = 0;
            };
        }

        for segment in &segments {
            let seg_tokens = token_count(&segment.text);

            if let Some(level) = segment.heading_level {
                headings_stack.retain(|(l, _)| *l < level);
                let title = segment.text.trim_start_matches('#').trim().to_string();
                headings_stack.push((level, title));
            }

            let mut boundary = false;
            // Size boundary
            if current_tokens > 0 && current_tokens + seg_tokens > self.config.max_chunk_size {
                boundary = true;
            }
            // Semantic boundary between adjacent prose sentences
            if !segment.atomic {
                if let Some(prev) = prev_prose_idx {
                    if !boundary
                        && current_tokens >= self.config.min_chunk_size
                        && prose_idx < prose_embeddings.len()
                    {
                        let sim = cosine_similarity(
                            &prose_embeddings[prev],
                            &prose_embeddings[prose_idx],
                        );
                        if sim < self.config.boundary_threshold {
                            boundary = true;
                        }
                    }
                }
                prev_prose_idx = Some(prose_idx);
                prose_idx += 1;
            }

            if boundary {
                let overlap = tail_tokens(&current, self.config.overlap);
                flush!();
                chunk_headings = snapshot_headings(&headings_stack);
                if !overlap.is_empty() {
                    current = overlap;
                    current_tokens = token_count(&current);
                }
            } else if current.is_empty() {
                chunk_headings = snapshot_headings(&headings_stack);
            }

            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&segment.text);
            current_tokens += seg_tokens;
        }
        flush!();

        Ok(chunks)
    }
}

/// Last `n` whitespace tokens of a chunk, used as overlap carry-over.
fn tail_tokens(text: &str, n: usize) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() <= n {
        return String::new();
    }
    tokens[tokens.len() - n..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> SemanticChunker {
        SemanticChunker::new(
            ChunkingConfig::default(),
            Arc::new(EmbeddingService::deterministic()),
        )
    }

    fn words(n: usize, stem: &str) -> String {
        (0..n).map(|i| format!("{}{}", stem, i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_empty_document_rejected() {
        let err = chunker().chunk_document("   \n ").unwrap_err();
        assert_eq!(err.kind(), "input_error");
    }

    #[test]
    fn test_small_document_single_chunk() {
        let chunks = chunker()
            .chunk_document("Python is widely used for machine learning.")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert!(chunks[0].text.contains("machine learning"));
    }

    #[test]
    fn test_frontmatter_extracted() {
        let doc = "---\ntitle: Notes\ntags: [ml]\n---\nBody text here.";
        let chunks = chunker().chunk_document(doc).unwrap();
        assert_eq!(chunks[0].frontmatter.as_deref(), Some("title: Notes\ntags: [ml]"));
        assert!(!chunks[0].text.contains("title:"));
    }

    #[test]
    fn test_code_fence_never_split() {
        let code = format!("```rust\n{}\n```", words(600, "tok"));
        let doc = format!("Intro sentence.\n\n{}\n\nOutro sentence.", code);
        let chunks = chunker().chunk_document(&doc).unwrap();
        // The fence must appear intact in exactly one chunk
        let holding: Vec<_> = chunks
            .iter()
            .filter(|c| c.text.contains("```rust"))
            .collect();
        assert_eq!(holding.len(), 1);
        assert!(holding[0].text.contains("tok599"));
    }

    #[test]
    fn test_max_size_forces_boundary() {
        let mut doc = String::new();
        for i in 0..40 {
            doc.push_str(&format!("Sentence number {} {}.\n\n", i, words(20, "w")));
        }
        let chunks = chunker().chunk_document(&doc).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // max + carried overlap is the hard ceiling
            assert!(chunk.token_count() <= 512 + 50 + 25, "chunk too large");
        }
    }

    #[test]
    fn test_headings_stack_carried() {
        let doc = format!(
            "# Guide\n\n## Setup\n\n{}.\n\n## Usage\n\n{}.",
            words(200, "setup"),
            words(200, "usage")
        );
        let chunks = chunker().chunk_document(&doc).unwrap();
        let usage_chunk = chunks
            .iter()
            .find(|c| c.text.contains("usage199"))
            .expect("usage chunk");
        assert!(usage_chunk.headings.contains(&"Guide".to_string()));
        assert!(usage_chunk.headings.contains(&"Usage".to_string()));
        assert!(!usage_chunk.headings.contains(&"Setup".to_string()));
    }

    #[test]
    fn test_ordinals_sequential() {
        let mut doc = String::new();
        for i in 0..30 {
            doc.push_str(&format!("Block {} {}.\n\n", i, words(30, "x")));
        }
        let chunks = chunker().chunk_document(&doc).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
        }
    }

    #[test]
    fn test_numbered_list_items_atomic() {
        let doc = format!(
            "{}.\n\n1. first step of the procedure\n2. second step of the procedure\n\n{}.",
            words(120, "a"),
            words(120, "b")
        );
        let chunks = chunker().chunk_document(&doc).unwrap();
        for chunk in &chunks {
            // A list item is either absent or fully present
            let has_start = chunk.text.contains("1. first step");
            let has_end = chunk.text.contains("of the procedure");
            if has_start {
                assert!(has_end);
            }
        }
    }

    #[test]
    fn test_sentence_split() {
        let s = split_sentences("One two. Three four! Five six? Seven");
        assert_eq!(s.len(), 4);
        assert_eq!(s[0], "One two.");
        assert_eq!(s[3], "Seven");
    }
}

impl ChunkPiece {
    /// Whitespace-word token approximation.
    pub fn token_count(&self) -> usize {
        token_count(&self.text)
    }
}
