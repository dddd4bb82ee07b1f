//! Pre-embedded reference documents, one JSONL file per document

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::RetrievalError;

/// One embedded excerpt of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// All chunks of one reference document
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    pub name: String,
    pub chunks: Vec<Chunk>,
}

impl DocumentIndex {
    /// Read `<name>.jsonl`, one `{"text", "embedding"}` object per line
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| RetrievalError::Corpus(format!("{} has no file name", path.display())))?;

        let reader = BufReader::new(File::open(path)?);
        let mut chunks = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(&line).map_err(|e| {
                RetrievalError::Corpus(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
            chunks.push(chunk);
        }

        if let Some(first) = chunks.first() {
            let dim = first.embedding.len();
            if let Some(bad) = chunks.iter().position(|c| c.embedding.len() != dim) {
                return Err(RetrievalError::Corpus(format!(
                    "{}: chunk {} has dimension {}, expected {}",
                    path.display(),
                    bad,
                    chunks[bad].embedding.len(),
                    dim
                )));
            }
        }

        Ok(Self { name, chunks })
    }

    /// The `k` chunks most similar to the query vector, best first
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<&Chunk> {
        let mut scored: Vec<(f32, &Chunk)> = self
            .chunks
            .iter()
            .map(|c| (cosine_similarity(query, &c.embedding), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, c)| c).collect()
    }
}

/// Load every `*.jsonl` document under a directory, ordered by file name
pub fn load_corpus(dir: &Path) -> Result<Vec<DocumentIndex>, RetrievalError> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "jsonl").unwrap_or(false))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(RetrievalError::Corpus(format!(
            "no .jsonl documents in {}",
            dir.display()
        )));
    }

    let docs = paths
        .iter()
        .map(|p| DocumentIndex::load(p))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!("Loaded {} reference documents from {}", docs.len(), dir.display());
    Ok(docs)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
