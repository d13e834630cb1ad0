//! Local lexical (sparse) encoding.
//!
//! Term weights carry only the BM25 term-frequency saturation; the inverse
//! document frequency is applied by the vector store at query time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sparse vector with strictly ascending, unique indices and non-negative values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product over shared indices.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        let (mut i, mut j, mut sum) = (0, 0, 0.0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

pub trait SparseEncoder: Send + Sync {
    /// Encode each text into a sparse vector, one output per input in order.
    fn embed(&self, texts: &[String]) -> Vec<SparseVector>;
}

/// BM25-style encoder over lower-cased words and single CJK characters.
#[derive(Clone, Debug)]
pub struct Bm25Encoder {
    k1: f32,
    b: f32,
    avg_len: f32,
}

impl Default for Bm25Encoder {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            avg_len: 256.0,
        }
    }
}

impl Bm25Encoder {
    #[must_use]
    pub fn new(k1: f32, b: f32, avg_len: f32) -> Self {
        Self {
            k1,
            b,
            avg_len: avg_len.max(1.0),
        }
    }

    /// Encode a single text.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn encode(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return SparseVector::default();
        }

        let mut tf: BTreeMap<u32, f32> = BTreeMap::new();
        for token in &tokens {
            *tf.entry(token_index(token)).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_len);
        let (indices, values) = tf
            .into_iter()
            .map(|(idx, freq)| (idx, freq * (self.k1 + 1.0) / (freq + norm)))
            .unzip();

        SparseVector { indices, values }
    }
}

impl SparseEncoder for Bm25Encoder {
    fn embed(&self, texts: &[String]) -> Vec<SparseVector> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{AC00}'..='\u{D7AF}')
}

/// Split text into lower-cased alphanumeric words; every CJK character is its own token.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() || c == '_' {
            word.extend(c.to_lowercase());
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

fn token_index(token: &str) -> u32 {
    let hash = blake3::hash(token.as_bytes());
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
