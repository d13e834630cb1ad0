use std::collections::HashMap;
use std::sync::RwLock;

use crate::vector_store::{
    BoxFuture, DENSE_VECTOR, FieldValue, Fusion, HybridCollection, HybridPoint, Prefetch,
    QueryVector, RecordPoint, SPARSE_VECTOR, ScoredVectorPoint, SparseVector, VectorFilter,
    VectorStore, VectorStoreError,
};

/// Reciprocal rank fusion constant.
const RRF_K: f32 = 60.0;

struct StoredPoint {
    dense: Vec<f32>,
    sparse: SparseVector,
    payload: HashMap<String, serde_json::Value>,
}

struct InMemoryCollection {
    layout: HybridCollection,
    points: HashMap<String, StoredPoint>,
}

/// Process-local hybrid store with the same query semantics as the Qdrant backend.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of points in `collection`, `None` when it does not exist.
    #[must_use]
    pub fn point_count(&self, collection: &str) -> Option<usize> {
        let cols = self.collections.read().ok()?;
        cols.get(collection).map(|c| c.points.len())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn matches_filter(payload: &HashMap<String, serde_json::Value>, filter: &VectorFilter) -> bool {
    for cond in &filter.must {
        let Some(val) = payload.get(&cond.field) else {
            return false;
        };
        if !field_matches(val, &cond.value) {
            return false;
        }
    }
    for cond in &filter.must_not {
        if let Some(val) = payload.get(&cond.field)
            && field_matches(val, &cond.value)
        {
            return false;
        }
    }
    true
}

fn field_matches(val: &serde_json::Value, expected: &FieldValue) -> bool {
    match expected {
        FieldValue::Integer(i) => val.as_i64() == Some(*i),
        FieldValue::Text(s) => val.as_str() == Some(s.as_str()),
    }
}

/// Inverse document frequency per sparse index over the whole collection.
#[allow(clippy::cast_precision_loss)]
fn sparse_idf(points: &HashMap<String, StoredPoint>) -> HashMap<u32, f32> {
    let mut df: HashMap<u32, usize> = HashMap::new();
    for p in points.values() {
        for &idx in &p.sparse.indices {
            *df.entry(idx).or_insert(0) += 1;
        }
    }
    let n = points.len() as f32;
    df.into_iter()
        .map(|(idx, count)| {
            let count = count as f32;
            (idx, (1.0 + (n - count + 0.5) / (count + 0.5)).ln())
        })
        .collect()
}

fn sparse_score(query: &SparseVector, doc: &SparseVector, idf: &HashMap<u32, f32>) -> f32 {
    let weighted = SparseVector {
        indices: query.indices.clone(),
        values: query
            .indices
            .iter()
            .zip(&query.values)
            .map(|(idx, v)| v * idf.get(idx).copied().unwrap_or(0.0))
            .collect(),
    };
    weighted.dot(doc)
}

/// Rank point ids for one prefetch, best first.
fn rank_prefetch(col: &InMemoryCollection, prefetch: &Prefetch) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = match &prefetch.vector {
        QueryVector::Dense(v) if prefetch.using == DENSE_VECTOR => col
            .points
            .iter()
            .map(|(id, p)| (id.clone(), cosine_similarity(v, &p.dense)))
            .collect(),
        QueryVector::Sparse(s) if prefetch.using == SPARSE_VECTOR => {
            let idf = sparse_idf(&col.points);
            col.points
                .iter()
                .map(|(id, p)| (id.clone(), sparse_score(s, &p.sparse, &idf)))
                .filter(|(_, score)| *score > 0.0)
                .collect()
        }
        _ => Vec::new(),
    };
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    #[expect(clippy::cast_possible_truncation)]
    scored.truncate(prefetch.limit as usize);
    scored
}

/// Fuse ranked lists: each appearance contributes `1 / (k + rank)`.
#[allow(clippy::cast_precision_loss)]
fn reciprocal_rank_fusion(lists: &[Vec<(String, f32)>]) -> Vec<(String, f32)> {
    let mut fused: HashMap<&str, f32> = HashMap::new();
    for list in lists {
        for (rank, (id, _)) in list.iter().enumerate() {
            *fused.entry(id.as_str()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
    }
    let mut out: Vec<(String, f32)> = fused
        .into_iter()
        .map(|(id, score)| (id.to_owned(), score))
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

impl VectorStore for InMemoryVectorStore {
    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn create_collection(
        &self,
        collection: &str,
        layout: HybridCollection,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            if cols.contains_key(&collection) {
                return Err(VectorStoreError::Collection(format!(
                    "collection {collection} already exists"
                )));
            }
            cols.insert(
                collection,
                InMemoryCollection {
                    layout,
                    points: HashMap::new(),
                },
            );
            Ok(())
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<HybridPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Upsert(format!("collection {collection} not found"))
            })?;
            for p in points {
                if p.dense.len() as u64 != col.layout.dense_dim {
                    return Err(VectorStoreError::Upsert(format!(
                        "point {} has dimension {}, collection expects {}",
                        p.id,
                        p.dense.len(),
                        col.layout.dense_dim
                    )));
                }
                col.points.insert(
                    p.id,
                    StoredPoint {
                        dense: p.dense,
                        sparse: p.sparse,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        prefetch: Vec<Prefetch>,
        fusion: Fusion,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Query(format!("collection {collection} not found"))
            })?;

            let mut lists: Vec<_> = prefetch.iter().map(|p| rank_prefetch(col, p)).collect();
            let fused = if lists.len() == 1 {
                lists.remove(0)
            } else {
                match fusion {
                    Fusion::Rrf => reciprocal_rank_fusion(&lists),
                }
            };

            #[expect(clippy::cast_possible_truncation)]
            let limit = limit as usize;
            Ok(fused
                .into_iter()
                .take(limit)
                .filter_map(|(id, score)| {
                    let point = col.points.get(&id)?;
                    Some(ScoredVectorPoint {
                        id,
                        score,
                        payload: point.payload.clone(),
                    })
                })
                .collect())
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<Vec<RecordPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            let col = cols.get(&collection).ok_or_else(|| {
                VectorStoreError::Scroll(format!("collection {collection} not found"))
            })?;

            Ok(col
                .points
                .iter()
                .filter(|(_, sp)| matches_filter(&sp.payload, &filter))
                .map(|(id, sp)| RecordPoint {
                    id: id.clone(),
                    payload: sp.payload.clone(),
                })
                .collect())
        })
    }
}
