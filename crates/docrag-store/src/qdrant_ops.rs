//! Qdrant-backed hybrid collections.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, Filter, HnswConfigDiffBuilder, Modifier, NamedVectors,
    PointId, PointStruct, PrefetchQueryBuilder, Query, QueryPointsBuilder, RetrievedPoint,
    ScoredPoint, ScrollPointsBuilder, SparseVectorParamsBuilder, SparseVectorsConfigBuilder,
    UpsertPointsBuilder, Vector, VectorInput, VectorParamsBuilder, VectorsConfigBuilder,
    value::Kind,
};

use crate::vector_store::{
    BoxFuture, DENSE_VECTOR, FieldCondition, FieldValue, Fusion, HybridCollection, HybridPoint,
    Prefetch, QueryVector, RecordPoint, SPARSE_VECTOR, ScoredVectorPoint, VectorFilter,
    VectorStore, VectorStoreError,
};

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;

const HNSW_M: u64 = 16;
const HNSW_EF_CONSTRUCT: u64 = 100;
const SCROLL_PAGE: u32 = 100;

/// Thin wrapper over [`Qdrant`] client encapsulating hybrid collection operations.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps").finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Create a new `QdrantOps` connected to the given gRPC URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str, api_key: Option<&str>) -> QdrantResult<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(Box::new)?;
        Ok(Self { client })
    }

    /// Access the underlying Qdrant client for advanced operations.
    #[must_use]
    pub fn client(&self) -> &Qdrant {
        &self.client
    }

    /// Create a collection with a cosine dense field and an IDF-weighted sparse field.
    ///
    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached or collection creation fails.
    pub async fn create_hybrid_collection(
        &self,
        collection: &str,
        layout: &HybridCollection,
    ) -> QdrantResult<()> {
        let mut vectors = VectorsConfigBuilder::default();
        vectors.add_named_vector_params(
            DENSE_VECTOR,
            VectorParamsBuilder::new(layout.dense_dim, Distance::Cosine).hnsw_config(
                HnswConfigDiffBuilder::default()
                    .m(HNSW_M)
                    .ef_construct(HNSW_EF_CONSTRUCT),
            ),
        );
        let mut sparse = SparseVectorsConfigBuilder::default();
        sparse.add_named_vector_params(
            SPARSE_VECTOR,
            SparseVectorParamsBuilder::default().modifier(Modifier::Idf),
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(vectors)
                    .sparse_vectors_config(sparse),
            )
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Check whether a collection exists.
    ///
    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached.
    pub async fn collection_exists(&self, collection: &str) -> QdrantResult<bool> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(Box::new)
    }

    /// Delete a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection cannot be deleted.
    pub async fn delete_collection(&self, collection: &str) -> QdrantResult<()> {
        self.client
            .delete_collection(collection)
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Upsert points and wait until they are indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert(&self, collection: &str, points: Vec<PointStruct>) -> QdrantResult<()> {
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// Run prefetch queries and fuse their candidate lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn query_fused(
        &self,
        collection: &str,
        prefetch: Vec<Prefetch>,
        fusion: Fusion,
        limit: u64,
    ) -> QdrantResult<Vec<ScoredPoint>> {
        let mut prefetch = prefetch;
        let builder = if prefetch.len() == 1 {
            let p = prefetch.remove(0);
            QueryPointsBuilder::new(collection)
                .query(Query::new_nearest(vector_input(p.vector)))
                .using(p.using)
                .limit(limit.min(p.limit))
                .with_payload(true)
        } else {
            let fusion = match fusion {
                Fusion::Rrf => qdrant_client::qdrant::Fusion::Rrf,
            };
            let mut builder = QueryPointsBuilder::new(collection)
                .query(Query::new_fusion(fusion))
                .limit(limit)
                .with_payload(true);
            for p in prefetch {
                builder = builder.add_prefetch(
                    PrefetchQueryBuilder::default()
                        .query(Query::new_nearest(vector_input(p.vector)))
                        .using(p.using)
                        .limit(p.limit),
                );
            }
            builder
        };
        let response = self.client.query(builder).await.map_err(Box::new)?;
        Ok(response.result)
    }

    /// Scroll every point matching `filter`, following pagination offsets.
    ///
    /// # Errors
    ///
    /// Returns an error if the scroll operation fails.
    pub async fn scroll_filtered(
        &self,
        collection: &str,
        filter: Filter,
    ) -> QdrantResult<Vec<RetrievedPoint>> {
        let mut points = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(collection)
                .filter(filter.clone())
                .with_payload(true)
                .with_vectors(false)
                .limit(SCROLL_PAGE);

            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }

            let response = self.client.scroll(builder).await.map_err(Box::new)?;
            points.extend(response.result);

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(points)
    }

    /// Convert a JSON payload map to a Qdrant payload map.
    #[must_use]
    pub fn json_to_payload(
        payload: HashMap<String, serde_json::Value>,
    ) -> HashMap<String, qdrant_client::qdrant::Value> {
        payload
            .into_iter()
            .map(|(k, v)| (k, json_to_qdrant_value(v)))
            .collect()
    }
}

impl VectorStore for QdrantOps {
    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn create_collection(
        &self,
        collection: &str,
        layout: HybridCollection,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.create_hybrid_collection(&collection, &layout)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<HybridPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let qdrant_points = points.into_iter().map(hybrid_point_to_qdrant).collect();
            self.upsert(&collection, qdrant_points)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))
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
            let results = self
                .query_fused(&collection, prefetch, fusion, limit)
                .await
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            Ok(results.into_iter().map(scored_point_to_vector).collect())
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<Vec<RecordPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let points = self
                .scroll_filtered(&collection, vector_filter_to_qdrant(filter))
                .await
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            Ok(points
                .into_iter()
                .map(|p| RecordPoint {
                    id: point_id_to_string(p.id),
                    payload: payload_to_json(p.payload),
                })
                .collect())
        })
    }
}

fn hybrid_point_to_qdrant(point: HybridPoint) -> PointStruct {
    let payload = QdrantOps::json_to_payload(point.payload);
    let vectors = NamedVectors::default()
        .add_vector(DENSE_VECTOR, Vector::new_dense(point.dense))
        .add_vector(
            SPARSE_VECTOR,
            Vector::new_sparse(point.sparse.indices, point.sparse.values),
        );
    PointStruct::new(point.id, vectors, payload)
}

fn json_to_qdrant_value(value: serde_json::Value) -> qdrant_client::qdrant::Value {
    use qdrant_client::qdrant::{ListValue, NullValue, Struct};

    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(NullValue::NullValue.into()),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant_value(v)))
                .collect(),
        }),
    };
    qdrant_client::qdrant::Value { kind: Some(kind) }
}

fn vector_filter_to_qdrant(filter: VectorFilter) -> Filter {
    let must: Vec<_> = filter
        .must
        .into_iter()
        .map(field_condition_to_qdrant)
        .collect();
    let must_not: Vec<_> = filter
        .must_not
        .into_iter()
        .map(field_condition_to_qdrant)
        .collect();

    let mut f = Filter::default();
    if !must.is_empty() {
        f.must = must;
    }
    if !must_not.is_empty() {
        f.must_not = must_not;
    }
    f
}

fn field_condition_to_qdrant(cond: FieldCondition) -> qdrant_client::qdrant::Condition {
    match cond.value {
        FieldValue::Integer(v) => qdrant_client::qdrant::Condition::matches(cond.field, v),
        FieldValue::Text(v) => qdrant_client::qdrant::Condition::matches(cond.field, v),
    }
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> Option<serde_json::Value> {
    let json = match value.kind? {
        Kind::StringValue(s) => serde_json::Value::String(s),
        Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
        Kind::DoubleValue(d) => serde_json::Number::from_f64(d).map(serde_json::Value::Number)?,
        Kind::BoolValue(b) => serde_json::Value::Bool(b),
        Kind::NullValue(_) => serde_json::Value::Null,
        Kind::ListValue(list) => serde_json::Value::Array(
            list.values
                .into_iter()
                .filter_map(qdrant_value_to_json)
                .collect(),
        ),
        Kind::StructValue(s) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .filter_map(|(k, v)| qdrant_value_to_json(v).map(|j| (k, j)))
                .collect(),
        ),
    };
    Some(json)
}

fn payload_to_json(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> HashMap<String, serde_json::Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| qdrant_value_to_json(v).map(|j| (k, j)))
        .collect()
}

fn vector_input(vector: QueryVector) -> VectorInput {
    match vector {
        QueryVector::Dense(v) => VectorInput::new_dense(v),
        QueryVector::Sparse(s) => VectorInput::new_sparse(s.indices, s.values),
    }
}

fn point_id_to_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn scored_point_to_vector(point: ScoredPoint) -> ScoredVectorPoint {
    ScoredVectorPoint {
        id: point_id_to_string(point.id),
        score: point.score,
        payload: payload_to_json(point.payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid_url() {
        let ops = QdrantOps::new("http://localhost:6334", None);
        assert!(ops.is_ok());
    }

    #[test]
    fn new_invalid_url() {
        let ops = QdrantOps::new("not a valid url", None);
        assert!(ops.is_err());
    }

    #[test]
    fn debug_format() {
        let ops = QdrantOps::new("http://localhost:6334", Some("key")).unwrap();
        let dbg = format!("{ops:?}");
        assert!(dbg.contains("QdrantOps"));
        assert!(!dbg.contains("key"));
    }

    #[test]
    fn payload_roundtrip_keeps_lists() {
        let mut payload = HashMap::new();
        payload.insert("doc_id".to_owned(), serde_json::json!("apis_Workbook"));
        payload.insert("chunk_index".to_owned(), serde_json::json!(3));
        payload.insert("path_hierarchy".to_owned(), serde_json::json!(["apis", "excel"]));

        let qdrant = QdrantOps::json_to_payload(payload.clone());
        let back = payload_to_json(qdrant);
        assert_eq!(back, payload);
    }

    #[test]
    fn hybrid_point_conversion_sets_both_vectors() {
        let point = HybridPoint {
            id: "6b1c1f1e-3f7e-4b3a-9a52-0c4f7d0d2e11".into(),
            dense: vec![0.1, 0.2],
            sparse: docrag_llm::SparseVector {
                indices: vec![1, 7],
                values: vec![0.5, 1.0],
            },
            payload: HashMap::new(),
        };
        let converted = hybrid_point_to_qdrant(point);
        assert!(converted.vectors.is_some());
        assert!(converted.id.is_some());
    }

    #[test]
    fn empty_filter_converts_to_default() {
        let f = vector_filter_to_qdrant(VectorFilter::default());
        assert!(f.must.is_empty());
        assert!(f.must_not.is_empty());
    }

    #[test]
    fn text_filter_converts_to_must() {
        let f = vector_filter_to_qdrant(VectorFilter::must_match(
            "doc_id",
            FieldValue::Text("docs_intro".into()),
        ));
        assert_eq!(f.must.len(), 1);
    }
}
