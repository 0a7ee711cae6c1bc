use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::vectors::VectorsOptions;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointId, PointStruct, SearchParams, SearchPoints,
    UpsertPoints, VectorParamsBuilder, WithPayloadSelector, WithVectorsSelector, WriteOrdering,
};
use qdrant_client::Qdrant;
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, info};

use super::types::IssueHit;
use super::{IssueIndex, QDRANT_URL_ENV, TARGET_VECTOR};
use crate::error::ClusterError;

const ISSUE_COLLECTION: &str = "issues";

/// Qdrant-backed issue index. Centroids live in a single collection keyed by
/// issue id; search is cosine per collection config.
pub struct QdrantIssueIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIssueIndex {
    /// Connect using the QDRANT_URL environment variable and make sure the
    /// issue collection exists.
    pub async fn from_env(dimension: usize) -> Result<Self, ClusterError> {
        let url = std::env::var(QDRANT_URL_ENV)
            .map_err(|_| ClusterError::Retrieval(format!("{} not set", QDRANT_URL_ENV)))?;
        Self::connect(&url, ISSUE_COLLECTION, dimension).await
    }

    pub async fn connect(
        url: &str,
        collection: &str,
        dimension: usize,
    ) -> Result<Self, ClusterError> {
        let client = Qdrant::from_url(url)
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ClusterError::Retrieval(format!("failed to build client: {}", e)))?;

        let exists = client
            .collection_exists(collection)
            .await
            .map_err(|e| ClusterError::Retrieval(format!("collection check failed: {}", e)))?;

        if !exists {
            info!(target: TARGET_VECTOR, "Creating issue collection '{}' ({} dims)", collection, dimension);
            client
                .create_collection(
                    CreateCollectionBuilder::new(collection).vectors_config(
                        VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| {
                    ClusterError::Retrieval(format!("collection creation failed: {}", e))
                })?;
        }

        Ok(QdrantIssueIndex {
            client,
            collection: collection.to_string(),
        })
    }
}

#[async_trait]
impl IssueIndex for QdrantIssueIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<IssueHit>, ClusterError> {
        let search_points = SearchPoints {
            collection_name: self.collection.clone(),
            vector: vector.to_vec(),
            limit: k as u64,
            with_payload: Some(WithPayloadSelector::from(true)),
            with_vectors: Some(WithVectorsSelector::from(true)),
            params: Some(SearchParams {
                hnsw_ef: Some(128),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self.client.search_points(search_points).await.map_err(|e| {
            error!(target: TARGET_VECTOR, "Issue search failed: {:?}", e);
            ClusterError::Retrieval(format!("search failed: {}", e))
        })?;

        let mut hits = Vec::with_capacity(response.result.len());
        for scored_point in response.result {
            let issue_id = match scored_point
                .id
                .and_then(|id| id.point_id_options)
            {
                Some(PointIdOptions::Num(num)) => num as i64,
                _ => {
                    return Err(ClusterError::Retrieval(
                        "expected numeric point id".to_string(),
                    ))
                }
            };

            let centroid = match scored_point
                .vectors
                .and_then(|v| v.vectors_options)
            {
                Some(qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v)) => v.data,
                _ => {
                    return Err(ClusterError::Retrieval(format!(
                        "missing centroid vector for issue {}",
                        issue_id
                    )))
                }
            };

            let updated_at = scored_point
                .payload
                .get("updated_at")
                .and_then(|v| v.kind.as_ref())
                .and_then(|k| {
                    if let qdrant_client::qdrant::value::Kind::StringValue(s) = k {
                        DateTime::parse_from_rfc3339(s)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc))
                    } else {
                        None
                    }
                });

            hits.push(IssueHit {
                issue_id,
                centroid,
                updated_at,
            });
        }

        Ok(hits)
    }

    async fn upsert(&self, issue_id: i64, centroid: &[f32]) -> Result<(), ClusterError> {
        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert(
            "updated_at".to_string(),
            json!(Utc::now().to_rfc3339())
                .try_into()
                .map_err(|e| ClusterError::Retrieval(format!("payload encoding failed: {}", e)))?,
        );

        let point = PointStruct {
            id: Some(PointId {
                point_id_options: Some(PointIdOptions::Num(issue_id.try_into().map_err(
                    |_| ClusterError::Retrieval(format!("negative issue id {}", issue_id)),
                )?)),
            }),
            vectors: Some(qdrant_client::qdrant::Vectors {
                vectors_options: Some(VectorsOptions::Vector(qdrant_client::qdrant::Vector {
                    data: centroid.to_vec(),
                    indices: None,
                    vector: None,
                    vectors_count: None,
                })),
            }),
            payload,
            ..Default::default()
        };

        let upsert_points = UpsertPoints {
            collection_name: self.collection.clone(),
            points: vec![point],
            wait: Some(true),
            ordering: Some(WriteOrdering::default()),
            shard_key_selector: None,
            ..Default::default()
        };

        match self.client.upsert_points(upsert_points).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(target: TARGET_VECTOR, "Failed to upsert centroid for issue {}: {:?}", issue_id, e);
                Err(ClusterError::Retrieval(format!("upsert failed: {}", e)))
            }
        }
    }
}
