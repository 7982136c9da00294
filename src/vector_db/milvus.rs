use super::{SearchResult, VectorDatabase};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Milvus vector database client (using REST API v2)
pub struct MilvusVectorDatabase {
    client: Client,
    address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCollectionRequest<'a> {
    collection_name: &'a str,
    dimension: usize,
    metric_type: &'a str,
    id_type: &'a str,
    #[serde(rename = "autoID")]
    auto_id: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRequest<'a> {
    collection_name: &'a str,
    data: Vec<InsertData<'a>>,
}

#[derive(Debug, Serialize)]
struct InsertData<'a> {
    vector: &'a [f32],
    metadata: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertResult {
    #[serde(default)]
    insert_ids: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    collection_name: &'a str,
    data: Vec<&'a [f32]>,
    limit: usize,
    output_fields: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    distance: f32,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct HasCollection {
    has: bool,
}

/// Milvus answers HTTP 200 with a non-zero `code` on failure
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl MilvusVectorDatabase {
    pub fn new(address: &str) -> Self {
        Self {
            client: Client::new(),
            address: address.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/vectordb/{}", self.address, path)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send Milvus {} request", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Milvus API error ({}): {}", status, body);
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Milvus {} response", path))?;
        if envelope.code != 0 {
            anyhow::bail!(
                "Milvus {} failed ({}): {}",
                path,
                envelope.code,
                envelope.message.unwrap_or_default()
            );
        }
        Ok(envelope.data)
    }
}

#[async_trait::async_trait]
impl VectorDatabase for MilvusVectorDatabase {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let existing: Option<HasCollection> = self
            .post("collections/has", &json!({ "collectionName": name }))
            .await?;
        if existing.is_some_and(|e| e.has) {
            return Ok(());
        }

        let request = CreateCollectionRequest {
            collection_name: name,
            dimension,
            metric_type: "COSINE",
            id_type: "Int64",
            auto_id: true,
        };
        self.post::<_, Value>("collections/create", &request).await?;
        tracing::info!("Created Milvus collection {} (dim {})", name, dimension);
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        vectors: &[Vec<f32>],
        metadata: &[Value],
    ) -> Result<Vec<String>> {
        if vectors.len() != metadata.len() {
            anyhow::bail!("Vectors and metadata length mismatch");
        }

        let request = InsertRequest {
            collection_name: collection,
            data: vectors
                .iter()
                .zip(metadata)
                .map(|(vector, metadata)| InsertData { vector, metadata })
                .collect(),
        };

        let result: InsertResult = self
            .post("entities/insert", &request)
            .await?
            .context("Milvus insert returned no data")?;
        Ok(result.insert_ids.iter().map(id_to_string).collect())
    }

    async fn search(&self, collection: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let request = SearchRequest {
            collection_name: collection,
            data: vec![vector],
            limit,
            output_fields: vec!["metadata"],
        };

        let hits: Vec<SearchHit> = self
            .post("entities/search", &request)
            .await?
            .unwrap_or_default();

        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                id: id_to_string(&hit.id),
                score: hit.distance,
                metadata: hit.metadata,
            })
            .collect())
    }

    async fn delete_file(&self, collection: &str, filepath: &str) -> Result<()> {
        let filter = format!("metadata[\"filepath\"] == {}", json!(filepath));
        self.post::<_, Value>(
            "entities/delete",
            &json!({ "collectionName": collection, "filter": filter }),
        )
        .await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.post::<_, Value>("collections/drop", &json!({ "collectionName": name }))
            .await?;
        Ok(())
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_uses_milvus_field_names() {
        let request = CreateCollectionRequest {
            collection_name: "sas_index",
            dimension: 768,
            metric_type: "COSINE",
            id_type: "Int64",
            auto_id: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "collectionName": "sas_index",
                "dimension": 768,
                "metricType": "COSINE",
                "idType": "Int64",
                "autoID": true
            })
        );
    }

    #[test]
    fn test_envelope_parsing() {
        let ok: Envelope<InsertResult> = serde_json::from_value(json!({
            "code": 0,
            "data": { "insertCount": 2, "insertIds": [451, "abc"] }
        }))
        .unwrap();
        let ids: Vec<String> = ok.data.unwrap().insert_ids.iter().map(id_to_string).collect();
        assert_eq!(ids, vec!["451", "abc"]);

        let failed: Envelope<Value> = serde_json::from_value(json!({
            "code": 1100,
            "message": "collection not found"
        }))
        .unwrap();
        assert_eq!(failed.code, 1100);
        assert!(failed.data.is_none());
    }
}
