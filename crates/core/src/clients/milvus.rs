use crate::error::{ActivityError, ErrorKind};
use crate::models::{InsertionReceipt, VectorRecord};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// HTTP client for Milvus' RESTful v2 vector DB API. Record ids are string
/// primary keys, so redelivered inserts upsert instead of duplicating.
pub struct MilvusStore {
    endpoint: String,
    client: Client,
}

impl MilvusStore {
    pub fn new(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ActivityError> {
        let response = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                ActivityError::new(
                    ErrorKind::Connection,
                    format!("vector store request failed: {error}"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActivityError::new(
                ErrorKind::Connection,
                format!("vector store returned {status} for {path}"),
            ));
        }

        let payload: Value = response.json().await.map_err(|error| {
            ActivityError::new(
                ErrorKind::Connection,
                format!("vector store response was unreadable: {error}"),
            )
        })?;

        let code = payload.pointer("/code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let message = payload
                .pointer("/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let kind = if message.contains("dim") || message.contains("dimension") {
                ErrorKind::SchemaMismatch
            } else {
                ErrorKind::Connection
            };
            return Err(ActivityError::new(
                kind,
                format!("vector store rejected {path}: {message}"),
            ));
        }

        Ok(payload)
    }
}

#[async_trait]
impl VectorStore for MilvusStore {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), ActivityError> {
        let has = self
            .post(
                "/v2/vectordb/collections/has",
                json!({ "collectionName": name }),
            )
            .await?;
        if has.pointer("/data/has").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(());
        }

        let create = self
            .post(
                "/v2/vectordb/collections/create",
                json!({
                    "collectionName": name,
                    "schema": {
                        "autoID": false,
                        "fields": [
                            {
                                "fieldName": "record_id",
                                "dataType": "VarChar",
                                "isPrimary": true,
                                "elementTypeParams": { "max_length": "64" }
                            },
                            {
                                "fieldName": "embedding",
                                "dataType": "FloatVector",
                                "elementTypeParams": { "dim": dimension.to_string() }
                            },
                            {
                                "fieldName": "document_id",
                                "dataType": "VarChar",
                                "elementTypeParams": { "max_length": "512" }
                            },
                            {
                                "fieldName": "run_id",
                                "dataType": "VarChar",
                                "elementTypeParams": { "max_length": "64" }
                            },
                            {
                                "fieldName": "segment_index",
                                "dataType": "Int64"
                            }
                        ]
                    }
                }),
            )
            .await;

        match create {
            Ok(_) => Ok(()),
            // Two initializers can both see "not exists"; losing that race is
            // not an error.
            Err(error) if error.message.contains("already exist") => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn insert(
        &self,
        name: &str,
        records: &[VectorRecord],
    ) -> Result<InsertionReceipt, ActivityError> {
        let rows: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "record_id": record.record_id,
                    "embedding": record.vector,
                    "document_id": record.document_id,
                    "run_id": record.run_id,
                    "segment_index": record.segment_index,
                })
            })
            .collect();

        let payload = self
            .post(
                "/v2/vectordb/entities/upsert",
                json!({ "collectionName": name, "data": rows }),
            )
            .await?;

        let inserted_count = payload
            .pointer("/data/upsertCount")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .unwrap_or(records.len());

        Ok(InsertionReceipt {
            inserted_count,
            record_ids: records
                .iter()
                .map(|record| record.record_id.clone())
                .collect(),
        })
    }

    async fn flush(&self, name: &str) -> Result<(), ActivityError> {
        self.post(
            "/v2/vectordb/collections/flush",
            json!({ "collectionName": name }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MilvusStore;
    use crate::error::ErrorKind;
    use crate::models::VectorRecord;
    use crate::traits::VectorStore;
    use httpmock::prelude::*;
    use reqwest::Client;

    fn records() -> Vec<VectorRecord> {
        vec![VectorRecord {
            record_id: "abc123".to_string(),
            vector: vec![0.1, 0.2],
            document_id: "doc-1".to_string(),
            run_id: "run-1".to_string(),
            segment_index: 0,
        }]
    }

    #[tokio::test]
    async fn ensure_collection_skips_create_when_present() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/vectordb/collections/has");
                then.status(200)
                    .json_body(serde_json::json!({ "code": 0, "data": { "has": true } }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/vectordb/collections/create");
                then.status(200).json_body(serde_json::json!({ "code": 0 }));
            })
            .await;

        let store = MilvusStore::new(server.base_url(), Client::new());
        store
            .ensure_collection("doc_chunks", 2)
            .await
            .expect("ensure");
        create.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn losing_the_create_race_is_benign() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/vectordb/collections/has");
                then.status(200)
                    .json_body(serde_json::json!({ "code": 0, "data": { "has": false } }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/vectordb/collections/create");
                then.status(200).json_body(serde_json::json!({
                    "code": 65535,
                    "message": "collection doc_chunks already exists"
                }));
            })
            .await;

        let store = MilvusStore::new(server.base_url(), Client::new());
        store
            .ensure_collection("doc_chunks", 2)
            .await
            .expect("race must be tolerated");
    }

    #[tokio::test]
    async fn dimension_complaints_map_to_schema_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/vectordb/entities/upsert");
                then.status(200).json_body(serde_json::json!({
                    "code": 1100,
                    "message": "the dim (2) of field data(embedding) is not equal to schema dim (4096)"
                }));
            })
            .await;

        let store = MilvusStore::new(server.base_url(), Client::new());
        let error = store
            .insert("doc_chunks", &records())
            .await
            .expect_err("must fail");
        assert_eq!(error.kind, ErrorKind::SchemaMismatch);
    }

    #[tokio::test]
    async fn upsert_returns_a_receipt_with_record_ids() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/vectordb/entities/upsert");
                then.status(200).json_body(
                    serde_json::json!({ "code": 0, "data": { "upsertCount": 1 } }),
                );
            })
            .await;

        let store = MilvusStore::new(server.base_url(), Client::new());
        let receipt = store.insert("doc_chunks", &records()).await.expect("insert");
        assert_eq!(receipt.inserted_count, 1);
        assert_eq!(receipt.record_ids, vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_store_is_a_connection_error() {
        let store = MilvusStore::new("http://127.0.0.1:1", Client::new());
        let error = store.flush("doc_chunks").await.expect_err("must fail");
        assert_eq!(error.kind, ErrorKind::Connection);
    }
}
