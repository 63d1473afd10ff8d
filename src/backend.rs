//! Record store adapter: a MongoDB collection or a local JSON snapshot.
//!
//! `Mongo` pushes the filter down to the server. `Local` holds an in-memory
//! copy of a JSON array file and evaluates filters with
//! [`crate::campaign::matches`]. Both return records in store order, capped
//! at the requested limit, with the storage `_id` removed.

use std::path::Path;
use std::sync::Arc;

use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::{self, Document};
use serde_json::{Map, Value};
use tracing::info;

use crate::campaign::{self, CampaignRecord, FilterError, FilterExpression};
use crate::clamp_limit;
use crate::error::PipelineError;

/// Storage `_id` key stripped from every returned record.
const STORAGE_ID: &str = "_id";

/// Read-only campaign store shared by every turn.
#[derive(Clone)]
pub enum CampaignBackend {
    Mongo(Collection<Document>),
    Local(Arc<Vec<Map<String, Value>>>),
}

impl CampaignBackend {
    /// Build a MongoDB-backed store. The driver connects lazily, so an
    /// unreachable server surfaces on the first query.
    pub async fn connect_mongo(
        uri: &str,
        db_name: &str,
        collection: &str,
    ) -> Result<Self, PipelineError> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .map_err(|e| PipelineError::Retrieval(format!("MongoDB connection failed: {e}")))?;
        Ok(Self::Mongo(
            client.database(db_name).collection::<Document>(collection),
        ))
    }

    /// Load a JSON array of campaign documents from disk.
    pub fn load_local(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Retrieval(format!("cannot read {}: {e}", path.display()))
        })?;
        let docs: Vec<Value> = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Retrieval(format!("{} is not a JSON array: {e}", path.display()))
        })?;
        Self::from_documents(docs)
    }

    /// Build a local store from already-parsed documents.
    pub fn from_documents(docs: Vec<Value>) -> Result<Self, PipelineError> {
        let docs = docs
            .into_iter()
            .map(|doc| match doc {
                Value::Object(map) => Ok(map),
                other => Err(PipelineError::Retrieval(format!(
                    "campaign entries must be JSON objects, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Local(Arc::new(docs)))
    }

    /// Execute `filter` and return at most `limit` records (clamped to 1–100).
    pub async fn retrieve(
        &self,
        filter: &FilterExpression,
        limit: usize,
    ) -> Result<Vec<CampaignRecord>, PipelineError> {
        let limit = clamp_limit(limit);

        let records = match self {
            Self::Mongo(collection) => {
                let query = to_bson_filter(filter)?;
                let cursor = collection
                    .find(query)
                    .limit(limit as i64)
                    .await
                    .map_err(mongo_err)?;
                let docs: Vec<Document> = cursor.try_collect().await.map_err(mongo_err)?;
                docs.into_iter()
                    .map(decode_document)
                    .collect::<Result<Vec<_>, _>>()?
            }
            Self::Local(docs) => {
                campaign::validate_filter(filter).map_err(filter_err)?;
                let mut out = Vec::new();
                for doc in docs.iter() {
                    if out.len() == limit {
                        break;
                    }
                    if campaign::matches(doc, filter).map_err(filter_err)? {
                        out.push(decode_map(doc.clone())?);
                    }
                }
                out
            }
        };

        info!(count = records.len(), limit, "retrieved campaigns");
        Ok(records)
    }

    /// Count every record matching `filter`, ignoring any limit.
    pub async fn count(&self, filter: &FilterExpression) -> Result<u64, PipelineError> {
        match self {
            Self::Mongo(collection) => {
                let query = to_bson_filter(filter)?;
                collection.count_documents(query).await.map_err(mongo_err)
            }
            Self::Local(docs) => {
                campaign::validate_filter(filter).map_err(filter_err)?;
                let mut total = 0;
                for doc in docs.iter() {
                    if campaign::matches(doc, filter).map_err(filter_err)? {
                        total += 1;
                    }
                }
                Ok(total)
            }
        }
    }
}

fn to_bson_filter(filter: &FilterExpression) -> Result<Document, PipelineError> {
    bson::to_document(filter)
        .map_err(|e| PipelineError::Retrieval(format!("filter is not a valid query document: {e}")))
}

fn decode_document(mut doc: Document) -> Result<CampaignRecord, PipelineError> {
    doc.remove(STORAGE_ID);
    bson::from_document(doc)
        .map_err(|e| PipelineError::Retrieval(format!("undecodable campaign record: {e}")))
}

fn decode_map(mut doc: Map<String, Value>) -> Result<CampaignRecord, PipelineError> {
    doc.remove(STORAGE_ID);
    serde_json::from_value(Value::Object(doc))
        .map_err(|e| PipelineError::Retrieval(format!("undecodable campaign record: {e}")))
}

fn mongo_err(err: mongodb::error::Error) -> PipelineError {
    PipelineError::Retrieval(format!("MongoDB error: {err}"))
}

fn filter_err(err: FilterError) -> PipelineError {
    PipelineError::Retrieval(err.to_string())
}
