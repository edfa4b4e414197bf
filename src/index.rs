use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::config::IndexConfig;
use crate::message::{Email, EmailCategory, SearchQuery};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Http(String),
    #[error("index returned status {0}")]
    Status(u16),
    #[error("unexpected index response: {0}")]
    Response(String),
}

/// Shared, externally-owned document store. The engine treats it as a
/// stateless upsert target; consistency is delegated to the store's own
/// upsert-by-id semantics.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn ensure_ready(&self) -> Result<(), IndexError>;
    async fn upsert(&self, email: &Email) -> Result<(), IndexError>;
    async fn bulk_upsert(&self, emails: &[Email]) -> Result<(), IndexError>;
    async fn update_category(&self, id: &str, category: EmailCategory) -> Result<(), IndexError>;
    async fn get(&self, id: &str) -> Result<Option<Email>, IndexError>;
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Email>, IndexError>;
    async fn count(&self, query: &SearchQuery) -> Result<u64, IndexError>;
}

/// Elasticsearch-backed implementation over the plain REST API.
pub struct ElasticIndex {
    client: reqwest::Client,
    base: Url,
    index: String,
}

impl ElasticIndex {
    pub fn new(config: &IndexConfig) -> anyhow::Result<Self> {
        let mut raw = config.url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(ElasticIndex {
            client,
            base,
            index: config.index.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IndexError> {
        self.base
            .join(path)
            .map_err(|e| IndexError::Http(e.to_string()))
    }

    fn check_status(response: &reqwest::Response) -> Result<(), IndexError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(IndexError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl IndexStore for ElasticIndex {
    async fn ensure_ready(&self) -> Result<(), IndexError> {
        let url = self.endpoint(&self.index)?;
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            let response = self
                .client
                .put(url)
                .json(&index_mappings())
                .send()
                .await
                .map_err(|e| IndexError::Http(e.to_string()))?;
            Self::check_status(&response)?;
            log::info!("Created index '{}'", self.index);
        } else {
            Self::check_status(&response)?;
            log::info!("Index '{}' already exists", self.index);
        }
        Ok(())
    }

    async fn upsert(&self, email: &Email) -> Result<(), IndexError> {
        let url = self.endpoint(&format!("{}/_doc/{}", self.index, email.id))?;
        let response = self
            .client
            .put(url)
            .json(email)
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;
        Self::check_status(&response)?;
        log::debug!("Indexed message {}", email.id);
        Ok(())
    }

    async fn bulk_upsert(&self, emails: &[Email]) -> Result<(), IndexError> {
        if emails.is_empty() {
            return Ok(());
        }
        let mut payload = String::new();
        for email in emails {
            let action = json!({ "index": { "_index": self.index, "_id": email.id } });
            payload.push_str(&action.to_string());
            payload.push('\n');
            payload.push_str(
                &serde_json::to_string(email).map_err(|e| IndexError::Response(e.to_string()))?,
            );
            payload.push('\n');
        }

        let mut url = self.endpoint("_bulk")?;
        url.set_query(Some("refresh=true"));
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;
        Self::check_status(&response)?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Response(e.to_string()))?;
        if body["errors"].as_bool().unwrap_or(false) {
            log::error!("Bulk indexing reported per-document errors");
        } else {
            log::info!("Bulk indexed {} messages", emails.len());
        }
        Ok(())
    }

    async fn update_category(&self, id: &str, category: EmailCategory) -> Result<(), IndexError> {
        let url = self.endpoint(&format!("{}/_update/{}", self.index, id))?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "doc": { "category": category } }))
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;
        Self::check_status(&response)?;
        log::debug!("Updated message {id} category to {category}");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Email>, IndexError> {
        let url = self.endpoint(&format!("{}/_doc/{}", self.index, id))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(&response)?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Response(e.to_string()))?;
        let email = serde_json::from_value(body["_source"].clone())
            .map_err(|e| IndexError::Response(e.to_string()))?;
        Ok(Some(email))
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Email>, IndexError> {
        let url = self.endpoint(&format!("{}/_search", self.index))?;
        let response = self
            .client
            .post(url)
            .json(&search_body(query))
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;
        Self::check_status(&response)?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Response(e.to_string()))?;

        let hits = body["hits"]["hits"]
            .as_array()
            .ok_or_else(|| IndexError::Response("missing hits".to_string()))?;
        let mut emails = Vec::with_capacity(hits.len());
        for hit in hits {
            let email = serde_json::from_value(hit["_source"].clone())
                .map_err(|e| IndexError::Response(e.to_string()))?;
            emails.push(email);
        }
        Ok(emails)
    }

    async fn count(&self, query: &SearchQuery) -> Result<u64, IndexError> {
        let url = self.endpoint(&format!("{}/_count", self.index))?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "query": build_query(query) }))
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;
        Self::check_status(&response)?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Response(e.to_string()))?;
        body["count"]
            .as_u64()
            .ok_or_else(|| IndexError::Response("missing count".to_string()))
    }
}

/// Filter query shared by search and count. Subject and body outweigh
/// sender and recipients in relevance scoring.
fn build_query(query: &SearchQuery) -> Value {
    let mut must: Vec<Value> = Vec::new();
    if let Some(text) = &query.query {
        must.push(json!({
            "multi_match": {
                "query": text,
                "fields": ["subject^3", "body^2", "text_body^2", "from", "to"],
            }
        }));
    }
    if let Some(folder) = &query.folder {
        must.push(json!({ "term": { "folder": folder } }));
    }
    if let Some(account_id) = &query.account_id {
        must.push(json!({ "term": { "account_id": account_id } }));
    }
    if let Some(category) = &query.category {
        must.push(json!({ "term": { "category": category.as_str() } }));
    }
    if must.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "must": must } })
    }
}

fn search_body(query: &SearchQuery) -> Value {
    json!({
        "query": build_query(query),
        "from": query.from.unwrap_or(0),
        "size": query.size.unwrap_or(20),
        "sort": [{ "date": { "order": "desc" } }],
    })
}

fn index_mappings() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "account_id": { "type": "keyword" },
                "message_id": { "type": "keyword" },
                "from": { "type": "text", "fields": { "keyword": { "type": "keyword" } } },
                "to": { "type": "text" },
                "subject": { "type": "text" },
                "body": { "type": "text" },
                "text_body": { "type": "text" },
                "date": { "type": "date" },
                "folder": { "type": "keyword" },
                "flags": { "type": "keyword" },
                "category": { "type": "keyword" },
                "raw": { "type": "text", "index": false },
            }
        },
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
        }
    })
}
