//! Supabase-backed store: PostgREST for metadata, Storage REST for PDFs.
//!
//! Upserts rely on PostgREST's `on_conflict` plus
//! `Prefer: resolution=merge-duplicates`, so a re-run updates rows in place
//! instead of inserting duplicates. Uploads send `x-upsert: true`.

use super::{MetadataStore, ObjectStore, PaperRecord, ProcessingRecord, UpsertOutcome};
use crate::error::StoreError;
use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const URL_ENV: &str = "SUPABASE_URL";
pub const KEY_ENV: &str = "SUPABASE_SERVICE_KEY";

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub url: String,
    pub api_key: String,
    pub papers_table: String,
    pub records_table: String,
    pub timeout_secs: u64,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            papers_table: "papers".into(),
            records_table: "question_records".into(),
            timeout_secs: 30,
        }
    }

    /// Read `SUPABASE_URL` and `SUPABASE_SERVICE_KEY`.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(URL_ENV).ok().filter(|v| !v.is_empty())?;
        let key = std::env::var(KEY_ENV).ok().filter(|v| !v.is_empty())?;
        Some(Self::new(url, key))
    }
}

pub struct SupabaseStore {
    config: SupabaseConfig,
    client: Client,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Http {
                endpoint: config.url.clone(),
                detail: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.config.url, bucket, path)
    }

    /// Public URL of an uploaded object.
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.config.url, bucket, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn send(&self, endpoint: &str, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| StoreError::Http {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let url = self.rest_url(table);
        let mut query: Vec<(&str, String)> = vec![("select", "*".to_string())];
        query.extend(filters.iter().cloned());
        let response = self.send(&url, self.client.get(&url).query(&query)).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn upsert<T: Serialize>(
        &self,
        table: &str,
        on_conflict: &str,
        row: &T,
    ) -> Result<(), StoreError> {
        let url = self.rest_url(table);
        let builder = self
            .client
            .post(&url)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        self.send(&url, builder).await?;
        debug!("Upserted row into {table}");
        Ok(())
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

impl MetadataStore for SupabaseStore {
    fn upsert_paper<'a>(&'a self, paper: &'a PaperRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.upsert(&self.config.papers_table, "paper_id", paper)
                .await
        })
    }

    fn find_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PaperRecord>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<PaperRecord> = self
                .select(&self.config.papers_table, &[("paper_id", eq(paper_id))])
                .await?;
            Ok(rows.into_iter().next())
        })
    }

    fn find_record<'a>(
        &'a self,
        paper_id: &'a str,
        question_number: &'a str,
    ) -> BoxFuture<'a, Result<Option<ProcessingRecord>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<ProcessingRecord> = self
                .select(
                    &self.config.records_table,
                    &[
                        ("paper_id", eq(paper_id)),
                        ("question_number", eq(question_number)),
                    ],
                )
                .await?;
            Ok(rows.into_iter().next())
        })
    }

    fn upsert_record<'a>(
        &'a self,
        record: &'a ProcessingRecord,
    ) -> BoxFuture<'a, Result<UpsertOutcome, StoreError>> {
        Box::pin(async move {
            let existing = self
                .find_record(&record.paper_id, &record.question_number)
                .await?;
            self.upsert(
                &self.config.records_table,
                "paper_id,question_number",
                record,
            )
            .await?;
            Ok(if existing.is_some() {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
    }

    fn records_for_paper<'a>(
        &'a self,
        paper_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProcessingRecord>, StoreError>> {
        Box::pin(async move {
            self.select(&self.config.records_table, &[("paper_id", eq(paper_id))])
                .await
        })
    }
}

impl ObjectStore for SupabaseStore {
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        path: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, StoreError>> {
        Box::pin(async move {
            let url = self.storage_url(bucket, path);
            let builder = self
                .client
                .post(&url)
                .header("x-upsert", "true")
                .header("Content-Type", "application/pdf")
                .body(bytes);
            self.send(&url, builder).await?;
            Ok(self.public_url(bucket, path))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_project_url() {
        let store = SupabaseStore::new(SupabaseConfig::new("https://abc.supabase.co/", "key")).unwrap();
        assert_eq!(store.rest_url("papers"), "https://abc.supabase.co/rest/v1/papers");
        assert_eq!(
            store.storage_url("papers", "physics/2019/jun/1p/qp/q1.pdf"),
            "https://abc.supabase.co/storage/v1/object/papers/physics/2019/jun/1p/qp/q1.pdf"
        );
        assert!(store
            .public_url("papers", "x.pdf")
            .ends_with("/storage/v1/object/public/papers/x.pdf"));
    }

    #[test]
    fn filters_use_postgrest_syntax() {
        assert_eq!(eq("physics/2019/jun/1p"), "eq.physics/2019/jun/1p");
    }
}
