use super::{parse_error, Project};
use crate::error::StoreError;
use crate::http::error_body;
use crate::library::ShowTable;
use crate::models::{NewShowRecord, ShowChanges, ShowRecord};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use tracing::{debug, info, instrument};

const TABLE: &str = "saved_shows";
const UNIQUE_VIOLATION: &str = "23505";

pub struct SavedShowsTable {
    project: Project,
}

enum Access {
    Read,
    Write,
}

impl SavedShowsTable {
    pub(crate) fn new(project: Project) -> Self {
        Self { project }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.project.url, TABLE)
    }

    fn scoped(&self, method: Method, tmdb_id: i64, user_id: &str) -> RequestBuilder {
        self.project.request(method, &self.table_url()).query(&[
            ("tmdb_id", format!("eq.{}", tmdb_id)),
            ("user_id", format!("eq.{}", user_id)),
        ])
    }

    async fn send(&self, request: RequestBuilder, access: Access) -> Result<Response, StoreError> {
        let response = self
            .project
            .http
            .send(request)
            .await
            .map_err(StoreError::Unreachable)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let details = parse_error(&error_body(response).await);
        if details.code.as_deref() == Some(UNIQUE_VIOLATION)
            || details.message.contains("duplicate key")
        {
            return Err(StoreError::DuplicateKey);
        }

        Err(match access {
            Access::Read => StoreError::RemoteRead {
                status,
                message: details.message,
            },
            Access::Write => StoreError::RemoteWrite {
                status,
                message: details.message,
            },
        })
    }
}

#[async_trait]
impl ShowTable for SavedShowsTable {
    #[instrument(skip(self))]
    async fn select_for_user(&self, user_id: &str) -> Result<Vec<ShowRecord>, StoreError> {
        let request = self
            .project
            .request(Method::GET, &self.table_url())
            .query(&[("select", "*".to_string()), ("user_id", format!("eq.{}", user_id))]);

        let rows: Vec<ShowRecord> = self
            .send(request, Access::Read)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        debug!("Selected {} saved shows", rows.len());
        Ok(rows)
    }

    #[instrument(skip(self, row), fields(tmdb_id = row.tmdb_id))]
    async fn insert(&self, row: &NewShowRecord) -> Result<ShowRecord, StoreError> {
        let request = self
            .project
            .request(Method::POST, &self.table_url())
            .header("Prefer", "return=representation")
            .json(row);

        let mut rows: Vec<ShowRecord> = self
            .send(request, Access::Write)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        info!("Inserted saved show {}", row.tmdb_id);
        if rows.is_empty() {
            return Ok(row.clone().into_record());
        }
        Ok(rows.swap_remove(0))
    }

    #[instrument(skip(self, changes))]
    async fn update(
        &self,
        tmdb_id: i64,
        user_id: &str,
        changes: &ShowChanges,
    ) -> Result<(), StoreError> {
        let request = self
            .scoped(Method::PATCH, tmdb_id, user_id)
            .header("Prefer", "return=minimal")
            .json(changes);

        self.send(request, Access::Write).await?;
        info!("Updated saved show {} to {}", tmdb_id, changes.status);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, tmdb_id: i64, user_id: &str) -> Result<(), StoreError> {
        let request = self.scoped(Method::DELETE, tmdb_id, user_id);

        self.send(request, Access::Write).await?;
        info!("Deleted saved show {}", tmdb_id);
        Ok(())
    }
}
