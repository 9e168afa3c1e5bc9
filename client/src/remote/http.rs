//! HTTP client for the tabsync server's row API.

use super::{RemoteError, RemoteStore};
use crate::TenantContext;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde_json::Value;
use std::time::Duration;
use tabsync_engine::{RecordKey, Table};
use tracing::debug;

/// Header carrying the tenant of every request.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// [`RemoteStore`] backed by the server's `/rest/{table}` endpoints.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url).map_err(|e| RemoteError::Network(format!("invalid url {base_url}: {e}")))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    fn endpoint(&self, table: Table, key: Option<&str>) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Network(format!("{} cannot be a base url", self.base_url)))?;
            segments.pop_if_empty().push("rest").push(table.as_str());
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    fn request(&self, ctx: &TenantContext, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(TENANT_HEADER, ctx.tenant_id());
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn upsert(&self, ctx: &TenantContext, table: Table, rows: Vec<Value>) -> Result<(), RemoteError> {
        debug!(table = %table, rows = rows.len(), "POST rows");
        let url = self.endpoint(table, None)?;
        Self::send(self.request(ctx, Method::POST, url).json(&rows)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &TenantContext, table: Table, key: &RecordKey) -> Result<(), RemoteError> {
        let key = key.encode();
        debug!(table = %table, key = %key, "DELETE row");
        let url = self.endpoint(table, Some(&key))?;
        Self::send(self.request(ctx, Method::DELETE, url)).await?;
        Ok(())
    }

    async fn delete_where(
        &self,
        ctx: &TenantContext,
        table: Table,
        column: &str,
        value: &str,
    ) -> Result<(), RemoteError> {
        debug!(table = %table, column, value, "DELETE rows");
        let url = self.endpoint(table, None)?;
        let builder = self
            .request(ctx, Method::DELETE, url)
            .query(&[("column", column), ("value", value)]);
        Self::send(builder).await?;
        Ok(())
    }

    async fn select_where(
        &self,
        ctx: &TenantContext,
        table: Table,
        column: &str,
        value: &str,
    ) -> Result<Vec<Value>, RemoteError> {
        let url = self.endpoint(table, None)?;
        let builder = self
            .request(ctx, Method::GET, url)
            .query(&[("column", column), ("value", value)]);
        let rows = Self::send(builder).await?.json::<Vec<Value>>().await?;
        debug!(table = %table, rows = rows.len(), "GET rows");
        Ok(rows)
    }
}
