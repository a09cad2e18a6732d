use async_trait::async_trait;
use eucan_core::TableMeta;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, info_span, Instrument};

use crate::{
    parse_table_meta, to_upload_format, HttpClientConfig, Query, RemoteStore, Row, StoreError,
};

const TOKEN_HEADER: &str = "x-molgenis-token";
const DEFAULT_PAGE_SIZE: usize = 100;

/// Session against a MOLGENIS server's REST API.
#[derive(Debug, Clone)]
pub struct MolgenisSession {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl MolgenisSession {
    pub fn new(url: &str, config: &HttpClientConfig) -> anyhow::Result<Self> {
        let mut url = url.trim().to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        Ok(Self {
            client: config.build_client()?,
            url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), StoreError> {
        let url = format!("{}api/v1/login", self.url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        let body: Value = check(response).await?.json().await?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Login {
                username: username.to_string(),
                message: "no token in login response".to_string(),
            })?;
        self.token = Some(token.to_string());
        debug!(username, "logged in");
        Ok(())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    fn entity_url(&self, entity_type_id: &str) -> String {
        format!("{}api/v2/{}", self.url, entity_type_id)
    }
}

/// Turns a non-success response into an error carrying the server's messages.
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| {
            let messages: Vec<_> = value
                .get("errors")?
                .as_array()?
                .iter()
                .filter_map(|error| error.get("message").and_then(Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        })
        .unwrap_or(body);

    Err(StoreError::HttpStatus {
        status: status.as_u16(),
        url,
        message,
    })
}

#[async_trait]
impl RemoteStore for MolgenisSession {
    async fn get_meta(&self, entity_type_id: &str) -> Result<TableMeta, StoreError> {
        let url = format!("{}api/metadata/{}", self.url, entity_type_id);
        let response = self.request(Method::GET, &url).send().await?;
        let meta: Value = check(response).await?.json().await?;
        parse_table_meta(entity_type_id, &meta)
    }

    async fn get(&self, entity_type_id: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        let span = info_span!("molgenis_get", entity_type_id);
        async move {
            let url = self.entity_url(entity_type_id);
            let page_size = query.batch_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
            let mut rows = Vec::new();
            let mut start = 0usize;

            loop {
                let mut params = vec![
                    ("num", page_size.to_string()),
                    ("start", start.to_string()),
                ];
                if let Some(attributes) = &query.attributes {
                    params.push(("attrs", attributes.clone()));
                }
                if let Some(filter) = &query.filter {
                    params.push(("q", filter.clone()));
                }

                let response = self.request(Method::GET, &url).query(&params).send().await?;
                let page: Value = check(response).await?.json().await?;
                let items = page
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or_else(|| StoreError::decode(entity_type_id, "response without items"))?;

                let fetched = items.len();
                rows.extend(items.iter().filter_map(|item| item.as_object().cloned()));
                debug!(start, fetched, "fetched page");

                if page.get("nextHref").is_none() || fetched == 0 {
                    break;
                }
                start += fetched;
            }

            Ok::<_, StoreError>(to_upload_format(rows))
        }
        .instrument(span)
        .await
    }

    async fn add_all(&self, entity_type_id: &str, rows: &[Row]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let response = self
            .request(Method::POST, &self.entity_url(entity_type_id))
            .json(&json!({ "entities": rows }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_list(&self, entity_type_id: &str, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let response = self
            .request(Method::DELETE, &self.entity_url(entity_type_id))
            .json(&json!({ "entityIds": ids }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
