//! Paged datatracker REST API listings.
//!
//! Every listing endpoint returns `{"meta": {"next": ...}, "objects": [...]}`;
//! `next` is a server-relative URI or null on the last page.

use crate::artifact::write_json;
use crate::error::{FetchError, PaperError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Source of raw API pages. Abstracts the HTTP client for testability.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_page(&self, url: &Url) -> Result<Value, FetchError>;
}

/// [`PageSource`] backed by a reqwest client.
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get_page(&self, url: &Url) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::ResponseParse {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

pub struct DatatrackerClient<S: PageSource> {
    base: Url,
    source: S,
}

impl<S: PageSource> DatatrackerClient<S> {
    pub fn new(base_url: &str, source: S) -> Result<Self, FetchError> {
        let base = Url::parse(base_url).map_err(|e| FetchError::Request {
            url: base_url.to_string(),
            message: format!("invalid datatracker URL: {e}"),
        })?;
        Ok(Self { base, source })
    }

    /// URL of the first page of a listing.
    pub fn query_url(&self, prefix: &str, order_by: Option<&str>) -> Result<Url, FetchError> {
        let mut url = self.join(prefix)?;
        if let Some(order) = order_by {
            url.query_pairs_mut().append_pair("order_by", order);
        }
        Ok(url)
    }

    /// Follow `meta.next` until the last page, collecting every object.
    pub async fn fetch_all(
        &self,
        prefix: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<Value>, FetchError> {
        let mut next = Some(self.query_url(prefix, order_by)?);
        let mut seen = HashSet::new();
        let mut objects = Vec::new();

        while let Some(url) = next.take() {
            if !seen.insert(url.to_string()) {
                return Err(FetchError::ResponseParse {
                    url: url.to_string(),
                    message: "pagination loops back to an earlier page".to_string(),
                });
            }
            let page = self.source.get_page(&url).await?;
            let malformed = |message: &str| FetchError::ResponseParse {
                url: url.to_string(),
                message: message.to_string(),
            };
            let items = page
                .get("objects")
                .and_then(Value::as_array)
                .ok_or_else(|| malformed("missing 'objects' array"))?;
            debug!(url = %url, objects = items.len(), "Fetched page");
            objects.extend(items.iter().cloned());

            next = match page.pointer("/meta/next") {
                Some(Value::String(uri)) => Some(self.join(uri)?),
                Some(Value::Null) | None => None,
                Some(_) => return Err(malformed("'meta.next' is not a string")),
            };
        }
        Ok(objects)
    }

    /// Fetch a whole listing and write it to `dest` as an indented JSON array.
    pub async fn download(
        &self,
        prefix: &str,
        order_by: Option<&str>,
        dest: &Path,
    ) -> Result<usize, PaperError> {
        let objects = self.fetch_all(prefix, order_by).await?;
        write_json(dest, &objects).await?;
        info!(prefix, objects = objects.len(), dest = %dest.display(), "Wrote datatracker listing");
        Ok(objects.len())
    }

    fn join(&self, uri: &str) -> Result<Url, FetchError> {
        self.base.join(uri).map_err(|e| FetchError::Request {
            url: format!("{}{}", self.base, uri),
            message: e.to_string(),
        })
    }
}
