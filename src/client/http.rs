use anyhow::{Context, Result};
use url::Url;

use crate::document::{Document, DocumentId, NewDocument};

/// Thin client for the document REST surface.
#[derive(Clone)]
pub struct HttpClient {
    base: Url,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid server url {base:?}"))?;
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    pub async fn list(&self) -> Result<Vec<Document>> {
        let docs = self
            .client
            .get(self.endpoint("/api/documents")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(docs)
    }

    pub async fn get(&self, id: DocumentId) -> Result<Option<Document>> {
        let response = self
            .client
            .get(self.endpoint(&format!("/api/documents/{id}"))?)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }

    pub async fn create(&self, new: &NewDocument) -> Result<Document> {
        let doc = self
            .client
            .post(self.endpoint("/api/documents")?)
            .json(new)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(doc)
    }
}
