//! Document fetchers: a local directory of text files and an HTTP fetcher
//! for document locators.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use refine_core::collaborators::{CollaboratorError, DocumentFetcher, FetchedDocument};
use refine_core::plan::PaperRef;

use crate::html::parse_html;

static ARXIV_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"v\d+$").unwrap());
static ARXIV_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"arxiv\.org/(?:abs|pdf|html)/([^/?#]+?)(?:\.pdf)?$").unwrap()
});
/// The arXiv identifier in a locator, without its version suffix.
pub fn arxiv_id(url: &str) -> Option<String> {
    let trimmed = ARXIV_VERSION.replace(url.trim().trim_end_matches('/'), "");
    ARXIV_PATH
        .captures(&trimmed)
        .and_then(|c| c.get(1))
        .map(|m| ARXIV_VERSION.replace(m.as_str(), "").into_owned())
}

#[derive(Deserialize, Default)]
struct SidecarMetadata {
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    year: Option<u32>,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    text: Option<String>,
}

/// Reads `{dir}/{key}.txt` or `{dir}/{key}.md`, plus optional
/// `{dir}/{key}.json` metadata. The key is the paper id, or the arXiv id of
/// its locator when no file exists under the paper id.
pub struct LocalDirectoryFetcher {
    dir: PathBuf,
}

impl LocalDirectoryFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidate_keys(paper: &PaperRef) -> Vec<String> {
        let mut keys = vec![paper.id.clone()];
        if let Some(id) = arxiv_id(&paper.url).filter(|id| *id != paper.id) {
            keys.push(id);
        }
        keys.into_iter().filter(|k| is_safe_key(k)).collect()
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, CollaboratorError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CollaboratorError::Unavailable(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }
}

fn is_safe_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['/', '\\']) && key != "." && key != ".."
}

#[async_trait]
impl DocumentFetcher for LocalDirectoryFetcher {
    async fn fetch(&self, paper: &PaperRef) -> Result<FetchedDocument, CollaboratorError> {
        for key in Self::candidate_keys(paper) {
            let meta: SidecarMetadata =
                match Self::read_optional(&self.dir.join(format!("{key}.json"))).await? {
                    Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                        CollaboratorError::Invalid(format!("{key}.json: {e}"))
                    })?,
                    None => SidecarMetadata::default(),
                };

            let mut text = None;
            for ext in ["txt", "md"] {
                if let Some(body) = Self::read_optional(&self.dir.join(format!("{key}.{ext}"))).await? {
                    text = Some(body);
                    break;
                }
            }
            let Some(text) = text.or(meta.text) else {
                continue;
            };
            if text.trim().is_empty() {
                return Err(CollaboratorError::Invalid(format!("document {key} is empty")));
            }

            debug!(doc_id = %paper.id, key = %key, chars = text.len(), "document read from disk");
            return Ok(FetchedDocument {
                text,
                authors: meta.authors,
                year: meta.year.or(paper.year),
                abstract_text: if meta.abstract_text.is_empty() {
                    paper.summary.clone()
                } else {
                    meta.abstract_text
                },
            });
        }
        Err(CollaboratorError::NotFound(format!(
            "no document for {} in {}",
            paper.id,
            self.dir.display()
        )))
    }
}

/// Fetches a document from its locator. arXiv locators are normalised to the
/// versionless HTML rendering of the paper.
pub struct HttpDocumentFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("refine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollaboratorError::Invalid(format!("http client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn resolve_url(url: &str) -> String {
        match arxiv_id(url) {
            Some(id) => format!("https://arxiv.org/html/{id}"),
            None => url.trim().to_string(),
        }
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, paper: &PaperRef) -> Result<FetchedDocument, CollaboratorError> {
        if paper.url.trim().is_empty() {
            return Err(CollaboratorError::NotFound(format!("{} has no locator", paper.id)));
        }
        let url = Self::resolve_url(&paper.url);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout(self.timeout)
            } else {
                CollaboratorError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(CollaboratorError::NotFound(url));
        }
        if !status.is_success() {
            let err = format!("{url} returned {status}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                CollaboratorError::Unavailable(err)
            } else {
                CollaboratorError::Invalid(err)
            });
        }

        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = resp
            .text()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        let text = if is_html {
            let page = parse_html(&body);
            debug!(doc_id = %paper.id, title = %page.title, "html page rendered");
            page.text
        } else {
            body
        };
        if text.trim().is_empty() {
            warn!(doc_id = %paper.id, url = %url, "fetched document is empty");
            return Err(CollaboratorError::Invalid(format!("{url} has no text")));
        }

        Ok(FetchedDocument {
            text,
            authors: Vec::new(),
            year: paper.year,
            abstract_text: paper.summary.clone(),
        })
    }
}
