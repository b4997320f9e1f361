//! Blocking HTTP backend for Elasticsearch-compatible servers.

use crate::{BackendError, QueryBackend, SearchRequest, SearchResponse};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::COOKIE;
use reqwest::{StatusCode, Url};
use serde_json::json;
use std::time::Duration;

/// Default server address
pub const DEFAULT_BASE_URL: &str = "http://localhost:9200";

/// Default request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials attached to every request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    /// HTTP basic auth
    Basic {
        username: String,
        password: Option<String>,
    },
    /// Pre-issued session cookie, sent verbatim in the `Cookie` header
    Cookie(String),
}

impl Auth {
    /// Pick an auth mode from optional credentials; a cookie wins over basic auth
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        cookie: Option<String>,
    ) -> Self {
        if let Some(cookie) = cookie {
            return Auth::Cookie(cookie);
        }
        match (username, password) {
            (None, None) => Auth::None,
            (username, password) => Auth::Basic {
                username: username.unwrap_or_default(),
                password,
            },
        }
    }
}

/// Builder for [`HttpBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackendBuilder {
    base_url: String,
    auth: Auth,
    timeout: Duration,
}

impl HttpBackendBuilder {
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpBackend, BackendError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(BackendError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let client = Client::builder().timeout(self.timeout).build()?;

        tracing::debug!(host = url.host_str().unwrap_or(""), "HTTP backend initialized");

        Ok(HttpBackend {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            auth: self.auth,
        })
    }
}

/// Search backend speaking the Elasticsearch REST API over blocking HTTP
pub struct HttpBackend {
    client: Client,
    base_url: String,
    auth: Auth,
}

impl HttpBackend {
    /// Backend for `base_url` without credentials
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        Self::builder(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> HttpBackendBuilder {
        HttpBackendBuilder {
            base_url: base_url.into(),
            auth: Auth::None,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn search_url(&self, index: Option<&str>, scroll: Option<&str>) -> String {
        let target = index.filter(|i| !i.is_empty()).unwrap_or("_all");
        match scroll {
            Some(keep_alive) => format!("{}/{}/_search?scroll={}", self.base_url, target, keep_alive),
            None => format!("{}/{}/_search", self.base_url, target),
        }
    }

    fn scroll_url(&self) -> String {
        format!("{}/_search/scroll", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, password.as_ref()),
            Auth::Cookie(cookie) => builder.header(COOKIE, cookie.as_str()),
        }
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response, BackendError> {
        let response = self.authorize(builder).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn decode(response: Response) -> Result<SearchResponse, BackendError> {
        let text = response.text()?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl QueryBackend for HttpBackend {
    fn search(
        &self,
        index: Option<&str>,
        request: &SearchRequest,
    ) -> Result<SearchResponse, BackendError> {
        let url = self.search_url(index, request.scroll.as_deref());
        tracing::trace!(%url, "search");

        let response = self.send(self.client.post(url).json(request))?;
        Self::decode(response)
    }

    fn scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<SearchResponse, BackendError> {
        let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });

        let response = self.send(self.client.post(self.scroll_url()).json(&body))?;
        Self::decode(response)
    }

    fn clear_scroll(&self, scroll_id: &str) -> Result<(), BackendError> {
        let body = json!({ "scroll_id": [scroll_id] });

        match self.send(self.client.delete(self.scroll_url()).json(&body)) {
            Ok(_) => Ok(()),
            Err(BackendError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(BackendError::ScrollNotFound(scroll_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_with_index_and_scroll() {
        let backend = HttpBackend::new("http://localhost:9200/").unwrap();
        assert_eq!(
            backend.search_url(Some("logs-*"), Some("2m")),
            "http://localhost:9200/logs-*/_search?scroll=2m"
        );
    }

    #[test]
    fn test_search_url_without_index() {
        let backend = HttpBackend::new(DEFAULT_BASE_URL).unwrap();
        assert_eq!(
            backend.search_url(None, None),
            "http://localhost:9200/_all/_search"
        );
        assert_eq!(
            backend.search_url(Some(""), None),
            "http://localhost:9200/_all/_search"
        );
    }

    #[test]
    fn test_scroll_url() {
        let backend = HttpBackend::new("https://es.example.com:9243").unwrap();
        assert_eq!(backend.scroll_url(), "https://es.example.com:9243/_search/scroll");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = HttpBackend::new("not a url");
        assert!(matches!(result, Err(BackendError::InvalidUrl(_))));
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let result = HttpBackend::new("ftp://localhost:9200");
        assert!(matches!(result, Err(BackendError::InvalidUrl(_))));
    }

    #[test]
    fn test_auth_from_parts() {
        assert_eq!(Auth::from_parts(None, None, None), Auth::None);
        assert_eq!(
            Auth::from_parts(Some("elastic".into()), Some("secret".into()), None),
            Auth::Basic {
                username: "elastic".into(),
                password: Some("secret".into())
            }
        );
        assert_eq!(
            Auth::from_parts(Some("elastic".into()), None, Some("sid=1".into())),
            Auth::Cookie("sid=1".into())
        );
    }

    #[test]
    fn test_connection_refused_is_transport_error() {
        let backend = HttpBackend::builder("http://127.0.0.1:1")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        let result = backend.search(None, &SearchRequest::new());
        assert!(matches!(result, Err(BackendError::Transport(_))));
    }
}
