//! HTTP remote store.
//!
//! Maps the remote store operations onto a REST collection with JSON
//! bodies:
//!
//! | Operation     | Request                                                  |
//! |---------------|----------------------------------------------------------|
//! | `fetch_since` | `GET {base}/{collection}?since=&offset=&limit=&<filter>` |
//! | `fetch_one`   | `GET {base}/{collection}/{id}`                           |
//! | `create`      | `POST {base}/{collection}`                               |
//! | `update`      | `PUT {base}/{collection}/{id}`                           |
//! | `delete`      | `DELETE {base}/{collection}/{id}`                        |
//!
//! The actual HTTP client is abstracted via a trait so that any library
//! can be plugged in. A `ureq` client ships behind the `ureq` feature.

use crate::remote::{
    check_deadline, DeleteOutcome, FetchRequest, RemoteError, RemoteErrorKind, RemoteResult,
    RemoteStore,
};
use replica_core::{is_client_id, Record};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Instant;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Returns the method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL including the query string.
    pub url: String,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
    /// Time by which the request must complete.
    pub deadline: Option<Instant>,
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    ///
    /// Non-2xx statuses are returned as responses; `Err` is reserved for
    /// failures to get any response at all.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// A [`RemoteStore`] backed by a REST collection.
pub struct HttpRemoteStore<R, C> {
    base_url: String,
    collection: String,
    client: C,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, C: HttpClient> HttpRemoteStore<R, C> {
    /// Creates a store for `collection` under `base_url`.
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            collection: collection.into(),
            client,
            _record: PhantomData,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.collection)
        )
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.collection_url(), urlencoding::encode(id))
    }

    fn call(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<Vec<u8>>,
        deadline: Option<Instant>,
    ) -> RemoteResult<HttpResponse> {
        check_deadline(deadline, method.as_str())?;
        tracing::trace!(method = method.as_str(), %url, "remote request");

        let request = HttpRequest {
            method,
            url,
            body,
            deadline,
        };
        self.client.send(request).map_err(|message| {
            if check_deadline(deadline, method.as_str()).is_err() {
                RemoteError::timeout(message)
            } else {
                RemoteError::transient(message)
            }
        })
    }

    fn encode(record: &R) -> RemoteResult<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| RemoteError::permanent(format!("failed to encode record: {e}")))
    }

    /// Decodes a record returned by a write and checks its id.
    fn decode_saved(response: &HttpResponse) -> RemoteResult<R> {
        let record: R = decode(&response.body)?;
        match record.id() {
            Some(id) if !id.is_empty() && !is_client_id(id) => Ok(record),
            Some(id) if is_client_id(id) => Err(RemoteError::permanent(format!(
                "server returned client id '{id}'"
            ))),
            _ => Err(RemoteError::permanent("server returned a record without id")),
        }
    }
}

impl<R: Record, C: HttpClient> RemoteStore<R> for HttpRemoteStore<R, C> {
    type Filter = Vec<(String, String)>;

    fn fetch_since(
        &self,
        request: &FetchRequest<Self::Filter>,
        deadline: Option<Instant>,
    ) -> RemoteResult<Vec<R>> {
        let mut url = format!(
            "{}?since={}&offset={}&limit={}",
            self.collection_url(),
            request.since.as_millis(),
            request.offset,
            request.limit
        );
        for (key, value) in request.filter.iter().flatten() {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        let response = self.call(HttpMethod::Get, url, None, deadline)?;
        ensure_success(&response)?;
        decode(&response.body)
    }

    fn fetch_one(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<Option<R>> {
        let response = self.call(HttpMethod::Get, self.record_url(id), None, deadline)?;
        if response.status == 404 {
            return Ok(None);
        }
        ensure_success(&response)?;
        decode(&response.body).map(Some)
    }

    fn create(&self, record: R, deadline: Option<Instant>) -> RemoteResult<R> {
        let body = Self::encode(&record)?;
        let response = self.call(HttpMethod::Post, self.collection_url(), Some(body), deadline)?;
        ensure_success(&response)?;
        Self::decode_saved(&response)
    }

    fn update(&self, record: R, deadline: Option<Instant>) -> RemoteResult<R> {
        let id = match record.id() {
            Some(id) if is_client_id(id) => {
                return Err(RemoteError::permanent(format!(
                    "'{id}' is a client id, not a server id"
                )))
            }
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(RemoteError::permanent("update without an id")),
        };
        let body = Self::encode(&record)?;
        let response = self.call(HttpMethod::Put, self.record_url(&id), Some(body), deadline)?;
        ensure_success(&response)?;
        Self::decode_saved(&response)
    }

    fn delete(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<DeleteOutcome> {
        let response = self.call(HttpMethod::Delete, self.record_url(id), None, deadline)?;
        if response.status == 404 {
            return Ok(DeleteOutcome::NotFound);
        }
        ensure_success(&response)?;
        Ok(DeleteOutcome::Deleted)
    }
}

/// Maps an HTTP status onto a remote failure class.
fn classify(status: u16) -> Option<RemoteErrorKind> {
    match status {
        200..=299 => None,
        404 => Some(RemoteErrorKind::NotFound),
        408 => Some(RemoteErrorKind::Timeout),
        409 | 412 => Some(RemoteErrorKind::Conflict),
        429 | 500..=599 => Some(RemoteErrorKind::Transient),
        _ => Some(RemoteErrorKind::Permanent),
    }
}

fn ensure_success(response: &HttpResponse) -> RemoteResult<()> {
    match classify(response.status) {
        None => Ok(()),
        Some(kind) => {
            let detail = String::from_utf8_lossy(&response.body);
            Err(RemoteError::new(
                kind,
                format!("HTTP {}: {}", response.status, detail.trim()),
            ))
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> RemoteResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| RemoteError::permanent(format!("invalid response body: {e}")))
}

/// An [`HttpClient`] on top of a blocking `ureq` agent.
#[cfg(feature = "ureq")]
pub struct UreqClient {
    agent: ureq::Agent,
}

#[cfg(feature = "ureq")]
impl UreqClient {
    /// Creates a client with a default agent.
    pub fn new() -> Self {
        Self::with_agent(ureq::Agent::new())
    }

    /// Creates a client on a configured agent.
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

#[cfg(feature = "ureq")]
impl Default for UreqClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "ureq")]
impl HttpClient for UreqClient {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        use std::io::Read;

        let mut call = self
            .agent
            .request(request.method.as_str(), &request.url)
            .set("Accept", "application/json");
        if let Some(deadline) = request.deadline {
            call = call.timeout(deadline.saturating_duration_since(Instant::now()));
        }

        let result = match request.body {
            Some(body) => call
                .set("Content-Type", "application/json")
                .send_bytes(&body),
            None => call.call(),
        };
        let response = match result {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => return Err(err.to_string()),
        };

        let status = response.status();
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }
}
