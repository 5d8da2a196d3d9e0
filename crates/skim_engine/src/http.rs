//! HTTP implementation of [`CouchDatabase`].

use crate::config::{normalize_url, SkimConfig};
use crate::database::{CouchDatabase, Endpoints, FetchOptions, WriteMode};
use crate::error::{SkimError, SkimResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use skim_protocol::Document;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// A CouchDB database reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDatabase {
    client: Client,
    base: Url,
    display: String,
    request_timeout: Duration,
}

#[derive(Deserialize)]
struct PutResponse {
    rev: String,
}

impl HttpDatabase {
    /// Creates a client for the database at `url`.
    ///
    /// `timeout` bounds connecting and every document request. Attachment
    /// downloads are only bounded by the connect timeout; the caller puts its
    /// own deadline on them.
    ///
    /// # Errors
    ///
    /// Returns [`SkimError::InvalidConfig`] if `url` cannot be parsed or the
    /// client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> SkimResult<Self> {
        let display = normalize_url(url);
        let base = Url::parse(&display)
            .map_err(|e| SkimError::InvalidConfig(format!("database url {url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SkimError::InvalidConfig(format!("database url {url:?} cannot be a base")));
        }
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SkimError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base,
            display,
            request_timeout: timeout,
        })
    }

    /// URL of a document, or of one of its attachments.
    ///
    /// Every id segment is percent-encoded on its own, so a `_design/app` id
    /// keeps its slash while `@scope/pkg` becomes `@scope%2Fpkg`.
    pub fn document_url(&self, id: &str, attachment: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            match id.strip_prefix("_design/") {
                Some(name) => {
                    segments.push("_design").push(name);
                }
                None => {
                    segments.push(id);
                }
            }
            if let Some(file) = attachment {
                segments.push(file);
            }
        }
        url
    }

    /// Sends a document request, bounded by the request timeout.
    async fn send(
        &self,
        method: Method,
        url: Url,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder + Send,
    ) -> SkimResult<Response> {
        trace!(%method, %url, "request");
        let request = build(self.client.request(method, url)).timeout(self.request_timeout);
        Ok(request.send().await?)
    }
}

fn status_error(method: &Method, url: &Url, status: StatusCode) -> SkimError {
    SkimError::Http {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
    }
}

#[async_trait]
impl CouchDatabase for HttpDatabase {
    fn url(&self) -> &str {
        &self.display
    }

    async fn get_document(&self, id: &str, options: FetchOptions) -> SkimResult<Option<Document>> {
        let url = self.document_url(id, None);
        let response = self
            .send(Method::GET, url.clone(), |r| r.query(&options.query()))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body = response.bytes().await?;
                Ok(Some(Document::from_slice(&body)?))
            }
            s => Err(status_error(&Method::GET, &url, s)),
        }
    }

    async fn get_attachment(&self, id: &str, filename: &str) -> SkimResult<Bytes> {
        let url = self.document_url(id, Some(filename));
        trace!(%url, "attachment");
        let response = self.client.get(url.clone()).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(SkimError::NotFound(format!("{id}/{filename}"))),
            s if s.is_success() => Ok(response.bytes().await?),
            s => Err(status_error(&Method::GET, &url, s)),
        }
    }

    async fn head_revision(&self, id: &str) -> SkimResult<Option<String>> {
        let url = self.document_url(id, None);
        let response = self.send(Method::HEAD, url.clone(), |r| r).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let etag = response
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| SkimError::BadResponse(format!("HEAD {url}: no ETag")))?;
                Ok(Some(etag.trim_matches('"').to_string()))
            }
            s => Err(status_error(&Method::HEAD, &url, s)),
        }
    }

    async fn put_document(&self, doc: &Document, mode: WriteMode) -> SkimResult<String> {
        let url = self.document_url(&doc.id, None);
        let body = doc.to_json()?;
        let response = self
            .send(Method::PUT, url.clone(), |r| {
                let r = r
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body);
                match mode {
                    WriteMode::NewEdit => r,
                    WriteMode::Replicate => r.query(&[("new_edits", "false")]),
                }
            })
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(SkimError::Conflict { id: doc.id.clone() }),
            s if s.is_success() => {
                let put: PutResponse = response.json().await?;
                Ok(put.rev)
            }
            s => Err(status_error(&Method::PUT, &url, s)),
        }
    }

    async fn delete_revision(&self, id: &str, rev: &str) -> SkimResult<bool> {
        let url = self.document_url(id, None);
        let response = self
            .send(Method::DELETE, url.clone(), |r| r.query(&[("rev", rev)]))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::CONFLICT => Err(SkimError::Conflict { id: id.to_string() }),
            s if s.is_success() => Ok(true),
            s => Err(status_error(&Method::DELETE, &url, s)),
        }
    }
}

impl Endpoints {
    /// Builds HTTP endpoints from a configuration.
    pub fn from_config(config: &SkimConfig) -> SkimResult<Self> {
        let source: Arc<dyn CouchDatabase> =
            Arc::new(HttpDatabase::new(&config.source_url, config.request_timeout)?);
        match &config.sink_url {
            Some(sink) if !config.is_shared() => Ok(Endpoints::Split {
                source,
                sink: Arc::new(HttpDatabase::new(sink, config.request_timeout)?),
            }),
            _ => Ok(Endpoints::Shared(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// What the stub server answers to one connection.
    enum Reply {
        /// A complete response.
        Now(&'static str, &'static [(&'static str, &'static str)], &'static str),
        /// A 200 whose body arrives one byte per `delay`.
        Trickle(&'static [u8], Duration),
        /// Accepts the request and never answers.
        Hang,
    }

    /// A one-connection-per-request CouchDB stand-in on a loopback port.
    struct Stub {
        url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl Stub {
        async fn start(replies: Vec<Reply>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}/registry", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let log = requests.clone();

            tokio::spawn(async move {
                for reply in replies {
                    let (mut stream, _) = listener.accept().await.unwrap();
                    let request_line = read_request(&mut stream).await;
                    log.lock().push(request_line);
                    answer(&mut stream, reply).await;
                }
            });

            Self { url, requests }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().clone()
        }
    }

    /// Reads one request and returns its request line without the version.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let body_len = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + body_len {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let line = head.lines().next().unwrap_or_default();
        line.rsplit_once(' ').map(|(l, _)| l).unwrap_or(line).to_string()
    }

    async fn answer(stream: &mut TcpStream, reply: Reply) {
        match reply {
            Reply::Now(status, headers, body) => {
                let mut response = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n",
                    body.len()
                );
                for (name, value) in headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(body);
                stream.write_all(response.as_bytes()).await.unwrap();
            }
            Reply::Trickle(body, delay) => {
                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                stream.write_all(head.as_bytes()).await.unwrap();
                for byte in body {
                    tokio::time::sleep(delay).await;
                    stream.write_all(&[*byte]).await.unwrap();
                }
            }
            Reply::Hang => tokio::time::sleep(Duration::from_secs(30)).await,
        }
        let _ = stream.shutdown().await;
    }

    const JSON: &[(&str, &str)] = &[("content-type", "application/json")];

    fn db() -> HttpDatabase {
        HttpDatabase::new("http://localhost:5984/registry/", Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn plain_ids() {
        assert_eq!(
            db().document_url("left-pad", None).as_str(),
            "http://localhost:5984/registry/left-pad"
        );
        assert_eq!(
            db().document_url("left-pad", Some("left-pad-1.0.0.tgz")).as_str(),
            "http://localhost:5984/registry/left-pad/left-pad-1.0.0.tgz"
        );
    }

    #[test]
    fn ids_are_encoded_per_segment() {
        assert_eq!(
            db().document_url("@scope/pkg", None).as_str(),
            "http://localhost:5984/registry/@scope%2Fpkg"
        );
        assert_eq!(
            db().document_url("_design/app", None).as_str(),
            "http://localhost:5984/registry/_design/app"
        );
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(HttpDatabase::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpDatabase::new("mailto:someone@example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn endpoints_from_config() {
        let shared = SkimConfig::new("http://db/registry", "seq").with_sink("http://db/registry/");
        assert!(Endpoints::from_config(&shared).unwrap().is_shared());

        let split = SkimConfig::new("http://db/registry", "seq").with_sink("http://db/skim");
        let endpoints = Endpoints::from_config(&split).unwrap();
        assert!(!endpoints.is_shared());
        assert_eq!(endpoints.sink().url(), "http://db/skim");
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let stub = Stub::start(vec![Reply::Now("404 Not Found", JSON, r#"{"error":"not_found"}"#)]).await;
        let db = HttpDatabase::new(&stub.url, Duration::from_secs(5)).unwrap();

        assert!(db.get_document("foo", FetchOptions::package()).await.unwrap().is_none());
        assert_eq!(
            stub.requests(),
            vec!["GET /registry/foo?att_encoding_info=true&revs=true"]
        );
    }

    #[tokio::test]
    async fn fetches_design_document_with_revisions() {
        let stub = Stub::start(vec![Reply::Now(
            "200 OK",
            JSON,
            r#"{"_id":"_design/app","_rev":"2-abc","_revisions":{"start":2,"ids":["abc","def"]}}"#,
        )])
        .await;
        let db = HttpDatabase::new(&stub.url, Duration::from_secs(5)).unwrap();

        let doc = db.get_document("_design/app", FetchOptions::design()).await.unwrap().unwrap();
        assert_eq!(doc.id, "_design/app");
        assert_eq!(doc.rev.as_deref(), Some("2-abc"));
        assert!(doc.revisions.is_some());
        assert_eq!(stub.requests(), vec!["GET /registry/_design/app?revs=true"]);
    }

    #[tokio::test]
    async fn head_strips_etag_quotes() {
        let stub = Stub::start(vec![
            Reply::Now("200 OK", &[("etag", "\"2-abc\"")], ""),
            Reply::Now("404 Not Found", &[], ""),
        ])
        .await;
        let db = HttpDatabase::new(&stub.url, Duration::from_secs(5)).unwrap();

        assert_eq!(db.head_revision("foo").await.unwrap().as_deref(), Some("2-abc"));
        assert_eq!(db.head_revision("foo").await.unwrap(), None);
        assert_eq!(stub.requests(), vec!["HEAD /registry/foo", "HEAD /registry/foo"]);
    }

    #[tokio::test]
    async fn put_modes_and_conflicts() {
        let stub = Stub::start(vec![
            Reply::Now("201 Created", JSON, r#"{"ok":true,"id":"foo","rev":"3-def"}"#),
            Reply::Now("201 Created", JSON, r#"{"ok":true,"id":"foo","rev":"2-abc"}"#),
            Reply::Now("409 Conflict", JSON, r#"{"error":"conflict"}"#),
        ])
        .await;
        let db = HttpDatabase::new(&stub.url, Duration::from_secs(5)).unwrap();
        let mut doc = Document::new("foo");
        doc.rev = Some("2-abc".into());

        assert_eq!(db.put_document(&doc, WriteMode::NewEdit).await.unwrap(), "3-def");
        assert_eq!(db.put_document(&doc, WriteMode::Replicate).await.unwrap(), "2-abc");
        let err = db.put_document(&doc, WriteMode::NewEdit).await.unwrap_err();
        assert!(matches!(err, SkimError::Conflict { ref id } if id == "foo"));
        assert_eq!(
            stub.requests(),
            vec!["PUT /registry/foo", "PUT /registry/foo?new_edits=false", "PUT /registry/foo"]
        );
    }

    #[tokio::test]
    async fn delete_sends_revision() {
        let stub = Stub::start(vec![
            Reply::Now("200 OK", JSON, r#"{"ok":true,"id":"foo","rev":"3-zzz"}"#),
            Reply::Now("404 Not Found", JSON, r#"{"error":"not_found"}"#),
            Reply::Now("500 Internal Server Error", JSON, r#"{"error":"boom"}"#),
        ])
        .await;
        let db = HttpDatabase::new(&stub.url, Duration::from_secs(5)).unwrap();

        assert!(db.delete_revision("foo", "2-abc").await.unwrap());
        assert!(!db.delete_revision("foo", "2-abc").await.unwrap());
        let err = db.delete_revision("foo", "2-abc").await.unwrap_err();
        assert!(matches!(err, SkimError::Http { status: 500, .. }));
        assert_eq!(stub.requests(), vec!["DELETE /registry/foo?rev=2-abc"; 3]);
    }

    #[tokio::test]
    async fn slow_attachment_outlives_request_timeout() {
        let stub = Stub::start(vec![Reply::Trickle(b"0123456789", Duration::from_millis(100))]).await;
        let db = HttpDatabase::new(&stub.url, Duration::from_millis(300)).unwrap();

        let started = Instant::now();
        let body = db.get_attachment("foo", "foo-1.0.0.tgz").await.unwrap();

        assert_eq!(body, Bytes::from_static(b"0123456789"));
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(stub.requests(), vec!["GET /registry/foo/foo-1.0.0.tgz"]);
    }

    #[tokio::test]
    async fn document_requests_are_bounded() {
        let stub = Stub::start(vec![Reply::Hang]).await;
        let db = HttpDatabase::new(&stub.url, Duration::from_millis(200)).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            db.get_document("foo", FetchOptions::package()),
        )
        .await
        .expect("request timeout did not fire");
        assert!(matches!(result, Err(SkimError::Timeout)));
    }
}
