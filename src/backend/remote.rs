// src/backend/remote.rs

//! Remote store backend over HTTP
//!
//! Objects are fetched with plain `GET <base>/<path>`. Only the status code and
//! the standard `Last-Modified`, `ETag`, `Content-Length` and `Content-Type`
//! headers are interpreted. Buckets that speak the S3 API additionally get
//! directory listings (`ListObjectsV2`) and structured XML error messages.
//!
//! Nothing is cached: every `open` is a new request.

use super::{Backend, DirEntry, FileType, Metadata, clean_path};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED};
use std::io::{self, Read};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on how much of an error body is read or drained
const ERROR_BODY_LIMIT: u64 = 64 * 1024;

/// A store served from an HTTP(S) URL, e.g. a binary cache or an S3 bucket
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    base_url: String,
    client: Client,
}

impl RemoteBackend {
    /// Create a backend for `base_url` with its own HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a backend that shares an existing client
    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn object_url(&self, path: &str) -> Result<String> {
        let cleaned = clean_path(path)?;
        Ok(format!("{}/{}", self.base_url, cleaned))
    }

    /// Map a response to success or the matching error. Non-success bodies are
    /// always consumed so the connection can go back to the pool.
    fn check_status(&self, mut response: Response, url: &str) -> Result<Response> {
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => {
                drain(&mut response);
                Err(Error::NotFound(url.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                drain(&mut response);
                Err(Error::PermissionDenied(url.to_string()))
            }
            status => {
                let mut body = String::new();
                let _ = (&mut response)
                    .take(ERROR_BODY_LIMIT)
                    .read_to_string(&mut body);
                drain(&mut response);
                let (code, message) = parse_error_body(&body);
                Err(Error::Remote {
                    url: url.to_string(),
                    status: status.as_u16(),
                    code,
                    message,
                })
            }
        }
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder, url: &str) -> Result<Response> {
        let response = request
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {}: {}", url, e)))?;
        self.check_status(response, url)
    }

    /// Fetch one page of an S3 `ListObjectsV2` listing for the directory `dir`
    fn list_page(&self, dir: &str, token: Option<&str>, max_keys: Option<u32>) -> Result<Listing> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let url = format!("{}/", self.base_url);

        let mut query: Vec<(&str, String)> = vec![
            ("list-type", "2".to_string()),
            ("delimiter", "/".to_string()),
            ("prefix", prefix.clone()),
        ];
        if let Some(token) = token {
            query.push(("continuation-token", token.to_string()));
        }
        if let Some(max_keys) = max_keys {
            query.push(("max-keys", max_keys.to_string()));
        }

        let response = self.send(self.client.get(&url).query(&query), &url)?;
        let body = response
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read listing from {}: {}", url, e)))?;
        parse_listing(&body, &prefix)
    }
}

impl Backend for RemoteBackend {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let url = self.object_url(path)?;
        debug!("GET {}", url);
        let response = self.send(self.client.get(&url), &url)?;
        Ok(Box::new(response))
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        let url = self.object_url(path)?;
        match self.send(self.client.head(&url), &url) {
            Ok(response) => Ok(metadata_from_headers(response.headers(), FileType::Regular)),
            Err(err) if err.is_not_found() => {
                // Buckets have no directory objects; a non-empty prefix is one.
                let dir = clean_path(path)?;
                let listing = self.list_page(&dir, None, Some(1)).map_err(|_| err)?;
                if listing.entries.is_empty() {
                    Err(Error::NotFound(url))
                } else {
                    Ok(Metadata::new(FileType::Directory, 0))
                }
            }
            Err(err) => Err(err),
        }
    }

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir = clean_path(path)?;
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(&dir, token.as_deref(), None)?;
            entries.extend(page.entries);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(entries)
    }

    fn read_link(&self, path: &str) -> Result<String> {
        Err(Error::Backend {
            op: "readlink",
            path: self.describe(path),
            source: io::Error::new(io::ErrorKind::Unsupported, "remote stores have no symlinks"),
        })
    }

    fn describe(&self, path: &str) -> String {
        self.object_url(path)
            .unwrap_or_else(|_| format!("{}/{}", self.base_url, path))
    }
}

fn drain(response: &mut Response) {
    let _ = io::copy(&mut response.take(ERROR_BODY_LIMIT), &mut io::sink());
}

/// Build entry metadata from response headers
fn metadata_from_headers(headers: &HeaderMap, file_type: FileType) -> Metadata {
    let header = |name| headers.get(name).and_then(|v| v.to_str().ok());

    let mut metadata = Metadata::new(
        file_type,
        header(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0),
    );
    metadata.modified = header(LAST_MODIFIED).and_then(|v| {
        match DateTime::parse_from_rfc2822(v) {
            Ok(date) => Some(date.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring unparseable Last-Modified header {:?}: {}", v, e);
                None
            }
        }
    });
    metadata.etag = header(ETAG).map(|v| v.to_string());
    metadata.content_type = header(CONTENT_TYPE).map(|v| v.to_string());
    metadata
}

/// Extract `Code` and `Message` from an S3-style `<Error>` document
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut in_error = false;
    let mut current: Option<Vec<u8>> = None;
    let mut code = None;
    let mut message = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"Error" {
                    in_error = true;
                }
                current = Some(name);
            }
            Ok(Event::Text(t)) if in_error => {
                let text = match t.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => continue,
                };
                match current.as_deref() {
                    Some(b"Code") => code = Some(text),
                    Some(b"Message") => message = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    (code, message)
}

/// One page of a bucket listing
#[derive(Debug, Default)]
struct Listing {
    entries: Vec<DirEntry>,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` result. Keys and prefixes are made relative to
/// `prefix` so they can be returned as directory entries.
fn parse_listing(xml: &str, prefix: &str) -> Result<Listing> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut listing = Listing::default();
    let mut truncated = false;
    let mut token = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => path.push(e.local_name().as_ref().to_vec()),
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::ParseError(format!("Invalid bucket listing: {}", e)))?
                    .into_owned();
                let element = path.last().map(|v| v.as_slice());
                let parent = path.len().checked_sub(2).map(|i| path[i].as_slice());
                match (parent, element) {
                    (Some(b"Contents"), Some(b"Key")) => {
                        let name = text.strip_prefix(prefix).unwrap_or(&text);
                        if !name.is_empty() && !name.contains('/') {
                            listing.entries.push(DirEntry {
                                name: name.to_string(),
                                file_type: FileType::Regular,
                            });
                        }
                    }
                    (Some(b"CommonPrefixes"), Some(b"Prefix")) => {
                        let name = text.strip_prefix(prefix).unwrap_or(&text);
                        let name = name.trim_end_matches('/');
                        if !name.is_empty() && !name.contains('/') {
                            listing.entries.push(DirEntry {
                                name: name.to_string(),
                                file_type: FileType::Directory,
                            });
                        }
                    }
                    (_, Some(b"IsTruncated")) => truncated = text == "true",
                    (_, Some(b"NextContinuationToken")) => token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::ParseError(format!("Invalid bucket listing: {}", e)));
            }
            _ => {}
        }
        buf.clear();
    }

    if truncated {
        listing.next_token = token;
    }
    Ok(listing)
}
