use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::codec::decode_json;
use crate::error::{BoxError, Error, TransportErrorKind};

/// One attempt's request as handed to a [`Transport`].
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn into_parts(self) -> (Method, Uri, HeaderMap, Option<Bytes>) {
        (self.method, self.uri, self.headers, self.body)
    }
}

/// A fully read response from one attempt.
#[derive(Clone, Debug)]
pub struct InboundResult {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl InboundResult {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        decode_json(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{kind} failure: {source}")]
    Io {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("response body exceeded {limit_bytes} bytes (read {actual_bytes})")]
    BodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
    },
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Io {
            kind,
            source: source.into(),
        }
    }
}

/// The network capability the pipeline drives. Implementations perform one
/// round trip and read the whole response body; they never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResult, TransportError>;
}

type HttpsClient = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Default [`Transport`] over hyper with rustls (ring provider, webpki roots).
#[derive(Clone)]
pub struct HyperTransport {
    client: HttpsClient,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn new(max_response_body_bytes: usize) -> Result<Self, Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::InvalidConfig {
                message: format!("failed to initialize rustls: {source}"),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);
        let client = HyperClient::builder(TokioExecutor::new()).build(https);
        Ok(Self {
            client,
            max_response_body_bytes: max_response_body_bytes.max(1),
        })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResult, TransportError> {
        let (method, uri, headers, body) = request.into_parts();
        let mut http_request = Request::new(Full::new(body.unwrap_or_default()));
        *http_request.method_mut() = method;
        *http_request.uri_mut() = uri;
        *http_request.headers_mut() = headers;

        let response = self.client.request(http_request).await.map_err(|source| {
            TransportError::new(classify_transport_error(&source), source)
        })?;
        let (parts, body) = response.into_parts();
        let body = read_all_body_limited(body, self.max_response_body_bytes).await?;
        Ok(InboundResult::new(parts.status, parts.headers, body))
    }
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, TransportError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| TransportError::new(TransportErrorKind::Read, source))?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(TransportError::BodyTooLarge {
                    limit_bytes: max_bytes,
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    let text = error_chain_text(error);
    if error.is_connect() {
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    if text.contains("timed out") {
        return TransportErrorKind::Timeout;
    }
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("connection closed")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
        || text.contains("incomplete message")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string().to_ascii_lowercase();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string().to_ascii_lowercase());
        source = cause.source();
    }
    text
}
