use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span};

use crate::auth::{AuthTokenProvider, StaticAuthToken};
use crate::classify::classify;
use crate::codec::{decode_json, encode_json};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::error::{Error, TransportErrorKind};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::telemetry::{
    MetricsRecorder, OperationScope, RouteNormalizer, SpanOutcome, StandardRouteNormalizer,
    Telemetry, Tracer,
};
use crate::transport::{HyperTransport, InboundResult, OutboundRequest, Transport, TransportError};
use crate::util::{
    overlay_headers, parse_header_name, parse_header_value, redact_uri_for_logs, resolve_uri,
    truncate_body,
};

const DEBUG_TARGET: &str = "reqpipe::debug";

type AuthSlot = Option<Arc<dyn AuthTokenProvider>>;

pub struct ClientBuilder {
    config: ClientConfig,
    default_headers: HeaderMap,
    transport: Option<Arc<dyn Transport>>,
    auth: AuthSlot,
    tracer: Option<Arc<dyn Tracer>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    route_normalizer: Arc<dyn RouteNormalizer>,
}

impl ClientBuilder {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            config,
            default_headers: HeaderMap::new(),
            transport: None,
            auth: None,
            tracer: None,
            metrics: None,
            route_normalizer: Arc::new(StandardRouteNormalizer),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.config.client_name = client_name.into();
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.config.max_response_body_bytes = max_response_body_bytes;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.config.retry_policy = retry_policy;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self, Error> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.default_header(header_name, header_value))
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn auth_provider(mut self, provider: Arc<dyn AuthTokenProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        self.auth_provider(Arc::new(StaticAuthToken::bearer(token)))
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn metrics_recorder(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn route_normalizer(mut self, route_normalizer: Arc<dyn RouteNormalizer>) -> Self {
        self.route_normalizer = route_normalizer;
        self
    }

    pub fn try_build(self) -> Result<Client, Error> {
        self.config.validate()?;
        let user_agent = parse_header_value("user-agent", &self.config.user_agent)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(self.config.max_response_body_bytes)?),
        };
        let telemetry = Telemetry::new(self.tracer, self.metrics, self.route_normalizer);
        let ClientConfig {
            base_url,
            client_name,
            request_timeout,
            retry_policy,
            debug,
            ..
        } = self.config;

        Ok(Client {
            inner: Arc::new(ClientInner {
                base_url,
                client_name,
                user_agent,
                request_timeout,
                debug,
                default_headers: self.default_headers,
                transport,
                auth: ArcSwap::from_pointee(self.auth),
                retry_policy: ArcSwap::from_pointee(retry_policy),
                telemetry,
            }),
        })
    }

    pub fn build(self) -> Client {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build reqpipe client: {error}"))
    }
}

/// Request executor shared by resource clients. Cheap to clone; clones share
/// the transport, retry policy and auth provider.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: String,
    client_name: String,
    user_agent: HeaderValue,
    request_timeout: Duration,
    debug: bool,
    default_headers: HeaderMap,
    transport: Arc<dyn Transport>,
    auth: ArcSwap<AuthSlot>,
    retry_policy: ArcSwap<RetryPolicy>,
    telemetry: Telemetry,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("client_name", &self.inner.client_name)
            .field("retry_policy", &self.inner.retry_policy.load_full())
            .field("telemetry", &self.inner.telemetry)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn retry_policy(&self) -> Arc<RetryPolicy> {
        self.inner.retry_policy.load_full()
    }

    /// Swaps the policy for operations started from now on; running
    /// operations keep the policy they started with.
    pub fn replace_retry_policy(&self, retry_policy: RetryPolicy) {
        self.inner.retry_policy.store(Arc::new(retry_policy));
    }

    pub fn replace_auth_provider(&self, provider: Option<Arc<dyn AuthTokenProvider>>) {
        self.inner.auth.store(Arc::new(provider));
    }

    /// Runs one logical operation and decodes the response body into `T`.
    ///
    /// Returns `Ok(None)` when the response body is empty. Pass
    /// `None::<&()>` as `body` for requests without a payload.
    pub async fn execute<B, T>(
        &self,
        context: &CallContext,
        method: Method,
        target: &str,
        headers: &HeaderMap,
        body: Option<&B>,
    ) -> Result<Option<T>, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.perform(context, method, target, headers, body, |response| {
            if response.body().is_empty() {
                return Ok(None);
            }
            decode_json(response.body()).map(Some)
        })
        .await
    }

    /// Runs one logical operation without decoding the response body.
    pub async fn execute_discard<B>(
        &self,
        context: &CallContext,
        method: Method,
        target: &str,
        headers: &HeaderMap,
        body: Option<&B>,
    ) -> Result<(), Error>
    where
        B: Serialize + ?Sized,
    {
        self.perform(context, method, target, headers, body, |_| Ok(()))
            .await
    }

    /// Runs one logical operation and returns the raw successful response.
    pub async fn send<B>(
        &self,
        context: &CallContext,
        method: Method,
        target: &str,
        headers: &HeaderMap,
        body: Option<&B>,
    ) -> Result<InboundResult, Error>
    where
        B: Serialize + ?Sized,
    {
        self.perform(context, method, target, headers, body, Ok)
            .await
    }

    pub async fn get<T>(&self, context: &CallContext, target: &str) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        self.execute(context, Method::GET, target, &HeaderMap::new(), None::<&()>)
            .await
    }

    pub async fn delete<T>(&self, context: &CallContext, target: &str) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        self.execute(context, Method::DELETE, target, &HeaderMap::new(), None::<&()>)
            .await
    }

    pub async fn post<B, T>(
        &self,
        context: &CallContext,
        target: &str,
        body: &B,
    ) -> Result<Option<T>, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(context, Method::POST, target, &HeaderMap::new(), Some(body))
            .await
    }

    pub async fn put<B, T>(
        &self,
        context: &CallContext,
        target: &str,
        body: &B,
    ) -> Result<Option<T>, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(context, Method::PUT, target, &HeaderMap::new(), Some(body))
            .await
    }

    pub async fn patch<B, T>(
        &self,
        context: &CallContext,
        target: &str,
        body: &B,
    ) -> Result<Option<T>, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(context, Method::PATCH, target, &HeaderMap::new(), Some(body))
            .await
    }

    async fn perform<B, R, F>(
        &self,
        context: &CallContext,
        method: Method,
        target: &str,
        headers: &HeaderMap,
        body: Option<&B>,
        complete: F,
    ) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        F: FnOnce(InboundResult) -> Result<R, Error>,
    {
        let request = self.prepare_request(method, target, headers, body)?;
        let telemetry = &self.inner.telemetry;
        let operation =
            telemetry.start_operation(context.trace_parent(), request.method(), request.uri());
        let retry_policy = self.inner.retry_policy.load_full();
        let started_at = Instant::now();
        let mut attempts = 0_usize;

        let response = run_with_retry(&retry_policy, context, |attempt| {
            attempts = attempt + 1;
            self.send_attempt(&request, &operation, attempt)
        })
        .await;

        let status = response
            .as_ref()
            .ok()
            .map(|response| response.status().as_u16());
        // Operations that never reached the transport record no sample.
        if attempts > 0 {
            telemetry.record_operation(
                &operation,
                request.method(),
                outcome(status, response.as_ref().err()),
                attempts,
                started_at.elapsed(),
            );
        }

        let result = response.and_then(complete);
        operation.finish(outcome(status, result.as_ref().err()));
        result
    }

    fn prepare_request<B>(
        &self,
        method: Method,
        target: &str,
        headers: &HeaderMap,
        body: Option<&B>,
    ) -> Result<OutboundRequest, Error>
    where
        B: Serialize + ?Sized,
    {
        let (_, uri) = resolve_uri(&self.inner.base_url, target)?;

        let mut merged = HeaderMap::new();
        merged.insert(ACCEPT, HeaderValue::from_static("application/json"));
        merged.insert(USER_AGENT, self.inner.user_agent.clone());
        let body = match body {
            Some(body) => {
                merged.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(encode_json(body)?)
            }
            None => None,
        };
        if let Some(authorization) = self.authorization()? {
            merged.insert(AUTHORIZATION, authorization);
        }
        overlay_headers(&mut merged, &self.inner.default_headers);
        overlay_headers(&mut merged, headers);

        Ok(OutboundRequest::new(method, uri, merged, body))
    }

    fn authorization(&self) -> Result<Option<HeaderValue>, Error> {
        let auth = self.inner.auth.load();
        let slot: &AuthSlot = &auth;
        let Some(provider) = slot else {
            return Ok(None);
        };
        match provider.authorization() {
            Some(value) if !value.is_empty() => {
                let mut value = parse_header_value(AUTHORIZATION.as_str(), &value)?;
                value.set_sensitive(true);
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    async fn send_attempt(
        &self,
        request: &OutboundRequest,
        operation: &OperationScope,
        attempt: usize,
    ) -> Result<InboundResult, Error> {
        let inner = &self.inner;
        let redacted_uri = redact_uri_for_logs(&request.uri().to_string());
        let span = info_span!(
            "reqpipe.request",
            client = %inner.client_name,
            method = %request.method(),
            uri = %redacted_uri,
            attempt = attempt + 1,
            trace_id = %operation
                .trace_context()
                .map(|context| context.trace_id_hex())
                .unwrap_or_default()
        );

        async move {
            let attempt_scope = inner.telemetry.start_attempt(operation, attempt);
            let mut outbound = request.clone();
            attempt_scope.inject(outbound.headers_mut());
            if inner.debug {
                log_outbound(&outbound, &redacted_uri);
            }

            debug!("sending request");
            let started = Instant::now();
            let result = match timeout(inner.request_timeout, inner.transport.send(outbound)).await
            {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(TransportError::Io { kind, source })) => Err(Error::Network {
                    kind,
                    method: request.method().clone(),
                    uri: redacted_uri.clone(),
                    source,
                }),
                Ok(Err(TransportError::BodyTooLarge {
                    limit_bytes,
                    actual_bytes,
                })) => Err(Error::ResponseBodyTooLarge {
                    limit_bytes,
                    actual_bytes,
                    method: request.method().clone(),
                    uri: redacted_uri.clone(),
                }),
                Err(_) => Err(Error::Network {
                    kind: TransportErrorKind::Timeout,
                    method: request.method().clone(),
                    uri: redacted_uri.clone(),
                    source: format!(
                        "no response within {}ms",
                        inner.request_timeout.as_millis()
                    )
                    .into(),
                }),
            };

            let result = result.and_then(|response| {
                if inner.debug {
                    log_inbound(&response, &redacted_uri);
                }
                let status = response.status();
                debug!(
                    status = status.as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request completed"
                );
                if status.as_u16() >= 400 {
                    return Err(classify(
                        status,
                        response.body(),
                        request.method(),
                        &redacted_uri,
                    ));
                }
                Ok(response)
            });

            let status = result
                .as_ref()
                .ok()
                .map(|response| response.status().as_u16());
            attempt_scope.finish(outcome(status, result.as_ref().err()));
            result
        }
        .instrument(span)
        .await
    }
}

fn outcome(status: Option<u16>, error: Option<&Error>) -> SpanOutcome<'_> {
    match (error, status) {
        (Some(error), _) => SpanOutcome::Failed(error),
        (None, Some(status)) => SpanOutcome::Status(status),
        (None, None) => SpanOutcome::Status(0),
    }
}

fn log_outbound(request: &OutboundRequest, redacted_uri: &str) {
    let body = request
        .body()
        .map(|body| truncate_body(body))
        .unwrap_or_default();
    info!(
        target: DEBUG_TARGET,
        method = %request.method(),
        uri = %redacted_uri,
        body = %body,
        "outbound request"
    );
}

fn log_inbound(response: &InboundResult, redacted_uri: &str) {
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| format!("{name}: {}", value.to_str().unwrap_or("<binary>")))
        .collect::<Vec<_>>()
        .join(", ");
    info!(
        target: DEBUG_TARGET,
        uri = %redacted_uri,
        status = response.status().as_u16(),
        headers = %headers,
        body = %truncate_body(response.body()),
        "inbound response"
    );
}
