use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderValue;
use http::{HeaderMap, Method, Uri};
use tracing::debug;

use crate::error::{Error, ErrorCode};
use crate::trace::{TRACEPARENT_HEADER, TraceContext};

/// Outcome attached to a span when it ends.
#[derive(Clone, Copy, Debug)]
pub enum SpanOutcome<'a> {
    Status(u16),
    Failed(&'a Error),
}

pub trait ActiveSpan: Send + Sync {
    fn context(&self) -> TraceContext;

    fn end(self: Box<Self>, outcome: SpanOutcome<'_>);
}

pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, parent: Option<&TraceContext>) -> Box<dyn ActiveSpan>;
}

/// One sample per logical operation, emitted after the last attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub method: Method,
    pub route: String,
    pub status: Option<u16>,
    pub error_code: Option<ErrorCode>,
    pub attempts: usize,
    pub elapsed: Duration,
}

pub trait MetricsRecorder: Send + Sync {
    fn record(&self, sample: &MetricSample);
}

/// Reduces a concrete request path to a low-cardinality route template.
pub trait RouteNormalizer: Send + Sync {
    fn normalize_path(&self, path: &str) -> String;
}

#[derive(Debug, Default)]
pub struct StandardRouteNormalizer;

impl RouteNormalizer for StandardRouteNormalizer {
    fn normalize_path(&self, path: &str) -> String {
        if path.is_empty() || path == "/" {
            return "/".to_owned();
        }
        let mut normalized = String::with_capacity(path.len());
        for segment in path.trim_start_matches('/').split('/') {
            normalized.push('/');
            if !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit()) {
                normalized.push_str(":int");
            } else if is_uuid(segment) {
                normalized.push_str(":uuid");
            } else {
                normalized.push_str(segment);
            }
        }
        normalized
    }
}

fn is_uuid(segment: &str) -> bool {
    segment.len() == 36
        && segment.bytes().enumerate().all(|(index, byte)| match index {
            8 | 13 | 18 | 23 => byte == b'-',
            _ => byte.is_ascii_hexdigit(),
        })
}

/// Span starter that mints W3C identifiers locally and reports finished
/// spans as `tracing` events.
#[derive(Debug, Default)]
pub struct W3cTracer;

struct W3cSpan {
    name: String,
    context: TraceContext,
    parent_span_id: Option<u64>,
    started_at: std::time::Instant,
}

impl Tracer for W3cTracer {
    fn start_span(&self, name: &str, parent: Option<&TraceContext>) -> Box<dyn ActiveSpan> {
        let context = match parent {
            Some(parent) => parent.child(),
            None => TraceContext::new_root(),
        };
        Box::new(W3cSpan {
            name: name.to_owned(),
            context,
            parent_span_id: parent.map(TraceContext::span_id),
            started_at: std::time::Instant::now(),
        })
    }
}

impl ActiveSpan for W3cSpan {
    fn context(&self) -> TraceContext {
        self.context
    }

    fn end(self: Box<Self>, outcome: SpanOutcome<'_>) {
        let (status, error) = match outcome {
            SpanOutcome::Status(status) => (Some(status), None),
            SpanOutcome::Failed(error) => (error.status(), Some(error.code().as_str())),
        };
        let parent_span_id = self
            .parent_span_id
            .map(|id| format!("{id:016x}"))
            .unwrap_or_default();
        debug!(
            span = %self.name,
            trace_id = %self.context.trace_id_hex(),
            span_id = %self.context.span_id_hex(),
            parent_span_id = %parent_span_id,
            status,
            error,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "span finished"
        );
    }
}

/// Hooks the executor calls around every logical operation and attempt.
/// With no tracer and no recorder configured every hook returns before
/// allocating anything.
#[derive(Clone, Default)]
pub(crate) struct Telemetry {
    inner: Option<Arc<TelemetryInner>>,
}

struct TelemetryInner {
    tracer: Option<Arc<dyn Tracer>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    route_normalizer: Arc<dyn RouteNormalizer>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Telemetry")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct OperationScope {
    span: Option<Box<dyn ActiveSpan>>,
    name: String,
    route: String,
}

#[derive(Default)]
pub(crate) struct AttemptScope {
    span: Option<Box<dyn ActiveSpan>>,
}

impl Telemetry {
    pub(crate) fn new(
        tracer: Option<Arc<dyn Tracer>>,
        metrics: Option<Arc<dyn MetricsRecorder>>,
        route_normalizer: Arc<dyn RouteNormalizer>,
    ) -> Self {
        if tracer.is_none() && metrics.is_none() {
            return Self::disabled();
        }
        Self {
            inner: Some(Arc::new(TelemetryInner {
                tracer,
                metrics,
                route_normalizer,
            })),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn start_operation(
        &self,
        parent: Option<&TraceContext>,
        method: &Method,
        uri: &Uri,
    ) -> OperationScope {
        let Some(inner) = &self.inner else {
            return OperationScope::default();
        };
        let route = inner.route_normalizer.normalize_path(uri.path());
        let name = format!("{method} {route}");
        let span = inner
            .tracer
            .as_ref()
            .map(|tracer| tracer.start_span(&name, parent));
        OperationScope { span, name, route }
    }

    pub(crate) fn start_attempt(&self, operation: &OperationScope, attempt: usize) -> AttemptScope {
        let (Some(inner), Some(parent)) = (&self.inner, &operation.span) else {
            return AttemptScope::default();
        };
        let Some(tracer) = &inner.tracer else {
            return AttemptScope::default();
        };
        let name = format!("{} attempt {}", operation.name, attempt + 1);
        AttemptScope {
            span: Some(tracer.start_span(&name, Some(&parent.context()))),
        }
    }

    pub(crate) fn record_operation(
        &self,
        operation: &OperationScope,
        method: &Method,
        outcome: SpanOutcome<'_>,
        attempts: usize,
        elapsed: Duration,
    ) {
        let Some(metrics) = self.inner.as_ref().and_then(|inner| inner.metrics.as_ref()) else {
            return;
        };
        let (status, error_code) = match outcome {
            SpanOutcome::Status(status) => (Some(status), None),
            SpanOutcome::Failed(error) => (error.status(), Some(error.code())),
        };
        metrics.record(&MetricSample {
            method: method.clone(),
            route: operation.route.clone(),
            status,
            error_code,
            attempts,
            elapsed,
        });
    }
}

impl OperationScope {
    pub(crate) fn trace_context(&self) -> Option<TraceContext> {
        self.span.as_ref().map(|span| span.context())
    }

    pub(crate) fn finish(mut self, outcome: SpanOutcome<'_>) {
        if let Some(span) = self.span.take() {
            span.end(outcome);
        }
    }
}

impl AttemptScope {
    /// Writes this attempt's `traceparent`, replacing any value already set.
    pub(crate) fn inject(&self, headers: &mut HeaderMap) {
        let Some(span) = &self.span else {
            return;
        };
        if let Ok(value) = HeaderValue::from_str(&span.context().to_traceparent()) {
            headers.insert(TRACEPARENT_HEADER, value);
        }
    }

    pub(crate) fn finish(mut self, outcome: SpanOutcome<'_>) {
        if let Some(span) = self.span.take() {
            span.end(outcome);
        }
    }
}
