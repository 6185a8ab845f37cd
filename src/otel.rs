use std::borrow::Cow;

use opentelemetry::KeyValue;
use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, SpanKind, Status, TraceContextExt as _, TraceFlags, TraceId,
    TraceState, Tracer as _,
};

use crate::telemetry::{ActiveSpan, MetricSample, MetricsRecorder, SpanOutcome, Tracer};
use crate::trace::TraceContext;

const INSTRUMENTATION_NAME: &str = "reqpipe";

/// [`Tracer`] backed by the globally installed OpenTelemetry tracer provider.
pub struct OtelTracer {
    client_name: Cow<'static, str>,
    tracer: BoxedTracer,
}

impl std::fmt::Debug for OtelTracer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OtelTracer")
            .field("client_name", &self.client_name)
            .finish_non_exhaustive()
    }
}

impl OtelTracer {
    pub fn new(client_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            client_name: client_name.into(),
            tracer: global::tracer(INSTRUMENTATION_NAME),
        }
    }
}

struct OtelSpan {
    span: BoxedSpan,
    context: TraceContext,
}

impl Tracer for OtelTracer {
    fn start_span(&self, name: &str, parent: Option<&TraceContext>) -> Box<dyn ActiveSpan> {
        let parent_context = match parent {
            Some(parent) => opentelemetry::Context::new()
                .with_remote_span_context(to_span_context(parent)),
            None => opentelemetry::Context::new(),
        };
        let mut span = self
            .tracer
            .span_builder(name.to_owned())
            .with_kind(SpanKind::Client)
            .start_with_context(&self.tracer, &parent_context);
        span.set_attribute(KeyValue::new("reqpipe.client", self.client_name.to_string()));

        // A no-op provider yields an invalid context or echoes the parent's;
        // mint local identifiers then so every span keeps its own span id.
        let context = match from_span_context(span.span_context()) {
            Some(context) if parent.is_none_or(|parent| parent.span_id() != context.span_id()) => {
                context
            }
            _ => match parent {
                Some(parent) => parent.child(),
                None => TraceContext::new_root(),
            },
        };
        Box::new(OtelSpan { span, context })
    }
}

impl ActiveSpan for OtelSpan {
    fn context(&self) -> TraceContext {
        self.context
    }

    fn end(mut self: Box<Self>, outcome: SpanOutcome<'_>) {
        match outcome {
            SpanOutcome::Status(status) => {
                self.span.set_attribute(KeyValue::new(
                    "http.response.status_code",
                    i64::from(status),
                ));
            }
            SpanOutcome::Failed(error) => {
                if let Some(status) = error.status() {
                    self.span.set_attribute(KeyValue::new(
                        "http.response.status_code",
                        i64::from(status),
                    ));
                }
                self.span
                    .set_attribute(KeyValue::new("error.type", error.code().as_str()));
                self.span.set_status(Status::error(error.kind().to_string()));
            }
        }
        self.span.end();
    }
}

fn to_span_context(context: &TraceContext) -> SpanContext {
    SpanContext::new(
        TraceId::from_bytes(context.trace_id().to_be_bytes()),
        SpanId::from_bytes(context.span_id().to_be_bytes()),
        TraceFlags::new(context.flags()),
        true,
        TraceState::default(),
    )
}

fn from_span_context(context: &SpanContext) -> Option<TraceContext> {
    if !context.is_valid() {
        return None;
    }
    TraceContext::new(
        u128::from_be_bytes(context.trace_id().to_bytes()),
        u64::from_be_bytes(context.span_id().to_bytes()),
        context.is_sampled(),
    )
}

/// [`MetricsRecorder`] backed by the globally installed OpenTelemetry meter
/// provider.
pub struct OtelMetrics {
    client_name: Cow<'static, str>,
    requests: Counter<u64>,
    attempts: Counter<u64>,
    request_latency_ms: Histogram<f64>,
}

impl std::fmt::Debug for OtelMetrics {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OtelMetrics")
            .field("client_name", &self.client_name)
            .finish_non_exhaustive()
    }
}

impl OtelMetrics {
    pub fn new(client_name: impl Into<Cow<'static, str>>) -> Self {
        let meter = global::meter(INSTRUMENTATION_NAME);
        Self {
            client_name: client_name.into(),
            requests: meter
                .u64_counter("reqpipe.request.completed")
                .with_description("Completed logical requests")
                .build(),
            attempts: meter
                .u64_counter("reqpipe.request.attempts")
                .with_description("Network attempts made by logical requests")
                .build(),
            request_latency_ms: meter
                .f64_histogram("reqpipe.request.duration.ms")
                .with_unit("ms")
                .with_description("End-to-end request latency across all attempts")
                .build(),
        }
    }
}

impl MetricsRecorder for OtelMetrics {
    fn record(&self, sample: &MetricSample) {
        let mut attributes = vec![
            KeyValue::new("reqpipe.client", self.client_name.to_string()),
            KeyValue::new("http.request.method", sample.method.as_str().to_owned()),
            KeyValue::new("http.route", sample.route.clone()),
        ];
        if let Some(status) = sample.status {
            attributes.push(KeyValue::new(
                "http.response.status_code",
                i64::from(status),
            ));
        }
        if let Some(code) = sample.error_code {
            attributes.push(KeyValue::new("error.type", code.as_str()));
        }
        self.requests.add(1, &attributes);
        self.attempts.add(sample.attempts as u64, &attributes);
        self.request_latency_ms
            .record(sample.elapsed.as_secs_f64() * 1000.0, &attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::{OtelTracer, from_span_context, to_span_context};
    use crate::telemetry::{SpanOutcome, Tracer};
    use crate::trace::TraceContext;

    #[test]
    fn span_context_conversion_preserves_identifiers() {
        let context = TraceContext::new_root();
        let converted = from_span_context(&to_span_context(&context)).expect("valid context");
        assert_eq!(converted, context);
    }

    #[test]
    fn nested_spans_get_distinct_ids_without_installed_provider() {
        let tracer = OtelTracer::new("ledger-service");
        let incoming = TraceContext::new_root();

        let operation = tracer.start_span("POST /ledgers", Some(&incoming));
        let operation_context = operation.context();
        let attempt = tracer.start_span("POST /ledgers attempt", Some(&operation_context));
        let attempt_context = attempt.context();

        assert_eq!(operation_context.trace_id(), incoming.trace_id());
        assert_eq!(attempt_context.trace_id(), incoming.trace_id());
        assert_ne!(operation_context.span_id(), incoming.span_id());
        assert_ne!(attempt_context.span_id(), operation_context.span_id());
        assert_ne!(attempt_context.span_id(), incoming.span_id());

        attempt.end(SpanOutcome::Status(200));
        operation.end(SpanOutcome::Status(200));
    }
}
