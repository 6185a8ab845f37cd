use std::fmt;

use rand::Rng;

pub const TRACEPARENT_HEADER: &str = "traceparent";

const TRACEPARENT_VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

/// W3C trace-context carrier: `00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
    flags: u8,
}

impl TraceContext {
    /// Builds a context from explicit identifiers. Returns `None` when either
    /// identifier is all zeros, which the format reserves as invalid.
    pub fn new(trace_id: u128, span_id: u64, sampled: bool) -> Option<Self> {
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            flags: if sampled { FLAG_SAMPLED } else { 0 },
        })
    }

    /// Starts a new sampled trace with random identifiers.
    pub fn new_root() -> Self {
        let mut rng = rand::rng();
        Self {
            trace_id: non_zero(|| rng.random::<u128>()),
            span_id: non_zero(|| rng.random::<u64>()),
            flags: FLAG_SAMPLED,
        }
    }

    /// Derives a child span within the same trace.
    pub fn child(&self) -> Self {
        let mut rng = rand::rng();
        Self {
            trace_id: self.trace_id,
            span_id: non_zero(|| rng.random::<u64>()),
            flags: self.flags,
        }
    }

    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & FLAG_SAMPLED != 0
    }

    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    pub fn to_traceparent(&self) -> String {
        self.to_string()
    }

    /// Parses a `traceparent` header value. Unknown future versions are
    /// accepted as long as the first four fields are well formed; version
    /// `ff` and all-zero identifiers are rejected.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if version == TRACEPARENT_VERSION && parts.next().is_some() {
            return None;
        }
        if !is_lower_hex(version, 2) || version == "ff" {
            return None;
        }
        if !is_lower_hex(trace_id, 32) || !is_lower_hex(span_id, 16) || !is_lower_hex(flags, 2) {
            return None;
        }

        let trace_id = u128::from_str_radix(trace_id, 16).ok()?;
        let span_id = u64::from_str_radix(span_id, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            flags,
        })
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{TRACEPARENT_VERSION}-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.span_id, self.flags
        )
    }
}

fn is_lower_hex(text: &str, len: usize) -> bool {
    text.len() == len
        && text
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

fn non_zero<T: PartialEq + Default>(mut generate: impl FnMut() -> T) -> T {
    loop {
        let value = generate();
        if value != T::default() {
            return value;
        }
    }
}
