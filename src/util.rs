use std::sync::Mutex;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Overlays `overrides` onto `base`; every name present in `overrides`
/// replaces all values of that name in `base`.
pub(crate) fn overlay_headers(base: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        base.remove(name);
    }
    for (name, value) in overrides {
        base.append(name.clone(), value.clone());
    }
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn resolve_uri(base_url: &str, target: &str) -> Result<(String, Uri), Error> {
    let uri_text = if has_scheme(target) {
        target.to_owned()
    } else {
        join_base_path(base_url, target)
    };
    if !has_http_scheme(&uri_text) {
        return Err(Error::InvalidUri { uri: uri_text });
    }
    let uri: Uri = uri_text.parse().map_err(|_| Error::InvalidUri {
        uri: uri_text.clone(),
    })?;
    if uri.host().is_none() {
        return Err(Error::InvalidUri { uri: uri_text });
    }
    Ok((uri_text, uri))
}

fn has_scheme(target: &str) -> bool {
    target
        .split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && !scheme.contains('/'))
}

fn has_http_scheme(target: &str) -> bool {
    let lower = target
        .get(..8)
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| target.to_ascii_lowercase());
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

/// Appends query parameters to `target`, merging with any query string it
/// already carries.
///
/// A parameter name appears once in the result: a later value replaces an
/// earlier one with the same name, keeping the position of the first
/// occurrence. Fragments are preserved.
pub fn append_query_params<I, K, V>(target: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let appended = params
        .into_iter()
        .map(|(name, value)| (name.as_ref().to_owned(), value.as_ref().to_owned()))
        .collect::<Vec<_>>();
    if appended.is_empty() {
        return target.to_owned();
    }

    if let Ok(mut url) = url::Url::parse(target) {
        let existing = parse_query_pairs(url.query());
        let query = build_query_string(existing, appended);
        url.set_query(Some(&query));
        return url.to_string();
    }

    let (without_fragment, fragment) = match target.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (target, None),
    };
    let (base, existing_query) = match without_fragment.split_once('?') {
        Some((left, right)) => (left, Some(right)),
        None => (without_fragment, None),
    };
    let existing = parse_query_pairs(existing_query);
    let query = build_query_string(existing, appended);

    let mut merged = format!("{base}?{query}");
    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

fn parse_query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

fn build_query_string(existing: Vec<(String, String)>, appended: Vec<(String, String)>) -> String {
    let mut merged: Vec<(String, String)> = Vec::with_capacity(existing.len() + appended.len());
    for (name, value) in existing.into_iter().chain(appended) {
        match merged.iter().position(|(current, _)| *current == name) {
            Some(index) => merged[index].1 = value,
            None => merged.push((name, value)),
        }
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &merged {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
