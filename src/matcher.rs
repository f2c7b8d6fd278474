//! Ready-made request matchers.

use std::sync::Arc;

use crate::http::Request;
use crate::service::Matcher;

/// Matches requests whose URL host equals `host`, ignoring ASCII case.
pub fn host(host: impl Into<String>) -> Matcher {
    let host = host.into();
    Arc::new(move |request: &Request, _: Option<&str>| {
        request
            .url
            .host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case(&host))
    })
}

/// Matches requests to `host` whose path starts with `prefix`.
pub fn host_and_path_prefix(host: impl Into<String>, prefix: impl Into<String>) -> Matcher {
    let by_host = self::host(host);
    let prefix = prefix.into();
    Arc::new(move |request: &Request, hint: Option<&str>| {
        by_host(request, hint) && request.url.path().starts_with(&prefix)
    })
}

/// Matches requests whose caller named this service explicitly.
pub fn named(name: impl Into<String>) -> Matcher {
    let name = name.into();
    Arc::new(move |_: &Request, hint: Option<&str>| hint == Some(name.as_str()))
}
