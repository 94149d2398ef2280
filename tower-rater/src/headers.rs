use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::header::RETRY_AFTER;

use crate::DecisionContext;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Append the `X-RateLimit-*` triple taken from a decided context.
pub(crate) fn append_limits(headers: &mut HeaderMap, ctx: &DecisionContext) {
    headers.append(X_RATELIMIT_LIMIT, HeaderValue::from(ctx.limit()));
    headers.append(X_RATELIMIT_REMAINING, HeaderValue::from(ctx.remaining()));
    headers.append(X_RATELIMIT_RESET, HeaderValue::from(ctx.reset()));
}

pub(crate) fn append_retry_after(headers: &mut HeaderMap, ctx: &DecisionContext) {
    headers.append(RETRY_AFTER, HeaderValue::from(ctx.retry_after().max(0)));
}

/// Move every entry of `from` into `to`, keeping values already in `to`.
pub(crate) fn append_all(to: &mut HeaderMap, from: HeaderMap) {
    let mut name = None;
    for (next, value) in from {
        // `None` repeats the previous name.
        if next.is_some() {
            name = next;
        }
        if let Some(name) = &name {
            to.append(name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_all_keeps_existing_values() {
        let mut to = HeaderMap::new();
        to.append(RETRY_AFTER, HeaderValue::from_static("5"));

        let mut from = HeaderMap::new();
        from.append(RETRY_AFTER, HeaderValue::from_static("30"));
        from.append(X_RATELIMIT_LIMIT, HeaderValue::from_static("15"));
        from.append(X_RATELIMIT_LIMIT, HeaderValue::from_static("16"));

        append_all(&mut to, from);

        let retry: Vec<_> = to.get_all(RETRY_AFTER).iter().collect();
        assert_eq!(retry, ["5", "30"]);
        let limits: Vec<_> = to.get_all(X_RATELIMIT_LIMIT).iter().collect();
        assert_eq!(limits, ["15", "16"]);
    }

    #[test]
    fn test_header_values_from_context() {
        let mut ctx = DecisionContext::new(b"k".to_vec());
        ctx.feed(b"*5\r\n:1\r\n:15\r\n:0\r\n:30\r\n:45\r\n").unwrap();
        ctx.complete();

        let mut headers = HeaderMap::new();
        append_retry_after(&mut headers, &ctx);
        append_limits(&mut headers, &ctx);

        assert_eq!(headers[RETRY_AFTER], "30");
        assert_eq!(headers[X_RATELIMIT_LIMIT], "15");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_RATELIMIT_RESET], "45");
    }
}
