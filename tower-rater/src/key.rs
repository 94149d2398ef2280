use http::HeaderName;
use http::Request;

/// Evaluates the rate limit key for a request.
///
/// `None` or an empty key means the request is not limited.
pub trait KeyExtractor<Req> {
    fn extract(&self, req: &Req) -> Option<Vec<u8>>;
}

impl<F, K, Req> KeyExtractor<Req> for F
where
    F: Fn(&Req) -> Option<K>,
    K: Into<Vec<u8>>,
{
    fn extract(&self, req: &Req) -> Option<Vec<u8>> {
        self(req).map(Into::into)
    }
}

/// Uses the value of a request header as the key.
#[derive(Debug, Clone)]
pub struct HeaderKey(pub HeaderName);

impl<B> KeyExtractor<Request<B>> for HeaderKey {
    fn extract(&self, req: &Request<B>) -> Option<Vec<u8>> {
        req.headers()
            .get(&self.0)
            .map(|value| value.as_bytes().to_vec())
    }
}

/// Join `prefix` and `key` as `prefix_key`. An empty prefix leaves the key as is.
pub fn prefix_key(prefix: &str, key: Vec<u8>) -> Vec<u8> {
    if prefix.is_empty() {
        return key;
    }

    let mut prefixed = Vec::with_capacity(prefix.len() + 1 + key.len());
    prefixed.extend_from_slice(prefix.as_bytes());
    prefixed.push(b'_');
    prefixed.extend_from_slice(&key);
    prefixed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_key() {
        assert_eq!(prefix_key("", b"user123".to_vec()), b"user123");
        assert_eq!(prefix_key("api", b"user123".to_vec()), b"api_user123");
    }

    #[test]
    fn test_header_key() {
        let req = Request::builder()
            .header("x-api-key", "abc")
            .body(())
            .unwrap();

        let extractor = HeaderKey(HeaderName::from_static("x-api-key"));
        assert_eq!(extractor.extract(&req), Some(b"abc".to_vec()));

        let missing = HeaderKey(HeaderName::from_static("x-user"));
        assert_eq!(missing.extract(&req), None);
    }

    #[test]
    fn test_closure_key() {
        let by_path = |req: &Request<()>| Some(req.uri().path().to_string());
        let req = Request::builder().uri("/users/7").body(()).unwrap();
        assert_eq!(by_path.extract(&req), Some(b"/users/7".to_vec()));
    }
}
