use axum::http::{header::AUTHORIZATION, HeaderMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    Authorized,
    Unauthorized,
    /// No secret is configured on the server side.
    NotConfigured,
}

pub fn secrets_match(expected: &str, provided: &str) -> bool {
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), provided.as_bytes()).unwrap_u8() == 1u8
}

/// Token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Compares the first provided candidate against the configured secret.
/// Candidates are tried in order: callers pass the header token before the
/// query token.
pub fn check_secret<'a>(
    configured: Option<&str>,
    candidates: impl IntoIterator<Item = Option<&'a str>>,
) -> SecretCheck {
    let Some(expected) = configured.filter(|s| !s.is_empty()) else {
        return SecretCheck::NotConfigured;
    };
    let provided = candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty());
    match provided {
        Some(token) if secrets_match(expected, token) => SecretCheck::Authorized,
        _ => SecretCheck::Unauthorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn check_secret_outcomes() {
        assert_eq!(check_secret(None, [Some("x")]), SecretCheck::NotConfigured);
        assert_eq!(check_secret(Some(""), [Some("x")]), SecretCheck::NotConfigured);
        assert_eq!(check_secret(Some("s3cret"), [None, Some("s3cret")]), SecretCheck::Authorized);
        assert_eq!(check_secret(Some("s3cret"), [Some("nope")]), SecretCheck::Unauthorized);
        assert_eq!(check_secret(Some("s3cret"), [None, None]), SecretCheck::Unauthorized);
        assert_eq!(check_secret(Some("s3cret"), [Some("s3cre")]), SecretCheck::Unauthorized);
    }
}
