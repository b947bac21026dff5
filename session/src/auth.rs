use http::HeaderMap;
use http::HeaderValue;

/// Provides the bearer credential sent when a session connects.
///
/// Implementations should be cheap and non-blocking; the token is read once
/// per connection attempt.
pub trait AuthProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, typically taken from `CODEFORGE_API_TOKEN` or `--token`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|token| !token.is_empty()))
    }
}

impl AuthProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

pub(crate) fn apply_auth_headers<A: AuthProvider + ?Sized>(auth: &A, headers: &mut HeaderMap) {
    if let Some(token) = auth.bearer_token()
        && let Ok(header) = HeaderValue::from_str(&format!("Bearer {token}"))
    {
        let _ = headers.insert(http::header::AUTHORIZATION, header);
    }
}
