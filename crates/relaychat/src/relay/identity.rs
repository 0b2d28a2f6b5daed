//! Rate-limit identity of an inbound request

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

/// Header a client uses to name itself
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Identity used when neither a header nor a peer address is available
pub const ANONYMOUS: &str = "anonymous";

const MAX_IDENTITY_LEN: usize = 128;

/// Who a request counts against
///
/// Resolved from the `x-client-id` header, else the peer IP address, else
/// [`ANONYMOUS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn resolve(parts: &Parts) -> Self {
        let header = parts
            .headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(id) = header {
            return Self(id.chars().take(MAX_IDENTITY_LEN).collect());
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Self(addr.ip().to_string());
        }

        Self(ANONYMOUS.to_string())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::resolve(parts))
    }
}
