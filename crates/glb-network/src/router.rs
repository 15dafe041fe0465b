//! Request path routing

use glb_core::{GlbError, GlbResult};

/// Service and key used for every request in basic mode
pub const BASIC_NAME: &str = "default";

/// Routing decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub service: String,
    pub key: String,
    /// Path forwarded upstream, always starting with "/"
    pub path: String,
}

impl Route {
    /// Route for basic mode: fixed service/key, path forwarded untouched
    pub fn basic(path: &str) -> Self {
        Self {
            service: BASIC_NAME.to_string(),
            key: BASIC_NAME.to_string(),
            path: path.to_string(),
        }
    }
}

/// Split "/service/key/rest..." into service, key and "/rest..."
///
/// Service and key are percent-decoded but otherwise taken verbatim
/// (case-sensitive, not normalized); the remainder is forwarded still encoded.
/// Fails with `InvalidPath` unless both decode to non-empty names without `/`.
pub fn extract(path: &str) -> GlbResult<Route> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut segments = path.splitn(3, '/');

    let service = decode_segment(segments.next().unwrap_or_default())?;
    let key = decode_segment(segments.next().unwrap_or_default())?;

    let rest = segments.next().unwrap_or_default();
    Ok(Route {
        service,
        key,
        path: format!("/{}", rest),
    })
}

fn decode_segment(segment: &str) -> GlbResult<String> {
    let decoded = urlencoding::decode(segment).map_err(|_| GlbError::InvalidPath)?;
    if decoded.is_empty() || decoded.contains('/') {
        return Err(GlbError::InvalidPath);
    }
    Ok(decoded.into_owned())
}

/// Route a request path, honoring basic mode
pub fn route(path: &str, basic: bool) -> GlbResult<Route> {
    if basic {
        Ok(Route::basic(path))
    } else {
        extract(path)
    }
}
