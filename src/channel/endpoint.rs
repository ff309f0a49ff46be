//! Broker endpoint resolution
//!
//! Picks the configured URL (or the production default), validates it, and
//! upgrades `ws://` to `wss://` when the hosting origin is served over
//! HTTPS. Browsers refuse plain WebSocket connections from secure pages, so a
//! dashboard served on `https:` must talk `wss:` to the same host and path.

use url::Url;

use super::error::EndpointError;

/// Production broker used when nothing is configured
pub const DEFAULT_ENDPOINT: &str = "wss://api.hydroleaf.se/ws";

/// Whether an origin such as `https://app.hydroleaf.se` is secure
pub fn origin_is_secure(origin: Option<&str>) -> bool {
    origin
        .map(|o| o.trim().to_ascii_lowercase().starts_with("https:"))
        .unwrap_or(false)
}

/// Resolve the URL the channel will connect to.
///
/// An empty or missing `configured` value falls back to [`DEFAULT_ENDPOINT`].
pub fn resolve_endpoint(configured: Option<&str>, secure_origin: bool) -> Result<Url, EndpointError> {
    let raw = configured
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_ENDPOINT);

    let mut url = Url::parse(raw).map_err(|e| EndpointError::Invalid {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if url.host_str().map_or(true, str::is_empty) {
        return Err(EndpointError::Invalid {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    match url.scheme() {
        "wss" => {}
        "ws" if secure_origin => {
            url.set_scheme("wss").map_err(|_| EndpointError::Invalid {
                url: raw.to_string(),
                reason: "cannot upgrade scheme to wss".to_string(),
            })?;
            tracing::debug!(endpoint = %url, "Upgraded endpoint to wss for secure origin");
        }
        "ws" => {}
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    }

    Ok(url)
}
