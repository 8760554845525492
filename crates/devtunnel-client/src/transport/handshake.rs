//! Handshake request construction.
//!
//! The broker identifies the tunnel by the role-prefixed connection name in
//! `x-api-key`; an optional credential rides in `x-api-token`.

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use devtunnel_core::error::{Result, TunnelError};
use devtunnel_core::protocol::types::{
    CLIENT_CONNECTION_NAME_PREFIX, CONNECTION_NAME_HEADER, CREDENTIAL_HEADER,
};

/// Prefix `wss://` when the URL carries no WebSocket scheme.
pub fn normalize_broker_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else {
        format!("wss://{url}")
    }
}

pub fn build_request(url: &str, connection_name: &str, api_key: Option<&str>) -> Result<Request> {
    let mut req = url
        .into_client_request()
        .map_err(|e| TunnelError::Handshake(format!("invalid broker url {url}: {e}")))?;

    let name = HeaderValue::from_str(&format!("{CLIENT_CONNECTION_NAME_PREFIX}{connection_name}"))
        .map_err(|e| TunnelError::Config(format!("connection name is not a valid header: {e}")))?;
    req.headers_mut().insert(CONNECTION_NAME_HEADER, name);

    if let Some(key) = api_key {
        let mut key = HeaderValue::from_str(key)
            .map_err(|e| TunnelError::Config(format!("api key is not a valid header: {e}")))?;
        key.set_sensitive(true);
        req.headers_mut().insert(CREDENTIAL_HEADER, key);
    }

    Ok(req)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn adds_wss_scheme_only_when_missing() {
        assert_eq!(normalize_broker_url("broker.example.com"), "wss://broker.example.com");
        assert_eq!(normalize_broker_url("ws://127.0.0.1:9000"), "ws://127.0.0.1:9000");
        assert_eq!(normalize_broker_url(" wss://b.example.com/x "), "wss://b.example.com/x");
    }

    #[test]
    fn request_carries_prefixed_name_and_optional_key() {
        let req = build_request("ws://127.0.0.1:9000", "team-a", None).unwrap();
        assert_eq!(req.headers().get("x-api-key").unwrap(), "client::team-a");
        assert!(req.headers().get("x-api-token").is_none());

        let req = build_request("ws://127.0.0.1:9000", "team-a", Some("s3cret")).unwrap();
        assert_eq!(req.headers().get("x-api-token").unwrap(), "s3cret");
    }

    #[test]
    fn rejects_name_with_control_chars() {
        let err = build_request("ws://127.0.0.1:9000", "bad\nname", None).unwrap_err();
        assert_eq!(err.code().as_str(), "CONFIG");
    }
}
