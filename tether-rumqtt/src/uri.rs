//! Broker endpoint parsing.

use tether_core::TransportError;
use url::Url;

/// Default MQTT port when the endpoint does not name one.
const DEFAULT_PORT: u16 = 1883;

/// Host and port extracted from a server uri.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) host: String,
    pub(crate) port: u16,
}

/// Parse a `tcp://` or `mqtt://` server uri into host and port.
pub(crate) fn parse_endpoint(server_uri: &str) -> Result<Endpoint, TransportError> {
    let url = Url::parse(server_uri)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{server_uri:?}: {e}")))?;

    match url.scheme() {
        "tcp" | "mqtt" => {}
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "{server_uri:?}: unsupported scheme {other:?}"
            )));
        }
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => {
            return Err(TransportError::InvalidEndpoint(format!(
                "{server_uri:?}: missing host"
            )));
        }
    };

    Ok(Endpoint {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_PORT),
    })
}
