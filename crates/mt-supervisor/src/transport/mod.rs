//! WebSocket-backed collaborators
//!
//! [`WsControlChannel`] holds the authenticated control connection and
//! [`RelayWorker`] holds one mapping's local binding and relay session.

mod control;
mod worker;

pub use control::WsControlChannel;
pub use worker::{RelayWorker, RelayWorkerFactory};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use mt_core::relay::RelayUrl;
use mt_core::traits::Credentials;

/// Build a WebSocket handshake request carrying HTTP Basic credentials
pub(crate) fn authorized_request(
    url: &RelayUrl,
    credentials: &Credentials,
) -> Result<Request, String> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;

    let token = BASE64.encode(format!("{}:{}", credentials.username, credentials.password));
    let value = HeaderValue::from_str(&format!("Basic {}", token)).map_err(|e| e.to_string())?;
    request.headers_mut().insert(AUTHORIZATION, value);

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt_core::relay::control_url;

    #[test]
    fn test_authorized_request_sets_basic_auth() {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
            cert_hash: None,
        };
        let request = authorized_request(&control_url("mesh.example.com"), &credentials).unwrap();

        assert_eq!(request.uri().to_string(), "wss://mesh.example.com/control.ashx");
        let header = request.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(header.to_str().unwrap(), "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn test_authorized_request_rejects_bad_url() {
        let credentials = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
            cert_hash: None,
        };
        assert!(authorized_request(&control_url("bad host"), &credentials).is_err());
    }
}
