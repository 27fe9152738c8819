use rand::random;

use ilp_errors::BtpError;

use crate::packet::{BtpMessage, ContentType, ProtocolData, AUTH_SUBPROTOCOL, AUTH_TOKEN_SUBPROTOCOL};

/// Builds the BTP auth handshake `Message` frame a client sends immediately
/// after connecting: an `auth` marker sub-protocol followed by the token in
/// `auth_token`.
pub fn build_auth_message(token: &str) -> BtpMessage {
    BtpMessage {
        request_id: random(),
        protocol_data: vec![
            ProtocolData {
                protocol_name: AUTH_SUBPROTOCOL.into(),
                content_type: ContentType::ApplicationOctetStream,
                data: Vec::new(),
            },
            ProtocolData {
                protocol_name: AUTH_TOKEN_SUBPROTOCOL.into(),
                content_type: ContentType::TextPlainUtf8,
                data: token.as_bytes().to_vec(),
            },
        ],
    }
}

/// Extracts the `auth_token` payload from an inbound auth handshake frame.
pub(crate) fn extract_token(message: &BtpMessage) -> Option<String> {
    message
        .protocol_data
        .iter()
        .find(|p| p.protocol_name == AUTH_TOKEN_SUBPROTOCOL)
        .map(|p| String::from_utf8_lossy(&p.data).into_owned())
}

/// Validates an inbound auth handshake against the peer's expected token.
///
/// `expected` of `None` means the server is configured permissionless: a
/// missing or empty token is accepted. Otherwise the presented token must
/// match exactly.
pub fn verify_auth(message: &BtpMessage, expected: Option<&str>, peer_id: &str) -> Result<(), BtpError> {
    let presented = extract_token(message).unwrap_or_default();
    match expected {
        None => Ok(()),
        Some(expected) if !expected.is_empty() && presented == expected => Ok(()),
        _ => Err(BtpError::AuthRejected(peer_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_the_token_through_the_message() {
        let message = build_auth_message("s3cr3t");
        assert_eq!(extract_token(&message).as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn permissionless_mode_accepts_any_token() {
        let message = build_auth_message("");
        assert!(verify_auth(&message, None, "peer-a").is_ok());
    }

    #[test]
    fn matching_token_is_accepted() {
        let message = build_auth_message("s3cr3t");
        assert!(verify_auth(&message, Some("s3cr3t"), "peer-a").is_ok());
    }

    #[test]
    fn mismatched_token_is_rejected() {
        let message = build_auth_message("wrong");
        assert!(verify_auth(&message, Some("s3cr3t"), "peer-a").is_err());
    }

    #[test]
    fn missing_token_against_required_auth_is_rejected() {
        let message = BtpMessage {
            request_id: 1,
            protocol_data: vec![],
        };
        assert!(verify_auth(&message, Some("s3cr3t"), "peer-a").is_err());
    }
}
