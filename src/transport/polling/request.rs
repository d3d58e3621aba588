//! Request URLs and response validation.

use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

use crate::core::constants::{PROTOCOL_REVISION, SEND_ACKNOWLEDGEMENT, TRANSPORT_POLLING};
use crate::transport::error::{ServerError, TransportError};

/// URL of request number `request`.
///
/// Once a session exists, every URL carries the session id and a
/// `t=<ms>-<n>` stamp that keeps it unique.
pub(crate) fn request_url(base: &Url, session_id: Option<&str>, request: u64) -> Url {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("EIO", &PROTOCOL_REVISION.to_string())
            .append_pair("transport", TRANSPORT_POLLING);
        if let Some(sid) = session_id {
            query
                .append_pair("sid", sid)
                .append_pair("t", &format!("{}-{request}", unix_millis()));
        }
    }
    url
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Validate a response status.
pub(crate) fn check_status(status: u16, body: &[u8]) -> Result<(), TransportError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ServerError::from_response(status, body).into())
    }
}

/// Validate the body answering a send.
pub(crate) fn check_acknowledgement(status: u16, body: &[u8]) -> Result<(), TransportError> {
    if body == SEND_ACKNOWLEDGEMENT.as_bytes() {
        Ok(())
    } else {
        Err(ServerError::unexpected(status, body).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::error::ServerErrorKind;

    fn base() -> Url {
        Url::parse("http://localhost:3000/engine.io/").unwrap()
    }

    #[test]
    fn test_handshake_url() {
        assert_eq!(
            request_url(&base(), None, 0).as_str(),
            "http://localhost:3000/engine.io/?EIO=3&transport=polling"
        );
    }

    #[test]
    fn test_session_url() {
        let url = request_url(&base(), Some("abc"), 7);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs[0], ("EIO".into(), "3".into()));
        assert_eq!(pairs[1], ("transport".into(), "polling".into()));
        assert_eq!(pairs[2], ("sid".into(), "abc".into()));
        assert_eq!(pairs[3].0, "t");
        assert!(pairs[3].1.ends_with("-7"));
    }

    #[test]
    fn test_existing_query_preserved() {
        let base = Url::parse("http://h/engine.io/?token=x").unwrap();
        assert_eq!(
            request_url(&base, None, 0).as_str(),
            "http://h/engine.io/?token=x&EIO=3&transport=polling"
        );
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(200, b"").is_ok());
        assert!(check_status(204, b"").is_ok());

        let err = check_status(400, br#"{"code":1,"message":"Session ID unknown"}"#).unwrap_err();
        assert!(err.is_unknown_session());

        let err = check_status(502, b"bad gateway").unwrap_err();
        assert!(!err.is_unknown_session());
        assert!(err.is_server_error());
    }

    #[test]
    fn test_check_acknowledgement() {
        assert!(check_acknowledgement(200, b"ok").is_ok());
        match check_acknowledgement(200, b"nope").unwrap_err() {
            TransportError::Server(e) => {
                assert_eq!(e.kind, ServerErrorKind::Unexpected);
                assert_eq!(e.message, "nope");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
