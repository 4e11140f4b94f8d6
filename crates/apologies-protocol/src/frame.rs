//! Frame encode/decode and authorization parsing.
//!
//! Two failure classes are kept apart here because the server treats
//! them differently: a frame that is not JSON at all is a transport
//! error (the connection is dropped), while well-formed JSON that does
//! not match the request schema earns a REQUEST_FAILED with reason
//! INVALID_REQUEST.

use serde_json::Value;

use crate::events::Event;
use crate::requests::Request;

/// Errors raised while decoding a client frame.
#[derive(Debug)]
pub enum ProtocolError {
    /// The frame was not a JSON object. Transport-level; no reply.
    Malformed(serde_json::Error),

    /// The frame was JSON but not a recognizable request.
    InvalidRequest(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(e) => write!(f, "frame is not valid JSON: {}", e),
            ProtocolError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Decode a client frame into a request plus the player id carried in
/// its authorization field, if any.
pub fn decode_request(text: &str) -> Result<(Request, Option<String>), ProtocolError> {
    let mut value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| ProtocolError::InvalidRequest("frame must be a JSON object".to_string()))?;
    let player_id = object
        .remove("authorization")
        .and_then(|v| v.as_str().and_then(parse_authorization));
    let request: Request =
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
    request
        .validate()
        .map_err(ProtocolError::InvalidRequest)?;
    Ok((request, player_id))
}

/// Encode an event as a wire frame.
pub fn encode_event(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Extract the player id from an `Authorization`-style value of the
/// form `Player <player-id>`. The scheme word is case-insensitive and
/// surrounding whitespace is tolerated.
pub fn parse_authorization(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let (scheme, rest) = trimmed.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("player") {
        return None;
    }
    let player_id = rest.trim();
    if player_id.is_empty() || player_id.contains(char::is_whitespace) {
        return None;
    }
    Some(player_id.to_string())
}

/// Mask player ids in raw frame text before it reaches a log. Player
/// ids are bearer credentials.
pub fn mask_player_ids(text: &str) -> String {
    let mut masked = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("\"player_id\"") {
        let after_key = start + "\"player_id\"".len();
        masked.push_str(&rest[..after_key]);
        rest = &rest[after_key..];
        let tail = rest.trim_start();
        if let Some(tail) = tail.strip_prefix(':') {
            let tail = tail.trim_start();
            if let Some(tail) = tail.strip_prefix('"') {
                if let Some(end) = tail.find('"') {
                    masked.push_str(": \"<masked>\"");
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }
    }
    masked.push_str(rest);
    masked
}
