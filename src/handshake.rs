//! HTTP request parsing and the RFC 6455 upgrade handshake (spec.md §4.B).

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine as _;

use crate::error::Error;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const MAX_HEADER_BYTES: usize = 4096;

/// A parsed `GET` request line plus lower-cased header map.
#[derive(Debug, Clone)]
pub struct Request {
    pub path: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.header(name)
            .map(|v| {
                v.split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
            .unwrap_or(false)
    }

    /// Whether this request asks to be upgraded to a WebSocket.
    pub fn is_upgrade(&self) -> bool {
        self.header_has_token("upgrade", "websocket") && self.header_has_token("connection", "upgrade")
    }
}

/// Attempt to parse one full HTTP request out of `buf`.
///
/// Mirrors [`crate::frame::try_parse`]'s buffering contract: `Ok(None)`
/// means "not enough bytes yet", not a parse failure.
pub fn try_parse_request(buf: &[u8]) -> Result<Option<(Request, usize)>, Error> {
    let Some(header_end) = find_double_crlf(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(Error::Protocol("request header block too large".into()));
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| Error::Protocol("request is not valid UTF-8".into()))?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split(' ');
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if method != "GET" || !path.starts_with('/') || version != "HTTP/1.1" {
        return Err(Error::Protocol(format!("malformed request line: {request_line:?}")));
    }

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Protocol(format!("malformed header line: {line:?}")));
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(Some((
        Request {
            path: path.to_string(),
            headers,
        },
        header_end + 4,
    )))
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Compute `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let concatenated = format!("{}{}", client_key, WS_GUID);
    let digest_hex = sha1_smol::Sha1::from(concatenated).hexdigest();
    let digest_bytes = hex::decode(digest_hex).expect("sha1 hexdigest is always valid hex");
    BASE64.encode(digest_bytes)
}

/// The exact 101 response bytes for a successful upgrade.
pub fn switching_protocols_response(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
    .into_bytes()
}

pub fn bad_request(reason: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {reason}",
        reason.len()
    )
    .into_bytes()
}

/// The outcome of inspecting a fully-parsed request.
pub enum Disposition {
    /// Successful upgrade; caller should write `switching_protocols_response`.
    Upgrade { accept: String },
    /// Not a WS upgrade; caller should dispatch to the static-file responder.
    Static { path: String },
    /// Malformed or unsupported upgrade request; caller should write
    /// `bad_request` and close.
    Reject { reason: String },
}

pub fn dispose(req: &Request) -> Disposition {
    if !req.is_upgrade() {
        return Disposition::Static {
            path: req.path.clone(),
        };
    }
    match req.header("sec-websocket-version") {
        Some("13") => {}
        _ => {
            return Disposition::Reject {
                reason: "Sec-WebSocket-Version must be 13".into(),
            }
        }
    }
    let Some(key) = req.header("sec-websocket-key") else {
        return Disposition::Reject {
            reason: "missing Sec-WebSocket-Key".into(),
        };
    };
    Disposition::Upgrade {
        accept: accept_key(key),
    }
}
