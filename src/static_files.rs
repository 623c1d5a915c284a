//! Static-file HTTP responder (spec.md §4.E).

use std::fs;
use std::path::{Component, Path, PathBuf};

const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Build the full HTTP response for a static GET, reading at most
/// [`MAX_FILE_BYTES`] from `root`.
pub fn respond(root: &Path, requested_path: &str) -> Vec<u8> {
    match resolve(root, requested_path) {
        Ok(resolved) => match fs::metadata(&resolved) {
            Ok(meta) if meta.len() > MAX_FILE_BYTES => internal_error(),
            Ok(_) => match fs::read(&resolved) {
                Ok(body) => ok_response(&resolved, body),
                Err(_) => internal_error(),
            },
            Err(_) => not_found(),
        },
        Err(BadPath) => bad_request(),
    }
}

struct BadPath;

fn resolve(root: &Path, requested_path: &str) -> Result<PathBuf, BadPath> {
    if requested_path.contains('\0') || requested_path.contains("..") {
        return Err(BadPath);
    }
    let mapped = if requested_path == "/" {
        "/index.html".to_string()
    } else {
        requested_path.to_string()
    };
    let relative = mapped.trim_start_matches('/');
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return Err(BadPath),
        }
    }
    Ok(resolved)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn ok_response(path: &Path, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        content_type(path),
        body.len()
    );
    let mut out = header.into_bytes();
    out.extend(body);
    out
}

fn not_found() -> Vec<u8> {
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
}

fn bad_request() -> Vec<u8> {
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
}

fn internal_error() -> Vec<u8> {
    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
}
