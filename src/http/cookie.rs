use chrono::{DateTime, Utc};
use url::form_urlencoded::byte_serialize;

use super::http_date;

pub const DEFAULT_PATH: &str = "/";

/// Format a `Set-Cookie` value.
///
/// Name and value are form-urlencoded, the cookie is always `HttpOnly`.
/// Returns `None` for an empty name.
pub fn format_cookie(
    name: &str,
    value: &str,
    path: &str,
    expires: Option<DateTime<Utc>>,
) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    let name: String = byte_serialize(name.as_bytes()).collect();
    let value: String = byte_serialize(value.as_bytes()).collect();

    let cookie = match expires {
        None => format!("{}={};path={};HttpOnly", name, value, path),
        Some(at) => format!(
            "{}={};path={};expires={};HttpOnly",
            name,
            value,
            path,
            http_date(at)
        ),
    };

    Some(cookie)
}
