pub mod health;
pub mod login;

use axum::http::{HeaderMap, header::USER_AGENT};

use crate::auth::ClientMetadata;

/// Client IP as reported by the proxy in front of us.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    header_text(headers, "x-real-ip")
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn client_metadata(headers: &HeaderMap) -> ClientMetadata {
    ClientMetadata {
        ip: extract_client_ip(headers),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        location: header_text(headers, "x-location"),
        client_version: header_text(headers, "x-client-version"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static(" 9.9.9.9 "));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn client_metadata_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.5.0"));
        headers.insert("x-location", HeaderValue::from_static("Bandung"));
        headers.insert("x-client-version", HeaderValue::from_static(""));
        let client = client_metadata(&headers);
        assert_eq!(client.user_agent, "curl/8.5.0");
        assert_eq!(client.location.as_deref(), Some("Bandung"));
        assert_eq!(client.client_version, None);
        assert_eq!(client.ip, None);
    }
}
