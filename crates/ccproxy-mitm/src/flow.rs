//! Intercepted HTTP flow shapes handed to the addon by the proxy layer.

use bytes::Bytes;
use ccproxy_common::Headers;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// Stable flow id; carries over into the trace row.
    pub id: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub start_time: OffsetDateTime,
}

impl FlowRequest {
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        headers: Headers,
        body: Option<Bytes>,
    ) -> Self {
        let url = url.into();
        let (host, path) = split_url(&url);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            url,
            host,
            path,
            headers,
            body,
            start_time: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowResponse {
    pub status_code: u16,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub end_time: OffsetDateTime,
}

impl FlowResponse {
    pub fn new(status_code: u16, headers: Headers, body: Option<Bytes>) -> Self {
        Self {
            status_code,
            headers,
            body,
            end_time: OffsetDateTime::now_utc(),
        }
    }
}

fn split_url(url: &str) -> (String, String) {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match rest.find('/') {
        Some(idx) => {
            let host = rest[..idx].split(':').next().unwrap_or("").to_string();
            let path = rest[idx..]
                .split(['?', '#'])
                .next()
                .unwrap_or("")
                .to_string();
            (host, path)
        }
        None => (
            rest.split(':').next().unwrap_or("").to_string(),
            "/".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_splits_into_host_and_path() {
        let flow = FlowRequest::new(
            "POST",
            "https://api.anthropic.com:443/v1/messages?beta=true",
            Vec::new(),
            None,
        );
        assert_eq!(flow.host, "api.anthropic.com");
        assert_eq!(flow.path, "/v1/messages");
    }

    #[test]
    fn bare_host_gets_root_path() {
        let flow = FlowRequest::new("GET", "http://localhost:8081", Vec::new(), None);
        assert_eq!(flow.host, "localhost");
        assert_eq!(flow.path, "/");
    }
}
