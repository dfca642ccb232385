//! Mock update feed built on wiremock

#![allow(dead_code)]

use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::constants::*;

pub async fn mount_version(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path(VERSION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(token))
        .mount(server)
        .await;
}

/// Version endpoint that answers only after `delay`
pub async fn mount_slow_version(server: &MockServer, token: &str, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(VERSION_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(token)
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

pub async fn mount_archive(server: &MockServer, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Serve `body` for the first `times` archive requests. Mount before the
/// fallback archive so it takes precedence.
pub async fn mount_archive_times(server: &MockServer, body: Vec<u8>, times: u64) {
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

/// Answer `Range: bytes=<offset>-` with a `206` carrying the tail of `full`
/// and a matching `Content-Range`. Requests without that header fall through
/// to whatever else is mounted.
pub async fn mount_archive_range(server: &MockServer, full: &[u8], offset: usize) {
    let content_range = format!("bytes {}-{}/{}", offset, full.len() - 1, full.len());
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .and(header("range", format!("bytes={}-", offset).as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", content_range.as_str())
                .set_body_bytes(full[offset..].to_vec()),
        )
        .mount(server)
        .await;
}

pub async fn mount_checksum(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path(CHECKSUM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Number of requests the server received for `route`
pub async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}

/// Number of requests for `route` that carried a `Range` header
pub async fn ranged_requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == route && request.headers.contains_key("range"))
        .count()
}
