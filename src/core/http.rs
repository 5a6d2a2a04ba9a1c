use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::Client;

const APP_USER_AGENT: &str = concat!("InterfaceOficial-Installer/", env!("CARGO_PKG_VERSION"));

/// Shared client for every transfer in the pipeline.
///
/// Identity encoding keeps `Content-Length` equal to the bytes on disk, which is
/// what the size-based skip checks compare against.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(Duration::from_secs(15))
        .build()
}
