/*
 * Copyright (c) 2021 gematik GmbH
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *    http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::env::var;
use std::time::Duration;

use chrono::{DateTime, Utc};
use glob::Pattern;
use log::warn;
use reqwest::{blocking::Client, Proxy};
use rustls::{ClientConfig, ProtocolVersion};
use rustls_native_certs::load_native_certs;
use url::Url;
use uuid::Uuid;

use crate::error::Error;

/// Creates a blocking HTTP client for the transport layer.
///
/// TLS is restricted to version 1.2 and above. With `use_env_proxy`
/// the proxies from the usual environment variables are honored,
/// otherwise the client bypasses any proxy.
pub fn create_http_client(
    connect_timeout: Duration,
    request_timeout: Duration,
    use_env_proxy: bool,
) -> Result<Client, Error> {
    let mut tls_config = ClientConfig::new();
    tls_config.root_store = match load_native_certs() {
        Ok(store) => store,
        Err((Some(store), _)) => store,
        Err((None, err)) => return Err(err.into()),
    };
    tls_config
        .root_store
        .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
    tls_config.versions = vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2];

    let mut http = Client::builder()
        .use_preconfigured_tls(tls_config)
        .user_agent("ihe-xds-client")
        .connect_timeout(connect_timeout)
        .timeout(request_timeout);

    if use_env_proxy {
        if let Ok(http_proxy) = var("http_proxy") {
            http = http.proxy(Proxy::http(&http_proxy)?);
        }

        if let Ok(https_proxy) = var("https_proxy") {
            http = http.proxy(Proxy::https(&https_proxy)?);
        }
    } else {
        http = http.no_proxy();
    }

    let http = http.build()?;

    Ok(http)
}

/// Parses the patterns from the `no_proxy` environment variable.
pub fn no_proxy_patterns() -> Vec<Pattern> {
    match var("no_proxy") {
        Ok(no_proxy) => parse_no_proxy(&no_proxy),
        Err(_) => Vec::new(),
    }
}

pub fn parse_no_proxy(value: &str) -> Vec<Pattern> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Pattern::new)
        .filter_map(|pattern| match pattern {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!("Invalid pattern in no_proxy environment variable: {}", err);

                None
            }
        })
        .collect()
}

/// Checks whether the URL's domain matches one of the `no_proxy`
/// patterns.
pub fn is_no_proxy(patterns: &[Pattern], url: &Url) -> bool {
    match url.domain() {
        Some(domain) => patterns.iter().any(|p| p.matches(domain)),
        None => false,
    }
}

/// Random UUIDv4 in URN notation, used for WS-Addressing message IDs.
pub fn random_uuid_urn() -> String {
    Uuid::new_v4().to_urn().to_string()
}

/// Random lower-case hex token of `len` characters.
pub fn random_token(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";

    (0..len)
        .map(|_| HEX[rand::random::<usize>() % HEX.len()] as char)
        .collect()
}

pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Truncates `value` for diagnostic output without splitting a code point.
pub fn truncate(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.into();
    }

    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}... ({} bytes total)", &value[..end], value.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_urn_format() {
        let urn = random_uuid_urn();

        assert!(urn.starts_with("urn:uuid:"));
        assert_eq!(urn.len(), "urn:uuid:".len() + 36);
        assert_eq!(urn.as_bytes()["urn:uuid:".len() + 14], b'4');
    }

    #[test]
    fn test_no_proxy_matching() {
        let patterns = parse_no_proxy("*.example.org, localhost, [broken");

        assert_eq!(patterns.len(), 2);

        let internal = Url::parse("https://registry.example.org/xds").unwrap();
        let local = Url::parse("https://localhost/xds").unwrap();
        let external = Url::parse("https://registry.example.com/xds").unwrap();

        assert!(is_no_proxy(&patterns, &internal));
        assert!(is_no_proxy(&patterns, &local));
        assert!(!is_no_proxy(&patterns, &external));
    }

    #[test]
    fn test_truncate_keeps_short_values() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_is_char_boundary_safe() {
        let value = "äääää";

        let truncated = truncate(value, 3);

        assert!(truncated.starts_with('ä'));
    }
}
