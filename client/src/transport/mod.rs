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

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glob::Pattern;
use log::{info, warn};
use thiserror::Error;
use url::Url;

use crate::audit::AuditSink;
use crate::misc::{create_http_client, is_no_proxy, no_proxy_patterns, truncate};
use crate::response::TransactionType;

/* Error */

#[derive(Debug, Error)]
pub enum Error {
    #[error("Endpoint {0} uses plain HTTP; pass allow_insecure_http to permit it!")]
    InsecureEndpoint(Url),

    #[error("Unable to reach {endpoint} after {attempts} attempt(s): {cause}")]
    ConnectionFailed {
        endpoint: Url,
        attempts: usize,
        cause: String,
    },

    #[error("Request to {endpoint} timed out after {attempts} attempt(s) ({timeout_secs} s read timeout)")]
    Timeout {
        endpoint: Url,
        attempts: usize,
        timeout_secs: u64,
    },

    #[error("Endpoint {endpoint} answered HTTP {status}: {body}")]
    Protocol {
        endpoint: Url,
        status: u16,
        body: String,
    },

    #[error("Unable to set up the HTTP client: {0}")]
    ClientSetup(String),
}

/* Configuration */

const BACKOFF_SECS: [u64; 5] = [1, 2, 4, 8, 16];

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: Url,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_retries: usize,
    pub allow_insecure_http: bool,
}

impl TransportConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            max_retries: 3,
            allow_insecure_http: false,
        }
    }
}

/* Wire Types */

#[derive(Debug, Clone)]
pub struct SoapRequest {
    pub transaction_type: TransactionType,
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub enum BackendError {
    Connection(String),
    Timeout,
}

/* Backend Seams */

pub trait HttpBackend: Send + Sync {
    fn post(
        &self,
        endpoint: &Url,
        content_type: &str,
        body: &[u8],
    ) -> Result<RawResponse, BackendError>;
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub struct ReqwestBackend {
    http_proxy: reqwest::blocking::Client,
    http_no_proxy: reqwest::blocking::Client,
    no_proxy: Vec<Pattern>,
}

impl ReqwestBackend {
    pub fn new(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Self, Error> {
        let connect_timeout = Duration::from_secs(connect_timeout_secs);
        let read_timeout = Duration::from_secs(read_timeout_secs);

        let http_proxy = create_http_client(connect_timeout, read_timeout, true)
            .map_err(|err| Error::ClientSetup(err.to_string()))?;
        let http_no_proxy = create_http_client(connect_timeout, read_timeout, false)
            .map_err(|err| Error::ClientSetup(err.to_string()))?;

        Ok(Self {
            http_proxy,
            http_no_proxy,
            no_proxy: no_proxy_patterns(),
        })
    }

    fn client(&self, url: &Url) -> &reqwest::blocking::Client {
        if is_no_proxy(&self.no_proxy, url) {
            &self.http_no_proxy
        } else {
            &self.http_proxy
        }
    }
}

impl HttpBackend for ReqwestBackend {
    fn post(
        &self,
        endpoint: &Url,
        content_type: &str,
        body: &[u8],
    ) -> Result<RawResponse, BackendError> {
        let res = self
            .client(endpoint)
            .post(endpoint.as_str())
            .header("Content-Type", content_type)
            .body(body.to_vec())
            .send();

        let res = match res {
            Ok(res) => res,
            Err(err) if err.is_timeout() => return Err(BackendError::Timeout),
            Err(err) => return Err(BackendError::Connection(err.to_string())),
        };

        let status = res.status().as_u16();
        let body = res
            .bytes()
            .map_err(|err| BackendError::Connection(err.to_string()))?
            .to_vec();

        Ok(RawResponse { status, body })
    }
}

/* TransportClient */

/// Blocking SOAP transport with bounded retries. Retries cover only
/// failures where no application-level answer was received: connection
/// errors, read timeouts and HTTP 503. Any parseable response body,
/// including negative acknowledgements, is final.
pub struct TransportClient {
    config: TransportConfig,
    backend: Box<dyn HttpBackend>,
    sleeper: Box<dyn Sleeper>,
    audit: Arc<dyn AuditSink>,
}

impl TransportClient {
    pub fn new(config: TransportConfig, audit: Arc<dyn AuditSink>) -> Result<Self, Error> {
        let backend = ReqwestBackend::new(config.connect_timeout_secs, config.read_timeout_secs)?;

        Self::with_backend(config, Box::new(backend), Box::new(ThreadSleeper), audit)
    }

    pub fn with_backend(
        config: TransportConfig,
        backend: Box<dyn HttpBackend>,
        sleeper: Box<dyn Sleeper>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, Error> {
        match config.endpoint.scheme() {
            "https" => (),
            "http" if config.allow_insecure_http => {
                warn!(
                    "Endpoint {} uses plain HTTP, credentials travel unprotected!",
                    config.endpoint
                );
            }
            _ => return Err(Error::InsecureEndpoint(config.endpoint.clone())),
        }

        Ok(Self {
            config,
            backend,
            sleeper,
            audit,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    /// Submits the request, retrying with exponential backoff. Every
    /// attempt is fed to the audit sink before the outcome is handed
    /// back to the caller.
    pub fn submit(&self, request: &SoapRequest) -> Result<RawResponse, Error> {
        let max_attempts = self.config.max_retries.max(1);
        let mut last_failure: Option<BackendError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = BACKOFF_SECS[(attempt - 2).min(BACKOFF_SECS.len() - 1)];

                info!(
                    "Retrying request to {} (attempt {} of {}, waiting {} s)",
                    self.config.endpoint, attempt, max_attempts, delay
                );

                self.sleeper.sleep(Duration::from_secs(delay));
            }

            let started = Instant::now();
            let result = self.backend.post(
                &self.config.endpoint,
                &request.content_type,
                &request.body,
            );
            let duration_ms = started.elapsed().as_millis();

            match result {
                Ok(res) => {
                    self.audit.log_transaction(
                        request.transaction_type,
                        &request.body,
                        Some(&res.body),
                        duration_ms,
                        &format!("HTTP_{}", res.status),
                    );

                    if res.status == 503 {
                        warn!(
                            "Endpoint {} is unavailable (HTTP 503), attempt {} of {}",
                            self.config.endpoint, attempt, max_attempts
                        );

                        last_failure = Some(BackendError::Connection(
                            "HTTP 503 Service Unavailable".into(),
                        ));

                        continue;
                    }

                    if res.status >= 400 {
                        return Err(Error::Protocol {
                            endpoint: self.config.endpoint.clone(),
                            status: res.status,
                            body: truncate(&String::from_utf8_lossy(&res.body), 512),
                        });
                    }

                    return Ok(res);
                }
                Err(failure) => {
                    let status = match &failure {
                        BackendError::Timeout => "TIMEOUT",
                        BackendError::Connection(_) => "CONNECTION_ERROR",
                    };

                    self.audit.log_transaction(
                        request.transaction_type,
                        &request.body,
                        None,
                        duration_ms,
                        status,
                    );

                    warn!(
                        "Request to {} failed ({}), attempt {} of {}",
                        self.config.endpoint, status, attempt, max_attempts
                    );

                    last_failure = Some(failure);
                }
            }
        }

        match last_failure {
            Some(BackendError::Timeout) => Err(Error::Timeout {
                endpoint: self.config.endpoint.clone(),
                attempts: max_attempts,
                timeout_secs: self.config.read_timeout_secs,
            }),
            Some(BackendError::Connection(cause)) => Err(Error::ConnectionFailed {
                endpoint: self.config.endpoint.clone(),
                attempts: max_attempts,
                cause,
            }),
            None => Err(Error::ConnectionFailed {
                endpoint: self.config.endpoint.clone(),
                attempts: max_attempts,
                cause: "No attempt was made".into(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::Mutex;

    /* Test Doubles */

    pub(crate) struct MockBackend {
        script: Mutex<Vec<Result<RawResponse, BackendError>>>,
        pub calls: Mutex<usize>,
    }

    impl MockBackend {
        pub fn new(script: Vec<Result<RawResponse, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        pub fn ok(status: u16, body: &[u8]) -> Result<RawResponse, BackendError> {
            Ok(RawResponse {
                status,
                body: body.to_vec(),
            })
        }
    }

    impl HttpBackend for MockBackend {
        fn post(
            &self,
            _endpoint: &Url,
            _content_type: &str,
            _body: &[u8],
        ) -> Result<RawResponse, BackendError> {
            *self.calls.lock().unwrap() += 1;

            self.script.lock().unwrap().remove(0)
        }
    }

    pub(crate) struct RecordingSleeper {
        pub delays: Mutex<Vec<u64>>,
    }

    impl RecordingSleeper {
        pub fn new() -> Self {
            Self {
                delays: Mutex::new(Vec::new()),
            }
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration.as_secs());
        }
    }

    pub(crate) struct CountingAudit {
        pub entries: Mutex<Vec<String>>,
    }

    impl CountingAudit {
        pub fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }
    }

    impl AuditSink for CountingAudit {
        fn log_transaction(
            &self,
            _transaction_type: TransactionType,
            _request: &[u8],
            _response: Option<&[u8]>,
            _duration_ms: u128,
            status: &str,
        ) {
            self.entries.lock().unwrap().push(status.into());
        }
    }

    /* Helpers */

    fn test_config() -> TransportConfig {
        TransportConfig::new(Url::parse("https://registry.example.org/xds").unwrap())
    }

    fn test_request() -> SoapRequest {
        SoapRequest {
            transaction_type: TransactionType::PixAdd,
            body: b"<Envelope/>".to_vec(),
            content_type: "application/soap+xml".into(),
        }
    }

    struct Harness {
        client: TransportClient,
        backend: Arc<MockBackend>,
        sleeper: Arc<RecordingSleeper>,
        audit: Arc<CountingAudit>,
    }

    fn harness(
        config: TransportConfig,
        script: Vec<Result<RawResponse, BackendError>>,
    ) -> Harness {
        let backend = Arc::new(MockBackend::new(script));
        let sleeper = Arc::new(RecordingSleeper::new());
        let audit = Arc::new(CountingAudit::new());

        struct SharedBackend(Arc<MockBackend>);

        impl HttpBackend for SharedBackend {
            fn post(
                &self,
                endpoint: &Url,
                content_type: &str,
                body: &[u8],
            ) -> Result<RawResponse, BackendError> {
                self.0.post(endpoint, content_type, body)
            }
        }

        struct SharedSleeper(Arc<RecordingSleeper>);

        impl Sleeper for SharedSleeper {
            fn sleep(&self, duration: Duration) {
                self.0.sleep(duration);
            }
        }

        let client = TransportClient::with_backend(
            config,
            Box::new(SharedBackend(backend.clone())),
            Box::new(SharedSleeper(sleeper.clone())),
            audit.clone(),
        )
        .unwrap();

        Harness {
            client,
            backend,
            sleeper,
            audit,
        }
    }

    /* Tests */

    #[test]
    fn test_plain_http_is_rejected() {
        let mut config = test_config();
        config.endpoint = Url::parse("http://registry.example.org/xds").unwrap();

        let result = TransportClient::with_backend(
            config,
            Box::new(MockBackend::new(vec![])),
            Box::new(ThreadSleeper),
            Arc::new(CountingAudit::new()),
        );

        assert!(matches!(result, Err(Error::InsecureEndpoint(_))));
    }

    #[test]
    fn test_plain_http_with_exception() {
        let mut config = test_config();
        config.endpoint = Url::parse("http://registry.example.org/xds").unwrap();
        config.allow_insecure_http = true;

        let h = harness(config, vec![MockBackend::ok(200, b"<ok/>")]);

        h.client.submit(&test_request()).unwrap();
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let h = harness(
            test_config(),
            vec![
                Err(BackendError::Connection("refused".into())),
                Err(BackendError::Timeout),
                MockBackend::ok(200, b"<ok/>"),
            ],
        );

        let res = h.client.submit(&test_request()).unwrap();

        assert_eq!(res.status, 200);
        assert_eq!(*h.backend.calls.lock().unwrap(), 3);
        assert_eq!(*h.sleeper.delays.lock().unwrap(), vec![1, 2]);
        assert_eq!(
            *h.audit.entries.lock().unwrap(),
            vec!["CONNECTION_ERROR", "TIMEOUT", "HTTP_200"]
        );
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let h = harness(
            test_config(),
            vec![
                Err(BackendError::Connection("refused".into())),
                Err(BackendError::Connection("refused".into())),
                Err(BackendError::Connection("refused".into())),
            ],
        );

        match h.client.submit(&test_request()) {
            Err(Error::ConnectionFailed {
                attempts, cause, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(cause, "refused");
            }
            x => panic!("expected connection failure, got {:?}", x),
        }

        assert_eq!(*h.backend.calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_timeout_exhaustion_reports_timeout() {
        let h = harness(
            test_config(),
            vec![
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
            ],
        );

        assert!(matches!(
            h.client.submit(&test_request()),
            Err(Error::Timeout { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let h = harness(test_config(), vec![MockBackend::ok(400, b"bad request")]);

        match h.client.submit(&test_request()) {
            Err(Error::Protocol { status, body, .. }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad request");
            }
            x => panic!("expected protocol error, got {:?}", x),
        }

        assert_eq!(*h.backend.calls.lock().unwrap(), 1);
        assert!(h.sleeper.delays.lock().unwrap().is_empty());
    }

    #[test]
    fn test_server_errors_are_not_retried() {
        let h = harness(test_config(), vec![MockBackend::ok(500, b"boom")]);

        assert!(matches!(
            h.client.submit(&test_request()),
            Err(Error::Protocol { status: 500, .. })
        ));

        assert_eq!(*h.backend.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_service_unavailable_is_retried() {
        let h = harness(
            test_config(),
            vec![
                MockBackend::ok(503, b"unavailable"),
                MockBackend::ok(200, b"<ok/>"),
            ],
        );

        let res = h.client.submit(&test_request()).unwrap();

        assert_eq!(res.status, 200);
        assert_eq!(*h.backend.calls.lock().unwrap(), 2);
        assert_eq!(
            *h.audit.entries.lock().unwrap(),
            vec!["HTTP_503", "HTTP_200"]
        );
    }

    #[test]
    fn test_backoff_is_clamped() {
        let mut config = test_config();
        config.max_retries = 8;

        let h = harness(
            config,
            vec![
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
                Err(BackendError::Timeout),
            ],
        );

        let _ = h.client.submit(&test_request());

        assert_eq!(
            *h.sleeper.delays.lock().unwrap(),
            vec![1, 2, 4, 8, 16, 16, 16]
        );
    }
}
