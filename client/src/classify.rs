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

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::Error;
use crate::transport;

/* Types */

/// Failure triage for operators. Transient failures resolve on their
/// own, permanent failures need a data fix by the submitter, critical
/// failures need an administrator.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Critical,
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Permanent => write!(f, "PERMANENT"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    pub error_type: String,
    pub is_retryable: bool,
    pub remediation: String,
    pub patient_id: Option<String>,
}

impl ErrorInfo {
    pub fn with_patient_id(mut self, patient_id: &str) -> Self {
        self.patient_id = Some(patient_id.to_owned());

        self
    }

    fn new(category: ErrorCategory, error_type: &str, is_retryable: bool, remediation: &str) -> Self {
        Self {
            category,
            error_type: error_type.to_owned(),
            is_retryable,
            remediation: remediation.to_owned(),
            patient_id: None,
        }
    }
}

/* Classification */

pub fn classify(err: &Error) -> ErrorInfo {
    match err {
        Error::TransportError(transport::Error::Timeout { .. }) => ErrorInfo::new(
            ErrorCategory::Transient,
            "TIMEOUT",
            true,
            "The endpoint did not answer in time. Retry later; raise the read timeout if this persists.",
        ),
        Error::TransportError(transport::Error::ConnectionFailed { .. }) => ErrorInfo::new(
            ErrorCategory::Critical,
            "CONNECTION_FAILED",
            false,
            "The endpoint is unreachable. Check network connectivity, DNS and the endpoint URL.",
        ),
        Error::TransportError(transport::Error::InsecureEndpoint(_)) => ErrorInfo::new(
            ErrorCategory::Critical,
            "INSECURE_ENDPOINT",
            false,
            "The endpoint URL is plain HTTP. Use an https URL or explicitly allow insecure transport.",
        ),
        Error::TransportError(transport::Error::Protocol { status, .. }) => ErrorInfo::new(
            ErrorCategory::Permanent,
            &format!("HTTP_{}", status),
            false,
            "The endpoint rejected the request. Inspect the response body and fix the submission.",
        ),
        Error::TransportError(transport::Error::ClientSetup(_)) => ErrorInfo::new(
            ErrorCategory::Critical,
            "CLIENT_SETUP",
            false,
            "The HTTP client could not be initialized. Check the TLS configuration and proxy settings.",
        ),
        Error::OpenSslError(_) => ErrorInfo::new(
            ErrorCategory::Critical,
            "CRYPTO_FAILURE",
            false,
            "A cryptographic operation failed. Check the certificate and private key files.",
        ),
        Error::DsigError(_) => ErrorInfo::new(
            ErrorCategory::Critical,
            "SIGNATURE_FAILURE",
            false,
            "Signing or verifying the assertion failed. Check the signing certificate and key pair.",
        ),
        Error::Validation(_) => ErrorInfo::new(
            ErrorCategory::Permanent,
            "VALIDATION",
            false,
            "The submitted data is invalid. Fix the input data and submit again.",
        ),
        Error::MtomError(_) => ErrorInfo::new(
            ErrorCategory::Permanent,
            "MTOM_PACKAGING",
            false,
            "The document package is inconsistent. Fix the document references and submit again.",
        ),
        Error::XmlError(_) => ErrorInfo::new(
            ErrorCategory::Permanent,
            "XML",
            false,
            "A message could not be parsed as XML. Fix the input data and submit again.",
        ),
        Error::IoError(_) => ErrorInfo::new(
            ErrorCategory::Critical,
            "IO",
            false,
            "A file could not be read. Check file paths and permissions.",
        ),
        _ => ErrorInfo::new(
            ErrorCategory::Permanent,
            "UNEXPECTED",
            false,
            "Unexpected failure. Inspect the log output for details.",
        ),
    }
}
