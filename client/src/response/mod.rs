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

mod fault;
mod hl7;
mod registry;

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use log::warn;
use xmldsig::{Document, Element};

use crate::misc::random_uuid_urn;
use crate::soap::constants::*;

pub use fault::SoapFault;
pub use hl7::Hl7Ack;
pub use registry::RegistryOutcome;

/* Types */

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TransactionType {
    PixAdd,
    Iti41,
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::PixAdd => write!(f, "PIX_ADD"),
            Self::Iti41 => write!(f, "ITI_41"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransactionStatus {
    Success,
    PartialSuccess,
    Error,
}

pub const STATUS_CODE_SOAP_FAULT: &str = "SOAP_FAULT";
pub const STATUS_CODE_MALFORMED_XML: &str = "MALFORMED_XML";
pub const STATUS_CODE_PARSE_ERROR: &str = "PARSE_ERROR";

/// Normalized outcome of a transaction, regardless of whether the
/// endpoint answered with an XDSb registry response, an HL7v3
/// acknowledgement or a SOAP fault.
#[derive(Debug, Clone)]
pub struct TransactionResponse {
    pub response_id: String,
    pub request_id: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub status_code: String,
    pub response_xml: String,
    pub extracted_identifiers: HashMap<String, String>,
    pub error_messages: Vec<String>,
    pub processing_time_ms: u128,
}

impl TransactionResponse {
    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }
}

/// Raw payload classification, used instead of exception control flow
/// so that every dispatch decision is visible in one match.
#[derive(Debug)]
pub enum ResponseKind {
    Fault(SoapFault),
    Registry(RegistryOutcome),
    Hl7Ack(Hl7Ack),
    Unrecognized(String),
    Malformed(String),
}

/* Dispatch */

pub fn classify_body(body: &str) -> ResponseKind {
    let doc = match Document::parse(body) {
        Ok(doc) => doc,
        Err(err) => return ResponseKind::Malformed(err.to_string()),
    };

    let root = doc.root();
    let payload = unwrap_envelope(root);

    if let Some(fault) = fault::parse_fault(payload) {
        return ResponseKind::Fault(fault);
    }

    if payload.name() == "RegistryResponse" && payload.ns_href() == Some(NS_EBXML_RS) {
        return ResponseKind::Registry(registry::parse_registry_response(payload));
    }

    if payload.ns_href() == Some(NS_HL7_V3) {
        if let Some(ack) = hl7::parse_acknowledgement(payload) {
            return ResponseKind::Hl7Ack(ack);
        }
    }

    ResponseKind::Unrecognized(payload.qname())
}

/// Returns the first element inside `Body` for a SOAP envelope, the
/// element itself otherwise. SOAP 1.1 and 1.2 envelopes are both
/// accepted.
fn unwrap_envelope(root: &Element) -> &Element {
    let is_envelope = root.name() == "Envelope"
        && matches!(root.ns_href(), Some(NS_SOAP_11) | Some(NS_SOAP_12));

    if !is_envelope {
        return root;
    }

    root.child_elements()
        .find(|e| e.name() == "Body")
        .and_then(|body| body.child_elements().next())
        .unwrap_or(root)
}

/// Extracts the `wsa:RelatesTo` value of a SOAP envelope, if present.
pub fn relates_to(body: &str) -> Option<String> {
    wsa_header(body, "RelatesTo")
}

/// Extracts the `wsa:MessageID` value of a SOAP envelope, if present.
pub fn message_id(body: &str) -> Option<String> {
    wsa_header(body, "MessageID")
}

fn wsa_header(body: &str, name: &str) -> Option<String> {
    let doc = Document::parse(body).ok()?;
    let header = doc.root().find_element(name, NS_WSA)?;
    let value = header.text().trim().to_owned();

    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/* Normalization */

pub fn parse_response(
    transaction_type: TransactionType,
    request_id: &str,
    body: &str,
    processing_time_ms: u128,
) -> TransactionResponse {
    // The response's own wsa:MessageID identifies it; only when the
    // endpoint omits the header is an ID generated locally.
    let mut response = TransactionResponse {
        response_id: message_id(body).unwrap_or_else(random_uuid_urn),
        request_id: request_id.to_owned(),
        transaction_type,
        status: TransactionStatus::Error,
        status_code: STATUS_CODE_PARSE_ERROR.to_owned(),
        response_xml: body.to_owned(),
        extracted_identifiers: HashMap::new(),
        error_messages: Vec::new(),
        processing_time_ms,
    };

    if let Some(relates_to) = relates_to(body) {
        if relates_to != request_id {
            warn!(
                "Response correlation mismatch: RelatesTo {} does not match request {}",
                relates_to, request_id
            );
        }
    }

    match classify_body(body) {
        ResponseKind::Fault(fault) => {
            response.status_code = STATUS_CODE_SOAP_FAULT.to_owned();
            response.error_messages.push(fault.message());
        }
        ResponseKind::Registry(outcome) => {
            response.status = outcome.status;
            response.status_code = outcome.status_code;
            response.error_messages = outcome.errors;

            for warning in outcome.warnings {
                warn!("Registry warning for {}: {}", request_id, warning);
                response.error_messages.push(format!("Warning: {}", warning));
            }
        }
        ResponseKind::Hl7Ack(ack) => {
            if ack.is_accept() {
                response.status = TransactionStatus::Success;
            }

            response.status_code = ack.type_code.clone();
            response.error_messages = ack.details;

            if let Some(target_id) = ack.target_message_id {
                response
                    .extracted_identifiers
                    .insert("target_message_id".into(), target_id);
            }
        }
        ResponseKind::Unrecognized(qname) => {
            warn!("Unrecognized response payload <{}>", qname);
            response
                .error_messages
                .push(format!("Unrecognized response payload <{}>", qname));
        }
        ResponseKind::Malformed(cause) => {
            response.status_code = STATUS_CODE_MALFORMED_XML.to_owned();
            response
                .error_messages
                .push(format!("Response is not well-formed XML: {}", cause));
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_12(payload: &str) -> String {
        format!(
            concat!(
                r#"<s:Envelope xmlns:s="{}" xmlns:wsa="{}">"#,
                "<s:Header>",
                "<wsa:MessageID>urn:uuid:res-1</wsa:MessageID>",
                "<wsa:RelatesTo>urn:uuid:req-1</wsa:RelatesTo>",
                "</s:Header>",
                "<s:Body>{}</s:Body>",
                "</s:Envelope>"
            ),
            NS_SOAP_12, NS_WSA, payload
        )
    }

    #[test]
    fn test_registry_success() {
        let body = envelope_12(&format!(
            r#"<rs:RegistryResponse xmlns:rs="{}" status="{}"/>"#,
            NS_EBXML_RS, XDS_STATUS_SUCCESS
        ));

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 42);

        assert!(res.is_success());
        assert_eq!(res.status_code, "Success");
        assert!(res.error_messages.is_empty());
        assert_eq!(res.processing_time_ms, 42);
        assert_eq!(res.response_id, "urn:uuid:res-1");
        assert_eq!(res.request_id, "urn:uuid:req-1");
    }

    #[test]
    fn test_response_id_is_generated_without_message_id() {
        let body = format!(
            concat!(
                r#"<s:Envelope xmlns:s="{}">"#,
                "<s:Body>",
                r#"<rs:RegistryResponse xmlns:rs="{}" status="{}"/>"#,
                "</s:Body>",
                "</s:Envelope>"
            ),
            NS_SOAP_12, NS_EBXML_RS, XDS_STATUS_SUCCESS
        );

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 0);

        assert!(res.is_success());
        assert!(res.response_id.starts_with("urn:uuid:"));
        assert_ne!(res.response_id, "urn:uuid:req-1");
    }

    #[test]
    fn test_registry_partial_success_is_not_success() {
        let body = envelope_12(&format!(
            concat!(
                r#"<rs:RegistryResponse xmlns:rs="{ns}" status="{status}">"#,
                "<rs:RegistryErrorList>",
                r#"<rs:RegistryError errorCode="XDSExtraMetadataNotSaved" severity="{warn}" codeContext="Slot ignored"/>"#,
                "</rs:RegistryErrorList>",
                "</rs:RegistryResponse>"
            ),
            ns = NS_EBXML_RS,
            status = XDS_STATUS_PARTIAL_SUCCESS,
            warn = XDS_SEVERITY_WARNING
        ));

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 0);

        assert!(!res.is_success());
        assert_eq!(res.status, TransactionStatus::PartialSuccess);
        assert_eq!(res.error_messages.len(), 1);
        assert!(res.error_messages[0].starts_with("Warning:"));
        assert!(res.error_messages[0].contains("Slot ignored"));
    }

    #[test]
    fn test_registry_failure_collects_errors() {
        let body = envelope_12(&format!(
            concat!(
                r#"<rs:RegistryResponse xmlns:rs="{ns}" status="{status}">"#,
                "<rs:RegistryErrorList>",
                r#"<rs:RegistryError errorCode="XDSRepositoryError" severity="{sev}" codeContext="Storage failed"/>"#,
                r#"<rs:RegistryError errorCode="XDSRegistryMetadataError" severity="{sev}" codeContext="Missing classCode"/>"#,
                "</rs:RegistryErrorList>",
                "</rs:RegistryResponse>"
            ),
            ns = NS_EBXML_RS,
            status = XDS_STATUS_FAILURE,
            sev = XDS_SEVERITY_ERROR
        ));

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 0);

        assert_eq!(res.status, TransactionStatus::Error);
        assert_eq!(res.status_code, "Failure");
        assert_eq!(res.error_messages.len(), 2);
        assert!(res.error_messages[0].contains("XDSRepositoryError"));
    }

    #[test]
    fn test_hl7_accept_ack() {
        let body = envelope_12(&format!(
            concat!(
                r#"<hl7:MCCI_IN000002UV01 xmlns:hl7="{ns}">"#,
                r#"<hl7:id root="1.2.3" extension="ack-1"/>"#,
                "<hl7:acknowledgement>",
                r#"<hl7:typeCode code="AA"/>"#,
                "<hl7:targetMessage>",
                r#"<hl7:id root="1.2.3" extension="msg-9"/>"#,
                "</hl7:targetMessage>",
                "</hl7:acknowledgement>",
                "</hl7:MCCI_IN000002UV01>"
            ),
            ns = NS_HL7_V3
        ));

        let res = parse_response(TransactionType::PixAdd, "urn:uuid:req-1", &body, 0);

        assert!(res.is_success());
        assert_eq!(res.status_code, "AA");
        assert_eq!(
            res.extracted_identifiers.get("target_message_id").map(String::as_str),
            Some("msg-9")
        );
    }

    #[test]
    fn test_hl7_error_ack_is_final_error() {
        let body = envelope_12(&format!(
            concat!(
                r#"<hl7:MCCI_IN000002UV01 xmlns:hl7="{ns}">"#,
                "<hl7:acknowledgement>",
                r#"<hl7:typeCode code="AE"/>"#,
                "<hl7:acknowledgementDetail>",
                "<hl7:text>Unknown key identifier</hl7:text>",
                "</hl7:acknowledgementDetail>",
                "</hl7:acknowledgement>",
                "</hl7:MCCI_IN000002UV01>"
            ),
            ns = NS_HL7_V3
        ));

        let res = parse_response(TransactionType::PixAdd, "urn:uuid:req-1", &body, 0);

        assert_eq!(res.status, TransactionStatus::Error);
        assert_eq!(res.status_code, "AE");
        assert_eq!(res.error_messages, vec!["Unknown key identifier"]);
    }

    #[test]
    fn test_soap_11_fault() {
        let body = format!(
            concat!(
                r#"<s:Envelope xmlns:s="{ns}">"#,
                "<s:Body>",
                "<s:Fault>",
                "<faultcode>s:Server</faultcode>",
                "<faultstring>Internal error</faultstring>",
                "</s:Fault>",
                "</s:Body>",
                "</s:Envelope>"
            ),
            ns = NS_SOAP_11
        );

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 0);

        assert_eq!(res.status, TransactionStatus::Error);
        assert_eq!(res.status_code, STATUS_CODE_SOAP_FAULT);
        assert!(res.error_messages[0].contains("Internal error"));
    }

    #[test]
    fn test_soap_12_fault_with_subcode() {
        let body = format!(
            concat!(
                r#"<s:Envelope xmlns:s="{ns}">"#,
                "<s:Body>",
                "<s:Fault>",
                "<s:Code>",
                "<s:Value>s:Sender</s:Value>",
                "<s:Subcode><s:Value>wsse:InvalidSecurityToken</s:Value></s:Subcode>",
                "</s:Code>",
                "<s:Reason>",
                r#"<s:Text xml:lang="en">Assertion expired</s:Text>"#,
                "</s:Reason>",
                "</s:Fault>",
                "</s:Body>",
                "</s:Envelope>"
            ),
            ns = NS_SOAP_12
        );

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 0);

        assert_eq!(res.status_code, STATUS_CODE_SOAP_FAULT);
        assert!(res.error_messages[0].contains("Assertion expired"));
        assert!(res.error_messages[0].contains("InvalidSecurityToken"));
    }

    #[test]
    fn test_malformed_xml() {
        let res = parse_response(
            TransactionType::Iti41,
            "urn:uuid:req-1",
            "<invalid>xml<unclosed>",
            0,
        );

        assert_eq!(res.status, TransactionStatus::Error);
        assert_eq!(res.status_code, STATUS_CODE_MALFORMED_XML);
        assert!(!res.error_messages.is_empty());
    }

    #[test]
    fn test_unrecognized_payload() {
        let body = envelope_12(r#"<x:Surprise xmlns:x="urn:example"/>"#);

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 0);

        assert_eq!(res.status, TransactionStatus::Error);
        assert_eq!(res.status_code, STATUS_CODE_PARSE_ERROR);
        assert!(res.error_messages[0].contains("Surprise"));
    }

    #[test]
    fn test_unknown_registry_status_maps_to_error() {
        let body = envelope_12(&format!(
            r#"<rs:RegistryResponse xmlns:rs="{}" status="urn:example:Unknown"/>"#,
            NS_EBXML_RS
        ));

        let res = parse_response(TransactionType::Iti41, "urn:uuid:req-1", &body, 0);

        assert_eq!(res.status, TransactionStatus::Error);
        assert_eq!(res.status_code, "urn:example:Unknown");
    }
}
