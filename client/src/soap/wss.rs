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

use chrono::{Duration, Utc};
use log::warn;
use xmldsig::{Document, Element};

use crate::error::Error;
use crate::misc::{format_timestamp, random_token, random_uuid_urn};
use crate::saml::SamlAssertion;

use super::constants::*;
use super::escape_xml;

/* Security header */

/// Wraps the signed assertion and a freshness timestamp into a
/// `wsse:Security` header carrying `mustUnderstand="1"`.
///
/// Fails if the assertion has no XML content or the content does not
/// parse, so a half-built token can never reach the wire.
pub fn build_security_header(
    assertion: &SamlAssertion,
    timestamp_validity_minutes: i64,
) -> Result<String, Error> {
    if timestamp_validity_minutes <= 0 {
        return Err(Error::validation(format!(
            "timestamp_validity_minutes must be positive (got {})",
            timestamp_validity_minutes
        )));
    }

    if assertion.xml_content.trim().is_empty() {
        return Err(Error::validation(
            "SAML assertion has empty xml_content; generate and sign the assertion first",
        ));
    }

    if let Err(err) = Document::parse(&assertion.xml_content) {
        return Err(Error::validation(format!(
            "SAML assertion xml_content is not well-formed XML: {}",
            err
        )));
    }

    let created = Utc::now();
    let expires = created + Duration::minutes(timestamp_validity_minutes);

    Ok(format!(
        concat!(
            r#"<wsse:Security xmlns:wsse="{wsse}" xmlns:wsu="{wsu}" xmlns:SOAP-ENV="{soap}" SOAP-ENV:mustUnderstand="1">"#,
            r#"<wsu:Timestamp wsu:Id="TS-{id}">"#,
            "<wsu:Created>{created}</wsu:Created>",
            "<wsu:Expires>{expires}</wsu:Expires>",
            "</wsu:Timestamp>",
            "{assertion}",
            "</wsse:Security>",
        ),
        wsse = NS_WSSE,
        wsu = NS_WSU,
        soap = NS_SOAP_12,
        id = random_token(32),
        created = format_timestamp(&created),
        expires = format_timestamp(&expires),
        assertion = assertion.xml_content,
    ))
}

/* WS-Addressing */

pub struct WsAddressing {
    pub action: String,
    pub to: String,
    pub message_id: String,
}

impl WsAddressing {
    pub fn new(action: &str, to: &str, message_id: Option<String>) -> Self {
        Self {
            action: action.into(),
            to: to.into(),
            message_id: message_id.unwrap_or_else(random_uuid_urn),
        }
    }

    fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<wsa:Action SOAP-ENV:mustUnderstand="1">{action}</wsa:Action>"#,
                "<wsa:MessageID>{message_id}</wsa:MessageID>",
                "<wsa:To>{to}</wsa:To>",
                "<wsa:ReplyTo><wsa:Address>{anonymous}</wsa:Address></wsa:ReplyTo>",
            ),
            action = escape_xml(&self.action),
            message_id = escape_xml(&self.message_id),
            to = escape_xml(&self.to),
            anonymous = WSA_ANONYMOUS,
        )
    }
}

/* Envelope */

/// SOAP 1.2 envelope with the security header as first header child.
pub fn build_envelope(
    security_header: &str,
    addressing: &WsAddressing,
    body: &str,
) -> Result<String, Error> {
    if body.trim().is_empty() {
        return Err(Error::validation("SOAP body payload is empty"));
    }

    Ok(format!(
        concat!(
            r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="{soap}" xmlns:wsa="{wsa}">"#,
            "<SOAP-ENV:Header>{security}{addressing}</SOAP-ENV:Header>",
            "<SOAP-ENV:Body>{body}</SOAP-ENV:Body>",
            "</SOAP-ENV:Envelope>",
        ),
        soap = NS_SOAP_12,
        wsa = NS_WSA,
        security = security_header,
        addressing = addressing.to_xml(),
        body = body,
    ))
}

/* Validation */

/// Structural self-check of a `wsse:Security` header. An assertion
/// without a signature is only warned about here, its correctness is
/// the SAML engine's concern.
pub fn validate_header(security_xml: &str) -> Result<(), Error> {
    let doc = Document::parse(security_xml)
        .map_err(|err| Error::validation(format!("Security header does not parse: {}", err)))?;
    let root = doc.root();

    if root.name() != "Security" || root.ns_href() != Some(NS_WSSE) {
        return Err(Error::validation(
            "Security header root element is not wsse:Security",
        ));
    }

    let must_understand = root
        .attributes()
        .iter()
        .find(|a| a.name == "mustUnderstand")
        .map(|a| a.value.as_str());
    if must_understand != Some("1") {
        return Err(Error::validation(
            "Security header is missing mustUnderstand=\"1\"",
        ));
    }

    let timestamp = root
        .child_elements()
        .find(|e| e.name() == "Timestamp" && e.ns_href() == Some(NS_WSU))
        .ok_or_else(|| Error::validation("Security header is missing the wsu:Timestamp"))?;

    for required in &["Created", "Expires"] {
        let found = timestamp
            .child_elements()
            .find(|e| e.name() == *required)
            .map(|e| !e.text().trim().is_empty())
            .unwrap_or(false);

        if !found {
            return Err(Error::validation(format!(
                "Security header Timestamp is missing '{}'",
                required
            )));
        }
    }

    let assertion = root
        .child_elements()
        .find(|e| e.name() == "Assertion" && e.ns_href() == Some(NS_SAML))
        .ok_or_else(|| Error::validation("Security header is missing the SAML Assertion"))?;

    if !has_signature(assertion) {
        warn!("Security header contains an unsigned SAML assertion");
    }

    Ok(())
}

fn has_signature(assertion: &Element) -> bool {
    assertion
        .child_elements()
        .any(|e| e.name() == "Signature" && e.ns_href() == Some(NS_DSIG))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::saml::tests::signed_test_assertion;

    fn unsigned_assertion_header() -> String {
        let mut assertion = signed_test_assertion();
        assertion.xml_content = format!(r#"<saml:Assertion xmlns:saml="{}" ID="_x1"><saml:Issuer>i</saml:Issuer></saml:Assertion>"#, NS_SAML);
        assertion.signature = String::new();

        build_security_header(&assertion, 5).unwrap()
    }

    #[test]
    fn test_build_header_validates() {
        let assertion = signed_test_assertion();

        let header = build_security_header(&assertion, 5).unwrap();

        validate_header(&header).unwrap();
    }

    #[test]
    fn test_empty_assertion_is_rejected() {
        let mut assertion = signed_test_assertion();
        assertion.xml_content = String::new();

        match build_security_header(&assertion, 5) {
            Err(Error::Validation(msg)) => assert!(msg.contains("xml_content")),
            x => panic!("expected validation error, got {:?}", x.map(|_| ())),
        }
    }

    #[test]
    fn test_unparseable_assertion_is_rejected() {
        let mut assertion = signed_test_assertion();
        assertion.xml_content = "<Assertion><unclosed>".into();

        assert!(matches!(
            build_security_header(&assertion, 5),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_non_positive_timestamp_validity_is_rejected() {
        let assertion = signed_test_assertion();

        assert!(matches!(
            build_security_header(&assertion, 0),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_unsigned_assertion_is_only_a_warning() {
        let header = unsigned_assertion_header();

        validate_header(&header).unwrap();
    }

    #[test]
    fn test_envelope_structure() {
        let assertion = signed_test_assertion();
        let security = build_security_header(&assertion, 5).unwrap();
        let addressing = WsAddressing::new(ACTION_PIX_ADD, "https://example.org/pix", None);

        let envelope = build_envelope(&security, &addressing, "<Payload/>").unwrap();
        let doc = Document::parse(&envelope).unwrap();

        let root = doc.root();
        assert_eq!(root.name(), "Envelope");
        assert_eq!(root.ns_href(), Some(NS_SOAP_12));

        let header = root
            .child_elements()
            .find(|e| e.name() == "Header")
            .expect("Header");
        let first = header.child_elements().next().expect("first header child");
        assert_eq!(first.name(), "Security");

        assert!(header
            .child_elements()
            .any(|e| e.name() == "ReplyTo" || e.name() == "Action"));
        assert!(envelope.contains(WSA_ANONYMOUS));
        assert!(envelope.contains("urn:uuid:"));
    }

    #[test]
    fn test_empty_body_is_rejected() {
        let assertion = signed_test_assertion();
        let security = build_security_header(&assertion, 5).unwrap();
        let addressing = WsAddressing::new(ACTION_PIX_ADD, "https://example.org/pix", None);

        assert!(matches!(
            build_envelope(&security, &addressing, "  "),
            Err(Error::Validation(_))
        ));
    }
}
