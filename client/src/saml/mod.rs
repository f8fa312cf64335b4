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

use chrono::{DateTime, Duration, Utc};
use log::debug;
use openssl::x509::X509Ref;
use xmldsig::{sign_enveloped, verify_enveloped, Document};

use crate::cert::CertificateBundle;
use crate::error::Error;
use crate::misc::{format_timestamp, random_token};
use crate::soap::constants::*;
use crate::soap::escape_xml;

/* SamlAssertion */

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum GenerationMethod {
    Programmatic,
    Template,
}

/// SAML attribute value, either a single string or a list of strings.
/// Modelled as a tagged union so the statement builder needs no runtime
/// type inspection.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    Single(String),
    Multi(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct SamlAttribute {
    pub name: String,
    pub value: AttributeValue,
}

/// A SAML 2.0 bearer assertion. Minted fresh for every submission and
/// never reused across requests.
#[derive(Debug, Clone)]
pub struct SamlAssertion {
    pub assertion_id: String,
    pub issuer: String,
    pub subject: String,
    pub audience: String,
    pub issue_instant: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    pub xml_content: String,
    pub signature: String,
    pub certificate_subject: String,
    pub generation_method: GenerationMethod,
}

impl SamlAssertion {
    pub fn is_signed(&self) -> bool {
        !self.signature.trim().is_empty()
    }
}

/* Generation */

pub fn generate(
    subject: &str,
    issuer: &str,
    audience: &str,
    attributes: &[SamlAttribute],
    validity_minutes: i64,
) -> Result<SamlAssertion, Error> {
    for (name, value) in &[("subject", subject), ("issuer", issuer), ("audience", audience)] {
        if value.trim().is_empty() {
            return Err(Error::validation(format!(
                "Assertion {} must not be empty",
                name
            )));
        }
    }

    if validity_minutes <= 0 {
        return Err(Error::validation(format!(
            "validity_minutes must be a positive number of minutes (got {})",
            validity_minutes
        )));
    }

    let issue_instant = Utc::now();
    let not_before = issue_instant;
    let not_on_or_after = issue_instant + Duration::minutes(validity_minutes);
    let assertion_id = new_assertion_id();

    let xml_content = render_assertion(
        &assertion_id,
        subject,
        issuer,
        audience,
        attributes,
        &issue_instant,
        &not_before,
        &not_on_or_after,
    );

    Ok(SamlAssertion {
        assertion_id,
        issuer: issuer.into(),
        subject: subject.into(),
        audience: audience.into(),
        issue_instant,
        not_before,
        not_on_or_after,
        xml_content,
        signature: String::new(),
        certificate_subject: String::new(),
        generation_method: GenerationMethod::Programmatic,
    })
}

/// XML-ID safe token: `_` followed by 40 hex characters.
fn new_assertion_id() -> String {
    format!("_{}", random_token(40))
}

#[allow(clippy::too_many_arguments)]
fn render_assertion(
    assertion_id: &str,
    subject: &str,
    issuer: &str,
    audience: &str,
    attributes: &[SamlAttribute],
    issue_instant: &DateTime<Utc>,
    not_before: &DateTime<Utc>,
    not_on_or_after: &DateTime<Utc>,
) -> String {
    let issue_instant = format_timestamp(issue_instant);
    let not_before = format_timestamp(not_before);
    let not_on_or_after = format_timestamp(not_on_or_after);

    let mut xml = format!(
        concat!(
            r#"<saml:Assertion xmlns:saml="{ns}" ID="{id}" Version="2.0" IssueInstant="{instant}">"#,
            "<saml:Issuer>{issuer}</saml:Issuer>",
            "<saml:Subject>",
            r#"<saml:NameID Format="{nameid_format}">{subject}</saml:NameID>"#,
            r#"<saml:SubjectConfirmation Method="{bearer}">"#,
            r#"<saml:SubjectConfirmationData NotOnOrAfter="{not_on_or_after}"/>"#,
            "</saml:SubjectConfirmation>",
            "</saml:Subject>",
            r#"<saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}">"#,
            "<saml:AudienceRestriction>",
            "<saml:Audience>{audience}</saml:Audience>",
            "</saml:AudienceRestriction>",
            "</saml:Conditions>",
            r#"<saml:AuthnStatement AuthnInstant="{instant}">"#,
            "<saml:AuthnContext>",
            "<saml:AuthnContextClassRef>{authn_context}</saml:AuthnContextClassRef>",
            "</saml:AuthnContext>",
            "</saml:AuthnStatement>",
        ),
        ns = NS_SAML,
        id = assertion_id,
        instant = issue_instant,
        issuer = escape_xml(issuer),
        nameid_format = SAML_NAMEID_FORMAT_UNSPECIFIED,
        subject = escape_xml(subject),
        bearer = SAML_CONFIRMATION_BEARER,
        not_before = not_before,
        not_on_or_after = not_on_or_after,
        audience = escape_xml(audience),
        authn_context = SAML_AUTHN_CONTEXT_X509,
    );

    if !attributes.is_empty() {
        xml.push_str("<saml:AttributeStatement>");

        for attribute in attributes {
            xml.push_str(&format!(
                r#"<saml:Attribute Name="{}">"#,
                escape_xml(&attribute.name)
            ));

            match &attribute.value {
                AttributeValue::Single(value) => {
                    xml.push_str(&format!(
                        "<saml:AttributeValue>{}</saml:AttributeValue>",
                        escape_xml(value)
                    ));
                }
                AttributeValue::Multi(values) => {
                    for value in values {
                        xml.push_str(&format!(
                            "<saml:AttributeValue>{}</saml:AttributeValue>",
                            escape_xml(value)
                        ));
                    }
                }
            }

            xml.push_str("</saml:Attribute>");
        }

        xml.push_str("</saml:AttributeStatement>");
    }

    xml.push_str("</saml:Assertion>");

    xml
}

/* Signing */

/// Signs the assertion with an enveloped XML signature placed after the
/// `Issuer` element. Returns a new assertion value; the unsigned input
/// stays untouched.
pub fn sign(assertion: &SamlAssertion, bundle: &CertificateBundle) -> Result<SamlAssertion, Error> {
    if assertion.xml_content.trim().is_empty() {
        return Err(Error::validation(
            "Assertion has empty xml_content, nothing to sign",
        ));
    }

    let mut doc = Document::parse(&assertion.xml_content)?;

    let signature = sign_enveloped(
        doc.root_mut(),
        &assertion.assertion_id,
        1,
        &bundle.private_key,
        &bundle.certificate,
    )?;

    let mut signed = assertion.clone();
    signed.xml_content = doc.to_string();
    signed.signature = signature;
    signed.certificate_subject = bundle.info.subject.clone();

    Ok(signed)
}

/* Verification */

/// Cryptographic re-validation of the enveloped signature. An unsigned
/// assertion is rejected with a validation error, distinct from the
/// signature errors raised for tampered content. A signature whose
/// `KeyInfo` carries no certificate surfaces as `xmldsig::Error::NoKey`
/// unless the caller supplies the verification certificate.
pub fn verify(assertion: &SamlAssertion, cert: Option<&X509Ref>) -> Result<(), Error> {
    if !assertion.is_signed() {
        return Err(Error::validation(
            "Assertion is unsigned; sign it before verification",
        ));
    }

    let doc = Document::parse(&assertion.xml_content)?;
    let verified = verify_enveloped(doc.root(), cert)?;

    if verified.reference_id != assertion.assertion_id {
        return Err(Error::validation(format!(
            "Signature references '{}' but the assertion ID is '{}'",
            verified.reference_id, assertion.assertion_id
        )));
    }

    Ok(())
}

/// Wall-clock freshness check, independent of signature validity.
/// Returns `false` for stale, future or expired assertions so callers
/// can decide policy without handling errors.
pub fn validate_freshness(assertion: &SamlAssertion, max_age_minutes: i64) -> bool {
    let now = Utc::now();

    if now < assertion.not_before {
        debug!(
            "Assertion {} is not yet valid (NotBefore: {})",
            assertion.assertion_id, assertion.not_before
        );

        return false;
    }

    if now >= assertion.not_on_or_after {
        debug!(
            "Assertion {} is expired (NotOnOrAfter: {})",
            assertion.assertion_id, assertion.not_on_or_after
        );

        return false;
    }

    if now - assertion.issue_instant > Duration::minutes(max_age_minutes) {
        debug!(
            "Assertion {} exceeds the maximum age of {} minute(s)",
            assertion.assertion_id, max_age_minutes
        );

        return false;
    }

    true
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::collections::HashSet;

    use crate::cert::tests::test_bundle;

    fn test_attributes() -> Vec<SamlAttribute> {
        vec![
            SamlAttribute {
                name: "urn:oasis:names:tc:xspa:1.0:subject:organization".into(),
                value: AttributeValue::Single("IHE Test Harness".into()),
            },
            SamlAttribute {
                name: "urn:oasis:names:tc:xspa:1.0:subject:purposeofuse".into(),
                value: AttributeValue::Multi(vec!["TREATMENT".into(), "PAYMENT".into()]),
            },
        ]
    }

    pub(crate) fn test_assertion() -> SamlAssertion {
        generate(
            "CN=test-subject",
            "urn:ihe:test:issuer",
            "https://registry.example.org",
            &test_attributes(),
            5,
        )
        .unwrap()
    }

    pub(crate) fn signed_test_assertion() -> SamlAssertion {
        sign(&test_assertion(), &test_bundle()).unwrap()
    }

    #[test]
    fn test_generated_window_invariants() {
        let assertion = test_assertion();

        assert_eq!(assertion.not_before, assertion.issue_instant);
        assert_eq!(
            assertion.not_on_or_after,
            assertion.issue_instant + Duration::minutes(5)
        );
        assert!(!assertion.is_signed());
    }

    #[test]
    fn test_assertion_id_shape() {
        let assertion = test_assertion();
        let id = &assertion.assertion_id;

        assert!(id.starts_with('_'));
        assert_eq!(id.len(), 41);
        assert!(id[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_assertion_ids_are_unique() {
        let ids: HashSet<String> = (0..1000)
            .map(|_| test_assertion().assertion_id)
            .collect();

        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_non_positive_validity_is_rejected() {
        for minutes in &[0, -5] {
            assert!(matches!(
                generate("s", "i", "a", &[], *minutes),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn test_attribute_values_are_escaped() {
        let attributes = vec![SamlAttribute {
            name: "attr".into(),
            value: AttributeValue::Single("a & b < c".into()),
        }];

        let assertion = generate("s", "i", "a", &attributes, 5).unwrap();

        assert!(assertion.xml_content.contains("a &amp; b &lt; c"));
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let bundle = test_bundle();
        let signed = sign(&test_assertion(), &bundle).unwrap();

        assert!(signed.is_signed());
        assert_eq!(signed.certificate_subject, bundle.info.subject);
        assert!(signed.xml_content.contains("SignatureValue"));

        verify(&signed, Some(&bundle.certificate)).unwrap();
        verify(&signed, None).unwrap();
    }

    #[test]
    fn test_signature_is_placed_after_issuer() {
        let signed = signed_test_assertion();
        let doc = Document::parse(&signed.xml_content).unwrap();

        let names: Vec<String> = doc
            .root()
            .child_elements()
            .map(|e| e.name().to_owned())
            .collect();

        assert_eq!(names[0], "Issuer");
        assert_eq!(names[1], "Signature");
    }

    #[test]
    fn test_tampered_assertion_fails_with_digest_error() {
        let signed = signed_test_assertion();

        let mut tampered = signed.clone();
        tampered.xml_content = tampered.xml_content.replace("CN=test-subject", "CN=evil");

        match verify(&tampered, None) {
            Err(Error::DsigError(xmldsig::Error::InvalidDigestValue { .. })) => (),
            x => panic!("expected digest error, got {:?}", x),
        }
    }

    #[test]
    fn test_missing_certificate_material_is_distinguishable() {
        let signed = signed_test_assertion();

        let start = signed.xml_content.find("<KeyInfo>").unwrap();
        let end = signed.xml_content.find("</KeyInfo>").unwrap() + "</KeyInfo>".len();

        let mut stripped = signed.clone();
        stripped.xml_content = format!(
            "{}{}",
            &signed.xml_content[..start],
            &signed.xml_content[end..]
        );

        match verify(&stripped, None) {
            Err(Error::DsigError(xmldsig::Error::NoKey)) => (),
            x => panic!("expected missing key error, got {:?}", x),
        }
    }

    #[test]
    fn test_unsigned_assertion_is_distinguishable() {
        let assertion = test_assertion();

        match verify(&assertion, None) {
            Err(Error::Validation(msg)) => assert!(msg.contains("unsigned")),
            x => panic!("expected validation error, got {:?}", x),
        }
    }

    #[test]
    fn test_freshness_checks() {
        let mut assertion = test_assertion();
        assert!(validate_freshness(&assertion, 5));

        assertion.not_before = Utc::now() + Duration::minutes(10);
        assert!(!validate_freshness(&assertion, 5));

        let mut assertion = test_assertion();
        assertion.not_on_or_after = Utc::now() - Duration::minutes(1);
        assert!(!validate_freshness(&assertion, 5));

        let mut assertion = test_assertion();
        assertion.issue_instant = Utc::now() - Duration::minutes(30);
        assert!(!validate_freshness(&assertion, 5));
    }
}
