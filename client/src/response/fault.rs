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

use xmldsig::Element;

use crate::soap::constants::{NS_SOAP_11, NS_SOAP_12};

/// SOAP fault in either 1.1 or 1.2 shape, flattened to one struct.
#[derive(Debug, Clone)]
pub struct SoapFault {
    pub code: String,
    pub subcodes: Vec<String>,
    pub reason: String,
    pub actor: Option<String>,
    pub detail: Option<String>,
}

impl SoapFault {
    /// Single-line rendering for error lists and logs.
    pub fn message(&self) -> String {
        let mut msg = format!("SOAP fault {}: {}", self.code, self.reason);

        if !self.subcodes.is_empty() {
            msg.push_str(&format!(" [{}]", self.subcodes.join(" / ")));
        }

        if let Some(actor) = &self.actor {
            msg.push_str(&format!(" (actor: {})", actor));
        }

        if let Some(detail) = &self.detail {
            msg.push_str(&format!(" - {}", detail));
        }

        msg
    }
}

pub(super) fn parse_fault(payload: &Element) -> Option<SoapFault> {
    if payload.name() != "Fault" {
        return None;
    }

    match payload.ns_href() {
        Some(NS_SOAP_12) => Some(parse_fault_12(payload)),
        Some(NS_SOAP_11) | None => Some(parse_fault_11(payload)),
        Some(_) => None,
    }
}

/// SOAP 1.1: unqualified `faultcode` / `faultstring` / `faultactor` /
/// `detail` children.
fn parse_fault_11(fault: &Element) -> SoapFault {
    let child_text = |name: &str| -> Option<String> {
        fault
            .child_elements()
            .find(|e| e.name() == name)
            .map(|e| e.text().trim().to_owned())
            .filter(|text| !text.is_empty())
    };

    SoapFault {
        code: child_text("faultcode").unwrap_or_else(|| "Unknown".into()),
        subcodes: Vec::new(),
        reason: child_text("faultstring").unwrap_or_else(|| "No fault string given".into()),
        actor: child_text("faultactor"),
        detail: child_text("detail"),
    }
}

/// SOAP 1.2: `Code/Value` with nested `Subcode` chain, `Reason/Text`
/// and optional `Detail`.
fn parse_fault_12(fault: &Element) -> SoapFault {
    let mut code = "Unknown".to_owned();
    let mut subcodes = Vec::new();

    if let Some(code_elem) = fault.child_elements().find(|e| e.name() == "Code") {
        if let Some(value) = code_elem.child_elements().find(|e| e.name() == "Value") {
            code = value.text().trim().to_owned();
        }

        let mut next = code_elem.child_elements().find(|e| e.name() == "Subcode");
        while let Some(subcode) = next {
            if let Some(value) = subcode.child_elements().find(|e| e.name() == "Value") {
                subcodes.push(value.text().trim().to_owned());
            }

            next = subcode.child_elements().find(|e| e.name() == "Subcode");
        }
    }

    let reason = fault
        .child_elements()
        .find(|e| e.name() == "Reason")
        .and_then(|r| r.child_elements().find(|e| e.name() == "Text"))
        .map(|text| text.text().trim().to_owned())
        .unwrap_or_else(|| "No fault reason given".into());

    let detail = fault
        .child_elements()
        .find(|e| e.name() == "Detail")
        .map(|d| d.text().trim().to_owned())
        .filter(|text| !text.is_empty());

    SoapFault {
        code,
        subcodes,
        reason,
        actor: None,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use xmldsig::Document;

    #[test]
    fn test_fault_11_fields() {
        let xml = format!(
            concat!(
                r#"<s:Fault xmlns:s="{}">"#,
                "<faultcode>s:Client</faultcode>",
                "<faultstring>Bad request</faultstring>",
                "<faultactor>urn:gateway</faultactor>",
                "<detail>missing element</detail>",
                "</s:Fault>"
            ),
            NS_SOAP_11
        );
        let doc = Document::parse(&xml).unwrap();

        let fault = parse_fault(doc.root()).unwrap();

        assert_eq!(fault.code, "s:Client");
        assert_eq!(fault.reason, "Bad request");
        assert_eq!(fault.actor.as_deref(), Some("urn:gateway"));
        assert_eq!(fault.detail.as_deref(), Some("missing element"));
    }

    #[test]
    fn test_fault_12_subcode_chain() {
        let xml = format!(
            concat!(
                r#"<s:Fault xmlns:s="{}">"#,
                "<s:Code>",
                "<s:Value>s:Sender</s:Value>",
                "<s:Subcode>",
                "<s:Value>a:First</s:Value>",
                "<s:Subcode><s:Value>a:Second</s:Value></s:Subcode>",
                "</s:Subcode>",
                "</s:Code>",
                r#"<s:Reason><s:Text xml:lang="en">nope</s:Text></s:Reason>"#,
                "</s:Fault>"
            ),
            NS_SOAP_12
        );
        let doc = Document::parse(&xml).unwrap();

        let fault = parse_fault(doc.root()).unwrap();

        assert_eq!(fault.code, "s:Sender");
        assert_eq!(fault.subcodes, vec!["a:First", "a:Second"]);
        assert_eq!(fault.reason, "nope");
        assert!(fault.message().contains("a:First / a:Second"));
    }

    #[test]
    fn test_non_fault_is_ignored() {
        let doc = Document::parse(r#"<x:Other xmlns:x="urn:example"/>"#).unwrap();

        assert!(parse_fault(doc.root()).is_none());
    }
}
