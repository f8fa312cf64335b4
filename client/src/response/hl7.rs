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

use crate::soap::constants::NS_HL7_V3;

/// HL7v3 transmission acknowledgement. `AA` accepts, `AE` flags an
/// application error, `AR` a rejection. Anything else is treated as an
/// error code.
#[derive(Debug, Clone)]
pub struct Hl7Ack {
    pub type_code: String,
    pub details: Vec<String>,
    pub target_message_id: Option<String>,
}

impl Hl7Ack {
    pub fn is_accept(&self) -> bool {
        self.type_code == "AA"
    }
}

pub(super) fn parse_acknowledgement(payload: &Element) -> Option<Hl7Ack> {
    let ack = payload.find_element("acknowledgement", NS_HL7_V3)?;

    let type_code = ack
        .find_element("typeCode", NS_HL7_V3)
        .and_then(|e| e.attr("code"))
        .unwrap_or("AE")
        .to_owned();

    let details = ack
        .child_elements()
        .filter(|e| e.name() == "acknowledgementDetail")
        .filter_map(|detail| {
            detail
                .find_element("text", NS_HL7_V3)
                .map(|text| text.text().trim().to_owned())
        })
        .filter(|text| !text.is_empty())
        .collect();

    let target_message_id = ack
        .find_element("targetMessage", NS_HL7_V3)
        .and_then(|target| target.find_element("id", NS_HL7_V3))
        .and_then(|id| id.attr("extension").or_else(|| id.attr("root")))
        .map(str::to_owned);

    Some(Hl7Ack {
        type_code,
        details,
        target_message_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use xmldsig::Document;

    #[test]
    fn test_rejection_with_details() {
        let xml = format!(
            concat!(
                r#"<hl7:MCCI_IN000002UV01 xmlns:hl7="{ns}">"#,
                "<hl7:acknowledgement>",
                r#"<hl7:typeCode code="AR"/>"#,
                "<hl7:acknowledgementDetail>",
                "<hl7:text>Sender not authorized</hl7:text>",
                "</hl7:acknowledgementDetail>",
                "<hl7:acknowledgementDetail>",
                "<hl7:text>Contact the registry operator</hl7:text>",
                "</hl7:acknowledgementDetail>",
                "</hl7:acknowledgement>",
                "</hl7:MCCI_IN000002UV01>"
            ),
            ns = NS_HL7_V3
        );
        let doc = Document::parse(&xml).unwrap();

        let ack = parse_acknowledgement(doc.root()).unwrap();

        assert!(!ack.is_accept());
        assert_eq!(ack.type_code, "AR");
        assert_eq!(ack.details.len(), 2);
        assert!(ack.target_message_id.is_none());
    }

    #[test]
    fn test_payload_without_acknowledgement() {
        let xml = format!(r#"<hl7:PRPA_IN201301UV02 xmlns:hl7="{}"/>"#, NS_HL7_V3);
        let doc = Document::parse(&xml).unwrap();

        assert!(parse_acknowledgement(doc.root()).is_none());
    }
}
