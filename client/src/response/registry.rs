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

use log::warn;
use xmldsig::Element;

use crate::soap::constants::*;

use super::TransactionStatus;

/// Flattened `rs:RegistryResponse`. Warnings are preserved separately
/// from errors; a partial success keeps both around.
#[derive(Debug, Clone)]
pub struct RegistryOutcome {
    pub status: TransactionStatus,
    pub status_code: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub(super) fn parse_registry_response(response: &Element) -> RegistryOutcome {
    let status_uri = response.attr("status").unwrap_or_default();

    let (status, status_code) = match status_uri {
        XDS_STATUS_SUCCESS => (TransactionStatus::Success, "Success".to_owned()),
        XDS_STATUS_PARTIAL_SUCCESS => {
            (TransactionStatus::PartialSuccess, "PartialSuccess".to_owned())
        }
        XDS_STATUS_FAILURE => (TransactionStatus::Error, "Failure".to_owned()),
        other => {
            warn!("Unknown registry status URI: {}", other);

            (TransactionStatus::Error, other.to_owned())
        }
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if let Some(list) = response.find_element("RegistryErrorList", NS_EBXML_RS) {
        for entry in list
            .child_elements()
            .filter(|e| e.name() == "RegistryError")
        {
            let code = entry.attr("errorCode").unwrap_or("UnknownError");
            let context = entry.attr("codeContext").unwrap_or_default();
            let message = if context.is_empty() {
                code.to_owned()
            } else {
                format!("{}: {}", code, context)
            };

            match entry.attr("severity") {
                Some(XDS_SEVERITY_WARNING) => warnings.push(message),
                _ => errors.push(message),
            }
        }
    }

    RegistryOutcome {
        status,
        status_code,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use xmldsig::Document;

    #[test]
    fn test_mixed_severities_are_split() {
        let xml = format!(
            concat!(
                r#"<rs:RegistryResponse xmlns:rs="{ns}" status="{status}">"#,
                "<rs:RegistryErrorList>",
                r#"<rs:RegistryError errorCode="XDSRepositoryError" severity="{err}" codeContext="boom"/>"#,
                r#"<rs:RegistryError errorCode="XDSExtraMetadataNotSaved" severity="{warn}" codeContext="ignored"/>"#,
                "</rs:RegistryErrorList>",
                "</rs:RegistryResponse>"
            ),
            ns = NS_EBXML_RS,
            status = XDS_STATUS_FAILURE,
            err = XDS_SEVERITY_ERROR,
            warn = XDS_SEVERITY_WARNING
        );
        let doc = Document::parse(&xml).unwrap();

        let outcome = parse_registry_response(doc.root());

        assert_eq!(outcome.status, TransactionStatus::Error);
        assert_eq!(outcome.errors, vec!["XDSRepositoryError: boom"]);
        assert_eq!(outcome.warnings, vec!["XDSExtraMetadataNotSaved: ignored"]);
    }

    #[test]
    fn test_missing_severity_counts_as_error() {
        let xml = format!(
            concat!(
                r#"<rs:RegistryResponse xmlns:rs="{ns}" status="{status}">"#,
                "<rs:RegistryErrorList>",
                r#"<rs:RegistryError errorCode="XDSRegistryError"/>"#,
                "</rs:RegistryErrorList>",
                "</rs:RegistryResponse>"
            ),
            ns = NS_EBXML_RS,
            status = XDS_STATUS_FAILURE
        );
        let doc = Document::parse(&xml).unwrap();

        let outcome = parse_registry_response(doc.root());

        assert_eq!(outcome.errors, vec!["XDSRegistryError"]);
        assert!(outcome.warnings.is_empty());
    }
}
