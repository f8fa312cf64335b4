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

use std::collections::HashSet;

use mime::Mime;
use regex::Regex;
use thiserror::Error as ThisError;

use crate::misc::random_token;

use super::constants::{MIME_MULTIPART_RELATED, MIME_SOAP_XML, MIME_XOP_XML};

pub const ROOT_CONTENT_ID: &str = "root.message@ihe-xds-client";

lazy_static! {
    static ref CID_HREF: Regex = Regex::new(r#"href="cid:([^"]+)""#).unwrap();
}

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Message is not a multipart/related body: {0}!")]
    NotMultipart(String),

    #[error("Multipart message is missing the SOAP part!")]
    MissingSoapPart,

    #[error("Multipart message is missing the document part!")]
    MissingDocumentPart,

    #[error("Multipart part is invalid: {0}!")]
    InvalidPart(String),

    #[error("Envelope references 'cid:{0}' but no attachment carries this Content-ID!")]
    MissingAttachment(String),

    #[error("Attachment '{0}' is not referenced by any 'cid:' href in the envelope!")]
    OrphanAttachment(String),
}

/* MtomAttachment */

#[derive(Debug, Clone)]
pub struct MtomAttachment {
    pub content: Vec<u8>,
    pub content_id: String,
    pub content_type: String,
}

/* MtomPackage */

pub struct MtomPackage {
    envelope: String,
    attachments: Vec<MtomAttachment>,
    boundary: String,
}

impl MtomPackage {
    pub fn new(envelope: String, attachments: Vec<MtomAttachment>) -> Self {
        let boundary = generate_boundary(&envelope, &attachments);

        Self {
            envelope,
            attachments,
            boundary,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Checks that every `cid:` reference in the envelope has a matching
    /// attachment and that no attachment is left unreferenced. Guards
    /// against submitting a document-less transaction.
    pub fn validate(&self) -> Result<(), Error> {
        let referenced: HashSet<&str> = CID_HREF
            .captures_iter(&self.envelope)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        let attached: HashSet<&str> = self
            .attachments
            .iter()
            .map(|a| a.content_id.as_str())
            .collect();

        for cid in &referenced {
            if !attached.contains(cid) {
                return Err(Error::MissingAttachment((*cid).into()));
            }
        }

        for cid in &attached {
            if !referenced.contains(cid) {
                return Err(Error::OrphanAttachment((*cid).into()));
            }
        }

        Ok(())
    }

    /// Builds the multipart/related message. Returns the raw body and
    /// the value for the Content-Type header.
    pub fn build(&self) -> Result<(Vec<u8>, String), Error> {
        self.validate()?;

        let mut body = Vec::new();

        body.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Type: {}; charset=UTF-8; type=\"{}\"\r\n\
                 Content-Transfer-Encoding: binary\r\n\
                 Content-ID: <{}>\r\n\r\n",
                *MIME_XOP_XML, *MIME_SOAP_XML, ROOT_CONTENT_ID
            )
            .as_bytes(),
        );
        body.extend_from_slice(self.envelope.as_bytes());
        body.extend_from_slice(b"\r\n");

        for attachment in &self.attachments {
            body.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Type: {}\r\n\
                     Content-Transfer-Encoding: binary\r\n\
                     Content-ID: <{}>\r\n\r\n",
                    attachment.content_type, attachment.content_id
                )
                .as_bytes(),
            );
            body.extend_from_slice(&attachment.content);
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());

        let content_type = format!(
            "{}; boundary=\"{}\"; type=\"{}\"; start=\"<{}>\"; start-info=\"{}\"",
            *MIME_MULTIPART_RELATED, self.boundary, *MIME_XOP_XML, ROOT_CONTENT_ID, *MIME_SOAP_XML
        );

        Ok((body, content_type))
    }
}

/* Extraction */

pub struct ExtractedPackage {
    pub envelope: String,
    pub documents: Vec<(String, Vec<u8>)>,
}

/// Splits a multipart/related body back into the SOAP envelope and the
/// document parts. Used by test collaborators and the mock endpoint.
pub fn extract(body: &[u8], content_type: &str) -> Result<ExtractedPackage, Error> {
    let mime: Mime = content_type
        .parse()
        .map_err(|_| Error::NotMultipart(format!("invalid Content-Type '{}'", content_type)))?;

    if mime.essence_str() != MIME_MULTIPART_RELATED.essence_str() {
        return Err(Error::NotMultipart(format!(
            "Content-Type is '{}/{}'",
            mime.type_(),
            mime.subtype()
        )));
    }

    let boundary = mime
        .get_param(mime::BOUNDARY)
        .ok_or_else(|| Error::NotMultipart("Content-Type is missing the boundary".into()))?
        .as_str()
        .to_owned();

    let mut envelope = None;
    let mut documents = Vec::new();

    for part in split_parts(body, &boundary) {
        let (headers, content) = split_part(part)?;
        let part_type = header_value(&headers, "content-type").unwrap_or_default();
        let content_id = header_value(&headers, "content-id")
            .map(|v| v.trim_matches(|c| c == '<' || c == '>').to_owned());

        if part_type.contains(MIME_XOP_XML.essence_str()) && envelope.is_none() {
            let content = String::from_utf8(content.to_vec())
                .map_err(|_| Error::InvalidPart("SOAP part is not valid UTF-8".into()))?;

            envelope = Some(content);
        } else {
            documents.push((content_id.unwrap_or_default(), content.to_vec()));
        }
    }

    let envelope = envelope.ok_or(Error::MissingSoapPart)?;

    if documents.is_empty() {
        return Err(Error::MissingDocumentPart);
    }

    Ok(ExtractedPackage {
        envelope,
        documents,
    })
}

fn generate_boundary(envelope: &str, attachments: &[MtomAttachment]) -> String {
    loop {
        let boundary = format!("MIMEBoundary_{}", random_token(32));

        let collides = envelope.contains(&boundary)
            || attachments
                .iter()
                .any(|a| contains_subslice(&a.content, boundary.as_bytes()));

        if !collides {
            return boundary;
        }
    }
}

fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut offset = 0;
    let mut start = None;

    while let Some(pos) = find_subslice(&body[offset..], delimiter) {
        let pos = offset + pos;

        if let Some(start) = start {
            let mut end = pos;

            // strip the CRLF that precedes the delimiter
            if end >= 2 && &body[end - 2..end] == b"\r\n" {
                end -= 2;
            }

            parts.push(&body[start..end]);
        }

        offset = pos + delimiter.len();

        // closing delimiter
        if body[offset..].starts_with(b"--") {
            break;
        }

        if body[offset..].starts_with(b"\r\n") {
            offset += 2;
        }

        start = Some(offset);
    }

    parts
}

fn split_part(part: &[u8]) -> Result<(String, &[u8]), Error> {
    match find_subslice(part, b"\r\n\r\n") {
        Some(pos) => {
            let headers = String::from_utf8(part[..pos].to_vec())
                .map_err(|_| Error::InvalidPart("part headers are not valid UTF-8".into()))?;

            Ok((headers, &part[pos + 4..]))
        }
        None => Err(Error::InvalidPart(
            "part is missing the header separator".into(),
        )),
    }
}

fn header_value(headers: &str, name: &str) -> Option<String> {
    headers.lines().find_map(|line| {
        let mut split = line.splitn(2, ':');
        let key = split.next()?.trim();
        let value = split.next()?.trim();

        if key.eq_ignore_ascii_case(name) {
            Some(value.to_owned())
        } else {
            None
        }
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    find_subslice(haystack, needle).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_package() -> MtomPackage {
        let attachment = MtomAttachment {
            content: b"<ClinicalDocument>binary \xc3\xa4 payload</ClinicalDocument>".to_vec(),
            content_id: "doc1@ihe-xds-client".into(),
            content_type: "text/xml".into(),
        };
        let envelope = format!(
            r#"<Envelope><Body><Document><xop:Include xmlns:xop="http://www.w3.org/2004/08/xop/include" href="cid:{}"/></Document></Body></Envelope>"#,
            attachment.content_id
        );

        MtomPackage::new(envelope, vec![attachment])
    }

    #[test]
    fn test_build_then_extract_round_trip() {
        let package = test_package();
        let original = package.attachments[0].content.clone();

        let (body, content_type) = package.build().unwrap();
        let extracted = extract(&body, &content_type).unwrap();

        assert_eq!(extracted.documents.len(), 1);
        assert_eq!(extracted.documents[0].0, "doc1@ihe-xds-client");
        assert_eq!(extracted.documents[0].1, original);
        assert!(extracted.envelope.contains("cid:doc1@ihe-xds-client"));
    }

    #[test]
    fn test_validate_missing_attachment() {
        let package = MtomPackage::new(
            r#"<Envelope><xop:Include href="cid:missing@x"/></Envelope>"#.into(),
            Vec::new(),
        );

        match package.validate() {
            Err(Error::MissingAttachment(cid)) => assert_eq!(cid, "missing@x"),
            x => panic!("expected missing attachment, got {:?}", x),
        }
    }

    #[test]
    fn test_validate_orphan_attachment() {
        let package = MtomPackage::new(
            "<Envelope/>".into(),
            vec![MtomAttachment {
                content: b"data".to_vec(),
                content_id: "orphan@x".into(),
                content_type: "text/plain".into(),
            }],
        );

        match package.validate() {
            Err(Error::OrphanAttachment(cid)) => assert_eq!(cid, "orphan@x"),
            x => panic!("expected orphan attachment, got {:?}", x),
        }
    }

    #[test]
    fn test_boundary_does_not_collide() {
        let package = test_package();

        assert!(!package.envelope.contains(package.boundary()));
    }

    #[test]
    fn test_extract_rejects_non_multipart() {
        match extract(b"<xml/>", "application/soap+xml") {
            Err(Error::NotMultipart(_)) => (),
            x => panic!("expected not-multipart, got {:?}", x.map(|_| ())),
        }
    }

    #[test]
    fn test_extract_missing_soap_part() {
        let body = b"--b\r\nContent-Type: text/plain\r\n\r\ndata\r\n--b--\r\n";

        match extract(body, "multipart/related; boundary=\"b\"") {
            Err(Error::MissingSoapPart) => (),
            x => panic!("expected missing SOAP part, got {:?}", x.map(|_| ())),
        }
    }

    #[test]
    fn test_extract_missing_document_part() {
        let body =
            b"--b\r\nContent-Type: application/xop+xml\r\n\r\n<Envelope/>\r\n--b--\r\n";

        match extract(body, "multipart/related; boundary=\"b\"") {
            Err(Error::MissingDocumentPart) => (),
            x => panic!("expected missing document part, got {:?}", x.map(|_| ())),
        }
    }
}
