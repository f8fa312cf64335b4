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
use std::time::Instant;

use log::info;

use crate::audit::AuditSink;
use crate::error::Error;
use crate::messages::{build_iti41_body, Iti41Transaction};
use crate::misc::random_token;
use crate::response::{parse_response, TransactionResponse, TransactionType};
use crate::saml::SamlAssertion;
use crate::soap::constants::{ACTION_ITI_41, ACTION_PIX_ADD};
use crate::soap::mtom::{MtomAttachment, MtomPackage};
use crate::soap::wss::{build_envelope, build_security_header, WsAddressing};
use crate::transport::{SoapRequest, TransportClient, TransportConfig};

/* Configuration */

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub pix_endpoint: TransportConfig,
    pub xds_endpoint: TransportConfig,
    pub timestamp_validity_minutes: i64,
}

/* TransactionService */

/// Drives a complete transaction: security header, addressing,
/// envelope, transport and response normalization. One transport
/// client per endpoint so the PIX manager and the repository can have
/// different retry settings.
pub struct TransactionService {
    pix_client: TransportClient,
    xds_client: TransportClient,
    timestamp_validity_minutes: i64,
}

impl TransactionService {
    pub fn new(config: ServiceConfig, audit: Arc<dyn AuditSink>) -> Result<Self, Error> {
        let pix_client = TransportClient::new(config.pix_endpoint, audit.clone())?;
        let xds_client = TransportClient::new(config.xds_endpoint, audit)?;

        Ok(Self {
            pix_client,
            xds_client,
            timestamp_validity_minutes: config.timestamp_validity_minutes,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_clients(
        pix_client: TransportClient,
        xds_client: TransportClient,
        timestamp_validity_minutes: i64,
    ) -> Self {
        Self {
            pix_client,
            xds_client,
            timestamp_validity_minutes,
        }
    }

    /// Submits a patient identity feed (PRPA_IN201301UV02) to the PIX
    /// manager.
    pub fn submit_pix_add(
        &self,
        message_xml: &str,
        assertion: &SamlAssertion,
    ) -> Result<TransactionResponse, Error> {
        let security = build_security_header(assertion, self.timestamp_validity_minutes)?;
        let addressing = WsAddressing::new(
            ACTION_PIX_ADD,
            self.pix_client.endpoint().as_str(),
            None,
        );
        let message_id = addressing.message_id.clone();
        let envelope = build_envelope(&security, &addressing, message_xml)?;

        info!("Submitting PIX Add {} to {}", message_id, self.pix_client.endpoint());

        let request = SoapRequest {
            transaction_type: TransactionType::PixAdd,
            body: envelope.into_bytes(),
            content_type: format!(
                r#"application/soap+xml; charset=UTF-8; action="{}""#,
                ACTION_PIX_ADD
            ),
        };

        let started = Instant::now();
        let raw = self.pix_client.submit(&request)?;
        let body = String::from_utf8_lossy(&raw.body).into_owned();

        Ok(parse_response(
            TransactionType::PixAdd,
            &message_id,
            &body,
            started.elapsed().as_millis(),
        ))
    }

    /// Submits a document set (ITI-41) to the repository as an MTOM
    /// package with one attachment. Identifiers the response cannot
    /// know are merged from the request side, so the caller always
    /// gets the full correlation set back.
    pub fn submit_iti41(
        &self,
        transaction: &Iti41Transaction,
        assertion: &SamlAssertion,
    ) -> Result<TransactionResponse, Error> {
        transaction.validate()?;

        let content_id = format!("{}@ihe-xds-client", random_token(24));
        let body = build_iti41_body(transaction, &content_id)?;

        let security = build_security_header(assertion, self.timestamp_validity_minutes)?;
        let addressing = WsAddressing::new(
            ACTION_ITI_41,
            self.xds_client.endpoint().as_str(),
            None,
        );
        let message_id = addressing.message_id.clone();
        let envelope = build_envelope(&security, &addressing, &body)?;

        let package = MtomPackage::new(
            envelope,
            vec![MtomAttachment {
                content: transaction.document.clone(),
                content_id,
                content_type: transaction.document_content_type.clone(),
            }],
        );
        let (mtom_body, content_type) = package.build()?;

        info!(
            "Submitting ITI-41 {} ({} document byte(s)) to {}",
            message_id,
            transaction.document.len(),
            self.xds_client.endpoint()
        );

        let request = SoapRequest {
            transaction_type: TransactionType::Iti41,
            body: mtom_body,
            content_type,
        };

        let started = Instant::now();
        let raw = self.xds_client.submit(&request)?;
        let response_body = String::from_utf8_lossy(&raw.body).into_owned();

        let mut response = parse_response(
            TransactionType::Iti41,
            &message_id,
            &response_body,
            started.elapsed().as_millis(),
        );

        response
            .extracted_identifiers
            .entry("document_unique_id".into())
            .or_insert_with(|| transaction.document_unique_id.clone());
        response
            .extracted_identifiers
            .entry("submission_set_id".into())
            .or_insert_with(|| transaction.submission_set_id.clone());
        response
            .extracted_identifiers
            .entry("patient_id".into())
            .or_insert_with(|| transaction.patient_id.clone());

        Ok(response)
    }
}
