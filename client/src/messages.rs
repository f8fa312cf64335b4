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

use chrono::Utc;

use crate::error::Error;
use crate::misc::random_token;
use crate::soap::constants::*;
use crate::soap::escape_xml;

/* PIX Add */

/// Demographics for a PIX Feed. The patient identifier is the
/// `id@extension` within the assigning authority's `id@root` OID.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub patient_id: String,
    pub assigning_authority_oid: String,
    pub family_name: String,
    pub given_name: String,
    pub birth_date: String,
    pub gender_code: String,
    pub sender_oid: String,
    pub receiver_oid: String,
}

impl PatientRecord {
    fn validate(&self) -> Result<(), Error> {
        for (name, value) in &[
            ("patient_id", &self.patient_id),
            ("assigning_authority_oid", &self.assigning_authority_oid),
            ("family_name", &self.family_name),
            ("sender_oid", &self.sender_oid),
            ("receiver_oid", &self.receiver_oid),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!(
                    "PatientRecord field {} must not be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Builds a `PRPA_IN201301UV02` patient identity feed message.
pub fn build_pix_add(record: &PatientRecord, message_id: &str) -> Result<String, Error> {
    record.validate()?;

    let creation_time = Utc::now().format("%Y%m%d%H%M%S").to_string();

    Ok(format!(
        concat!(
            r#"<PRPA_IN201301UV02 xmlns="{ns}" ITSVersion="XML_1.0">"#,
            r#"<id root="{sender_oid}" extension="{message_id}"/>"#,
            r#"<creationTime value="{creation_time}"/>"#,
            r#"<interactionId root="2.16.840.1.113883.1.6" extension="PRPA_IN201301UV02"/>"#,
            r#"<processingCode code="P"/>"#,
            r#"<processingModeCode code="T"/>"#,
            r#"<acceptAckCode code="AL"/>"#,
            r#"<receiver typeCode="RCV">"#,
            r#"<device classCode="DEV" determinerCode="INSTANCE">"#,
            r#"<id root="{receiver_oid}"/>"#,
            "</device>",
            "</receiver>",
            r#"<sender typeCode="SND">"#,
            r#"<device classCode="DEV" determinerCode="INSTANCE">"#,
            r#"<id root="{sender_oid}"/>"#,
            "</device>",
            "</sender>",
            r#"<controlActProcess classCode="CACT" moodCode="EVN">"#,
            r#"<code code="PRPA_TE201301UV02" codeSystem="2.16.840.1.113883.1.6"/>"#,
            r#"<subject typeCode="SUBJ" contextConductionInd="false">"#,
            r#"<registrationEvent classCode="REG" moodCode="EVN">"#,
            r#"<id nullFlavor="NA"/>"#,
            r#"<statusCode code="active"/>"#,
            r#"<subject1 typeCode="SBJ">"#,
            r#"<patient classCode="PAT">"#,
            r#"<id root="{authority_oid}" extension="{patient_id}"/>"#,
            r#"<statusCode code="active"/>"#,
            r#"<patientPerson classCode="PSN" determinerCode="INSTANCE">"#,
            "<name>",
            "<family>{family}</family>",
            "<given>{given}</given>",
            "</name>",
            r#"<administrativeGenderCode code="{gender}"/>"#,
            r#"<birthTime value="{birth_date}"/>"#,
            "</patientPerson>",
            r#"<providerOrganization classCode="ORG" determinerCode="INSTANCE">"#,
            r#"<id root="{authority_oid}"/>"#,
            "</providerOrganization>",
            "</patient>",
            "</subject1>",
            r#"<custodian typeCode="CST">"#,
            r#"<assignedEntity classCode="ASSIGNED">"#,
            r#"<id root="{authority_oid}"/>"#,
            "</assignedEntity>",
            "</custodian>",
            "</registrationEvent>",
            "</subject>",
            "</controlActProcess>",
            "</PRPA_IN201301UV02>"
        ),
        ns = NS_HL7_V3,
        sender_oid = escape_xml(&record.sender_oid),
        receiver_oid = escape_xml(&record.receiver_oid),
        message_id = escape_xml(message_id),
        creation_time = creation_time,
        authority_oid = escape_xml(&record.assigning_authority_oid),
        patient_id = escape_xml(&record.patient_id),
        family = escape_xml(&record.family_name),
        given = escape_xml(&record.given_name),
        gender = escape_xml(&record.gender_code),
        birth_date = escape_xml(&record.birth_date),
    ))
}

/* ITI-41 */

/// One document submission. The document content travels as an MTOM
/// attachment; the SOAP body only carries an `xop:Include` reference.
#[derive(Debug, Clone)]
pub struct Iti41Transaction {
    pub submission_set_id: String,
    pub document_unique_id: String,
    pub patient_id: String,
    pub source_oid: String,
    pub document: Vec<u8>,
    pub document_content_type: String,
}

impl Iti41Transaction {
    pub fn new(
        patient_id: &str,
        source_oid: &str,
        document: Vec<u8>,
        document_content_type: &str,
    ) -> Self {
        Self {
            submission_set_id: format!("{}.{}", source_oid, random_token(12)),
            document_unique_id: format!("{}.{}", source_oid, random_token(12)),
            patient_id: patient_id.to_owned(),
            source_oid: source_oid.to_owned(),
            document,
            document_content_type: document_content_type.to_owned(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.document.is_empty() {
            return Err(Error::validation("Document content must not be empty"));
        }

        for (name, value) in &[
            ("submission_set_id", &self.submission_set_id),
            ("document_unique_id", &self.document_unique_id),
            ("patient_id", &self.patient_id),
            ("source_oid", &self.source_oid),
            ("document_content_type", &self.document_content_type),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!(
                    "Iti41Transaction field {} must not be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Builds the `ProvideAndRegisterDocumentSetRequest` body. The
/// document element references the attachment by its content id.
pub fn build_iti41_body(transaction: &Iti41Transaction, content_id: &str) -> Result<String, Error> {
    transaction.validate()?;

    let submission_time = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let patient_id = escape_xml(&transaction.patient_id);

    Ok(format!(
        concat!(
            r#"<xdsb:ProvideAndRegisterDocumentSetRequest xmlns:xdsb="{ns_xdsb}" xmlns:lcm="{ns_lcm}" xmlns:rim="{ns_rim}">"#,
            "<lcm:SubmitObjectsRequest>",
            "<rim:RegistryObjectList>",
            r#"<rim:ExtrinsicObject id="Document01" mimeType="{mime}" objectType="urn:uuid:7edca82f-054d-47f2-a032-9b2a5b5186c1">"#,
            r#"<rim:Slot name="creationTime">"#,
            "<rim:ValueList><rim:Value>{time}</rim:Value></rim:ValueList>",
            "</rim:Slot>",
            r#"<rim:Slot name="sourcePatientId">"#,
            "<rim:ValueList><rim:Value>{patient_id}</rim:Value></rim:ValueList>",
            "</rim:Slot>",
            r#"<rim:ExternalIdentifier identificationScheme="urn:uuid:58a6f841-87b3-4a3e-92fd-a8ffeff98427" value="{patient_id}" registryObject="Document01"/>"#,
            r#"<rim:ExternalIdentifier identificationScheme="urn:uuid:2e82c1f6-a085-4c72-9da3-8640a32e42ab" value="{doc_uid}" registryObject="Document01"/>"#,
            "</rim:ExtrinsicObject>",
            r#"<rim:RegistryPackage id="SubmissionSet01">"#,
            r#"<rim:Slot name="submissionTime">"#,
            "<rim:ValueList><rim:Value>{time}</rim:Value></rim:ValueList>",
            "</rim:Slot>",
            r#"<rim:ExternalIdentifier identificationScheme="urn:uuid:96fdda7c-d067-4183-912e-bf5ee74998a8" value="{sset_id}" registryObject="SubmissionSet01"/>"#,
            r#"<rim:ExternalIdentifier identificationScheme="urn:uuid:6b5aea1a-874d-4603-a4bc-96a0a7b38446" value="{patient_id}" registryObject="SubmissionSet01"/>"#,
            r#"<rim:ExternalIdentifier identificationScheme="urn:uuid:554ac39e-e3fe-47fe-b233-965d2a147832" value="{source_oid}" registryObject="SubmissionSet01"/>"#,
            "</rim:RegistryPackage>",
            r#"<rim:Association associationType="urn:oasis:names:tc:ebxml-regrep:AssociationType:HasMember" sourceObject="SubmissionSet01" targetObject="Document01" id="Association01">"#,
            r#"<rim:Slot name="SubmissionSetStatus">"#,
            "<rim:ValueList><rim:Value>Original</rim:Value></rim:ValueList>",
            "</rim:Slot>",
            "</rim:Association>",
            "</rim:RegistryObjectList>",
            "</lcm:SubmitObjectsRequest>",
            r#"<xdsb:Document id="Document01">"#,
            r#"<xop:Include xmlns:xop="{ns_xop}" href="cid:{content_id}"/>"#,
            "</xdsb:Document>",
            "</xdsb:ProvideAndRegisterDocumentSetRequest>"
        ),
        ns_xdsb = NS_XDS_B,
        ns_lcm = NS_EBXML_LCM,
        ns_rim = NS_EBXML_RIM,
        ns_xop = NS_XOP,
        mime = escape_xml(&transaction.document_content_type),
        time = submission_time,
        patient_id = patient_id,
        doc_uid = escape_xml(&transaction.document_unique_id),
        sset_id = escape_xml(&transaction.submission_set_id),
        source_oid = escape_xml(&transaction.source_oid),
        content_id = escape_xml(content_id),
    ))
}
