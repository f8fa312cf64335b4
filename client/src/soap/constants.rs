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

use mime::Mime;

pub const NS_SOAP_11: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const NS_SOAP_12: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_WSA: &str = "http://www.w3.org/2005/08/addressing";
pub const NS_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const NS_WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const NS_SAML: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const NS_XOP: &str = "http://www.w3.org/2004/08/xop/include";
pub const NS_XDS_B: &str = "urn:ihe:iti:xds-b:2007";
pub const NS_EBXML_RIM: &str = "urn:oasis:names:tc:ebxml-regrep:xsd:rim:3.0";
pub const NS_EBXML_LCM: &str = "urn:oasis:names:tc:ebxml-regrep:xsd:lcm:3.0";
pub const NS_EBXML_RS: &str = "urn:oasis:names:tc:ebxml-regrep:xsd:rs:3.0";
pub const NS_HL7_V3: &str = "urn:hl7-org:v3";

pub const WSA_ANONYMOUS: &str = "http://www.w3.org/2005/08/addressing/anonymous";

pub const ACTION_PIX_ADD: &str = "urn:hl7-org:v3:PRPA_IN201301UV02";
pub const ACTION_ITI_41: &str = "urn:ihe:iti:2007:ProvideAndRegisterDocumentSet-b";

pub const SAML_NAMEID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
pub const SAML_CONFIRMATION_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
pub const SAML_AUTHN_CONTEXT_X509: &str = "urn:oasis:names:tc:SAML:2.0:ac:classes:X509";

pub const XDS_STATUS_SUCCESS: &str = "urn:oasis:names:tc:ebxml-regrep:ResponseStatusType:Success";
pub const XDS_STATUS_FAILURE: &str = "urn:oasis:names:tc:ebxml-regrep:ResponseStatusType:Failure";
pub const XDS_STATUS_PARTIAL_SUCCESS: &str = "urn:ihe:iti:2007:ResponseStatusType:PartialSuccess";

pub const XDS_SEVERITY_ERROR: &str = "urn:oasis:names:tc:ebxml-regrep:ErrorSeverityType:Error";
pub const XDS_SEVERITY_WARNING: &str = "urn:oasis:names:tc:ebxml-regrep:ErrorSeverityType:Warning";

lazy_static! {
    pub static ref MIME_SOAP_XML: Mime = "application/soap+xml".parse().unwrap();
    pub static ref MIME_XOP_XML: Mime = "application/xop+xml".parse().unwrap();
    pub static ref MIME_MULTIPART_RELATED: Mime = "multipart/related".parse().unwrap();
}
