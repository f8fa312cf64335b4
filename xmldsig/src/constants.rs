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

pub const NAMESPACE_HREF: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const NODE_SIGNATURE: &str = "Signature";
pub const NODE_SIGNED_INFO: &str = "SignedInfo";
pub const NODE_SIGNATURE_VALUE: &str = "SignatureValue";
pub const NODE_KEY_INFO: &str = "KeyInfo";
pub const NODE_CANONICALIZATION_METHOD: &str = "CanonicalizationMethod";
pub const NODE_SIGNATURE_METHOD: &str = "SignatureMethod";
pub const NODE_REFERENCE: &str = "Reference";
pub const NODE_TRANSFORMS: &str = "Transforms";
pub const NODE_TRANSFORM: &str = "Transform";
pub const NODE_DIGEST_METHOD: &str = "DigestMethod";
pub const NODE_DIGEST_VALUE: &str = "DigestValue";
pub const NODE_X509_DATA: &str = "X509Data";
pub const NODE_X509_CERTIFICATE: &str = "X509Certificate";

pub const PROP_ALGORITHM: &str = "Algorithm";

pub const TRANSFORM_C14N_1_0_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const TRANSFORM_ENVELOPED_SIGNATURE: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const SIGNATURE_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
