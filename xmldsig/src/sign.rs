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

use openssl::{
    hash::MessageDigest,
    pkey::{PKeyRef, Private},
    sign::Signer,
    x509::X509Ref,
};

use crate::{canonicalize, constants::*, Element, Error};

/// Creates an enveloped RSA-SHA256 signature over the element carrying
/// `reference_id` and inserts the `Signature` element at the given child
/// element position of `root`. Returns the serialized signature block.
///
/// Any pre-existing signature on `root` is replaced.
pub fn sign_enveloped(
    root: &mut Element,
    reference_id: &str,
    position: usize,
    key: &PKeyRef<Private>,
    cert: &X509Ref,
) -> Result<String, Error> {
    let id_matches = root
        .attr("ID")
        .or_else(|| root.attr("Id"))
        .map(|id| id == reference_id)
        .unwrap_or(false);

    if !id_matches {
        return Err(Error::ReferenceNotFound(reference_id.into()));
    }

    root.remove_children(NODE_SIGNATURE, NAMESPACE_HREF);

    let digest = openssl::hash::hash(MessageDigest::sha256(), &canonicalize(root, None))?;
    let digest = base64::encode(&digest);

    let signed_info = build_signed_info(reference_id, &digest);

    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(&canonicalize(&signed_info, None))?;

    let signature_value = base64::encode(&signer.sign_to_vec()?);
    let certificate = base64::encode(&cert.to_der()?);

    let signature = build_signature(signed_info, &signature_value, &certificate);
    let serialized = signature.to_string();

    root.insert_child(position, signature);

    Ok(serialized)
}

fn build_signed_info(reference_id: &str, digest: &str) -> Element {
    let mut signed_info = Element::new(NODE_SIGNED_INFO);
    signed_info.set_attr("xmlns", NAMESPACE_HREF);

    let mut c14n_method = Element::new(NODE_CANONICALIZATION_METHOD);
    c14n_method.set_ns_href(NAMESPACE_HREF);
    c14n_method.set_attr(PROP_ALGORITHM, TRANSFORM_C14N_1_0_EXCLUSIVE);
    signed_info.add_child(c14n_method);

    let mut signature_method = Element::new(NODE_SIGNATURE_METHOD);
    signature_method.set_ns_href(NAMESPACE_HREF);
    signature_method.set_attr(PROP_ALGORITHM, SIGNATURE_RSA_SHA256);
    signed_info.add_child(signature_method);

    let mut reference = Element::new(NODE_REFERENCE);
    reference.set_ns_href(NAMESPACE_HREF);
    reference.set_attr("URI", &format!("#{}", reference_id));

    let mut transforms = Element::new(NODE_TRANSFORMS);
    transforms.set_ns_href(NAMESPACE_HREF);

    let mut enveloped = Element::new(NODE_TRANSFORM);
    enveloped.set_ns_href(NAMESPACE_HREF);
    enveloped.set_attr(PROP_ALGORITHM, TRANSFORM_ENVELOPED_SIGNATURE);
    transforms.add_child(enveloped);

    let mut c14n = Element::new(NODE_TRANSFORM);
    c14n.set_ns_href(NAMESPACE_HREF);
    c14n.set_attr(PROP_ALGORITHM, TRANSFORM_C14N_1_0_EXCLUSIVE);
    transforms.add_child(c14n);

    reference.add_child(transforms);

    let mut digest_method = Element::new(NODE_DIGEST_METHOD);
    digest_method.set_ns_href(NAMESPACE_HREF);
    digest_method.set_attr(PROP_ALGORITHM, DIGEST_SHA256);
    reference.add_child(digest_method);

    let mut digest_value = Element::new(NODE_DIGEST_VALUE);
    digest_value.set_ns_href(NAMESPACE_HREF);
    digest_value.add_text(digest);
    reference.add_child(digest_value);

    signed_info.add_child(reference);

    signed_info
}

fn build_signature(signed_info: Element, signature_value: &str, certificate: &str) -> Element {
    let mut signature = Element::new(NODE_SIGNATURE);
    signature.set_attr("xmlns", NAMESPACE_HREF);
    signature.add_child(signed_info);

    let mut value = Element::new(NODE_SIGNATURE_VALUE);
    value.set_ns_href(NAMESPACE_HREF);
    value.add_text(signature_value);
    signature.add_child(value);

    let mut x509_certificate = Element::new(NODE_X509_CERTIFICATE);
    x509_certificate.set_ns_href(NAMESPACE_HREF);
    x509_certificate.add_text(certificate);

    let mut x509_data = Element::new(NODE_X509_DATA);
    x509_data.set_ns_href(NAMESPACE_HREF);
    x509_data.add_child(x509_certificate);

    let mut key_info = Element::new(NODE_KEY_INFO);
    key_info.set_ns_href(NAMESPACE_HREF);
    key_info.add_child(x509_data);

    signature.add_child(key_info);

    signature
}
