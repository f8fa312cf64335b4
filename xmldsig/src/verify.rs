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
    pkey::{PKey, Public},
    sign::Verifier,
    x509::{X509Ref, X509},
};

use crate::{canonicalize, constants::*, Element, Error};

pub struct VerifiedSignature {
    pub reference_id: String,
    pub certificate: Option<X509>,
}

macro_rules! read_xml {
    // Move on to the first child element
    ( begin $node:expr ) => {{
        $node.child_elements().peekable()
    }};

    // Check if no siblings are left
    ( end $iter:expr ) => {{
        if let Some(node) = $iter.next() {
            return Err(Error::InvalidSignatureNode(format!(
                "Expected end but found element '{}'",
                node.name()
            )));
        }
    }};

    // Check if the passed node has the correct name and namespace
    ( check $node:expr, $name:expr, $ns:expr ) => {{
        if $node.name() != $name {
            return Err(Error::InvalidSignatureNode(format!(
                "Expected element '{}' but found '{}'",
                $name,
                $node.name()
            )));
        }

        let ns = $node.ns_href().ok_or_else(|| {
            Error::InvalidSignatureNode(format!("Unable to get namespace for '{}'", $name))
        })?;
        if ns != $ns {
            return Err(Error::InvalidSignatureNode(format!(
                "Expected namespace '{}' but found '{}' for element '{}'",
                $ns, ns, $name
            )));
        }
    }};

    // Move on to the next sibling and check name and namespace
    ( next $iter:expr, $name:expr, $ns:expr ) => {{
        let node = $iter.next().ok_or_else(|| {
            Error::InvalidSignatureNode(format!("Expected element '{}' but found end", $name))
        })?;

        read_xml!(check node, $name, $ns);

        node
    }};

    // Move on to the next sibling if it has the given name
    ( next_opt $iter:expr, $name:expr, $ns:expr ) => {{
        match $iter.peek() {
            Some(node) if node.name() == $name => {
                let node = $iter.next().unwrap();

                read_xml!(check node, $name, $ns);

                Some(node)
            }
            _ => None,
        }
    }};

    // Stores all siblings with the given name to a vector
    ( next_vec $iter:expr, $name:expr, $ns:expr ) => {{
        let mut ret = Vec::new();

        while let Some(node) = read_xml!(next_opt $iter, $name, $ns) {
            ret.push(node);
        }

        ret
    }};
}

/// Verifies the enveloped signature found below `root`.
///
/// The reference digest is checked before the signature value, so a
/// tampered document reports `InvalidDigestValue` rather than a bare
/// signature failure. The verification key is taken from `cert` when
/// given, otherwise from the embedded `X509Certificate`.
pub fn verify_enveloped(
    root: &Element,
    cert: Option<&X509Ref>,
) -> Result<VerifiedSignature, Error> {
    let signature = root
        .find_element(NODE_SIGNATURE, NAMESPACE_HREF)
        .ok_or(Error::SignatureNodeNotFound)?;

    let mut iter = read_xml!(begin signature);
    let signed_info = read_xml!(next iter, NODE_SIGNED_INFO, NAMESPACE_HREF);
    let signature_value = read_xml!(next iter, NODE_SIGNATURE_VALUE, NAMESPACE_HREF);
    let key_info = read_xml!(next_opt iter, NODE_KEY_INFO, NAMESPACE_HREF);
    read_xml!(end iter);

    let mut iter = read_xml!(begin signed_info);
    let c14n_method = read_xml!(next iter, NODE_CANONICALIZATION_METHOD, NAMESPACE_HREF);
    let signature_method = read_xml!(next iter, NODE_SIGNATURE_METHOD, NAMESPACE_HREF);
    let references = read_xml!(next_vec iter, NODE_REFERENCE, NAMESPACE_HREF);
    read_xml!(end iter);

    match algorithm(c14n_method)? {
        TRANSFORM_C14N_1_0_EXCLUSIVE => (),
        x => return Err(Error::UnknownCanonizationMethod(x.into())),
    }

    match algorithm(signature_method)? {
        SIGNATURE_RSA_SHA256 => (),
        x => return Err(Error::UnknownSignatureMethod(x.into())),
    }

    let reference = match references.as_slice() {
        [reference] => *reference,
        [] => {
            return Err(Error::InvalidSignatureNode(format!(
                "Node '{}' is empty",
                NODE_REFERENCE
            )))
        }
        _ => {
            return Err(Error::InvalidSignatureNode(format!(
                "Multiple '{}' nodes are not supported",
                NODE_REFERENCE
            )))
        }
    };

    let reference_id = process_reference(root, signature, reference)?;

    let embedded_cert = match key_info {
        Some(key_info) => Some(process_key_info(key_info)?),
        None => None,
    };

    let key = match (cert, &embedded_cert) {
        (Some(cert), _) => cert.public_key()?,
        (None, Some(cert)) => cert.public_key()?,
        (None, None) => return Err(Error::NoKey),
    };

    check_signature_value(signed_info, signature_value, &key)?;

    Ok(VerifiedSignature {
        reference_id,
        certificate: embedded_cert,
    })
}

fn process_reference(
    root: &Element,
    signature: &Element,
    reference: &Element,
) -> Result<String, Error> {
    let uri = reference.attr("URI").ok_or_else(|| {
        Error::InvalidSignatureNode(format!(
            "Node '{}' is missing the 'URI' property",
            NODE_REFERENCE
        ))
    })?;

    let mut iter = read_xml!(begin reference);
    let transforms = read_xml!(next iter, NODE_TRANSFORMS, NAMESPACE_HREF);
    let digest_method = read_xml!(next iter, NODE_DIGEST_METHOD, NAMESPACE_HREF);
    let digest_value = read_xml!(next iter, NODE_DIGEST_VALUE, NAMESPACE_HREF);
    read_xml!(end iter);

    let mut iter = read_xml!(begin transforms);
    let transforms = read_xml!(next_vec iter, NODE_TRANSFORM, NAMESPACE_HREF);
    read_xml!(end iter);

    let mut is_enveloped = false;
    for transform in transforms {
        match algorithm(transform)? {
            TRANSFORM_ENVELOPED_SIGNATURE => is_enveloped = true,
            TRANSFORM_C14N_1_0_EXCLUSIVE => (),
            x => return Err(Error::UnknownTransformation(x.into())),
        }
    }

    if !is_enveloped {
        return Err(Error::InvalidSignatureNode(
            "Missing enveloped-signature transform".into(),
        ));
    }

    match algorithm(digest_method)? {
        DIGEST_SHA256 => (),
        x => return Err(Error::UnknownDigestMethod(x.into())),
    }

    let reference_id = uri.trim_start_matches('#').to_owned();
    let referenced = if reference_id.is_empty() {
        root
    } else {
        root.find_by_id(&reference_id)
            .ok_or_else(|| Error::ReferenceNotFound(reference_id.clone()))?
    };

    let actual = openssl::hash::hash(
        MessageDigest::sha256(),
        &canonicalize(referenced, Some(signature)),
    )?;
    let actual = base64::encode(&actual);
    let expected = collapse_whitespace(&digest_value.text());

    if actual != expected {
        return Err(Error::InvalidDigestValue { actual, expected });
    }

    Ok(reference_id)
}

fn process_key_info(key_info: &Element) -> Result<X509, Error> {
    let x509_data = key_info
        .find_element(NODE_X509_DATA, NAMESPACE_HREF)
        .ok_or_else(|| {
            Error::InvalidSignatureNode(format!("Node '{}' is missing", NODE_X509_DATA))
        })?;

    let mut iter = read_xml!(begin x509_data);
    let node_cert = read_xml!(next iter, NODE_X509_CERTIFICATE, NAMESPACE_HREF);
    read_xml!(end iter);

    let cert = node_cert.text();
    let cert = cert.trim();
    if cert.is_empty() {
        return Err(Error::InvalidSignatureNode(format!(
            "Node '{}' is missing the certificate content",
            NODE_X509_CERTIFICATE
        )));
    }

    let cert = format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
        cert
    );
    let cert = X509::from_pem(cert.as_bytes())?;

    Ok(cert)
}

fn check_signature_value(
    signed_info: &Element,
    signature_value: &Element,
    key: &PKey<Public>,
) -> Result<(), Error> {
    let signature = base64::decode(&collapse_whitespace(&signature_value.text()))?;

    let mut verifier = Verifier::new(MessageDigest::sha256(), key)?;
    verifier.update(&canonicalize(signed_info, None))?;

    if !verifier.verify(&signature)? {
        return Err(Error::InvalidSignatureValue);
    }

    Ok(())
}

fn algorithm(node: &Element) -> Result<&str, Error> {
    node.attr(PROP_ALGORITHM).ok_or_else(|| {
        Error::InvalidSignatureNode(format!(
            "Node '{}' is missing the '{}' property",
            node.name(),
            PROP_ALGORITHM
        ))
    })
}

fn collapse_whitespace(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect()
}
