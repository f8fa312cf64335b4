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

use std::collections::HashMap;
use std::fs::{metadata, read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use log::debug;
use openssl::{
    pkey::{PKey, Private},
    x509::{X509NameRef, X509},
};

use crate::error::Error;

/* CertificateInfo */

#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: String,
    pub not_after: String,
    pub serial: String,
    pub key_bits: u32,
}

impl CertificateInfo {
    pub fn from_cert(cert: &X509) -> Result<Self, Error> {
        let serial = cert.serial_number().to_bn()?.to_hex_str()?.to_string();
        let key_bits = cert.public_key()?.bits();

        Ok(Self {
            subject: format_name(cert.subject_name()),
            issuer: format_name(cert.issuer_name()),
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
            serial,
            key_bits,
        })
    }
}

/* CertificateBundle */

/// Decoded certificate material consumed by the SAML engine. The
/// protocol engine never reads certificate files itself; bundles are
/// supplied by a [`CertificateProvider`].
pub struct CertificateBundle {
    pub certificate: X509,
    pub private_key: PKey<Private>,
    pub chain: Vec<X509>,
    pub info: CertificateInfo,
}

impl CertificateBundle {
    pub fn new(
        certificate: X509,
        private_key: PKey<Private>,
        chain: Vec<X509>,
    ) -> Result<Self, Error> {
        let info = CertificateInfo::from_cert(&certificate)?;

        Ok(Self {
            certificate,
            private_key,
            chain,
            info,
        })
    }

    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, Error> {
        let certs = X509::stack_from_pem(&read(cert_path)?)?;
        let key = PKey::private_key_from_pem(&read(key_path)?)?;

        let mut certs = certs.into_iter();
        let certificate = certs.next().ok_or_else(|| {
            Error::validation(format!(
                "Certificate file '{}' contains no certificate",
                cert_path.display()
            ))
        })?;

        Self::new(certificate, key, certs.collect())
    }
}

/* CertificateProvider */

pub trait CertificateProvider: Send + Sync {
    fn bundle(&self, cert_path: &Path, key_path: &Path) -> Result<Arc<CertificateBundle>, Error>;
}

/// Explicit cache keyed by path and file modification time. A changed
/// file on disk invalidates the entry on the next lookup.
#[derive(Default)]
pub struct CertificateCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

struct CacheEntry {
    cert_mtime: SystemTime,
    key_mtime: SystemTime,
    bundle: Arc<CertificateBundle>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self, cert_path: &Path) {
        self.entries.lock().unwrap().remove(cert_path);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl CertificateProvider for CertificateCache {
    fn bundle(&self, cert_path: &Path, key_path: &Path) -> Result<Arc<CertificateBundle>, Error> {
        let cert_mtime = metadata(cert_path)?.modified()?;
        let key_mtime = metadata(key_path)?.modified()?;

        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(cert_path) {
            if entry.cert_mtime == cert_mtime && entry.key_mtime == key_mtime {
                return Ok(entry.bundle.clone());
            }

            debug!(
                "Certificate '{}' changed on disk, reloading",
                cert_path.display()
            );
        }

        let bundle = Arc::new(CertificateBundle::from_pem_files(cert_path, key_path)?);

        entries.insert(
            cert_path.to_owned(),
            CacheEntry {
                cert_mtime,
                key_mtime,
                bundle: bundle.clone(),
            },
        );

        Ok(bundle)
    }
}

fn format_name(name: &X509NameRef) -> String {
    let mut parts = Vec::new();

    for entry in name.entries() {
        let key = entry
            .object()
            .nid()
            .short_name()
            .unwrap_or("UNKNOWN")
            .to_owned();
        let value = match entry.data().as_utf8() {
            Ok(value) => value.to_string(),
            Err(_) => continue,
        };

        parts.push(format!("{}={}", key, value));
    }

    parts.join(", ")
}
