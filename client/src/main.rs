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

use std::fs::read;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use log::{error, info};
use structopt::StructOpt;
use url::Url;

use ihe_xds_client::{
    audit::LogAuditSink,
    cert::{CertificateCache, CertificateProvider},
    classify::{classify, ErrorCategory},
    error::Error,
    logging::init_logger,
    messages::{build_pix_add, Iti41Transaction, PatientRecord},
    misc,
    response::TransactionResponse,
    saml,
    service::{ServiceConfig, TransactionService},
    transport::TransportConfig,
};

fn main() {
    let opts = Options::from_args();

    if let Err(err) = init_logger(&opts.log_config) {
        eprintln!("Unable to initialize logging: {}", err);

        exit(3);
    }

    match run(&opts) {
        Ok(response) if response.is_success() => exit(0),
        Ok(response) => {
            for msg in &response.error_messages {
                error!("{}: {}", response.status_code, msg);
            }

            exit(1);
        }
        Err(err) => {
            let info = classify(&err);

            error!("[{}] {}", info.category, err);
            error!("Remediation: {}", info.remediation);

            match info.category {
                ErrorCategory::Transient => exit(2),
                ErrorCategory::Critical => exit(3),
                ErrorCategory::Permanent => exit(1),
            }
        }
    }
}

fn run(opts: &Options) -> Result<TransactionResponse, Error> {
    let cache = CertificateCache::new();
    let bundle = cache.bundle(&opts.cert, &opts.key)?;

    info!(
        "Signing with {} (valid until {})",
        bundle.info.subject, bundle.info.not_after
    );

    let assertion = saml::generate(
        &opts.subject,
        &opts.issuer,
        &opts.audience,
        &[],
        opts.assertion_validity,
    )?;
    let assertion = saml::sign(&assertion, &bundle)?;

    let service = TransactionService::new(
        ServiceConfig {
            pix_endpoint: endpoint_config(opts, opts.pix_endpoint.clone()),
            xds_endpoint: endpoint_config(opts, opts.xds_endpoint.clone()),
            timestamp_validity_minutes: opts.assertion_validity,
        },
        Arc::new(LogAuditSink),
    )?;

    let response = match &opts.command {
        Command::PixAdd {
            patient_id,
            authority_oid,
            family_name,
            given_name,
            birth_date,
            gender,
            sender_oid,
            receiver_oid,
        } => {
            let record = PatientRecord {
                patient_id: patient_id.clone(),
                assigning_authority_oid: authority_oid.clone(),
                family_name: family_name.clone(),
                given_name: given_name.clone(),
                birth_date: birth_date.clone(),
                gender_code: gender.clone(),
                sender_oid: sender_oid.clone(),
                receiver_oid: receiver_oid.clone(),
            };
            let message = build_pix_add(&record, &misc::random_token(16))?;

            service.submit_pix_add(&message, &assertion)?
        }
        Command::Iti41 {
            patient_id,
            source_oid,
            document,
            content_type,
        } => {
            let content = read(document)?;
            let transaction =
                Iti41Transaction::new(patient_id, source_oid, content, content_type);

            service.submit_iti41(&transaction, &assertion)?
        }
    };

    info!(
        "Transaction {} finished with status code {} in {} ms",
        response.transaction_type, response.status_code, response.processing_time_ms
    );

    for (key, value) in &response.extracted_identifiers {
        info!("  {} = {}", key, value);
    }

    Ok(response)
}

fn endpoint_config(opts: &Options, endpoint: Url) -> TransportConfig {
    let mut config = TransportConfig::new(endpoint);
    config.connect_timeout_secs = opts.connect_timeout;
    config.read_timeout_secs = opts.read_timeout;
    config.max_retries = opts.max_retries;
    config.allow_insecure_http = opts.allow_insecure_http;

    config
}

#[derive(Clone, StructOpt)]
struct Options {
    /// PIX manager endpoint URL.
    #[structopt(long = "pix-endpoint")]
    pix_endpoint: Url,

    /// XDS repository endpoint URL.
    #[structopt(long = "xds-endpoint")]
    xds_endpoint: Url,

    /// Signing certificate (PEM, leaf first).
    #[structopt(short = "t", long = "cert")]
    cert: PathBuf,

    /// Private key for the signing certificate (PEM).
    #[structopt(short = "k", long = "key")]
    key: PathBuf,

    #[structopt(long = "issuer", default_value = "urn:ihe-xds-client")]
    issuer: String,

    #[structopt(long = "subject")]
    subject: String,

    #[structopt(long = "audience")]
    audience: String,

    /// Assertion and security timestamp validity in minutes.
    #[structopt(long = "assertion-validity", default_value = "5")]
    assertion_validity: i64,

    #[structopt(long = "connect-timeout", default_value = "10")]
    connect_timeout: u64,

    #[structopt(long = "read-timeout", default_value = "60")]
    read_timeout: u64,

    /// Total number of delivery attempts per request.
    #[structopt(long = "max-retries", default_value = "3")]
    max_retries: usize,

    /// Permit plain HTTP endpoints. Intended for test fixtures only.
    #[structopt(long = "allow-insecure-http")]
    allow_insecure_http: bool,

    #[structopt(short = "c", long = "config", default_value = "./log4rs.yml")]
    log_config: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Clone, StructOpt)]
enum Command {
    /// Register a patient with the PIX manager (ITI-44).
    PixAdd {
        #[structopt(long = "patient-id")]
        patient_id: String,

        #[structopt(long = "authority-oid")]
        authority_oid: String,

        #[structopt(long = "family-name")]
        family_name: String,

        #[structopt(long = "given-name", default_value = "")]
        given_name: String,

        /// Birth date as YYYYMMDD.
        #[structopt(long = "birth-date", default_value = "")]
        birth_date: String,

        /// HL7 administrative gender code (F, M, UN).
        #[structopt(long = "gender", default_value = "UN")]
        gender: String,

        #[structopt(long = "sender-oid")]
        sender_oid: String,

        #[structopt(long = "receiver-oid")]
        receiver_oid: String,
    },

    /// Submit a document to the XDS repository (ITI-41).
    Iti41 {
        /// Patient identifier in CX form, e.g. `id^^^&oid&ISO`.
        #[structopt(long = "patient-id")]
        patient_id: String,

        #[structopt(long = "source-oid")]
        source_oid: String,

        /// Path of the document file to submit.
        #[structopt(short = "d", long = "document")]
        document: PathBuf,

        #[structopt(long = "content-type", default_value = "application/pdf")]
        content_type: String,
    },
}
