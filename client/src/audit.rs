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

use std::str::from_utf8;

use log::info;
use rand::random;

use crate::response::TransactionType;

/// Receives one record per transport attempt, including failed ones.
/// The transport client calls this before it returns or raises.
pub trait AuditSink: Send + Sync {
    fn log_transaction(
        &self,
        transaction_type: TransactionType,
        request: &[u8],
        response: Option<&[u8]>,
        duration_ms: u128,
        status: &str,
    );
}

/// Default sink that writes complete request and response bodies to the
/// `req_res_log` target.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn log_transaction(
        &self,
        transaction_type: TransactionType,
        request: &[u8],
        response: Option<&[u8]>,
        duration_ms: u128,
        status: &str,
    ) {
        let tag = random::<usize>();

        info!(
            target: "req_res_log",
            "REQ{} - {} ({} bytes)", &tag, transaction_type, request.len()
        );
        if let Ok(request) = from_utf8(request) {
            info!(target: "req_res_log", "REQ{} - {}", &tag, request);
        }

        match response {
            Some(response) => {
                info!(
                    target: "req_res_log",
                    "RES{} - {} after {}ms ({} bytes)", &tag, status, duration_ms, response.len()
                );
                if let Ok(response) = from_utf8(response) {
                    info!(target: "req_res_log", "RES{} - {}", &tag, response);
                }
            }
            None => {
                info!(
                    target: "req_res_log",
                    "RES{} - {} after {}ms (no response received)", &tag, status, duration_ms
                );
            }
        }
    }
}
