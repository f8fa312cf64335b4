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

use std::io::Error as IoError;

use log::SetLoggerError;
use log4rs::config::Errors as Log4RsError;
use openssl::error::ErrorStack as OpenSslError;
use quick_xml::Error as XmlError;
use reqwest::Error as HttpError;
use thiserror::Error;
use xmldsig::Error as DsigError;

use crate::{soap::mtom::Error as MtomError, transport::Error as TransportError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Generic Error: {0}")]
    Generic(String),

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("IO Error: {0}")]
    IoError(IoError),

    #[error("OpenSSL Error: {0}")]
    OpenSslError(OpenSslError),

    #[error("XML Error: {0}")]
    XmlError(XmlError),

    #[error("XML Signature Error: {0}")]
    DsigError(DsigError),

    #[error("MTOM Error: {0}")]
    MtomError(MtomError),

    #[error("Transport Error: {0}")]
    TransportError(TransportError),

    #[error("HTTP Error: {0}")]
    HttpError(HttpError),

    #[error("Unable to set logger: {0}")]
    SetLoggerError(SetLoggerError),

    #[error("Unable to setup log4rs: {0}")]
    Log4RsError(Log4RsError),
}

impl Error {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<String> for Error {
    fn from(v: String) -> Self {
        Self::Generic(v)
    }
}

impl From<IoError> for Error {
    fn from(v: IoError) -> Self {
        Self::IoError(v)
    }
}

impl From<OpenSslError> for Error {
    fn from(v: OpenSslError) -> Self {
        Self::OpenSslError(v)
    }
}

impl From<XmlError> for Error {
    fn from(v: XmlError) -> Self {
        Self::XmlError(v)
    }
}

impl From<DsigError> for Error {
    fn from(v: DsigError) -> Self {
        Self::DsigError(v)
    }
}

impl From<MtomError> for Error {
    fn from(v: MtomError) -> Self {
        Self::MtomError(v)
    }
}

impl From<TransportError> for Error {
    fn from(v: TransportError) -> Self {
        Self::TransportError(v)
    }
}

impl From<HttpError> for Error {
    fn from(v: HttpError) -> Self {
        Self::HttpError(v)
    }
}

impl From<SetLoggerError> for Error {
    fn from(v: SetLoggerError) -> Self {
        Self::SetLoggerError(v)
    }
}

impl From<Log4RsError> for Error {
    fn from(v: Log4RsError) -> Self {
        Self::Log4RsError(v)
    }
}
