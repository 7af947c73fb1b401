//! Certificate operations and X.509 certificate management
//!
//! This module provides certificate parsing for the identity issued by the
//! Nebulo clients CA and PKCS#10 certificate signing requests used at
//! registration time.

use std::path::Path;

use rcgen::{Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType};
use rustls_pki_types::CertificateDer;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::oid_registry::{Oid, OID_PKCS1_SHA256WITHRSA, OID_PKCS1_SHA512WITHRSA};
use x509_parser::prelude::*;

use crate::error::{KeyError, Result};
use crate::keys::IdentityKey;

/// Standard X.509 certificate wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509Certificate {
    /// DER-encoded certificate bytes
    der_bytes: Vec<u8>,
    /// Certificate subject
    subject: String,
    /// Certificate issuer
    issuer: String,
}

impl X509Certificate {
    /// Create from DER-encoded bytes
    pub fn from_der(der_bytes: Vec<u8>) -> Result<Self> {
        let (_, parsed_cert) = x509_parser::certificate::X509Certificate::from_der(&der_bytes)
            .map_err(|e| {
                KeyError::CertificateError(format!("Failed to parse certificate: {e}"))
            })?;

        let subject = parsed_cert.subject().to_string();
        let issuer = parsed_cert.issuer().to_string();

        Ok(Self {
            der_bytes,
            subject,
            issuer,
        })
    }

    /// Parse the first certificate of a PEM bundle
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        certificates_from_pem(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| KeyError::CertificateError("no certificate in PEM data".to_string()))
    }

    /// Read the first certificate of a PEM file
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path).map_err(|e| KeyError::file_read(path, e))?;
        Self::from_pem(&pem)
    }

    /// Get DER-encoded bytes
    pub fn der_bytes(&self) -> &[u8] {
        &self.der_bytes
    }

    /// Get certificate subject
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Get certificate issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Convert to rustls certificate format
    pub fn to_rustls_certificate(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.der_bytes.clone())
    }

    /// Parse the certificate for inspection
    pub fn parsed(&self) -> Result<x509_parser::certificate::X509Certificate<'_>> {
        let (_, cert) = x509_parser::certificate::X509Certificate::from_der(&self.der_bytes)
            .map_err(|e| {
                KeyError::CertificateError(format!("Failed to parse certificate: {e}"))
            })?;
        Ok(cert)
    }

    /// Subject common name, if present
    pub fn common_name(&self) -> Result<Option<String>> {
        let parsed = self.parsed()?;
        let common_name = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        Ok(common_name)
    }

    /// Raw big-endian serial number
    pub fn serial(&self) -> Result<Vec<u8>> {
        Ok(self.parsed()?.raw_serial().to_vec())
    }

    /// DER `SubjectPublicKeyInfo` of the certified key
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.parsed()?.public_key().raw.to_vec())
    }

    /// Whether the certificate certifies the public half of `key`
    pub fn matches_key(&self, key: &IdentityKey) -> Result<bool> {
        Ok(self.public_key_der()? == key.public_key().der())
    }

    /// Whether the current time falls inside the validity window
    pub fn is_currently_valid(&self) -> Result<bool> {
        Ok(self.parsed()?.validity().is_valid())
    }
}

/// Parse every `CERTIFICATE` block of a PEM bundle
pub fn certificates_from_pem(pem: &[u8]) -> Result<Vec<X509Certificate>> {
    let mut reader = pem;
    let ders = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| KeyError::CertificateError(format!("Failed to read PEM: {e}")))?;
    ders.into_iter()
        .map(|der| X509Certificate::from_der(der.as_ref().to_vec()))
        .collect()
}

/// Subject distinguished name of a certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFields {
    pub common_name: String,
    pub country: String,
    pub province: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

impl Default for SubjectFields {
    fn default() -> Self {
        Self {
            common_name: "nebulo-client".to_string(),
            country: "-".to_string(),
            province: "-".to_string(),
            locality: "-".to_string(),
            organization: "Nebulo".to_string(),
            organizational_unit: "Nebulo Clients CA".to_string(),
        }
    }
}

impl SubjectFields {
    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name.as_str());
        dn.push(DnType::CountryName, self.country.as_str());
        dn.push(DnType::StateOrProvinceName, self.province.as_str());
        dn.push(DnType::LocalityName, self.locality.as_str());
        dn.push(DnType::OrganizationName, self.organization.as_str());
        dn.push(DnType::OrganizationalUnitName, self.organizational_unit.as_str());
        dn
    }
}

/// Summary of a parsed certificate signing request
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub signature_algorithm: Oid<'static>,
    pub public_key_der: Vec<u8>,
}

impl RequestInfo {
    /// Whether the request is signed with SHA-256 or SHA-512 over RSA
    pub fn has_supported_signature(&self) -> bool {
        self.signature_algorithm == OID_PKCS1_SHA256WITHRSA
            || self.signature_algorithm == OID_PKCS1_SHA512WITHRSA
    }
}

/// Certificate Signing Request operations using standard PKCS#10
pub struct CertificateRequest;

impl CertificateRequest {
    /// Create a PEM encoded PKCS#10 request signed with sha256WithRSAEncryption
    pub fn create(key: &IdentityKey, subject: &SubjectFields) -> Result<String> {
        let mut params = CertificateParams::new(Vec::<String>::new());
        params.alg = &rcgen::PKCS_RSA_SHA256;
        params.distinguished_name = subject.distinguished_name();
        params.key_pair = Some(key.to_rcgen_key_pair()?);

        let request = RcgenCertificate::from_params(params)?;
        let pem = request.serialize_request_pem()?;

        log::debug!(
            "created certificate request for {:?} with key {}",
            subject.common_name,
            key.public_key().fingerprint()
        );
        Ok(pem)
    }

    /// Parse a PEM request and extract the fields registration cares about
    pub fn inspect(pem: &str) -> Result<RequestInfo> {
        let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| KeyError::CertificateRequestError(format!("invalid PEM: {e}")))?;
        if block.label != "CERTIFICATE REQUEST" {
            return Err(KeyError::CertificateRequestError(format!(
                "unexpected PEM label {:?}",
                block.label
            )));
        }
        let (_, request) = X509CertificationRequest::from_der(&block.contents)
            .map_err(|e| KeyError::CertificateRequestError(format!("invalid request: {e}")))?;
        request
            .verify_signature()
            .map_err(|e| KeyError::CertificateRequestError(format!("bad signature: {e}")))?;

        let subject = &request.certification_request_info.subject;
        let info = RequestInfo {
            common_name: subject
                .iter_common_name()
                .next()
                .and_then(|v| v.as_str().ok())
                .map(str::to_string),
            organization: subject
                .iter_organization()
                .next()
                .and_then(|v| v.as_str().ok())
                .map(str::to_string),
            signature_algorithm: request.signature_algorithm.algorithm.to_owned(),
            public_key_der: request
                .certification_request_info
                .subject_pki
                .raw
                .to_vec(),
        };
        Ok(info)
    }
}
