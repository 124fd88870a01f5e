//! UEFI Secure Boot Signature Verification
//!
//! This module implements the signature-database side of UEFI Secure Boot as
//! defined in the UEFI Specification Chapter 32 (Secure Boot and Driver
//! Signing).
//!
//! # Overview
//!
//! Trust decisions are driven by four signature databases, each stored as a
//! UEFI variable holding concatenated `EFI_SIGNATURE_LIST`s:
//!
//! - **PK** (Platform Key): Single certificate that controls who can modify KEK
//! - **KEK** (Key Exchange Key): Certificates that can modify db/dbx
//! - **db** (Signature Database): Allowed signatures for boot images
//! - **dbx** (Forbidden Signature Database): Revoked signatures
//!
//! # Verification Flow
//!
//! 1. The caller parses the relevant database into a [`SignatureStore`]
//!    (see [`load_signature_database`])
//! 2. The image loader describes what was signed as [`ImageRegions`]
//! 3. [`verify_signers`] rejects messages whose signer is listed in dbx
//! 4. [`verify_with_sigdb`] checks the image against db, either by digest
//!    (unsigned images) or through a PKCS#7 signature (signed images and
//!    authenticated variables)
//!
//! Every cryptographic failure collapses to "not verified"; callers learn
//! success or failure, never which stage failed.

#[cfg(feature = "authenticode")]
pub mod authenticode;
pub mod capsule;
pub mod config;
mod crypto;
pub mod pkcs7;
mod signature;
pub mod sigstore;
mod structures;
pub mod variables;

#[cfg(feature = "authenticode")]
pub use authenticode::{authenticate_image, parse_pe_image, PeImage};
pub use capsule::{authenticate_capsule, AuthenticatedCapsule};
pub use config::VerifyConfig;
pub use crypto::*;
pub use pkcs7::{Certificate, Pkcs7Message, SignedInfo};
pub use signature::*;
pub use sigstore::{SignatureEntry, SignatureList, SignatureStore, SignatureType};
pub use structures::*;
pub use variables::{load_signature_database, SecureBootVariable};

use r_efi::efi::Guid;

// ============================================================================
// DER Encoding Helpers
// ============================================================================

/// Maximum DER length we'll accept (64 MB)
/// This prevents DoS attacks with maliciously crafted length fields
const MAX_DER_LENGTH: usize = 64 * 1024 * 1024;

/// Parse DER length encoding
///
/// Returns `(length, bytes_consumed)` on success.
pub(crate) fn parse_der_length(data: &[u8]) -> Result<(usize, usize), AuthError> {
    let Some(&first) = data.first() else {
        return Err(AuthError::CertificateParseError);
    };

    if first < 0x80 {
        // Short form: length is in the first byte
        Ok((first as usize, 1))
    } else if first == 0x80 {
        // Indefinite length - not supported
        Err(AuthError::CertificateParseError)
    } else {
        // Long form: first byte indicates number of length bytes
        let num_bytes = (first & 0x7F) as usize;
        if num_bytes > 4 || num_bytes + 1 > data.len() {
            return Err(AuthError::CertificateParseError);
        }

        let length = data[1..=num_bytes]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);

        // Reject unreasonably large lengths to prevent DoS
        if length > MAX_DER_LENGTH {
            log::warn!("DER length {} exceeds maximum {}", length, MAX_DER_LENGTH);
            return Err(AuthError::CertificateParseError);
        }

        Ok((length, 1 + num_bytes))
    }
}

/// Split the first complete DER TLV off `data`
///
/// Returns `(tlv, rest)`. Only single-byte tags are supported, which covers
/// everything inside X.509 and PKCS#7 structures we look at.
pub(crate) fn split_der_tlv(data: &[u8]) -> Result<(&[u8], &[u8]), AuthError> {
    if data.len() < 2 || data[0] & 0x1F == 0x1F {
        return Err(AuthError::CertificateParseError);
    }

    let (len, len_size) = parse_der_length(&data[1..])?;
    let total = 1 + len_size + len;
    if total > data.len() {
        return Err(AuthError::CertificateParseError);
    }

    Ok(data.split_at(total))
}

// ============================================================================
// Secure Boot GUIDs
// ============================================================================

/// EFI Global Variable GUID
/// Used for: PK, KEK, SetupMode, SecureBoot, SignatureSupport, etc.
pub const EFI_GLOBAL_VARIABLE_GUID: Guid = Guid::from_fields(
    0x8BE4DF61,
    0x93CA,
    0x11D2,
    0xAA,
    0x0D,
    &[0x00, 0xE0, 0x98, 0x03, 0x2B, 0x8C],
);

/// EFI Image Security Database GUID
/// Used for: db, dbx, dbt, dbr
pub const EFI_IMAGE_SECURITY_DATABASE_GUID: Guid = Guid::from_fields(
    0xD719B2CB,
    0x3D3A,
    0x4596,
    0xA3,
    0xBC,
    &[0xDA, 0xD0, 0x0E, 0x67, 0x65, 0x6F],
);

/// Certificate Type GUID for X.509 certificates
pub const EFI_CERT_X509_GUID: Guid = Guid::from_fields(
    0xA5C059A1,
    0x94E4,
    0x4AA7,
    0x87,
    0xB5,
    &[0xAB, 0x15, 0x5C, 0x2B, 0xF0, 0x72],
);

/// Certificate Type GUID for RSA-2048 public keys
pub const EFI_CERT_RSA2048_GUID: Guid = Guid::from_fields(
    0x3C5766E8,
    0x269C,
    0x4E34,
    0xAA,
    0x14,
    &[0xED, 0x77, 0x6E, 0x85, 0xB3, 0xB6],
);

/// Certificate Type GUID for SHA-256 hashes
pub const EFI_CERT_SHA256_GUID: Guid = Guid::from_fields(
    0xC1C41626,
    0x504C,
    0x4092,
    0xAC,
    0xA9,
    &[0x41, 0xF9, 0x36, 0x93, 0x43, 0x28],
);

/// Certificate Type GUID for SHA-256 hashes of X.509 TBSCertificates
///
/// Used in dbx to revoke a certificate: each entry is the TBS hash followed
/// by the time of revocation.
pub const EFI_CERT_X509_SHA256_GUID: Guid = Guid::from_fields(
    0x3BD2A492,
    0x96C0,
    0x4079,
    0xB4,
    0x20,
    &[0xFC, 0xF9, 0x8E, 0xF1, 0x03, 0xED],
);

/// Certificate Type GUID for PKCS#7 signatures
pub const EFI_CERT_TYPE_PKCS7_GUID: Guid = Guid::from_fields(
    0x4AAFD29D,
    0x68DF,
    0x49EE,
    0x8A,
    0xA9,
    &[0x34, 0x7D, 0x37, 0x56, 0x65, 0xA7],
);

/// WIN_CERTIFICATE revision
pub const WIN_CERT_REVISION: u16 = 0x0200;

/// WIN_CERTIFICATE type for PKCS#7 signed data
pub const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;

/// WIN_CERTIFICATE type for GUID-typed payloads (WIN_CERTIFICATE_UEFI_GUID)
pub const WIN_CERT_TYPE_EFI_GUID: u16 = 0x0EF1;

// ============================================================================
// Authentication Error Types
// ============================================================================

/// Errors that can occur during authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Invalid PKCS#7 or WIN_CERTIFICATE header
    InvalidHeader,
    /// Invalid signature list format
    InvalidSignatureList,
    /// Certificate parsing error
    CertificateParseError,
    /// Digest or public key algorithm not supported
    UnsupportedAlgorithm,
    /// Invalid PE/COFF image
    InvalidImage,
    /// Invalid parameter (e.g. overlapping image regions)
    InvalidParameter,
    /// Fixed-capacity container exhausted
    OutOfResources,
    /// Buffer too small / input exceeds configured limit
    BufferTooSmall,
    /// Signature did not verify against the trust store
    SecurityViolation,
}

impl From<AuthError> for r_efi::efi::Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidHeader => r_efi::efi::Status::INVALID_PARAMETER,
            AuthError::InvalidSignatureList => r_efi::efi::Status::INVALID_PARAMETER,
            AuthError::CertificateParseError => r_efi::efi::Status::INVALID_PARAMETER,
            AuthError::UnsupportedAlgorithm => r_efi::efi::Status::UNSUPPORTED,
            AuthError::InvalidImage => r_efi::efi::Status::LOAD_ERROR,
            AuthError::InvalidParameter => r_efi::efi::Status::INVALID_PARAMETER,
            AuthError::OutOfResources => r_efi::efi::Status::OUT_OF_RESOURCES,
            AuthError::BufferTooSmall => r_efi::efi::Status::BUFFER_TOO_SMALL,
            AuthError::SecurityViolation => r_efi::efi::Status::SECURITY_VIOLATION,
        }
    }
}

#[cfg(test)]
pub(crate) mod testdata {
    //! DER fixtures generated by `testdata/generate.sh`

    pub const CERT_A: &[u8] = include_bytes!("../../../testdata/cert_a.der");
    pub const CERT_B: &[u8] = include_bytes!("../../../testdata/cert_b.der");
    pub const TBS_A_SHA256: &[u8; 32] = include_bytes!("../../../testdata/tbs_a.sha256");
    pub const PAYLOAD: &[u8] = include_bytes!("../../../testdata/payload.bin");
    pub const P7_A_ATTRS: &[u8] = include_bytes!("../../../testdata/p7_a_attrs.der");
    pub const P7_A_NOATTR: &[u8] = include_bytes!("../../../testdata/p7_a_noattr.der");
    pub const P7_A_EMBEDDED: &[u8] = include_bytes!("../../../testdata/p7_a_embedded.der");
    pub const P7_A_SHA1: &[u8] = include_bytes!("../../../testdata/p7_a_sha1.der");
    pub const P7_A_SHA384: &[u8] = include_bytes!("../../../testdata/p7_a_sha384.der");
    pub const P7_A_KEYID: &[u8] = include_bytes!("../../../testdata/p7_a_keyid.der");
    pub const P7_AB: &[u8] = include_bytes!("../../../testdata/p7_ab.der");
    pub const CERT_D: &[u8] = include_bytes!("../../../testdata/cert_d.der");
    pub const TBS_D_SHA256: &[u8; 32] = include_bytes!("../../../testdata/tbs_d.sha256");
    pub const P7_D_ATTRS: &[u8] = include_bytes!("../../../testdata/p7_d_attrs.der");
    pub const P7_D_UNSORTED: &[u8] = include_bytes!("../../../testdata/p7_d_unsorted.der");
    pub const PE_UNSIGNED: &[u8] = include_bytes!("../../../testdata/pe_unsigned.efi");
    pub const PE_SIGNED: &[u8] = include_bytes!("../../../testdata/pe_signed.efi");
    pub const PE_SHA256: &[u8; 32] = include_bytes!("../../../testdata/pe_unsigned.sha256");
    pub const CAPSULE: &[u8] = include_bytes!("../../../testdata/capsule.bin");
    pub const CAPSULE_IMAGE: &[u8] = include_bytes!("../../../testdata/capsule_image.bin");
}
