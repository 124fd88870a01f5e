//! Firmware Capsule Authentication
//!
//! A signed capsule image starts with `EFI_FIRMWARE_IMAGE_AUTHENTICATION`: a
//! monotonic count followed by a PKCS#7 signature over the firmware image
//! and that count. The trust store is a signature database supplied by the
//! platform (usually a single X.509 certificate).

use super::config::VerifyConfig;
use super::crypto::ImageRegions;
use super::pkcs7::Pkcs7Message;
use super::signature::verify_with_sigdb;
use super::sigstore::SignatureStore;
use super::structures::{FirmwareImageAuthentication, WinCertificateUefiGuid};
use super::{AuthError, EFI_CERT_TYPE_PKCS7_GUID, WIN_CERT_TYPE_EFI_GUID};
use r_efi::efi::Guid;
use zerocopy::FromBytes;

/// A capsule image with its authentication header split off
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedCapsule<'a> {
    /// Anti-rollback counter covered by the signature
    pub monotonic_count: u64,
    /// PKCS#7 signature
    pub signature: &'a [u8],
    /// Firmware image following the authentication header
    pub image: &'a [u8],
}

impl<'a> AuthenticatedCapsule<'a> {
    /// Split a capsule into counter, signature and image
    pub fn parse(capsule: &'a [u8]) -> Result<Self, AuthError> {
        let (auth, _) = FirmwareImageAuthentication::read_from_prefix(capsule).map_err(|_| {
            log::debug!("Capsule shorter than its authentication header");
            AuthError::InvalidHeader
        })?;

        let info = auth.auth_info;
        let length = info.hdr.dw_length as usize;
        if length <= WinCertificateUefiGuid::HEADER_SIZE {
            log::debug!("Capsule WIN_CERTIFICATE length {:#x} too small", length);
            return Err(AuthError::InvalidHeader);
        }

        let auth_size = core::mem::size_of::<u64>() + length;
        if auth_size > capsule.len() {
            log::debug!("Capsule authentication header overruns image");
            return Err(AuthError::InvalidHeader);
        }

        let cert_type = info.hdr.w_certificate_type;
        if cert_type != WIN_CERT_TYPE_EFI_GUID {
            log::debug!("Capsule WIN_CERTIFICATE type {:#x} is not a GUID type", cert_type);
            return Err(AuthError::InvalidHeader);
        }

        if Guid::from_bytes(&info.cert_type) != EFI_CERT_TYPE_PKCS7_GUID {
            log::debug!("Capsule signature is not PKCS#7");
            return Err(AuthError::InvalidHeader);
        }

        let data_start = core::mem::size_of::<FirmwareImageAuthentication>();
        Ok(Self {
            monotonic_count: auth.monotonic_count,
            signature: &capsule[data_start..auth_size],
            image: &capsule[auth_size..],
        })
    }
}

/// Verify a signed capsule against `truststore`
///
/// Returns the firmware image on success.
pub fn authenticate_capsule<'a>(
    capsule: &'a [u8],
    truststore: &SignatureStore,
    config: &VerifyConfig,
) -> Result<&'a [u8], AuthError> {
    let parsed = AuthenticatedCapsule::parse(capsule)?;

    if parsed.signature.len() > config.max_pkcs7_size {
        log::warn!("Capsule signature of {} bytes too large", parsed.signature.len());
        return Err(AuthError::BufferTooSmall);
    }

    let msg = Pkcs7Message::parse(parsed.signature)?;

    // The signed data is the image followed by the counter
    let count = parsed.monotonic_count.to_le_bytes();
    let mut regions = ImageRegions::new(2);
    regions.push(parsed.image)?;
    regions.push(&count)?;

    if !verify_with_sigdb(&regions, Some(&msg), truststore) {
        log::warn!("Capsule signature not verified");
        return Err(AuthError::SecurityViolation);
    }

    log::info!(
        "Capsule authenticated ({} bytes, count {})",
        parsed.image.len(),
        parsed.monotonic_count
    );
    Ok(parsed.image)
}

#[cfg(test)]
mod tests {
    use super::super::sigstore::tests::OWNER;
    use super::super::sigstore::{SignatureEntry, SignatureList, SignatureType};
    use super::super::testdata::*;
    use super::*;
    use alloc::vec::Vec;

    fn truststore(cert: &[u8]) -> SignatureStore {
        SignatureStore::from_lists(alloc::vec![SignatureList::with_entries(
            SignatureType::X509,
            alloc::vec![SignatureEntry::new(OWNER, cert.to_vec())],
        )])
    }

    #[test]
    fn test_parse_capsule() {
        let parsed = AuthenticatedCapsule::parse(CAPSULE).unwrap();
        assert_eq!(parsed.monotonic_count, 1);
        assert_eq!(parsed.image, CAPSULE_IMAGE);
        assert!(Pkcs7Message::parse(parsed.signature).is_ok());
    }

    #[test]
    fn test_authenticate_capsule() {
        let config = VerifyConfig::default();
        assert_eq!(
            authenticate_capsule(CAPSULE, &truststore(CERT_A), &config),
            Ok(CAPSULE_IMAGE)
        );
        assert_eq!(
            authenticate_capsule(CAPSULE, &truststore(CERT_B), &config),
            Err(AuthError::SecurityViolation)
        );
        assert_eq!(
            authenticate_capsule(CAPSULE, &SignatureStore::new(), &config),
            Err(AuthError::SecurityViolation)
        );
    }

    #[test]
    fn test_counter_and_image_are_signed() {
        let config = VerifyConfig::default();
        let trust = truststore(CERT_A);

        let mut rolled_back: Vec<u8> = CAPSULE.to_vec();
        rolled_back[0] = 2;
        assert_eq!(
            authenticate_capsule(&rolled_back, &trust, &config),
            Err(AuthError::SecurityViolation)
        );

        let mut patched: Vec<u8> = CAPSULE.to_vec();
        let last = patched.len() - 1;
        patched[last] ^= 0x20;
        assert_eq!(
            authenticate_capsule(&patched, &trust, &config),
            Err(AuthError::SecurityViolation)
        );
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(
            AuthenticatedCapsule::parse(&CAPSULE[..16]).err(),
            Some(AuthError::InvalidHeader)
        );

        // dwLength covering nothing but the header
        let mut empty_sig = CAPSULE.to_vec();
        empty_sig[8..12].copy_from_slice(&24u32.to_le_bytes());
        assert_eq!(
            AuthenticatedCapsule::parse(&empty_sig).err(),
            Some(AuthError::InvalidHeader)
        );

        // dwLength past the end
        let mut overrun = CAPSULE.to_vec();
        overrun[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            AuthenticatedCapsule::parse(&overrun).err(),
            Some(AuthError::InvalidHeader)
        );

        // Not a WIN_CERTIFICATE_UEFI_GUID
        let mut wrong_header = CAPSULE.to_vec();
        wrong_header[14..16].copy_from_slice(&0x0002u16.to_le_bytes());
        assert_eq!(
            AuthenticatedCapsule::parse(&wrong_header).err(),
            Some(AuthError::InvalidHeader)
        );

        // Not a PKCS#7 certificate type
        let mut wrong_type = CAPSULE.to_vec();
        wrong_type[16] ^= 0xFF;
        assert_eq!(
            AuthenticatedCapsule::parse(&wrong_type).err(),
            Some(AuthError::InvalidHeader)
        );

        let tight = VerifyConfig::default().with_max_pkcs7_size(100);
        assert_eq!(
            authenticate_capsule(CAPSULE, &truststore(CERT_A), &tight),
            Err(AuthError::BufferTooSmall)
        );
    }
}
