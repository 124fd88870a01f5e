//! UEFI Signature Database Wire Structures
//!
//! This module defines the packed on-disk structures used by signature
//! database variables and PE attribute certificates, as specified in the UEFI
//! Specification Chapter 32.
//!
//! Note: We use raw byte arrays instead of r_efi::Guid because Guid has alignment
//! requirements that conflict with packed structures.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

// ============================================================================
// WIN_CERTIFICATE Structure
// ============================================================================

/// WIN_CERTIFICATE base structure
///
/// This is the base certificate structure. The actual certificate data follows
/// this header. The certificate type determines the format of the data.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct WinCertificate {
    /// Total length of the certificate including header
    pub dw_length: u32,
    /// Certificate revision (should be WIN_CERT_REVISION = 0x0200)
    pub w_revision: u16,
    /// Certificate type
    pub w_certificate_type: u16,
    // Certificate data follows...
}

impl WinCertificate {
    /// Size of the WinCertificate header
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();

    /// Get the size of the certificate data (excluding header)
    pub fn data_size(&self) -> usize {
        let len = self.dw_length;
        (len as usize).saturating_sub(Self::HEADER_SIZE)
    }
}

/// WIN_CERTIFICATE_UEFI_GUID structure
///
/// A WIN_CERTIFICATE whose payload type is identified by a GUID, as used by
/// authenticated variables and firmware capsules.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct WinCertificateUefiGuid {
    /// Base certificate header (type is WIN_CERT_TYPE_EFI_GUID)
    pub hdr: WinCertificate,
    /// Payload type GUID - stored as raw bytes
    pub cert_type: [u8; 16],
    // Certificate data follows...
}

impl WinCertificateUefiGuid {
    /// Size of the header up to the certificate data
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();
}

/// EFI_FIRMWARE_IMAGE_AUTHENTICATION structure
///
/// Prefix of an authenticated firmware capsule image.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FirmwareImageAuthentication {
    /// Anti-rollback counter, signed together with the image
    pub monotonic_count: u64,
    /// Signature over image and counter
    pub auth_info: WinCertificateUefiGuid,
}

// ============================================================================
// EFI_SIGNATURE_LIST Structure
// ============================================================================

/// EFI_SIGNATURE_LIST structure
///
/// A signature database (db, dbx, KEK) contains one or more signature lists.
/// Each list contains signatures of the same type and size.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct EfiSignatureList {
    /// GUID identifying the signature type - stored as raw bytes
    pub signature_type: [u8; 16],
    /// Total size of the signature list including this header
    pub signature_list_size: u32,
    /// Size of the optional signature header (typically 0)
    pub signature_header_size: u32,
    /// Size of each signature in this list
    pub signature_size: u32,
    // Signature header follows (signature_header_size bytes)
    // Signatures follow (each signature_size bytes)
}

impl EfiSignatureList {
    /// Size of the EfiSignatureList header
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();

    /// Get the offset to the first signature data (after header and signature header)
    pub fn first_signature_offset(&self) -> usize {
        let header_size = self.signature_header_size;
        Self::HEADER_SIZE.saturating_add(header_size as usize)
    }

    /// Size of the area holding the signatures, if the header is consistent
    pub fn signatures_size(&self) -> Option<usize> {
        let list_size = self.signature_list_size;
        (list_size as usize).checked_sub(self.first_signature_offset())
    }
}

/// EFI_SIGNATURE_DATA structure
///
/// Each signature in a signature list starts with a SignatureOwner GUID,
/// followed by the actual signature data.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct EfiSignatureData {
    /// GUID identifying the owner of this signature - stored as raw bytes
    pub signature_owner: [u8; 16],
    // Signature data follows...
}

impl EfiSignatureData {
    /// Size of the EfiSignatureData header
    pub const HEADER_SIZE: usize = core::mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sizes() {
        assert_eq!(WinCertificate::HEADER_SIZE, 8);
        assert_eq!(WinCertificateUefiGuid::HEADER_SIZE, 24);
        assert_eq!(core::mem::size_of::<FirmwareImageAuthentication>(), 32);
        assert_eq!(EfiSignatureList::HEADER_SIZE, 28);
        assert_eq!(EfiSignatureData::HEADER_SIZE, 16);
    }

    #[test]
    fn test_win_certificate_data_size() {
        let cert = WinCertificate {
            dw_length: 8 + 1400,
            w_revision: 0x0200,
            w_certificate_type: 0x0002,
        };
        assert_eq!(cert.data_size(), 1400);

        let header_only = WinCertificate { dw_length: 8, ..cert };
        assert_eq!(header_only.data_size(), 0);
        let short = WinCertificate { dw_length: 3, ..cert };
        assert_eq!(short.data_size(), 0);
    }

    #[test]
    fn test_signature_list_offsets() {
        let list = EfiSignatureList {
            signature_type: [0; 16],
            signature_list_size: 28 + 4 + 48 * 2,
            signature_header_size: 4,
            signature_size: 48,
        };
        assert_eq!(list.first_signature_offset(), 32);
        assert_eq!(list.signatures_size(), Some(96));

        let short = EfiSignatureList {
            signature_list_size: 20,
            ..list
        };
        assert_eq!(short.signatures_size(), None);
    }
}
