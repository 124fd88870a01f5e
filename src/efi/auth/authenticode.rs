//! PE Authenticode Signature Verification
//!
//! This module turns a PE/COFF image into the [`ImageRegions`] covered by its
//! Authenticode signature and runs the Secure Boot decision over db/dbx.
//!
//! # Authenticode Hash Calculation
//!
//! The Authenticode hash excludes:
//! - The Checksum field in the optional header
//! - The Certificate Table entry in the data directories
//! - The attribute certificate table (signature data at end of file)
//!
//! # References
//!
//! - Microsoft PE Authenticode specification
//! - UEFI Specification Section 32 (Secure Boot)

use super::config::VerifyConfig;
use super::crypto::{digest_regions, HashAlgorithm, ImageRegions};
use super::pkcs7::Pkcs7Message;
use super::signature::{lookup_digest, match_with_sigdb, verify_cert, verify_signers, SignatureMatch};
use super::sigstore::SignatureStore;
use super::structures::WinCertificate;
use super::{AuthError, WIN_CERT_REVISION, WIN_CERT_TYPE_PKCS_SIGNED_DATA};
use alloc::vec::Vec;
use const_oid::ObjectIdentifier;
use der::asn1::OctetString;
use der::{Any, Decode, Encode, Sequence, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;
use zerocopy::FromBytes;

/// DOS header magic "MZ"
const DOS_MAGIC: u16 = 0x5A4D;

/// PE signature "PE\0\0"
const PE_SIGNATURE: u32 = 0x00004550;

/// PE32+ magic
const PE32_PLUS_MAGIC: u16 = 0x020B;

/// PE32 magic
const PE32_MAGIC: u16 = 0x010B;

/// Data directory index for the Certificate Table (Security Directory)
const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;

/// Offset of checksum field from start of optional header (PE32 and PE32+)
const CHECKSUM_OFFSET: usize = 64;

/// Offset of SizeOfHeaders from start of optional header (PE32 and PE32+)
const SIZE_OF_HEADERS_OFFSET: usize = 60;

/// Size of a data directory entry
const DATA_DIRECTORY_SIZE: usize = 8;

/// Size of a section table entry
const SECTION_HEADER_SIZE: usize = 40;

/// Size of the COFF file header
const COFF_HEADER_SIZE: usize = 20;

/// SPC_INDIRECT_DATA_OBJID
const SPC_INDIRECT_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.2.1.4");

/// Authenticode `SpcIndirectDataContent`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SpcIndirectDataContent {
    data: Any,
    message_digest: DigestInfo,
}

/// PKCS#1 `DigestInfo`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct DigestInfo {
    digest_algorithm: AlgorithmIdentifierOwned,
    digest: OctetString,
}

/// Section information for hashing
#[derive(Clone, Copy)]
struct SectionInfo {
    /// Offset in file (PointerToRawData)
    file_offset: usize,
    /// Size of raw data
    size_of_raw_data: usize,
}

/// A PE image split into the pieces Secure Boot looks at
pub struct PeImage<'a> {
    /// Bytes covered by the Authenticode hash, in hash order
    pub regions: ImageRegions<'a>,
    /// PKCS#7 blobs from the attribute certificate table
    pub signatures: Vec<&'a [u8]>,
}

impl PeImage<'_> {
    /// Check if the image carries at least one PKCS#7 signature
    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, AuthError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(AuthError::InvalidImage)
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, AuthError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(AuthError::InvalidImage)
}

fn slice(data: &[u8], start: usize, end: usize) -> Result<&[u8], AuthError> {
    data.get(start..end).ok_or_else(|| {
        log::debug!("PE range {:#x}..{:#x} out of bounds", start, end);
        AuthError::InvalidImage
    })
}

/// Compute the Authenticode regions of a PE image and collect its signatures
pub fn parse_pe_image<'a>(
    image: &'a [u8],
    config: &VerifyConfig,
) -> Result<PeImage<'a>, AuthError> {
    if read_u16(image, 0)? != DOS_MAGIC {
        return Err(AuthError::InvalidImage);
    }

    // Get PE offset from DOS header
    let pe_offset = read_u32(image, 60)? as usize;
    if read_u32(image, pe_offset)? != PE_SIGNATURE {
        return Err(AuthError::InvalidImage);
    }

    // COFF header starts after PE signature
    let coff_offset = pe_offset + 4;
    let num_sections = read_u16(image, coff_offset + 2)? as usize;
    let opt_header_size = read_u16(image, coff_offset + 16)? as usize;
    let opt_header_offset = coff_offset + COFF_HEADER_SIZE;

    // Check PE32 vs PE32+ magic
    let is_pe32_plus = match read_u16(image, opt_header_offset)? {
        PE32_PLUS_MAGIC => true,
        PE32_MAGIC => false,
        magic => {
            log::debug!("Unknown optional header magic {:#x}", magic);
            return Err(AuthError::InvalidImage);
        }
    };

    let checksum_offset = opt_header_offset + CHECKSUM_OFFSET;
    let size_of_headers = read_u32(image, opt_header_offset + SIZE_OF_HEADERS_OFFSET)? as usize;

    let (num_rva_offset, data_dirs_offset) = if is_pe32_plus {
        (opt_header_offset + 108, opt_header_offset + 112)
    } else {
        (opt_header_offset + 92, opt_header_offset + 96)
    };
    let num_data_dirs = read_u32(image, num_rva_offset)? as usize;

    let security_entry = (num_data_dirs > IMAGE_DIRECTORY_ENTRY_SECURITY)
        .then_some(data_dirs_offset + IMAGE_DIRECTORY_ENTRY_SECURITY * DATA_DIRECTORY_SIZE);

    let (cert_table_offset, cert_table_size) = match security_entry {
        Some(entry) => (
            read_u32(image, entry)? as usize,
            read_u32(image, entry + 4)? as usize,
        ),
        None => (0, 0),
    };

    if size_of_headers > image.len() || size_of_headers < checksum_offset + 4 {
        log::debug!("Bad SizeOfHeaders {:#x}", size_of_headers);
        return Err(AuthError::InvalidImage);
    }

    let mut regions = ImageRegions::new(config.max_image_regions);

    // Headers, skipping the checksum and the security directory entry
    regions.add(slice(image, 0, checksum_offset)?)?;
    match security_entry {
        Some(entry) => {
            regions.add(slice(image, checksum_offset + 4, entry)?)?;
            regions.add(slice(image, entry + DATA_DIRECTORY_SIZE, size_of_headers)?)?;
        }
        None => regions.add(slice(image, checksum_offset + 4, size_of_headers)?)?,
    }

    // Sections in order of file offset
    let sections_offset = opt_header_offset + opt_header_size;
    let mut sections = Vec::with_capacity(num_sections);
    for i in 0..num_sections {
        let section_offset = sections_offset + i * SECTION_HEADER_SIZE;
        let size_of_raw_data = read_u32(image, section_offset + 16)? as usize;
        let pointer_to_raw_data = read_u32(image, section_offset + 20)? as usize;

        if size_of_raw_data > 0 {
            sections.push(SectionInfo {
                file_offset: pointer_to_raw_data,
                size_of_raw_data,
            });
        }
    }
    sections.sort_by_key(|s| s.file_offset);

    let mut bytes_hashed = size_of_headers;
    for section in &sections {
        let start = section.file_offset;
        regions.add(slice(image, start, start + section.size_of_raw_data)?)?;
        bytes_hashed += section.size_of_raw_data;
    }

    // Attribute certificate table; the file offset is not an RVA
    let mut signatures = Vec::new();
    if cert_table_size > 0 {
        let table = slice(image, cert_table_offset, cert_table_offset + cert_table_size)?;
        signatures = collect_signatures(table)?;
    }

    // Extra data after the sections, excluding the certificate table
    let data_end = image.len() - cert_table_size;
    if bytes_hashed < data_end {
        regions.push(&image[bytes_hashed..data_end])?;
    }

    log::debug!(
        "PE image: {} regions, {} bytes hashed, {} signatures",
        regions.len(),
        regions.total_size(),
        signatures.len()
    );

    Ok(PeImage {
        regions,
        signatures,
    })
}

/// Walk the WIN_CERTIFICATE entries of an attribute certificate table
///
/// Entries are 8-byte aligned. Only PKCS#7 signed-data entries are
/// returned.
fn collect_signatures(table: &[u8]) -> Result<Vec<&[u8]>, AuthError> {
    let mut signatures = Vec::new();
    let mut offset = 0;

    while offset < table.len() {
        let (cert, _) = WinCertificate::read_from_prefix(&table[offset..]).map_err(|_| {
            log::debug!("Truncated WIN_CERTIFICATE at {:#x}", offset);
            AuthError::InvalidImage
        })?;

        let length = cert.dw_length as usize;
        if cert.data_size() == 0 || offset + length > table.len() {
            log::debug!("Bad WIN_CERTIFICATE length {:#x}", length);
            return Err(AuthError::InvalidImage);
        }

        let revision = cert.w_revision;
        let cert_type = cert.w_certificate_type;
        if revision == WIN_CERT_REVISION && cert_type == WIN_CERT_TYPE_PKCS_SIGNED_DATA {
            let data = offset + WinCertificate::HEADER_SIZE;
            signatures.push(&table[data..data + cert.data_size()]);
        } else {
            log::debug!(
                "Skipping certificate type {:#x} revision {:#x}",
                cert_type,
                revision
            );
        }

        offset += length.next_multiple_of(8);
    }

    Ok(signatures)
}

/// Check the image digest carried in an Authenticode message
///
/// The message content must be an `SpcIndirectDataContent` whose digest
/// equals the digest of `regions`.
pub fn image_digest_matches(msg: &Pkcs7Message, regions: &ImageRegions<'_>) -> bool {
    if msg.content_type() != SPC_INDIRECT_DATA {
        log::debug!("PKCS#7 content type {} is not Authenticode", msg.content_type());
        return false;
    }

    let Some(content) = msg.econtent() else {
        log::debug!("Authenticode message has no content");
        return false;
    };

    let decoded = if content.tag() == Tag::OctetString {
        SpcIndirectDataContent::from_der(content.value())
    } else {
        content
            .to_der()
            .and_then(|der| SpcIndirectDataContent::from_der(&der))
    };

    let spc = match decoded {
        Ok(spc) => spc,
        Err(e) => {
            log::debug!("Failed to parse SpcIndirectDataContent: {:?}", e);
            return false;
        }
    };

    let oid = spc.message_digest.digest_algorithm.oid;
    let Some(algorithm) = HashAlgorithm::from_oid(&oid) else {
        log::debug!("Unsupported Authenticode digest {}", oid);
        return false;
    };

    let digest = digest_regions(algorithm, regions);
    if digest.as_slice() != spc.message_digest.digest.as_bytes() {
        log::debug!("Authenticode digest doesn't match image");
        return false;
    }

    true
}

/// Outcome of checking one embedded signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// db vouches for the signature
    Trusted,
    /// The signature does not verify against db
    Untrusted,
    /// dbx revokes a certificate involved; rejects the whole image
    Revoked,
}

fn verify_signature(
    regions: &ImageRegions<'_>,
    blob: &[u8],
    db: &SignatureStore,
    dbx: &SignatureStore,
    config: &VerifyConfig,
) -> Verdict {
    if blob.len() > config.max_pkcs7_size {
        log::warn!("Secure Boot: Signature of {} bytes too large", blob.len());
        return Verdict::Untrusted;
    }

    let msg = match Pkcs7Message::parse(blob) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("Secure Boot: Unparsable signature: {:?}", e);
            return Verdict::Untrusted;
        }
    };

    if !image_digest_matches(&msg, regions) {
        return Verdict::Untrusted;
    }

    if !verify_signers(&msg, dbx) {
        log::warn!("Secure Boot: Signer is in forbidden database (dbx)");
        return Verdict::Revoked;
    }

    match match_with_sigdb(regions, Some(&msg), db) {
        Some(SignatureMatch::Certificate(cert)) if !verify_cert(&cert, dbx) => {
            log::warn!("Secure Boot: Trusted certificate is in dbx");
            Verdict::Revoked
        }
        Some(_) => Verdict::Trusted,
        None => Verdict::Untrusted,
    }
}

/// Decide whether a PE image may run under Secure Boot
///
/// 1. The image hash must not be in dbx
/// 2. An unsigned image must have its hash in db
/// 3. A signed image is accepted when one signature verifies against db and
///    no signer (nor the db certificate used) is revoked by dbx; an image
///    whose signatures all fail is still accepted if its hash is in db
pub fn authenticate_image(
    image: &[u8],
    db: &SignatureStore,
    dbx: &SignatureStore,
    config: &VerifyConfig,
) -> bool {
    let pe = match parse_pe_image(image, config) {
        Ok(pe) => pe,
        Err(e) => {
            log::warn!("Secure Boot: Cannot parse image: {:?}", e);
            return false;
        }
    };

    if lookup_digest(&pe.regions, dbx) {
        log::warn!("Secure Boot: Image hash is in forbidden database (dbx)");
        return false;
    }

    let mut verified = false;
    for blob in &pe.signatures {
        match verify_signature(&pe.regions, blob, db, dbx, config) {
            Verdict::Trusted => verified = true,
            Verdict::Untrusted => log::debug!("Secure Boot: Signature not verified by db"),
            Verdict::Revoked => return false,
        }
    }

    if !verified && lookup_digest(&pe.regions, db) {
        log::info!("Secure Boot: Image hash found in allowed database (db)");
        verified = true;
    }

    if verified {
        log::info!("Secure Boot: Image authenticated");
    } else {
        log::warn!("Secure Boot: Image not authorized");
    }
    verified
}
