//! Signature Store
//!
//! A [`SignatureStore`] is the parsed form of one signature database variable
//! (PK, KEK, db or dbx): a sequence of [`SignatureList`]s in variable order,
//! each holding [`SignatureEntry`]s of a single [`SignatureType`].
//!
//! Parsing is all-or-nothing: a malformed list anywhere in the buffer fails
//! the whole parse and nothing partially built escapes.

use super::structures::{EfiSignatureData, EfiSignatureList};
use super::{
    AuthError, EFI_CERT_RSA2048_GUID, EFI_CERT_SHA256_GUID, EFI_CERT_TYPE_PKCS7_GUID,
    EFI_CERT_X509_GUID, EFI_CERT_X509_SHA256_GUID,
};
use alloc::vec::Vec;
use r_efi::efi::Guid;
use zerocopy::{FromBytes, IntoBytes};

/// Size of a SHA-256 digest
pub const SHA256_DIGEST_SIZE: usize = 32;

/// Signature type of a signature list, keyed by its GUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// Raw SHA-256 digest of an image (32 bytes)
    Sha256,
    /// Raw RSA-2048 public key (modulus only)
    Rsa2048,
    /// DER-encoded X.509 certificate
    X509,
    /// SHA-256 of an X.509 TBSCertificate followed by the revocation time
    X509Sha256,
    /// Full PKCS#7 signed message
    Pkcs7,
    /// Any other signature type; never matches during verification
    Unsupported(Guid),
}

impl SignatureType {
    /// Map a signature type GUID to its variant
    pub fn from_guid(guid: &Guid) -> Self {
        if *guid == EFI_CERT_SHA256_GUID {
            Self::Sha256
        } else if *guid == EFI_CERT_RSA2048_GUID {
            Self::Rsa2048
        } else if *guid == EFI_CERT_X509_GUID {
            Self::X509
        } else if *guid == EFI_CERT_X509_SHA256_GUID {
            Self::X509Sha256
        } else if *guid == EFI_CERT_TYPE_PKCS7_GUID {
            Self::Pkcs7
        } else {
            Self::Unsupported(*guid)
        }
    }

    /// GUID identifying this signature type on the wire
    pub fn guid(&self) -> Guid {
        match self {
            Self::Sha256 => EFI_CERT_SHA256_GUID,
            Self::Rsa2048 => EFI_CERT_RSA2048_GUID,
            Self::X509 => EFI_CERT_X509_GUID,
            Self::X509Sha256 => EFI_CERT_X509_SHA256_GUID,
            Self::Pkcs7 => EFI_CERT_TYPE_PKCS7_GUID,
            Self::Unsupported(guid) => *guid,
        }
    }
}

/// One EFI_SIGNATURE_DATA entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    /// Agent that added this signature
    pub owner: Guid,
    /// Signature payload; meaning depends on the list's [`SignatureType`]
    pub data: Vec<u8>,
}

impl SignatureEntry {
    /// Create an entry
    pub fn new(owner: Guid, data: Vec<u8>) -> Self {
        Self { owner, data }
    }
}

/// A homogeneous group of signatures sharing one signature type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureList {
    signature_type: SignatureType,
    entries: Vec<SignatureEntry>,
}

impl SignatureList {
    /// Create an empty list of the given type
    pub fn new(signature_type: SignatureType) -> Self {
        Self {
            signature_type,
            entries: Vec::new(),
        }
    }

    /// Create a list from entries
    pub fn with_entries(signature_type: SignatureType, entries: Vec<SignatureEntry>) -> Self {
        Self {
            signature_type,
            entries,
        }
    }

    /// Signature type of every entry in this list
    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }

    /// Entries in this list
    pub fn entries(&self) -> &[SignatureEntry] {
        &self.entries
    }

    /// Append an entry
    pub fn push(&mut self, entry: SignatureEntry) {
        self.entries.push(entry);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the list has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the first EFI_SIGNATURE_LIST in `data`
    ///
    /// Returns the list and the bytes following it. The vendor-specific
    /// signature header is skipped.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), AuthError> {
        let (header, _) = EfiSignatureList::read_from_prefix(data).map_err(|_| {
            log::debug!("Signature list header truncated ({} bytes left)", data.len());
            AuthError::InvalidSignatureList
        })?;

        let list_size = header.signature_list_size as usize;
        let sig_size = header.signature_size as usize;

        if list_size > data.len() {
            log::debug!(
                "Signature list size {} exceeds remaining {} bytes",
                list_size,
                data.len()
            );
            return Err(AuthError::InvalidSignatureList);
        }

        // Each signature must at least carry its owner GUID
        if sig_size <= EfiSignatureData::HEADER_SIZE {
            log::debug!("Signature size {} too small", sig_size);
            return Err(AuthError::InvalidSignatureList);
        }

        let area = match header.signatures_size() {
            Some(area) if area >= sig_size => area,
            _ => {
                log::debug!("Signature list in wrong format: no room for a signature");
                return Err(AuthError::InvalidSignatureList);
            }
        };

        if area % sig_size != 0 {
            log::debug!(
                "Signature area {} is not a multiple of signature size {}",
                area,
                sig_size
            );
            return Err(AuthError::InvalidSignatureList);
        }

        let signature_type = SignatureType::from_guid(&Guid::from_bytes(&header.signature_type));

        let body = &data[header.first_signature_offset()..list_size];
        let mut entries = Vec::with_capacity(area / sig_size);
        for chunk in body.chunks_exact(sig_size) {
            let (owner, payload) = EfiSignatureData::read_from_prefix(chunk)
                .map_err(|_| AuthError::InvalidSignatureList)?;
            entries.push(SignatureEntry {
                owner: Guid::from_bytes(&owner.signature_owner),
                data: payload.to_vec(),
            });
        }

        Ok((
            Self {
                signature_type,
                entries,
            },
            &data[list_size..],
        ))
    }

    /// Append this list in EFI_SIGNATURE_LIST layout
    ///
    /// Every entry must have the same payload size; an empty list writes
    /// nothing since it cannot be represented.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<(), AuthError> {
        let Some(first) = self.entries.first() else {
            return Ok(());
        };

        let payload_size = first.data.len();
        if payload_size == 0 || self.entries.iter().any(|e| e.data.len() != payload_size) {
            log::debug!("Signature list entries differ in size");
            return Err(AuthError::InvalidSignatureList);
        }

        let sig_size = EfiSignatureData::HEADER_SIZE + payload_size;
        let list_size = EfiSignatureList::HEADER_SIZE + sig_size * self.entries.len();

        let header = EfiSignatureList {
            signature_type: *self.signature_type.guid().as_bytes(),
            signature_list_size: u32::try_from(list_size)
                .map_err(|_| AuthError::BufferTooSmall)?,
            signature_header_size: 0,
            signature_size: u32::try_from(sig_size).map_err(|_| AuthError::BufferTooSmall)?,
        };

        out.reserve(list_size);
        out.extend_from_slice(header.as_bytes());
        for entry in &self.entries {
            out.extend_from_slice(entry.owner.as_bytes());
            out.extend_from_slice(&entry.data);
        }

        Ok(())
    }
}

/// A parsed signature database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureStore {
    lists: Vec<SignatureList>,
}

impl SignatureStore {
    /// Create an empty store (e.g. for a database variable that is not set)
    pub const fn new() -> Self {
        Self { lists: Vec::new() }
    }

    /// Create a store from already-built lists
    pub fn from_lists(lists: Vec<SignatureList>) -> Self {
        Self { lists }
    }

    /// Parse the full value of a signature database variable
    ///
    /// The buffer is a concatenation of EFI_SIGNATURE_LISTs. An empty buffer
    /// yields an empty store.
    pub fn parse(data: &[u8]) -> Result<Self, AuthError> {
        let mut lists = Vec::new();
        let mut remaining = data;

        while !remaining.is_empty() {
            let (list, rest) = SignatureList::parse(remaining).inspect_err(|_| {
                log::warn!(
                    "Malformed signature database at offset {}",
                    data.len() - remaining.len()
                );
            })?;
            lists.push(list);
            remaining = rest;
        }

        Ok(Self { lists })
    }

    /// Serialize the store back to its variable representation
    pub fn to_bytes(&self) -> Result<Vec<u8>, AuthError> {
        let mut out = Vec::new();
        for list in &self.lists {
            list.write_to(&mut out)?;
        }
        Ok(out)
    }

    /// Lists in variable order
    pub fn lists(&self) -> &[SignatureList] {
        &self.lists
    }

    /// Iterate over the lists
    pub fn iter(&self) -> core::slice::Iter<'_, SignatureList> {
        self.lists.iter()
    }

    /// Append a list
    pub fn push(&mut self, list: SignatureList) {
        self.lists.push(list);
    }

    /// Number of lists
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Check if the store holds no lists
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Total number of entries across all lists
    pub fn entry_count(&self) -> usize {
        self.lists.iter().map(SignatureList::len).sum()
    }

    /// Iterate over the payloads of every entry of the given type
    pub fn entries_of(&self, signature_type: SignatureType) -> impl Iterator<Item = &[u8]> {
        self.lists
            .iter()
            .filter(move |l| l.signature_type == signature_type)
            .flat_map(|l| l.entries.iter().map(|e| e.data.as_slice()))
    }
}

impl<'a> IntoIterator for &'a SignatureStore {
    type Item = &'a SignatureList;
    type IntoIter = core::slice::Iter<'a, SignatureList>;

    fn into_iter(self) -> Self::IntoIter {
        self.lists.iter()
    }
}
