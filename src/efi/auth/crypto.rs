//! Cryptographic Operations for Secure Boot
//!
//! This module implements the primitives the verifier is built on:
//! - SHA-1 / SHA-256 hashing of single buffers and of image regions
//! - The [`ImageRegions`] set describing which bytes of an image are signed
//! - RSA PKCS#1 v1.5 signature verification

use super::AuthError;
use alloc::vec::Vec;
use const_oid::{AssociatedOid, ObjectIdentifier};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

// ============================================================================
// SHA-256 Hashing
// ============================================================================

/// Compute SHA-256 hash of data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest algorithms a signer may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-1 (legacy signers)
    Sha1,
    /// SHA-256
    Sha256,
}

impl HashAlgorithm {
    /// Map a digest algorithm OID; `None` for anything we cannot verify
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == Sha256::OID {
            Some(Self::Sha256)
        } else if *oid == Sha1::OID {
            Some(Self::Sha1)
        } else {
            None
        }
    }

    /// Digest a single buffer
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_chunks(core::iter::once(data))
    }

    /// Digest a sequence of buffers as if they were concatenated
    pub fn digest_chunks<'a>(&self, chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
        match self {
            Self::Sha1 => {
                let mut hasher = Sha1::new();
                chunks.into_iter().for_each(|c| hasher.update(c));
                hasher.finalize().to_vec()
            }
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                chunks.into_iter().for_each(|c| hasher.update(c));
                hasher.finalize().to_vec()
            }
        }
    }
}

// ============================================================================
// Image Regions
// ============================================================================

/// Ordered set of byte ranges that make up the signed content of an image
///
/// Regions borrow from the image buffer. [`ImageRegions::add`] keeps them
/// sorted by address and refuses overlaps; [`ImageRegions::push`] appends
/// as-is, for pieces the caller knows are already in order.
#[derive(Debug, Clone)]
pub struct ImageRegions<'a> {
    regions: Vec<&'a [u8]>,
    max: usize,
}

impl<'a> ImageRegions<'a> {
    /// Create an empty set holding at most `max` regions
    pub fn new(max: usize) -> Self {
        Self {
            regions: Vec::new(),
            max,
        }
    }

    /// Create a set holding exactly one region
    pub fn single(data: &'a [u8]) -> Self {
        Self {
            regions: alloc::vec![data],
            max: 1,
        }
    }

    /// Insert a region at its address-ordered position
    pub fn add(&mut self, region: &'a [u8]) -> Result<(), AuthError> {
        if self.regions.len() >= self.max {
            log::debug!("Image region limit {} reached", self.max);
            return Err(AuthError::OutOfResources);
        }

        let start = region.as_ptr() as usize;
        let end = start + region.len();

        let mut index = self.regions.len();
        for (i, reg) in self.regions.iter().enumerate() {
            let reg_start = reg.as_ptr() as usize;
            let reg_end = reg_start + reg.len();

            if start >= reg_end {
                continue;
            }
            if end <= reg_start {
                index = i;
                break;
            }

            log::debug!(
                "Image region {:#x}..{:#x} overlaps {:#x}..{:#x}",
                start,
                end,
                reg_start,
                reg_end
            );
            return Err(AuthError::InvalidParameter);
        }

        self.regions.insert(index, region);
        Ok(())
    }

    /// Append a region without ordering or overlap checks
    pub fn push(&mut self, region: &'a [u8]) -> Result<(), AuthError> {
        if self.regions.len() >= self.max {
            log::debug!("Image region limit {} reached", self.max);
            return Err(AuthError::OutOfResources);
        }
        self.regions.push(region);
        Ok(())
    }

    /// Regions in hash order
    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.regions.iter().copied()
    }

    /// Number of regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if no region has been added
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Total number of bytes covered
    pub fn total_size(&self) -> usize {
        self.regions.iter().map(|r| r.len()).sum()
    }
}

/// SHA-256 over all regions, in order
pub fn hash_regions(regions: &ImageRegions<'_>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for region in regions.iter() {
        hasher.update(region);
    }
    hasher.finalize().into()
}

/// Digest all regions with the given algorithm
pub fn digest_regions(algorithm: HashAlgorithm, regions: &ImageRegions<'_>) -> Vec<u8> {
    algorithm.digest_chunks(regions.iter())
}

// ============================================================================
// RSA Signature Verification
// ============================================================================

/// Verify an RSA PKCS#1 v1.5 signature over a precomputed digest
///
/// The DigestInfo prefix for `algorithm` is checked as part of the padding.
pub fn rsa_verify(
    key: &RsaPublicKey,
    algorithm: HashAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> bool {
    let scheme = match algorithm {
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    };

    match key.verify(scheme, digest, signature) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("RSA signature verification failed: {:?}", e);
            false
        }
    }
}
