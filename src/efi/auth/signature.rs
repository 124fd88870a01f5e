//! Signature Database Verification
//!
//! This module answers the three questions the image loader and the
//! authenticated-variable code ask of the signature databases:
//!
//! - does `db` vouch for this content ([`verify_with_sigdb`]), either by
//!   listing its digest or by holding a certificate that verifies one of the
//!   PKCS#7 signers
//! - is this certificate revoked by `dbx` ([`verify_cert`])
//! - is any signer of this message revoked by `dbx` ([`verify_signers`])
//!
//! Every failure (bad certificate, digest mismatch, RSA failure) is logged
//! and reported as "not verified"; none of these functions return errors.

use super::crypto::{digest_regions, hash_regions, rsa_verify, sha256, ImageRegions};
use super::pkcs7::{Certificate, Pkcs7Message, SignedInfo};
use super::sigstore::{SignatureList, SignatureStore, SignatureType, SHA256_DIGEST_SIZE};

/// SET OF tag replacing the implicit [0] tag of authenticated attributes
const AUTHATTRS_SET_TAG: u8 = 0x31;

/// What is being verified: image regions, optionally signed
#[derive(Debug, Clone, Copy)]
pub struct VerificationContext<'a> {
    /// Signed bytes of the image or variable
    pub regions: &'a ImageRegions<'a>,
    /// Signature over the regions, `None` for unsigned content
    pub message: Option<&'a Pkcs7Message>,
    /// Restrict verification to one signer of `message`
    pub signer: Option<&'a SignedInfo>,
}

impl<'a> VerificationContext<'a> {
    /// Context for unsigned content, verified by digest
    pub fn unsigned(regions: &'a ImageRegions<'a>) -> Self {
        Self {
            regions,
            message: None,
            signer: None,
        }
    }

    /// Context for signed content, trying every signer
    pub fn signed(regions: &'a ImageRegions<'a>, message: &'a Pkcs7Message) -> Self {
        Self {
            regions,
            message: Some(message),
            signer: None,
        }
    }

    /// Restrict the context to a single signer
    pub fn with_signer(self, signer: &'a SignedInfo) -> Self {
        Self {
            signer: Some(signer),
            ..self
        }
    }
}

/// How a database vouched for the content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureMatch {
    /// The content digest is listed
    Digest,
    /// This certificate verified a signer
    Certificate(Certificate),
}

/// A dbx entry revoking a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    /// Time of revocation, when the entry carries one
    pub time: Option<i64>,
}

// ============================================================================
// Hash / Verify
// ============================================================================

/// Verify one signer of `msg` with `cert`'s public key
///
/// With a messageDigest attribute the content (or, for a detached
/// signature, the regions) must hash to the attribute value before the RSA
/// signature over the attributes is checked. Without attributes the RSA
/// signature covers the regions directly.
pub fn signature_verify(
    regions: &ImageRegions<'_>,
    msg: &Pkcs7Message,
    signed_info: &SignedInfo,
    cert: &Certificate,
) -> bool {
    let Some(algorithm) = signed_info.hash_algorithm() else {
        log::debug!(
            "Unsupported digest algorithm {}",
            signed_info.digest_algorithm()
        );
        return false;
    };

    let Some(key) = cert.public_key() else {
        log::debug!("Certificate has no RSA public key");
        return false;
    };

    let Some(expected) = signed_info.message_digest() else {
        let digest = digest_regions(algorithm, regions);
        return rsa_verify(key, algorithm, &digest, signed_info.signature());
    };

    let digest = match msg.data() {
        Some(content) => algorithm.digest(content),
        None => digest_regions(algorithm, regions),
    };

    if digest.as_slice() != expected {
        log::debug!("Message digest doesn't match");
        return false;
    }

    let Some(authattrs) = signed_info.authattrs() else {
        return false;
    };

    let signed = algorithm.digest_chunks([&[AUTHATTRS_SET_TAG][..], authattrs]);
    rsa_verify(key, algorithm, &signed, signed_info.signature())
}

// ============================================================================
// Database Search
// ============================================================================

/// Check a single signature list
///
/// Unsigned content is matched against SHA-256 lists, signed content against
/// X.509 lists. Other combinations never match.
pub fn verify_with_list(
    ctx: &VerificationContext<'_>,
    list: &SignatureList,
) -> Option<SignatureMatch> {
    let Some(msg) = ctx.message else {
        if list.signature_type() != SignatureType::Sha256 {
            log::debug!(
                "Digest search skips {:?} list",
                list.signature_type()
            );
            return None;
        }

        let hash = hash_regions(ctx.regions);
        return list
            .entries()
            .iter()
            .any(|entry| entry.data.len() == SHA256_DIGEST_SIZE && entry.data == hash)
            .then_some(SignatureMatch::Digest);
    };

    if list.signature_type() != SignatureType::X509 {
        log::debug!(
            "Certificate search skips {:?} list",
            list.signature_type()
        );
        return None;
    }

    for entry in list.entries() {
        let cert = match Certificate::parse(&entry.data) {
            Ok(cert) => cert,
            Err(e) => {
                log::warn!("Unparsable certificate in signature list: {:?}", e);
                return None;
            }
        };

        let verified = match ctx.signer {
            Some(si) => signature_verify(ctx.regions, msg, si, &cert),
            None => msg
                .signers()
                .iter()
                .any(|si| signature_verify(ctx.regions, msg, si, &cert)),
        };

        if verified {
            return Some(SignatureMatch::Certificate(cert));
        }
    }

    None
}

/// Find what in `db` vouches for the content, if anything
///
/// Signers are tried in message order, each against every list.
pub fn match_with_sigdb(
    regions: &ImageRegions<'_>,
    msg: Option<&Pkcs7Message>,
    db: &SignatureStore,
) -> Option<SignatureMatch> {
    if db.is_empty() {
        log::debug!("Signature database is empty");
        return None;
    }

    let Some(msg) = msg else {
        let ctx = VerificationContext::unsigned(regions);
        return db.iter().find_map(|list| verify_with_list(&ctx, list));
    };

    let ctx = VerificationContext::signed(regions, msg);
    msg.signers().iter().find_map(|si| {
        let ctx = ctx.with_signer(si);
        db.iter().find_map(|list| verify_with_list(&ctx, list))
    })
}

/// Check whether `db` vouches for the content
pub fn verify_with_sigdb(
    regions: &ImageRegions<'_>,
    msg: Option<&Pkcs7Message>,
    db: &SignatureStore,
) -> bool {
    let verified = match_with_sigdb(regions, msg, db).is_some();
    if !verified {
        log::debug!("No matching signature in database");
    }
    verified
}

/// Look for a revocation of `cert` in one dbx list
///
/// Entries of X.509 SHA-256 lists hold the SHA-256 of a TBSCertificate
/// followed by the time of revocation.
pub fn search_siglist(cert: &Certificate, list: &SignatureList) -> Option<Revocation> {
    if list.signature_type() != SignatureType::X509Sha256 {
        return None;
    }

    let hash = sha256(cert.tbs_certificate());
    list.entries()
        .iter()
        .find(|entry| entry.data.get(..SHA256_DIGEST_SIZE) == Some(&hash[..]))
        .map(|entry| Revocation {
            time: entry
                .data
                .get(SHA256_DIGEST_SIZE..SHA256_DIGEST_SIZE + 8)
                .and_then(|raw| raw.try_into().ok())
                .map(i64::from_le_bytes),
        })
}

/// Check that `cert` is not revoked by `dbx`
pub fn verify_cert(cert: &Certificate, dbx: &SignatureStore) -> bool {
    for list in dbx {
        if let Some(revocation) = search_siglist(cert, list) {
            // TODO: compare the revocation time with the signing time once a
            // time source for signing time is available; any entry revokes.
            log::warn!(
                "Certificate revoked by dbx (revocation time {:?})",
                revocation.time
            );
            return false;
        }
    }
    true
}

/// Check that no signer of `msg` is revoked by `dbx`
///
/// Signers whose certificate is not bundled in the message cannot be
/// looked up and are not rejected here.
pub fn verify_signers(msg: &Pkcs7Message, dbx: &SignatureStore) -> bool {
    msg.signers()
        .iter()
        .filter_map(SignedInfo::signer)
        .all(|cert| verify_cert(cert, dbx))
}

/// Check whether any SHA-256 list in `store` contains the regions' digest
pub fn lookup_digest(regions: &ImageRegions<'_>, store: &SignatureStore) -> bool {
    let hash = hash_regions(regions);
    store
        .entries_of(SignatureType::Sha256)
        .any(|entry| entry == hash)
}
