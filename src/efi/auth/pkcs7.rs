//! PKCS#7 / X.509 Parsing
//!
//! Wraps the RustCrypto `cms` and `x509-cert` decoders and keeps only what
//! signature verification looks at: raw TBS bytes, issuer/serial and key
//! identifier for signer lookup, the RSA key, and per-signer digests and
//! authenticated attributes.

use super::crypto::HashAlgorithm;
use super::{parse_der_length, split_der_tlv, AuthError};
use alloc::vec::Vec;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::OctetString;
use der::{Any, Decode, Encode};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use x509_cert::ext::pkix::SubjectKeyIdentifier;

/// id-signedData
const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// pkcs-9 messageDigest attribute
const ID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// rsaEncryption
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
/// sha1WithRSAEncryption
const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
/// sha256WithRSAEncryption
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// `[0] IMPLICIT` tag of SignedData certificates and SignerInfo signedAttrs
const CONTEXT_0_CONSTRUCTED: u8 = 0xA0;
/// SET OF tag
const SET_TAG: u8 = 0x31;
/// SEQUENCE tag, the only CertificateChoices we use
const SEQUENCE_TAG: u8 = 0x30;

// ============================================================================
// X.509 Certificates
// ============================================================================

/// Parsed X.509 certificate
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    tbs: Vec<u8>,
    issuer: Vec<u8>,
    subject: Vec<u8>,
    serial_number: Vec<u8>,
    subject_key_id: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
}

impl Certificate {
    /// Parse a DER-encoded certificate
    ///
    /// Certificates with a non-RSA key parse fine but can never verify a
    /// signature.
    pub fn parse(der: &[u8]) -> Result<Self, AuthError> {
        let cert = x509_cert::Certificate::from_der(der).map_err(|e| {
            log::debug!("Failed to parse X.509 certificate: {:?}", e);
            AuthError::CertificateParseError
        })?;
        Self::from_x509(&cert, der)
    }

    fn from_x509(cert: &x509_cert::Certificate, der: &[u8]) -> Result<Self, AuthError> {
        let tbs = &cert.tbs_certificate;

        let issuer = tbs
            .issuer
            .to_der()
            .map_err(|_| AuthError::CertificateParseError)?;
        let subject = tbs
            .subject
            .to_der()
            .map_err(|_| AuthError::CertificateParseError)?;

        let subject_key_id = match &tbs.extensions {
            Some(extensions) => extensions
                .iter()
                .find(|ext| ext.extn_id == SubjectKeyIdentifier::OID)
                .map(|ext| SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes()))
                .transpose()
                .map_err(|_| AuthError::CertificateParseError)?
                .map(|skid| skid.0.as_bytes().to_vec()),
            None => None,
        };

        let spki = &tbs.subject_public_key_info;
        let public_key = if spki.algorithm.oid == RSA_ENCRYPTION {
            let spki_der = spki.to_der().map_err(|_| AuthError::CertificateParseError)?;
            let key = RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| {
                log::debug!("Failed to decode RSA public key: {:?}", e);
                AuthError::CertificateParseError
            })?;
            Some(key)
        } else {
            log::debug!("Certificate key algorithm {} is not RSA", spki.algorithm.oid);
            None
        };

        Ok(Self {
            der: der.to_vec(),
            tbs: raw_tbs_certificate(der)?.to_vec(),
            issuer,
            subject,
            serial_number: tbs.serial_number.as_bytes().to_vec(),
            subject_key_id,
            public_key,
        })
    }

    /// Full DER encoding
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Raw TBSCertificate bytes, exactly as signed by the issuer
    pub fn tbs_certificate(&self) -> &[u8] {
        &self.tbs
    }

    /// DER-encoded issuer name
    pub fn issuer(&self) -> &[u8] {
        &self.issuer
    }

    /// DER-encoded subject name
    pub fn subject(&self) -> &[u8] {
        &self.subject
    }

    /// Serial number bytes
    pub fn serial_number(&self) -> &[u8] {
        &self.serial_number
    }

    /// Subject key identifier extension, if present
    pub fn subject_key_id(&self) -> Option<&[u8]> {
        self.subject_key_id.as_deref()
    }

    /// RSA public key, if the certificate carries one
    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        self.public_key.as_ref()
    }

    fn matches(&self, sid: &SignerIdentifier) -> bool {
        match sid {
            SignerIdentifier::IssuerAndSerialNumber(ias) => {
                ias.serial_number.as_bytes() == self.serial_number.as_slice()
                    && ias
                        .issuer
                        .to_der()
                        .is_ok_and(|issuer| issuer == self.issuer)
            }
            SignerIdentifier::SubjectKeyIdentifier(skid) => {
                self.subject_key_id() == Some(skid.0.as_bytes())
            }
        }
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

/// Contents of a constructed TLV, without tag and length
fn tlv_contents(tlv: &[u8]) -> Result<&[u8], AuthError> {
    let (_, header_len) = parse_der_length(&tlv[1..])?;
    Ok(&tlv[1 + header_len..])
}

/// Split the contents of a constructed value into its element TLVs
fn der_elements(mut contents: &[u8]) -> Result<Vec<&[u8]>, AuthError> {
    let mut elements = Vec::new();
    while !contents.is_empty() {
        let (element, rest) = split_der_tlv(contents)?;
        elements.push(element);
        contents = rest;
    }
    Ok(elements)
}

/// Slice the TBSCertificate TLV out of a certificate encoding
fn raw_tbs_certificate(der: &[u8]) -> Result<&[u8], AuthError> {
    let (outer, _) = split_der_tlv(der)?;
    let (tbs, _) = split_der_tlv(tlv_contents(outer)?)?;
    Ok(tbs)
}

// ============================================================================
// Signer Infos
// ============================================================================

/// One signer of a PKCS#7 message
#[derive(Debug, Clone)]
pub struct SignedInfo {
    digest_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
    message_digest: Option<Vec<u8>>,
    authattrs: Option<Vec<u8>>,
    signer: Option<Certificate>,
}

impl SignedInfo {
    /// Decode one SignerInfo, keeping its signed attributes as encoded
    fn parse(raw: &[u8], certificates: &[Certificate]) -> Result<Self, AuthError> {
        let si = SignerInfo::from_der(raw).map_err(|e| {
            log::debug!("Failed to parse PKCS#7 SignerInfo: {:?}", e);
            AuthError::InvalidHeader
        })?;

        let sig_oid = si.signature_algorithm.oid;
        if sig_oid != RSA_ENCRYPTION && sig_oid != SHA1_WITH_RSA && sig_oid != SHA256_WITH_RSA {
            log::debug!("Unsupported signature algorithm {}", sig_oid);
            return Err(AuthError::UnsupportedAlgorithm);
        }

        let message_digest = match &si.signed_attrs {
            Some(attrs) => attrs
                .iter()
                .find(|attr| attr.oid == ID_MESSAGE_DIGEST)
                .and_then(|attr| attr.values.iter().next())
                .map(decode_octet_string)
                .transpose()?,
            None => None,
        };
        // SET OF without its tag; it gets re-tagged when hashed
        let authattrs = raw_signed_attrs(raw)
            .map_err(|_| AuthError::InvalidHeader)?
            .map(|attrs| attrs[1..].to_vec());

        let signer = certificates.iter().find(|c| c.matches(&si.sid)).cloned();
        if signer.is_none() {
            log::debug!("PKCS#7 signer certificate not included in message");
        }

        Ok(Self {
            digest_algorithm: si.digest_alg.oid,
            signature: si.signature.as_bytes().to_vec(),
            message_digest,
            authattrs,
            signer,
        })
    }

    /// Declared digest algorithm OID
    pub fn digest_algorithm(&self) -> ObjectIdentifier {
        self.digest_algorithm
    }

    /// Digest algorithm, if it is one we can verify
    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        HashAlgorithm::from_oid(&self.digest_algorithm)
    }

    /// Encrypted digest
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Value of the messageDigest authenticated attribute
    pub fn message_digest(&self) -> Option<&[u8]> {
        self.message_digest.as_deref()
    }

    /// Authenticated attributes, DER SET OF without its leading tag byte
    pub fn authattrs(&self) -> Option<&[u8]> {
        self.authattrs.as_deref()
    }

    /// Certificate from the message that this signer identifies
    pub fn signer(&self) -> Option<&Certificate> {
        self.signer.as_ref()
    }
}

/// Slice the `[0] IMPLICIT` signedAttrs TLV out of a SignerInfo encoding
///
/// The decoder sorts SET OF elements, so the signed bytes have to come from
/// the wire rather than from a re-encoding.
fn raw_signed_attrs(raw: &[u8]) -> Result<Option<&[u8]>, AuthError> {
    let (outer, _) = split_der_tlv(raw)?;
    let fields = der_elements(tlv_contents(outer)?)?;
    // version, sid, digestAlgorithm, [0] signedAttrs OPTIONAL
    Ok(fields
        .get(3)
        .copied()
        .filter(|field| field[0] == CONTEXT_0_CONSTRUCTED))
}

fn decode_octet_string(value: &Any) -> Result<Vec<u8>, AuthError> {
    let der = value.to_der().map_err(|_| AuthError::InvalidHeader)?;
    let octets = OctetString::from_der(&der).map_err(|_| AuthError::InvalidHeader)?;
    Ok(octets.as_bytes().to_vec())
}

// ============================================================================
// Messages
// ============================================================================

/// Parsed PKCS#7 SignedData message
#[derive(Debug, Clone)]
pub struct Pkcs7Message {
    content_type: ObjectIdentifier,
    econtent: Option<Any>,
    certificates: Vec<Certificate>,
    signers: Vec<SignedInfo>,
}

impl Pkcs7Message {
    /// Parse a DER-encoded PKCS#7 message
    ///
    /// Accepts a ContentInfo-wrapped SignedData, or a bare SignedData as
    /// found in some authenticated variable payloads.
    pub fn parse(data: &[u8]) -> Result<Self, AuthError> {
        let raw = match ContentInfo::from_der(data) {
            Ok(content_info) => {
                if content_info.content_type != ID_SIGNED_DATA {
                    log::debug!(
                        "PKCS#7 content type {} is not signedData",
                        content_info.content_type
                    );
                    return Err(AuthError::InvalidHeader);
                }
                content_info
                    .content
                    .to_der()
                    .map_err(|_| AuthError::InvalidHeader)?
            }
            Err(e) => {
                log::debug!("No PKCS#7 ContentInfo ({:?}), trying bare SignedData", e);
                data.to_vec()
            }
        };

        let signed_data = SignedData::from_der(&raw).map_err(|e| {
            log::debug!("Failed to parse PKCS#7 SignedData: {:?}", e);
            AuthError::InvalidHeader
        })?;

        // Certificates and signer infos are taken from the encoding itself
        let fields = RawSignedData::split(&raw).map_err(|_| AuthError::InvalidHeader)?;

        let mut certificates = Vec::new();
        for der in fields.certificates {
            if der[0] != SEQUENCE_TAG {
                log::debug!("Skipping non-X.509 certificate choice");
                continue;
            }
            certificates.push(Certificate::parse(der)?);
        }

        let signers = fields
            .signer_infos
            .into_iter()
            .map(|si| SignedInfo::parse(si, &certificates))
            .collect::<Result<Vec<_>, _>>()?;

        let encap = signed_data.encap_content_info;
        Ok(Self {
            content_type: encap.econtent_type,
            econtent: encap.econtent,
            certificates,
            signers,
        })
    }

    /// Type of the encapsulated content
    pub fn content_type(&self) -> ObjectIdentifier {
        self.content_type
    }

    /// Encapsulated content bytes, `None` for a detached signature
    ///
    /// For an OCTET STRING this is the wrapped data; for any other
    /// type it is the contents without the outer tag and length.
    pub fn data(&self) -> Option<&[u8]> {
        self.econtent.as_ref().map(|content| content.value())
    }

    /// Encapsulated content including its tag
    pub fn econtent(&self) -> Option<&Any> {
        self.econtent.as_ref()
    }

    /// Certificates bundled with the message
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Signers in message order
    pub fn signers(&self) -> &[SignedInfo] {
        &self.signers
    }
}

/// Element TLVs of the SignedData SET fields, exactly as encoded
struct RawSignedData<'a> {
    certificates: Vec<&'a [u8]>,
    signer_infos: Vec<&'a [u8]>,
}

impl<'a> RawSignedData<'a> {
    fn split(der: &'a [u8]) -> Result<Self, AuthError> {
        let (outer, _) = split_der_tlv(der)?;
        let fields = der_elements(tlv_contents(outer)?)?;

        let mut raw = Self {
            certificates: Vec::new(),
            signer_infos: Vec::new(),
        };
        // version, digestAlgorithms and encapContentInfo come first
        for field in fields.into_iter().skip(3) {
            match field[0] {
                CONTEXT_0_CONSTRUCTED => raw.certificates = der_elements(tlv_contents(field)?)?,
                SET_TAG => raw.signer_infos = der_elements(tlv_contents(field)?)?,
                _ => {}
            }
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::super::crypto::sha256;
    use super::super::testdata::*;
    use super::*;

    #[test]
    fn test_parse_certificate() {
        let cert = Certificate::parse(CERT_A).unwrap();
        assert_eq!(sha256(cert.tbs_certificate()), *TBS_A_SHA256);
        assert_eq!(cert.as_der(), CERT_A);
        assert_eq!(cert.issuer(), cert.subject());
        assert!(cert.public_key().is_some());
        assert!(cert.subject_key_id().is_some());

        let other = Certificate::parse(CERT_B).unwrap();
        assert_ne!(cert, other);
        assert_ne!(cert.subject(), other.subject());
    }

    #[test]
    fn test_reject_bad_certificates() {
        assert!(Certificate::parse(&[]).is_err());
        assert!(Certificate::parse(&CERT_A[..CERT_A.len() - 1]).is_err());
        assert!(Certificate::parse(&[0x30, 0x03, 0x02, 0x01, 0x05]).is_err());
    }

    #[test]
    fn test_detached_with_attributes() {
        let msg = Pkcs7Message::parse(P7_A_ATTRS).unwrap();
        assert!(msg.data().is_none());
        assert_eq!(msg.certificates().len(), 1);
        assert_eq!(msg.signers().len(), 1);

        let si = &msg.signers()[0];
        assert_eq!(si.hash_algorithm(), Some(HashAlgorithm::Sha256));
        assert_eq!(si.message_digest(), Some(&sha256(PAYLOAD)[..]));
        assert_eq!(si.signature().len(), 256);
        assert_eq!(si.signer().map(Certificate::as_der), Some(CERT_A));

        // Raw SET OF without the 0x31 tag: starts with its length
        let authattrs = si.authattrs().unwrap();
        let (len, len_size) = super::super::parse_der_length(authattrs).unwrap();
        assert_eq!(len + len_size, authattrs.len());
    }

    #[test]
    fn test_embedded_content() {
        let msg = Pkcs7Message::parse(P7_A_EMBEDDED).unwrap();
        assert_eq!(msg.data(), Some(PAYLOAD));
        assert_eq!(
            msg.content_type(),
            ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1")
        );
    }

    #[test]
    fn test_without_attributes() {
        let msg = Pkcs7Message::parse(P7_A_NOATTR).unwrap();
        let si = &msg.signers()[0];
        assert!(si.message_digest().is_none());
        assert!(si.authattrs().is_none());
        assert!(si.signer().is_some());
    }

    #[test]
    fn test_signer_by_key_identifier() {
        let msg = Pkcs7Message::parse(P7_A_KEYID).unwrap();
        let cert = Certificate::parse(CERT_A).unwrap();
        assert_eq!(msg.signers()[0].signer(), Some(&cert));
    }

    #[test]
    fn test_two_signers_resolve_their_own_certificates() {
        let msg = Pkcs7Message::parse(P7_AB).unwrap();
        assert_eq!(msg.certificates().len(), 2);
        assert_eq!(msg.signers().len(), 2);

        let mut signers: Vec<&[u8]> = msg
            .signers()
            .iter()
            .map(|si| si.signer().unwrap().as_der())
            .collect();
        signers.sort();
        let mut expected = [CERT_A, CERT_B];
        expected.sort();
        assert_eq!(signers, expected);
    }

    #[test]
    fn test_unknown_digest_still_parses() {
        let msg = Pkcs7Message::parse(P7_A_SHA384).unwrap();
        let si = &msg.signers()[0];
        assert_eq!(si.hash_algorithm(), None);
        assert_eq!(si.message_digest().map(<[u8]>::len), Some(48));
    }

    #[test]
    fn test_bare_signed_data() {
        // ContentInfo ::= SEQUENCE { contentType OID, content [0] EXPLICIT SignedData }
        let (outer, _) = split_der_tlv(P7_A_ATTRS).unwrap();
        let (_, len_size) = super::super::parse_der_length(&outer[1..]).unwrap();
        let (_, rest) = split_der_tlv(&outer[1 + len_size..]).unwrap();
        let (_, len_size) = super::super::parse_der_length(&rest[1..]).unwrap();
        let bare = &rest[1 + len_size..];
        assert_eq!(bare[0], 0x30);

        let msg = Pkcs7Message::parse(bare).unwrap();
        assert_eq!(msg.signers().len(), 1);
        assert!(msg.signers()[0].signer().is_some());
    }

    #[test]
    fn test_bundled_certificate_kept_as_encoded() {
        // cert_d has a multi-valued RDN stored out of DER order
        let msg = Pkcs7Message::parse(P7_D_ATTRS).unwrap();
        let cert = &msg.certificates()[0];
        assert_eq!(cert.as_der(), CERT_D);
        assert_eq!(sha256(cert.tbs_certificate()), *TBS_D_SHA256);
        assert_eq!(msg.signers()[0].signer(), Some(cert));
        assert_eq!(Certificate::parse(CERT_D).as_ref(), Ok(cert));
    }

    #[test]
    fn test_signed_attributes_kept_as_encoded() {
        let sorted = Pkcs7Message::parse(P7_D_ATTRS).unwrap();
        let unsorted = Pkcs7Message::parse(P7_D_UNSORTED).unwrap();
        let sorted = sorted.signers()[0].authattrs().unwrap();
        let unsorted = unsorted.signers()[0].authattrs().unwrap();

        // Same attributes, different order on the wire
        assert_eq!(sorted.len(), unsorted.len());
        assert_ne!(sorted, unsorted);
        assert!(P7_D_UNSORTED
            .windows(unsorted.len())
            .any(|window| window == unsorted));
    }

    #[test]
    fn test_reject_malformed_messages() {
        assert_eq!(Pkcs7Message::parse(&[]).err(), Some(AuthError::InvalidHeader));
        assert!(Pkcs7Message::parse(&P7_A_ATTRS[..P7_A_ATTRS.len() / 2]).is_err());
        assert!(Pkcs7Message::parse(CERT_A).is_err());
    }
}
