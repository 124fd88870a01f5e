//! Secure Boot Variables
//!
//! This module maps the Secure Boot key databases to their UEFI variables
//! and loads them into [`SignatureStore`]s for verification.

use super::config::VerifyConfig;
use super::crypto::ImageRegions;
use super::pkcs7::Pkcs7Message;
use super::signature::verify_with_sigdb;
use super::sigstore::SignatureStore;
use super::{AuthError, EFI_GLOBAL_VARIABLE_GUID, EFI_IMAGE_SECURITY_DATABASE_GUID};
use crate::efi::varstore::{ucs2_eq, VariableStore};
use r_efi::efi::Guid;

// ============================================================================
// Secure Boot Variable Names
// ============================================================================

/// Platform Key variable name (UCS-2)
pub const PK_NAME: &[u16] = &[0x50, 0x4B, 0x00]; // "PK\0"

/// Key Exchange Key variable name (UCS-2)
pub const KEK_NAME: &[u16] = &[0x4B, 0x45, 0x4B, 0x00]; // "KEK\0"

/// Signature database variable name (UCS-2)
pub const DB_NAME: &[u16] = &[0x64, 0x62, 0x00]; // "db\0"

/// Forbidden signature database variable name (UCS-2)
pub const DBX_NAME: &[u16] = &[0x64, 0x62, 0x78, 0x00]; // "dbx\0"

/// Secure Boot variable type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureBootVariable {
    /// Platform Key
    PK,
    /// Key Exchange Key
    KEK,
    /// Allowed signature database
    Db,
    /// Forbidden signature database
    Dbx,
}

impl SecureBootVariable {
    /// Variable name, NUL-terminated
    pub fn name(&self) -> &'static [u16] {
        match self {
            SecureBootVariable::PK => PK_NAME,
            SecureBootVariable::KEK => KEK_NAME,
            SecureBootVariable::Db => DB_NAME,
            SecureBootVariable::Dbx => DBX_NAME,
        }
    }

    /// Get the GUID for this variable
    pub fn guid(&self) -> Guid {
        match self {
            SecureBootVariable::PK | SecureBootVariable::KEK => EFI_GLOBAL_VARIABLE_GUID,
            SecureBootVariable::Db | SecureBootVariable::Dbx => EFI_IMAGE_SECURITY_DATABASE_GUID,
        }
    }

    /// Look up a database by variable name alone
    ///
    /// Used where the caller only has a name ("db", "dbx", ...), as when a
    /// database is selected by name for parsing.
    pub fn from_name(name: &[u16]) -> Option<Self> {
        [Self::PK, Self::KEK, Self::Db, Self::Dbx]
            .into_iter()
            .find(|var| ucs2_eq(name, var.name()))
    }

    /// Databases whose certificates may authorize an update of this variable,
    /// in the order they are tried
    pub fn authorizing_databases(&self) -> &'static [SecureBootVariable] {
        match self {
            // PK is self-signed; KEK is authorized by PK
            SecureBootVariable::PK | SecureBootVariable::KEK => &[SecureBootVariable::PK],
            // db and dbx are authorized by KEK, or PK as a fallback
            SecureBootVariable::Db | SecureBootVariable::Dbx => {
                &[SecureBootVariable::KEK, SecureBootVariable::PK]
            }
        }
    }
}

/// Identify which key database a variable belongs to
pub fn identify_key_database(name: &[u16], guid: &Guid) -> Option<SecureBootVariable> {
    SecureBootVariable::from_name(name).filter(|var| var.guid() == *guid)
}

// ============================================================================
// Loading
// ============================================================================

/// Read and parse a signature database variable
///
/// A variable that does not exist is an empty database.
pub fn load_signature_database<S: VariableStore + ?Sized>(
    store: &S,
    var: SecureBootVariable,
    config: &VerifyConfig,
) -> Result<SignatureStore, AuthError> {
    let Some(data) = store.get_variable(var.name(), &var.guid()) else {
        log::debug!("{:?} not set, using empty database", var);
        return Ok(SignatureStore::new());
    };

    if data.len() > config.max_database_size {
        log::warn!(
            "{:?} is {} bytes, limit is {}",
            var,
            data.len(),
            config.max_database_size
        );
        return Err(AuthError::BufferTooSmall);
    }

    let db = SignatureStore::parse(&data)?;
    log::debug!(
        "Loaded {:?}: {} lists, {} entries",
        var,
        db.len(),
        db.entry_count()
    );
    Ok(db)
}

/// Check the signature on an update of a Secure Boot variable
///
/// `regions` describe the signed payload (name, GUID, attributes, timestamp
/// and new data). The signature must chain to one of the variable's
/// authorizing databases.
pub fn verify_variable_update<S: VariableStore + ?Sized>(
    store: &S,
    var: SecureBootVariable,
    regions: &ImageRegions<'_>,
    msg: &Pkcs7Message,
    config: &VerifyConfig,
) -> bool {
    for &authority in var.authorizing_databases() {
        let truststore = match load_signature_database(store, authority, config) {
            Ok(db) => db,
            Err(e) => {
                log::warn!("Cannot load {:?}: {:?}", authority, e);
                continue;
            }
        };

        if verify_with_sigdb(regions, Some(msg), &truststore) {
            log::info!("{:?} update authorized by {:?}", var, authority);
            return true;
        }
    }

    log::warn!("{:?} update not authorized", var);
    false
}

#[cfg(test)]
mod tests {
    use super::super::sigstore::tests::{raw_list, OWNER};
    use super::super::testdata::*;
    use super::super::EFI_CERT_X509_GUID;
    use super::*;
    use crate::efi::varstore::MemoryVariableStore;
    use alloc::vec::Vec;

    fn x509_list(cert: &[u8]) -> Vec<u8> {
        let mut sig = OWNER.as_bytes().to_vec();
        sig.extend_from_slice(cert);
        raw_list(&EFI_CERT_X509_GUID, &[], sig.len() as u32, &[&sig], None)
    }

    fn set(store: &mut MemoryVariableStore, var: SecureBootVariable, data: &[u8]) {
        store.set_variable(var.name(), &var.guid(), 0x27, data).unwrap();
    }

    #[test]
    fn test_identify_key_database() {
        assert_eq!(
            identify_key_database(PK_NAME, &EFI_GLOBAL_VARIABLE_GUID),
            Some(SecureBootVariable::PK)
        );
        assert_eq!(
            identify_key_database(&[0x64, 0x62, 0x78], &EFI_IMAGE_SECURITY_DATABASE_GUID),
            Some(SecureBootVariable::Dbx)
        );
        // Right name, wrong vendor
        assert_eq!(identify_key_database(DB_NAME, &EFI_GLOBAL_VARIABLE_GUID), None);
        assert_eq!(
            identify_key_database(&[0x64, 0x62, 0x74, 0x00], &EFI_IMAGE_SECURITY_DATABASE_GUID),
            None
        );
        assert_eq!(SecureBootVariable::from_name(KEK_NAME), Some(SecureBootVariable::KEK));
    }

    #[test]
    fn test_load_missing_variable_is_empty() {
        let store = MemoryVariableStore::new();
        let db = load_signature_database(&store, SecureBootVariable::Db, &VerifyConfig::default())
            .unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_load_and_limits() {
        let mut store = MemoryVariableStore::new();
        let data = x509_list(CERT_A);
        set(&mut store, SecureBootVariable::Db, &data);

        let db = load_signature_database(&store, SecureBootVariable::Db, &VerifyConfig::default())
            .unwrap();
        assert_eq!(db.entry_count(), 1);
        assert_eq!(db.lists()[0].entries()[0].data, CERT_A);

        let tight = VerifyConfig::default().with_max_database_size(data.len() - 1);
        assert_eq!(
            load_signature_database(&store, SecureBootVariable::Db, &tight),
            Err(AuthError::BufferTooSmall)
        );

        set(&mut store, SecureBootVariable::Dbx, &data[..data.len() - 3]);
        assert_eq!(
            load_signature_database(&store, SecureBootVariable::Dbx, &VerifyConfig::default()),
            Err(AuthError::InvalidSignatureList)
        );
    }

    #[test]
    fn test_variable_update_authority() {
        let config = VerifyConfig::default();
        let msg = Pkcs7Message::parse(P7_A_ATTRS).unwrap();
        let regions = ImageRegions::single(PAYLOAD);

        let mut store = MemoryVariableStore::new();
        set(&mut store, SecureBootVariable::PK, &x509_list(CERT_A));
        set(&mut store, SecureBootVariable::KEK, &x509_list(CERT_B));

        // db updates fall back to PK
        assert!(verify_variable_update(
            &store,
            SecureBootVariable::Db,
            &regions,
            &msg,
            &config
        ));
        assert!(verify_variable_update(
            &store,
            SecureBootVariable::KEK,
            &regions,
            &msg,
            &config
        ));

        // Only KEK and PK count, never db itself
        let mut store = MemoryVariableStore::new();
        set(&mut store, SecureBootVariable::Db, &x509_list(CERT_A));
        assert!(!verify_variable_update(
            &store,
            SecureBootVariable::Db,
            &regions,
            &msg,
            &config
        ));
    }
}
