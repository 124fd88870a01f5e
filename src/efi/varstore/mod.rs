//! UEFI Variable Store interface
//!
//! Signature databases are plain UEFI variables. The verification code only
//! needs to read them, through the [`VariableStore`] trait; the firmware backs
//! it with whatever storage it has (SPI flash, SMMSTORE, an emulated store).
//!
//! [`MemoryVariableStore`] is a simple volatile implementation, used before
//! persistent storage is available and in tests.

use alloc::vec::Vec;
use r_efi::efi::Guid;

/// Maximum variable name length (in UTF-16 code units, including terminator)
pub const MAX_NAME_LEN: usize = 64;

/// Maximum variable data size
///
/// Large enough for a vendor dbx, which holds hundreds of SHA-256 entries.
pub const MAX_DATA_SIZE: usize = 256 * 1024;

/// Maximum number of variables held by a [`MemoryVariableStore`]
pub const MAX_VARIABLES: usize = 128;

/// Error types for variable store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStoreError {
    /// Variable not found
    NotFound,
    /// Variable name too long
    NameTooLong,
    /// Variable data too large
    DataTooLarge,
    /// Store is full
    StoreFull,
    /// Invalid argument
    InvalidArgument,
}

impl From<VarStoreError> for r_efi::efi::Status {
    fn from(err: VarStoreError) -> Self {
        match err {
            VarStoreError::NotFound => r_efi::efi::Status::NOT_FOUND,
            VarStoreError::NameTooLong => r_efi::efi::Status::INVALID_PARAMETER,
            VarStoreError::DataTooLarge => r_efi::efi::Status::OUT_OF_RESOURCES,
            VarStoreError::StoreFull => r_efi::efi::Status::OUT_OF_RESOURCES,
            VarStoreError::InvalidArgument => r_efi::efi::Status::INVALID_PARAMETER,
        }
    }
}

/// Result type for variable store operations
pub type Result<T> = core::result::Result<T, VarStoreError>;

/// Access to UEFI variables by name and vendor GUID
pub trait VariableStore {
    /// Read a variable's data
    ///
    /// Returns `None` if the variable does not exist.
    fn get_variable(&self, name: &[u16], guid: &Guid) -> Option<Vec<u8>>;

    /// Create, replace or delete a variable
    ///
    /// Empty `data` deletes the variable, as with `SetVariable()`.
    fn set_variable(
        &mut self,
        name: &[u16],
        guid: &Guid,
        attributes: u32,
        data: &[u8],
    ) -> Result<()>;
}

// ============================================================================
// UCS-2 String Utilities
// ============================================================================

/// Get the effective length of a UCS-2 string slice (not including null terminator)
///
/// Returns the position of the first null terminator, or the slice length if no null found.
#[inline]
pub fn ucs2_len(s: &[u16]) -> usize {
    s.iter().position(|&c| c == 0).unwrap_or(s.len())
}

/// Compare two UCS-2 string slices for equality
///
/// Compares up to the first null terminator in each string.
#[inline]
pub fn ucs2_eq(a: &[u16], b: &[u16]) -> bool {
    let a_len = ucs2_len(a);
    let b_len = ucs2_len(b);

    a_len == b_len && a[..a_len] == b[..b_len]
}

// ============================================================================
// In-memory store
// ============================================================================

/// A variable held by [`MemoryVariableStore`]
#[derive(Debug, Clone)]
pub struct VariableRecord {
    /// Variable vendor GUID
    pub guid: Guid,
    /// Variable name (UTF-16, without terminator)
    pub name: Vec<u16>,
    /// Variable attributes (EFI_VARIABLE_* flags)
    pub attributes: u32,
    /// Variable data
    pub data: Vec<u8>,
}

impl VariableRecord {
    /// Check if this record matches a given name and GUID
    pub fn matches(&self, guid: &Guid, name: &[u16]) -> bool {
        self.guid == *guid && ucs2_eq(&self.name, name)
    }
}

/// Volatile variable store
#[derive(Debug, Default)]
pub struct MemoryVariableStore {
    records: Vec<VariableRecord>,
}

impl MemoryVariableStore {
    /// Create an empty store
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Number of variables currently stored
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store holds no variables
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a variable record
    pub fn find(&self, guid: &Guid, name: &[u16]) -> Option<&VariableRecord> {
        self.records.iter().find(|r| r.matches(guid, name))
    }
}

impl VariableStore for MemoryVariableStore {
    fn get_variable(&self, name: &[u16], guid: &Guid) -> Option<Vec<u8>> {
        self.find(guid, name).map(|r| r.data.clone())
    }

    /// Deleting a variable that does not exist returns
    /// [`VarStoreError::NotFound`].
    fn set_variable(
        &mut self,
        name: &[u16],
        guid: &Guid,
        attributes: u32,
        data: &[u8],
    ) -> Result<()> {
        let name_len = ucs2_len(name);
        if name_len == 0 {
            return Err(VarStoreError::InvalidArgument);
        }
        if name_len + 1 > MAX_NAME_LEN {
            return Err(VarStoreError::NameTooLong);
        }
        if data.len() > MAX_DATA_SIZE {
            return Err(VarStoreError::DataTooLarge);
        }

        let existing = self.records.iter().position(|r| r.matches(guid, name));

        if data.is_empty() {
            let index = existing.ok_or(VarStoreError::NotFound)?;
            self.records.remove(index);
            log::debug!("varstore: deleted variable ({} left)", self.records.len());
            return Ok(());
        }

        match existing {
            Some(index) => {
                let record = &mut self.records[index];
                record.attributes = attributes;
                record.data = data.to_vec();
            }
            None => {
                if self.records.len() >= MAX_VARIABLES {
                    log::warn!("varstore: store full ({} variables)", MAX_VARIABLES);
                    return Err(VarStoreError::StoreFull);
                }
                self.records.push(VariableRecord {
                    guid: *guid,
                    name: name[..name_len].to_vec(),
                    attributes,
                    data: data.to_vec(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VENDOR: Guid = Guid::from_fields(
        0x12345678,
        0x9ABC,
        0xDEF0,
        0x11,
        0x22,
        &[0x33, 0x44, 0x55, 0x66, 0x77, 0x88],
    );

    const NAME: &[u16] = &[0x46, 0x6F, 0x6F, 0x00]; // "Foo\0"

    #[test]
    fn test_ucs2_eq_ignores_trailing_nuls() {
        assert!(ucs2_eq(&[0x46, 0x6F, 0x6F], NAME));
        assert!(ucs2_eq(&[0x46, 0x6F, 0x6F, 0, 0, 0], NAME));
        assert!(!ucs2_eq(&[0x46, 0x6F], NAME));
        assert_eq!(ucs2_len(&[0x41, 0x00, 0x42]), 1);
    }

    #[test]
    fn test_set_get_replace_delete() {
        let mut store = MemoryVariableStore::new();
        assert!(store.get_variable(NAME, &VENDOR).is_none());

        store.set_variable(NAME, &VENDOR, 7, &[1, 2, 3]).unwrap();
        assert_eq!(store.get_variable(NAME, &VENDOR), Some(vec![1, 2, 3]));

        store.set_variable(NAME, &VENDOR, 7, &[4]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_variable(NAME, &VENDOR), Some(vec![4]));

        store.set_variable(NAME, &VENDOR, 7, &[]).unwrap();
        assert!(store.is_empty());
        assert_eq!(
            store.set_variable(NAME, &VENDOR, 7, &[]),
            Err(VarStoreError::NotFound)
        );
    }

    #[test]
    fn test_lookup_is_scoped_by_guid() {
        let mut store = MemoryVariableStore::new();
        store.set_variable(NAME, &VENDOR, 0, &[1]).unwrap();
        let other = Guid::from_bytes(&[0u8; 16]);
        assert!(store.get_variable(NAME, &other).is_none());
    }

    #[test]
    fn test_limits() {
        let mut store = MemoryVariableStore::new();
        let long_name = [0x41u16; MAX_NAME_LEN];
        assert_eq!(
            store.set_variable(&long_name, &VENDOR, 0, &[1]),
            Err(VarStoreError::NameTooLong)
        );
        assert_eq!(
            store.set_variable(&[0], &VENDOR, 0, &[1]),
            Err(VarStoreError::InvalidArgument)
        );
        let big = vec![0u8; MAX_DATA_SIZE + 1];
        assert_eq!(
            store.set_variable(NAME, &VENDOR, 0, &big),
            Err(VarStoreError::DataTooLarge)
        );
        assert_eq!(
            r_efi::efi::Status::from(VarStoreError::DataTooLarge),
            r_efi::efi::Status::OUT_OF_RESOURCES
        );
    }
}
