//! efi-sigverify - UEFI Secure Boot signature verification
//!
//! This library implements the signature-database side of UEFI Secure Boot
//! for firmware: parsing `EFI_SIGNATURE_LIST` databases (PK, KEK, db, dbx),
//! hashing image regions, verifying PKCS#7 signer infos against X.509
//! certificates, and checking certificates against the forbidden database.
//!
//! The entry points consumed by image loading and authenticated-variable
//! code live in [`efi::auth`]:
//!
//! - [`efi::auth::verify_with_sigdb`] - is an image or variable authorized by db?
//! - [`efi::auth::verify_cert`] - is a certificate absent from dbx?
//! - [`efi::auth::verify_signers`] - are all signers of a message absent from dbx?

#![cfg_attr(not(test), no_std)]

// Enable alloc crate for heap allocations (needed for RustCrypto)
extern crate alloc;

pub mod efi;
pub mod logger;
