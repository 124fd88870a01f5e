//! UEFI Secure Boot support
//!
//! This module groups the authenticated-variable / signature-database logic
//! ([`auth`]) and the variable store interface it reads databases from
//! ([`varstore`]).

pub mod auth;
pub mod varstore;
