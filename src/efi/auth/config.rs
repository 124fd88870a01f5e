//! Verification limits
//!
//! Every buffer handed to the verifier comes from outside the firmware (a
//! variable written by the OS, an image read from disk), so each input is
//! bounded before it is parsed.

/// Limits applied while loading databases and building image regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Maximum number of regions an image may be split into
    pub max_image_regions: usize,
    /// Maximum size of a signature database variable
    pub max_database_size: usize,
    /// Maximum size of a PKCS#7 blob embedded in an image
    pub max_pkcs7_size: usize,
}

impl VerifyConfig {
    /// Default number of image regions
    ///
    /// Header pieces, one per section and the trailing data.
    pub const DEFAULT_MAX_IMAGE_REGIONS: usize = 64;
    /// Default database size limit (matches the variable store limit)
    pub const DEFAULT_MAX_DATABASE_SIZE: usize = crate::efi::varstore::MAX_DATA_SIZE;
    /// Default PKCS#7 size limit
    pub const DEFAULT_MAX_PKCS7_SIZE: usize = 64 * 1024;

    /// Create a configuration with the default limits
    pub const fn new() -> Self {
        Self {
            max_image_regions: Self::DEFAULT_MAX_IMAGE_REGIONS,
            max_database_size: Self::DEFAULT_MAX_DATABASE_SIZE,
            max_pkcs7_size: Self::DEFAULT_MAX_PKCS7_SIZE,
        }
    }

    /// Override the image region limit
    pub const fn with_max_image_regions(mut self, max: usize) -> Self {
        self.max_image_regions = max;
        self
    }

    /// Override the database size limit
    pub const fn with_max_database_size(mut self, max: usize) -> Self {
        self.max_database_size = max;
        self
    }

    /// Override the PKCS#7 size limit
    pub const fn with_max_pkcs7_size(mut self, max: usize) -> Self {
        self.max_pkcs7_size = max;
        self
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VerifyConfig::default();
        assert_eq!(config.max_image_regions, 64);
        assert_eq!(config.max_database_size, 256 * 1024);
        assert_eq!(config.max_pkcs7_size, 64 * 1024);

        let tight = config.with_max_image_regions(4).with_max_database_size(100);
        assert_eq!(tight.max_image_regions, 4);
        assert_eq!(tight.max_database_size, 100);
        assert_eq!(tight.max_pkcs7_size, config.max_pkcs7_size);
    }
}
