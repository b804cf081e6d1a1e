// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec configuration.

use super::error::ConfigError;

/// Default recursion limit for decoding nested values.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Encoder/decoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityConfig {
    /// Width of type ids in the dictionary (1, 2 or 4 bytes).
    pub type_id_width: u8,

    /// Width of pointer offsets in the data section (2, 4 or 8 bytes).
    pub pointer_width: u8,

    /// Reject streams with a newer minor version instead of warning.
    pub strict_minor: bool,

    /// Maximum nesting of records, arrays and pointers while decoding.
    pub max_depth: usize,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            type_id_width: 2,
            pointer_width: 4,
            strict_minor: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl CityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the type id width.
    pub fn type_id_width(mut self, width: u8) -> Self {
        self.type_id_width = width;
        self
    }

    /// Set the pointer offset width.
    pub fn pointer_width(mut self, width: u8) -> Self {
        self.pointer_width = width;
        self
    }

    pub fn strict_minor(mut self, strict: bool) -> Self {
        self.strict_minor = strict;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.type_id_width, 1 | 2 | 4) {
            return Err(ConfigError::TypeIdWidth(self.type_id_width));
        }
        if !matches!(self.pointer_width, 2 | 4 | 8) {
            return Err(ConfigError::PointerWidth(self.pointer_width));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::MaxDepth);
        }
        Ok(())
    }

    /// Largest type id representable with the configured width.
    pub(crate) fn max_type_id(&self) -> u64 {
        max_for_width(self.type_id_width)
    }

    /// Largest data offset representable with the configured width.
    pub(crate) fn max_offset(&self) -> u64 {
        max_for_width(self.pointer_width)
    }
}

fn max_for_width(width: u8) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (u32::from(width) * 8)) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CityConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.max_type_id(), 0xFFFF);
        assert_eq!(config.max_offset(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_builder_and_validation() {
        let config = CityConfig::new()
            .type_id_width(1)
            .pointer_width(8)
            .strict_minor(true)
            .max_depth(8);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.max_type_id(), 0xFF);
        assert_eq!(config.max_offset(), u64::MAX);

        assert_eq!(
            CityConfig::new().type_id_width(3).validate(),
            Err(ConfigError::TypeIdWidth(3))
        );
        assert_eq!(
            CityConfig::new().pointer_width(1).validate(),
            Err(ConfigError::PointerWidth(1))
        );
        assert_eq!(
            CityConfig::new().max_depth(0).validate(),
            Err(ConfigError::MaxDepth)
        );
    }
}
