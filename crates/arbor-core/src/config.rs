//! Configuration for trees and the logging profile
//!
//! Options are plain serde structs so they can be embedded in a host
//! application's own TOML configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{ArborError, Result};
use crate::logging_facility::Profile;

/// Behavioural switches for one tree context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeOptions {
    /// Reject field and collection writes made outside an action
    pub protected: bool,
    /// Validate declared return types of views and mutations
    pub check_return_types: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            protected: true,
            check_return_types: true,
        }
    }
}

impl TreeOptions {
    /// Parse options from a TOML document
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the document is not valid TOML or has
    /// fields of the wrong type.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ArborError::Serialization {
            message: e.to_string(),
        })
    }
}

/// Top-level configuration document
///
/// ```toml
/// logging = "production"
///
/// [tree]
/// protected = true
/// check_return_types = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborConfig {
    pub logging: Profile,
    pub tree: TreeOptions,
}

impl ArborConfig {
    /// # Errors
    ///
    /// Returns `Serialization` on malformed TOML.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ArborError::Serialization {
            message: e.to_string(),
        })
    }
}
