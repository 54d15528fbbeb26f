// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the configuration crate.

/// Errors produced while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration file could not be read.
    #[error("failed to read configuration file `{path}`: {source}")]
    FileRead {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document could not be deserialized.
    #[error("failed to deserialize configuration: {details}")]
    Deserialize {
        /// Deserializer error details.
        details: String,
    },

    /// The configuration schema could not be rendered.
    #[error("failed to serialize configuration schema: {details}")]
    Serialize {
        /// Serializer error details.
        details: String,
    },

    /// The configuration document is well-formed but invalid.
    #[error("invalid configuration:\n  {}", errors.join("\n  "))]
    InvalidConfiguration {
        /// Every validation error found, with its path.
        errors: Vec<String>,
    },

    /// A single user-supplied value (CLI flag, env var) is invalid.
    #[error("invalid user configuration: {error}")]
    InvalidUserConfig {
        /// Error details.
        error: String,
    },
}
