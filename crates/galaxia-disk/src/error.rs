//! Error types for the `galaxia-disk` crate.
//!
//! All fallible operations in this crate return [`DiskError`] through the
//! standard [`Result`] type.

/// Errors that can occur while building or querying the disk model.
#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    /// A physically invalid input: negative radius, bad bin edges,
    /// formation time after the simulation time.
    #[error("domain error: {reason}")]
    Domain {
        /// What is wrong with the input.
        reason: String,
    },

    /// The analog catalog is malformed.
    #[error("malformed analog catalog: {reason}")]
    Format {
        /// Description of the malformation (with line number when known).
        reason: String,
    },

    /// A zone or catalog row index is out of range.
    #[error("{kind} index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// What was indexed (`"zone"` or `"analog"`).
        kind: &'static str,
        /// The offending index.
        index: usize,
        /// Number of valid entries.
        len: usize,
    },

    /// Reading the catalog or writing the analog log failed.
    #[error("disk model I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl DiskError {
    /// Shorthand for a [`DiskError::Domain`] with a formatted reason.
    pub(crate) fn domain(reason: impl Into<String>) -> Self {
        Self::Domain {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`DiskError::Format`] with a formatted reason.
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }
}
