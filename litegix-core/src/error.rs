/// Errors produced by the `litegix-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The driver configuration is missing a field or points at something unusable.
    #[error("invalid driver config field '{field}': {reason}")]
    ConfigInvalid { field: &'static str, reason: String },

    /// The task's driver config could not be decoded at all.
    #[error("failed to decode task config: {0}")]
    SpecDecode(String),

    /// The task's driver config decoded but a field failed validation.
    #[error("invalid task config field '{field}': {reason}")]
    InvalidSpec { field: &'static str, reason: String },

    /// Opaque driver state could not be encoded or decoded.
    #[error("driver state codec error: {0}")]
    DriverState(String),
}
