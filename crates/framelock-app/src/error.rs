use thiserror::Error;

/// Failure taxonomy shared by the synchronization core and its collaborators.
///
/// End of media is deliberately absent: reaching the end is a normal terminal
/// transition reported through `StepOutcome`, not an error.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid rates, non-positive frame counts, unsupported media at open time.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A renderer failed to produce a frame (decode/read error).
    #[error("{renderer}: production failed: {reason}")]
    Production { renderer: String, reason: String },
    /// The transport provider went away; the session cannot continue.
    #[error("transport lost: {0}")]
    TransportLost(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        SyncError::Configuration(msg.into())
    }

    pub fn production(renderer: &str, reason: impl std::fmt::Display) -> Self {
        SyncError::Production {
            renderer: renderer.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<hound::Error> for SyncError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => SyncError::Io(io),
            other => SyncError::Decode(other.to_string()),
        }
    }
}

impl From<gif::DecodingError> for SyncError {
    fn from(e: gif::DecodingError) -> Self {
        match e {
            gif::DecodingError::Io(io) => SyncError::Io(io),
            other => SyncError::Decode(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_message_names_renderer() {
        let e = SyncError::production("audio", "short read");
        assert_eq!(e.to_string(), "audio: production failed: short read");
    }
}
