use native_decoder::{CodecKind, DecoderError};
use thiserror::Error;

/// Failures raised while processing a packet; never crosses the pipeline boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error("codec-specific data for {codec} is not complete")]
    InitDataMissing { codec: CodecKind },
    #[error("decode task panicked: {0}")]
    Panicked(String),
}

/// Failures reported by the external stream source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("stream source is not ready")]
    NotReady,
    #[error("unknown listener {0}")]
    UnknownListener(u64),
    #[error("stream source error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = PipelineError::InitDataMissing {
            codec: CodecKind::H265,
        };
        assert_eq!(
            e.to_string(),
            "codec-specific data for video/hevc is not complete"
        );

        let e: PipelineError = DecoderError::InputOverflow {
            len: 10,
            capacity: 4,
        }
        .into();
        assert_eq!(e.to_string(), "input of 10 bytes exceeds buffer capacity 4");
        assert!(matches!(e, PipelineError::Decoder(_)));
    }
}
