use thiserror::Error;

pub type Result<T> = std::result::Result<T, MorphError>;

/// Failure modes of a single morphing call.
///
/// Every variant is fatal to the call that produced it; operators build their
/// outputs into fresh tensors, so a returned error implies no layer state was
/// touched.
#[derive(Error, Debug)]
pub enum MorphError {
    #[error("{operation} does not support {kinds}")]
    UnsupportedLayerKind {
        operation: &'static str,
        kinds: String,
    },

    #[error("incompatible shapes: {0}")]
    IncompatibleShape(String),

    #[error("new width {requested} must exceed current width {current}")]
    InvalidWidth { requested: usize, current: usize },

    #[error("kernel extent {extent} along spatial axis {axis} must be odd")]
    InvalidKernelSize { axis: usize, extent: usize },

    #[error("verification failed: composed outputs differ by {error}")]
    VerificationFailure { error: f64 },

    #[error("no layer named {0}")]
    UnknownLayer(String),

    #[error("tensor backend error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl MorphError {
    pub(crate) fn shape<S: Into<String>>(msg: S) -> Self {
        MorphError::IncompatibleShape(msg.into())
    }

    pub(crate) fn unsupported(operation: &'static str, kinds: impl Into<String>) -> Self {
        MorphError::UnsupportedLayerKind {
            operation,
            kinds: kinds.into(),
        }
    }
}
