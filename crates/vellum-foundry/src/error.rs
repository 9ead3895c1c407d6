use thiserror::Error;
use vellum_env::EnvVarError;
use vellum_loader::LoaderError;

use crate::{tokenizer::TokenizerError, types::Dtype};

#[derive(Error, Debug)]
pub enum FoundryError {
    #[error("no compute device available for backend '{0}'")]
    DeviceNotFound(&'static str),
    #[error("backend '{0}' is not available on this platform")]
    BackendUnavailable(String),
    #[error("buffer creation failed with size {0}")]
    BufferCreationFailed(usize),
    #[error("unknown buffer handle {0}")]
    UnknownBuffer(u64),
    #[error("buffer {0} is device-local and cannot be mapped")]
    NotHostVisible(u64),
    #[error("access of {len} bytes at offset {offset} exceeds buffer length {capacity}")]
    OutOfRange { offset: usize, len: usize, capacity: usize },
    #[error("kernel library compilation failed: {0}")]
    LibraryCompilationFailed(String),
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),
    #[error("command submission failed: {0}")]
    SubmissionFailed(String),
    #[error("slot '{0}' has no buffer bound")]
    UnboundSlot(String),
    #[error("slot dtype mismatch: expected {expected:?}, got {actual:?}")]
    DtypeMismatch { expected: Dtype, actual: Dtype },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("token id {token} is outside the vocabulary of {vocab}")]
    TokenOutOfRange { token: u32, vocab: usize },
    #[error("required tensor '{0}' is missing")]
    MissingTensor(String),
    #[error("invalid model metadata: {0}")]
    InvalidMetadata(String),
    #[error("tensor '{name}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Config(#[from] EnvVarError),
    #[error("tokenizer error: {0}")]
    Tokenizer(Box<TokenizerError>),
    #[error("sampling failed: {0}")]
    Sampling(String),
}

impl From<TokenizerError> for FoundryError {
    fn from(e: TokenizerError) -> Self {
        FoundryError::Tokenizer(Box::new(e))
    }
}
