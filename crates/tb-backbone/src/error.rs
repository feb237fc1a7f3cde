use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackboneError {
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("inference cache has not been allocated")]
    CacheNotAllocated,
    #[error("no cache allocated for layer {layer}")]
    LayerCacheMissing { layer: usize },
    #[error("batch window {offset}+{chunk} exceeds cache batch capacity {capacity}")]
    BatchCapacityExceeded {
        offset: usize,
        chunk: usize,
        capacity: usize,
    },
    #[error("sequence window {offset}+{chunk} exceeds cache sequence capacity {capacity}")]
    SeqCapacityExceeded {
        offset: usize,
        chunk: usize,
        capacity: usize,
    },
    #[error("position {position} exceeds rotary table capacity {capacity}")]
    PositionOutOfRange { position: usize, capacity: usize },
    #[error("hidden states must be [batch, seq, {d_model}], got {got:?}")]
    HiddenShapeMismatch { d_model: usize, got: Vec<usize> },
    #[error("kv payload has {got} elements, expected {expected}")]
    KvSizeMismatch { expected: usize, got: usize },
    #[error("rotary slice has {got} elements, expected {expected}")]
    RotarySliceMismatch { expected: usize, got: usize },
    #[error("lengths_per_sample has {got} entries for a batch of {expected}")]
    LengthsMismatch { expected: usize, got: usize },
    #[error("weight tensor '{name}' has {got} elements, expected {expected}")]
    WeightSizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("tensor error: {0}")]
    Tensor(#[from] tb_tensor::TensorError),
}

pub type Result<T> = std::result::Result<T, BackboneError>;
