//! Error types for JPEG 2000 code-block decoding and wavelet synthesis.

use core::fmt;

/// The main error type of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Errors related to invalid coding or quantization parameters.
    Validation(ValidationError),
    /// Errors related to malformed code-block data.
    Decoding(DecodingError),
    /// Errors related to exhausted resources.
    Resource(ResourceError),
}

/// Errors related to invalid coding or quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The number of resolution levels is zero or too large.
    InvalidResolutionLevels,
    /// Invalid code-block size exponents.
    InvalidCodeBlockSize,
    /// Missing or invalid precinct size exponents.
    InvalidPrecinctSize,
    /// Invalid dimensions of a tile-component or code-block.
    InvalidDimensions,
    /// Invalid sub-sampling factors.
    InvalidSubsampling,
    /// Invalid component bit depth.
    InvalidBitDepth,
    /// Missing exponent step size for a sub-band.
    MissingStepSize,
    /// Invalid quantization exponents.
    InvalidExponents,
    /// The requested operation doesn't match the wavelet kernel.
    InvalidTransformation,
}

/// Errors related to malformed code-block data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingError {
    /// Number of bitplanes in a code-block is too large.
    TooManyBitplanes,
    /// A code-block contains too many coding passes.
    TooManyCodingPasses,
    /// Invalid number of bitplanes in a code-block.
    InvalidBitplaneCount,
    /// The declared segment lengths don't match the coded data.
    InvalidSegmentLength,
    /// The suffix length of an HT cleanup segment is out of range.
    InvalidSuffixLength,
    /// An HT exponent bound exceeds the available bitplanes.
    ExponentBoundExceeded,
    /// A code-block is larger than allowed.
    CodeBlockTooLarge,
    /// An invalid segmentation symbol was decoded.
    InvalidSegmentationSymbol,
    /// Unexpected end of data.
    UnexpectedEof,
}

/// Errors related to exhausted resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// A scratch buffer couldn't be allocated.
    AllocationFailed,
}

/// A coarse classification of errors, as reported per code-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input data or parameters were invalid.
    InvalidData,
    /// Not enough memory was available.
    OutOfMemory,
}

impl DecodeError {
    /// Return the coarse classification of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Decoding(_) => ErrorKind::InvalidData,
            Self::Resource(_) => ErrorKind::OutOfMemory,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::Decoding(e) => write!(f, "{e}"),
            Self::Resource(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidResolutionLevels => write!(f, "invalid number of resolution levels"),
            Self::InvalidCodeBlockSize => write!(f, "invalid code-block size"),
            Self::InvalidPrecinctSize => write!(f, "invalid precinct size"),
            Self::InvalidDimensions => write!(f, "invalid dimensions"),
            Self::InvalidSubsampling => write!(f, "invalid sub-sampling factors"),
            Self::InvalidBitDepth => write!(f, "invalid component bit depth"),
            Self::MissingStepSize => write!(f, "missing exponent step size"),
            Self::InvalidExponents => write!(f, "invalid quantization exponents"),
            Self::InvalidTransformation => write!(f, "invalid transformation type"),
        }
    }
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyBitplanes => write!(f, "number of bitplanes is too large"),
            Self::TooManyCodingPasses => {
                write!(f, "code-block contains too many coding passes")
            }
            Self::InvalidBitplaneCount => write!(f, "invalid number of bitplanes"),
            Self::InvalidSegmentLength => write!(f, "invalid code-block segment length"),
            Self::InvalidSuffixLength => write!(f, "invalid HT cleanup suffix length"),
            Self::ExponentBoundExceeded => write!(f, "HT exponent bound exceeds bitplanes"),
            Self::CodeBlockTooLarge => write!(f, "code-block is too large"),
            Self::InvalidSegmentationSymbol => write!(f, "invalid segmentation symbol"),
            Self::UnexpectedEof => write!(f, "unexpected end of data"),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed => write!(f, "failed to allocate memory"),
        }
    }
}

impl std::error::Error for DecodeError {}
impl std::error::Error for ValidationError {}
impl std::error::Error for DecodingError {}
impl std::error::Error for ResourceError {}

impl From<ValidationError> for DecodeError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<DecodingError> for DecodeError {
    fn from(e: DecodingError) -> Self {
        Self::Decoding(e)
    }
}

impl From<ResourceError> for DecodeError {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

impl From<std::collections::TryReserveError> for DecodeError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::Resource(ResourceError::AllocationFailed)
    }
}

/// Result type for decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

pub(crate) use bail;

/// Resize `buf` to `len` elements filled with `value`, reporting allocation
/// failures instead of aborting.
pub(crate) fn try_resize<T: Clone>(buf: &mut Vec<T>, len: usize, value: T) -> Result<()> {
    buf.clear();
    buf.try_reserve(len)?;
    buf.resize(len, value);

    Ok(())
}
