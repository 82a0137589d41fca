use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    /// `powf` was given an exponent that is NaN or infinite. The backward rule
    /// `p * a^(p - 1)` is meaningless for such an exponent.
    #[error("Exponent must be a finite number, got {exponent}")]
    InvalidExponent { exponent: f64 },
}

pub type Result<T> = std::result::Result<T, Error>;
