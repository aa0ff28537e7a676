use cubecl::prelude::{LaunchError, Runtime, TensorHandleRef};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GemvError {
    #[error("batch size must be 1, got {0}")]
    BatchSize(usize),
    #[error("{name} must be > 0")]
    Empty { name: &'static str },
    #[error("{name} ({value}) must be divisible by {divisor}")]
    Misaligned {
        name: &'static str,
        value: usize,
        divisor: usize,
    },
    #[error("unsupported group size {0}, expected one of 32, 64, 128, 256")]
    UnsupportedGroupSize(usize),
    #[error("unsupported threads per tile {0}, expected 32 or 64")]
    UnsupportedThreadsPerTile(usize),
    #[error("unsupported tiles per cube {0}, expected 1, 2, 4 or 8")]
    UnsupportedTilesPerCube(usize),
    #[error("{name} has {actual} elements, expected {expected}")]
    ShapeMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{name} must use {expected}-byte elements, got {actual}")]
    ElemSize {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{0} is not supported by this device")]
    UnsupportedElement(&'static str),
    #[error("kernel launch failed: {0:?}")]
    Launch(#[from] LaunchError),
}

pub type GemvResult<T> = Result<T, GemvError>;

/// Checks that `handle` holds exactly `expected` elements.
pub(crate) fn expect_len<R: Runtime>(
    name: &'static str,
    handle: &TensorHandleRef<R>,
    expected: usize,
) -> GemvResult<()> {
    let actual = handle.shape.iter().product::<usize>();
    if actual == expected {
        Ok(())
    } else {
        Err(GemvError::ShapeMismatch {
            name,
            expected,
            actual,
        })
    }
}

pub(crate) fn expect_elem_size<R: Runtime>(
    name: &'static str,
    handle: &TensorHandleRef<R>,
    expected: usize,
) -> GemvResult<()> {
    if handle.elem_size == expected {
        Ok(())
    } else {
        Err(GemvError::ElemSize {
            name,
            expected,
            actual: handle.elem_size,
        })
    }
}

/// Checks `value % divisor == 0`.
pub(crate) fn ensure_multiple(name: &'static str, value: usize, divisor: usize) -> GemvResult<()> {
    if value.is_multiple_of(divisor) {
        Ok(())
    } else {
        Err(GemvError::Misaligned {
            name,
            value,
            divisor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misaligned_message_names_the_dimension() {
        let err = ensure_multiple("k", 100, 128).unwrap_err();
        assert_eq!(err.to_string(), "k (100) must be divisible by 128");
    }

    #[test]
    fn launch_errors_convert_with_question_mark() {
        fn accepts<E: From<LaunchError>>() {}
        accepts::<GemvError>();
    }

    #[test]
    fn aligned_value_passes() {
        assert!(ensure_multiple("n", 64, 4).is_ok());
    }
}
