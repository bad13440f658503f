use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type of the data module.
pub type Result<T> = std::result::Result<T, DataErr>;

/// Errors produced while building or reading datasets.
#[derive(Debug)]
pub enum DataErr {
    /// A line of a LibSVM file couldn't be parsed.
    Malformed { line: usize, detail: String },
    /// `Dataset::split` received a fraction outside of `(0, 1)`.
    InvalidSplit(f64),
    /// A dense point was built from features and indices of different lengths.
    LengthMismatch { indices: usize, values: usize },
    Io(io::Error),
}

impl Display for DataErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataErr::Malformed { line, detail } => write!(f, "malformed line {line}: {detail}"),
            DataErr::InvalidSplit(part) => {
                write!(f, "split fraction must be inside (0, 1), got {part}")
            }
            DataErr::LengthMismatch { indices, values } => write!(
                f,
                "a data point has {indices} indices but {values} values"
            ),
            DataErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for DataErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DataErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
