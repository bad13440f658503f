use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use crate::{data::DataErr, storage::SizeMismatchErr};

/// The result type used across the solvers and their builders.
pub type Result<T> = std::result::Result<T, SolverErr>;

/// The solver module's error type.
#[derive(Debug)]
pub enum SolverErr {
    /// More worker threads were requested than the topology has cores.
    NotEnoughCores {
        requested: usize,
        available: usize,
    },
    /// The requested cluster size doesn't fit inside a single NUMA node.
    ClusterTooLarge {
        requested: usize,
        max_per_node: usize,
    },
    /// The topology has no usable cores at all.
    EmptyTopology,
    /// The initial weights don't match the model's dimensionality.
    WeightsMismatch {
        got: usize,
        expected: usize,
    },
    /// The train and test models disagree on the weight vector length.
    ModelMismatch {
        train: usize,
        test: usize,
    },
    /// A token transition that must succeed did not, the ring is corrupted.
    TokenProtocol {
        cluster: usize,
        worker: usize,
        expected: isize,
        found: isize,
    },
    /// A worker thread panicked.
    WorkerPanicked {
        worker: usize,
    },
    /// The convergence monitor thread panicked.
    MonitorPanicked,
    InvalidSpec(String),
    SizeMismatch(SizeMismatchErr),
    Data(DataErr),
    Io(io::Error),
}

impl Display for SolverErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverErr::NotEnoughCores {
                requested,
                available,
            } => write!(
                f,
                "requested {requested} worker threads but the topology only has {available} cores"
            ),
            SolverErr::ClusterTooLarge {
                requested,
                max_per_node,
            } => write!(
                f,
                "requested clusters of {requested} workers but the largest NUMA node has {max_per_node} cores"
            ),
            SolverErr::EmptyTopology => f.write_str("the topology doesn't contain any core"),
            SolverErr::WeightsMismatch { got, expected } => write!(
                f,
                "initial weights have {got} entries, the model expects {expected}"
            ),
            SolverErr::ModelMismatch { train, test } => write!(
                f,
                "train model has {train} weights while test model has {test}"
            ),
            SolverErr::TokenProtocol {
                cluster,
                worker,
                expected,
                found,
            } => write!(
                f,
                "token protocol violated by worker {worker} of cluster {cluster}: expected {expected}, found {found}"
            ),
            SolverErr::WorkerPanicked { worker } => write!(f, "worker {worker} panicked"),
            SolverErr::MonitorPanicked => f.write_str("convergence monitor panicked"),
            SolverErr::InvalidSpec(detail) => write!(f, "invalid solver spec: {detail}"),
            SolverErr::SizeMismatch(e) => write!(f, "{e}"),
            SolverErr::Data(e) => write!(f, "data error: {e}"),
            SolverErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for SolverErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SolverErr::SizeMismatch(e) => Some(e),
            SolverErr::Data(e) => Some(e),
            SolverErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SizeMismatchErr> for SolverErr {
    fn from(value: SizeMismatchErr) -> Self {
        Self::SizeMismatch(value)
    }
}

impl From<DataErr> for SolverErr {
    fn from(value: DataErr) -> Self {
        Self::Data(value)
    }
}

impl From<io::Error> for SolverErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SolverErr {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidSpec(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<SolverErr> for io::Error {
    fn from(value: SolverErr) -> Self {
        match value {
            SolverErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}
