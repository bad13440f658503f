pub mod builder;
pub mod data;
pub mod error;
pub mod model;
pub mod ops;
pub mod shuffle;
pub mod solvers;
pub mod specs;
pub mod storage;
pub mod topology;

pub use builder::SolverBuilder;
pub use error::{Result, SolverErr};
pub use model::Model;
pub use solvers::{
    ClusterParallelSgdSolver, ParallelSgdSolver, SequentialSgdSolver, SgdResult, Solver,
    SolverConfig,
};
pub use topology::NumaConfig;
