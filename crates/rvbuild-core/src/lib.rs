pub mod acquire;
pub mod backend;
pub mod config;
pub mod http;
pub mod io;
pub mod parse;
pub mod solver;

pub use acquire::{AcquireError, AcquireRequest, Acquirer, Acquisition, Attempt, AttemptFailure};
pub use backend::{Backend, BackendError, BackendKind, BackendSettings};
pub use config::{ConfigError, ConfigStore, load_arch_matrix};
pub use http::{FetchClient, FetchError, FetchOptions, Throttle};
pub use solver::{ChallengeSolver, SolvedPage, WebDriverSolver};
