//! Python toolchain operations and the process launcher for strata.
//!
//! Every external command goes through [`CommandExecutor`], so the toolchain
//! client can be exercised against mocks.

pub mod executor;
pub mod launcher;
pub mod process;
pub mod toolchain;

pub use executor::{CommandExecutor, CommandOutput, RealExecutor};
pub use launcher::{LaunchError, LaunchOutcome, LaunchPlan, LaunchState, Launcher};
pub use process::ProcessError;
pub use toolchain::{
    CheckResult, DoctorReport, InstallError, PythonToolchain, TOOLCHAIN_PACKAGE, ToolchainError,
};
