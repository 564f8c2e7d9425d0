mod build;
mod doctor;
mod eject;
mod init;
mod launch;
mod pipeline;
mod prune;
mod status;
mod up;

pub use build::build;
pub use doctor::doctor;
pub use eject::eject;
pub use init::init_project;
pub use launch::launch;
pub use prune::prune;
pub use status::status;
pub use up::up;
