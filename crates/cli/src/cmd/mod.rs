mod build;
mod check;
mod inspect;

pub use build::{BuildOptions, LinkerChoice, cmd_build};
pub use check::cmd_check;
pub use inspect::cmd_inspect;
