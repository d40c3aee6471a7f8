/// Implementations of the core traits that spawn real processes on the host.
pub mod command;
pub mod compiler;
pub mod process;
pub mod runner;
