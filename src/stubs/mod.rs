pub mod compiler;
pub mod process;
pub mod runner;

pub use process::wait_until_gone;
