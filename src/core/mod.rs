pub mod domain;
pub mod judge;
pub mod orchestrator;
pub mod pipeline;
pub mod toolchain;
pub mod traits;
