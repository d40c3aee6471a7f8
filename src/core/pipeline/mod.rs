pub mod compiling;
pub mod registry;
pub mod running;
