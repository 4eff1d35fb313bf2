pub mod core;
pub mod runtime;


pub use self::core::Kernel;
pub use runtime::{Runtime, RuntimeRegistry};
