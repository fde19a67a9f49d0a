//! Runtime components for server supervision

pub mod preset;
pub mod process;
pub mod relay;
pub mod supervisor;
pub mod watcher;

pub use preset::*;
pub use process::*;
pub use relay::*;
pub use supervisor::*;
pub use watcher::*;
