pub mod context;
pub mod installer;

pub use context::{LoaderContext, LoaderProgress};
pub use installer::{LoaderFamily, LoaderInstaller, LoaderRegistry, LoaderSpec};
