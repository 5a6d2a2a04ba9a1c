pub mod model;
pub mod registry;

pub use model::{DownloadTask, TaskKind, TaskStatus};
pub use registry::{TaskHandle, TaskRegistry};
