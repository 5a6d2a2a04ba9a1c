pub mod resolver;

pub use resolver::{DownloadSource, MirrorSource, OfficialSource, Resource, SourceResolver};
