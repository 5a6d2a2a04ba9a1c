pub mod asset_index;

pub use asset_index::{index_path, AssetFetchReport, AssetManager};
