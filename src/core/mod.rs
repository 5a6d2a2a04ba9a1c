// ─── InterfaceOficial Installer Core ───
// Version and modpack installation pipeline.
//
// Architecture:
//   core/
//     source/     : Official / mirror endpoint mapping
//     downloader/ : Streaming transfers with progress and cancellation
//     task/       : Observable registry of running installs
//     version/    : Manifest, descriptor, OS rules, install orchestration
//     assets/     : Asset index + optional object fetch
//     maven/      : Coordinate parsing for URL-less libraries
//     loaders/    : Mod-loader installer contract
//     modpack/    : Format detection, pack readers, staged installer
//     state/      : Persisted installer settings

pub mod assets;
pub mod downloader;
pub mod error;
pub mod fs_util;
pub mod http;
pub mod loaders;
pub mod maven;
pub mod modpack;
pub mod source;
pub mod state;
pub mod task;
pub mod version;
