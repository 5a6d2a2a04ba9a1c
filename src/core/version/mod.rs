pub mod install;
pub mod manifest;
pub mod plan;
pub mod progress;
pub mod rules;
pub mod version_file;

pub use install::{VersionInstallOptions, VersionInstallReport, VersionInstallRequest, VersionInstaller};
pub use manifest::{VersionEntry, VersionManifest};
pub use plan::InstallPlan;
pub use progress::{InstallProgress, ProgressSink, ProgressTracker};
pub use rules::{rules_allow, LibraryRule, OsRule, Platform, RuleAction};
pub use version_file::{LibraryDownload, LibraryEntry, VersionJson};
