pub mod archive;
pub mod content;
pub mod curseforge;
pub mod format;
pub mod metadata;
pub mod modrinth;
pub mod plan;
pub mod staged;

pub use content::{ContentRef, ContentResolver, PackContentResolver, ResolvedContent};
pub use curseforge::{CurseForgeApi, CURSEFORGE_API_BASE};
pub use format::ModpackFormat;
pub use metadata::RepairedMetadata;
pub use plan::{read_plan, ModpackPlan, PlanHints};
pub use staged::{
    DirectoryMover, FsMover, InstallPhase, ModpackInstallReport, ModpackInstaller, ModpackProgress,
    ModpackRequest,
};
