use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use interface_installer::core::downloader::TransferEngine;
use interface_installer::core::error::{InstallOutcome, LauncherResult};
use interface_installer::core::http::build_http_client;
use interface_installer::core::loaders::{LoaderRegistry, LoaderSpec};
use interface_installer::core::modpack::{
    CurseForgeApi, ModpackInstaller, ModpackProgress, ModpackRequest, PackContentResolver,
    PlanHints,
};
use interface_installer::core::source::DownloadSource;
use interface_installer::core::state::{default_data_dir, InstallerSettings};
use interface_installer::core::task::TaskRegistry;
use interface_installer::core::version::{
    InstallProgress, ProgressSink, VersionInstallRequest, VersionInstaller,
};

#[derive(Parser)]
#[command(name = "interface-installer", version, about = "Install game versions and modpacks")]
struct Cli {
    /// Game directory to install into.
    #[arg(long, global = true)]
    game_dir: Option<PathBuf>,

    /// Download source; defaults to the saved setting.
    #[arg(long, global = true)]
    source: Option<DownloadSource>,

    /// Parallel downloads; defaults to the saved setting.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install a base game version.
    Version {
        id: String,
        /// Name of the folder under versions/.
        #[arg(long)]
        name: Option<String>,
        /// Also download every asset object.
        #[arg(long)]
        assets: bool,
    },
    /// Install a CurseForge, Modrinth or plain zip modpack.
    Modpack {
        archive: PathBuf,
        #[arg(long)]
        name: Option<String>,
        /// Game version for archives that do not declare one.
        #[arg(long)]
        game_version: Option<String>,
        /// Loader override such as `fabric-0.15.7`.
        #[arg(long)]
        loader: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    interface_installer::init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(InstallOutcome::Completed) => ExitCode::SUCCESS,
        Ok(InstallOutcome::Cancelled) => ExitCode::from(130),
        Ok(InstallOutcome::Failed(_)) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> LauncherResult<InstallOutcome> {
    let data_dir = default_data_dir();
    let mut settings = InstallerSettings::load(&data_dir);
    if let Some(source) = cli.source {
        settings.download_source = source;
    }
    if let Some(concurrency) = cli.concurrency {
        settings.max_concurrent_downloads = concurrency;
    }
    let game_dir = cli.game_dir.unwrap_or_else(|| data_dir.join("game"));
    info!(
        "Installing into {:?} from the {} source",
        game_dir, settings.download_source
    );

    let client = build_http_client()?;
    let registry = TaskRegistry::new(settings.task_auto_remove());
    let engine = TransferEngine::new(client.clone());
    let resolver = settings.download_source.resolver();

    match cli.command {
        Command::Version { id, name, assets } => {
            let mut options = settings.version_options();
            options.fetch_assets |= assets;
            let installer = VersionInstaller::new(engine, registry, options);

            let mut request = VersionInstallRequest::new(id, game_dir, resolver);
            request.display_name = name;
            let sink: ProgressSink = Arc::new(|p: &InstallProgress| {
                info!(
                    "[{:>5.1}%] {} ({}/{} files)",
                    p.percentage, p.status, p.completed_files, p.total_files
                )
            });
            Ok(installer.install(&request, cancel, Some(sink)).await)
        }
        Command::Modpack {
            archive,
            name,
            game_version,
            loader,
        } => {
            let loader = loader.as_deref().map(LoaderSpec::parse_id).transpose()?;
            let curseforge = settings
                .curseforge_api_key
                .clone()
                .map(|key| CurseForgeApi::new(client.clone(), &settings.curseforge_api_base, key));

            let versions = VersionInstaller::new(engine, registry.clone(), settings.version_options());
            // Concrete loader installers register here.
            let installer = ModpackInstaller::new(
                versions,
                registry,
                LoaderRegistry::new(),
                Arc::new(PackContentResolver::new(curseforge)),
            )
            .with_retry_policy(settings.retry_policy());

            let request = ModpackRequest {
                archive,
                game_dir,
                version_name: name,
                hints: PlanHints {
                    game_version,
                    loader,
                },
                resolver,
            };
            let progress: ModpackProgress =
                Arc::new(|status: &str, pct: f64| info!("[{:>5.1}%] {}", pct, status));
            Ok(installer.install(&request, cancel, Some(progress)).await)
        }
    }
}
