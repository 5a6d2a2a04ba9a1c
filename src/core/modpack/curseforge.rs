// ─── CurseForge ───
// `manifest.json` packs and per-file resolution through the public API.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::content::{ContentRef, ResolvedContent};
use super::format::ModpackFormat;
use super::plan::ModpackPlan;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::loaders::LoaderSpec;

pub const CURSEFORGE_API_BASE: &str = "https://api.curseforge.com/v1";
const FORGE_CDN: &str = "https://edge.forgecdn.net/files";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeManifest {
    pub minecraft: CurseForgeMinecraft,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub files: Vec<CurseForgeFile>,
    #[serde(default)]
    pub overrides: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurseForgeMinecraft {
    pub version: String,
    #[serde(default)]
    pub mod_loaders: Vec<CurseForgeModLoader>,
}

#[derive(Debug, Deserialize)]
pub struct CurseForgeModLoader {
    pub id: String,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Deserialize)]
pub struct CurseForgeFile {
    #[serde(rename = "projectID")]
    pub project_id: u64,
    #[serde(rename = "fileID")]
    pub file_id: u64,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl CurseForgeManifest {
    pub fn into_plan(self) -> LauncherResult<ModpackPlan> {
        let loader = self
            .minecraft
            .mod_loaders
            .iter()
            .find(|l| l.primary)
            .or_else(|| self.minecraft.mod_loaders.first())
            .map(|l| LoaderSpec::parse_id(&l.id))
            .transpose()?;

        let total = self.files.len();
        let content: Vec<ContentRef> = self
            .files
            .into_iter()
            .filter(|f| f.required)
            .map(|f| ContentRef::CurseForge {
                project_id: f.project_id,
                file_id: f.file_id,
            })
            .collect();
        if content.len() < total {
            debug!("Skipping {} optional CurseForge files", total - content.len());
        }

        let overrides = self.overrides.unwrap_or_else(|| "overrides".to_string());
        Ok(ModpackPlan {
            format: ModpackFormat::CurseForge,
            name: self.name,
            game_version: self.minecraft.version,
            loader,
            content,
            override_prefixes: vec![format!("{}/", overrides.trim_end_matches('/'))],
        })
    }
}

// ── API resolution ──────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    id: u64,
    file_name: String,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    file_length: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMod {
    #[serde(default)]
    class_id: Option<u32>,
}

/// Target folder for a project class.
fn folder_for_class(class_id: Option<u32>) -> &'static str {
    match class_id {
        Some(12) => "resourcepacks",
        Some(6552) => "shaderpacks",
        _ => "mods",
    }
}

/// Public CDN layout, for files whose API entry withholds `downloadUrl`.
pub fn cdn_url(file_id: u64, file_name: &str) -> String {
    format!("{}/{}/{}/{}", FORGE_CDN, file_id / 1000, file_id % 1000, file_name)
}

#[derive(Clone)]
pub struct CurseForgeApi {
    client: Client,
    base: String,
    api_key: String,
}

impl CurseForgeApi {
    pub fn new(client: Client, base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> LauncherResult<T> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url,
                status: status.as_u16(),
            });
        }
        let envelope: ApiEnvelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    pub async fn resolve_file(&self, project_id: u64, file_id: u64) -> LauncherResult<ResolvedContent> {
        let file: ApiFile = self
            .get(&format!("/mods/{project_id}/files/{file_id}"))
            .await?;

        // The class only picks the folder; fall back to mods/ if it is unavailable.
        let class_id = match self.get::<ApiMod>(&format!("/mods/{project_id}")).await {
            Ok(project) => project.class_id,
            Err(e) => {
                warn!("Could not look up CurseForge project {}: {}", project_id, e);
                None
            }
        };

        let mut urls = Vec::new();
        if let Some(url) = file.download_url.filter(|u| !u.is_empty()) {
            urls.push(url);
        } else {
            info!("No download URL for {} ({}); using CDN path", file.file_name, file.id);
        }
        urls.push(cdn_url(file.id, &file.file_name));
        urls.dedup();

        Ok(ResolvedContent {
            relative_path: format!("{}/{}", folder_for_class(class_id), file.file_name),
            urls,
            size: file.file_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::build_http_client;
    use crate::core::loaders::LoaderFamily;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn manifest_without_loader_has_no_loader_step() {
        let manifest: CurseForgeManifest = serde_json::from_str(
            r#"{
                "minecraft": {"version": "1.20.1", "modLoaders": []},
                "manifestType": "minecraftModpack",
                "manifestVersion": 1,
                "name": "Vanilla Plus",
                "files": [
                    {"projectID": 1, "fileID": 10, "required": true},
                    {"projectID": 2, "fileID": 20, "required": false}
                ]
            }"#,
        )
        .unwrap();

        let plan = manifest.into_plan().unwrap();
        assert_eq!(plan.game_version, "1.20.1");
        assert!(plan.loader.is_none());
        assert_eq!(plan.content.len(), 1);
        assert_eq!(plan.override_prefixes, vec!["overrides/"]);
    }

    #[test]
    fn primary_loader_wins() {
        let manifest: CurseForgeManifest = serde_json::from_str(
            r#"{
                "minecraft": {"version": "1.20.1", "modLoaders": [
                    {"id": "fabric-0.15.7", "primary": false},
                    {"id": "forge-47.2.0", "primary": true}
                ]},
                "overrides": "custom/"
            }"#,
        )
        .unwrap();

        let plan = manifest.into_plan().unwrap();
        let loader = plan.loader.unwrap();
        assert_eq!(loader.family, LoaderFamily::Forge);
        assert_eq!(loader.version, "47.2.0");
        assert_eq!(plan.override_prefixes, vec!["custom/"]);
    }

    #[test]
    fn cdn_url_splits_file_id() {
        assert_eq!(
            cdn_url(4712345, "sodium.jar"),
            "https://edge.forgecdn.net/files/4712/345/sodium.jar"
        );
    }

    #[tokio::test]
    async fn resolves_file_and_folder_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mods/394468/files/4712345"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": 4712345, "fileName": "complementary.zip",
                         "downloadUrl": null, "fileLength": 2048}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mods/394468"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": 394468, "classId": 6552}
            })))
            .mount(&server)
            .await;

        let api = CurseForgeApi::new(build_http_client().unwrap(), server.uri(), "secret");
        let resolved = api.resolve_file(394468, 4712345).await.unwrap();

        assert_eq!(resolved.relative_path, "shaderpacks/complementary.zip");
        assert_eq!(resolved.size, Some(2048));
        assert_eq!(
            resolved.urls,
            vec!["https://edge.forgecdn.net/files/4712/345/complementary.zip"]
        );
    }

    #[tokio::test]
    async fn api_errors_carry_the_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let api = CurseForgeApi::new(build_http_client().unwrap(), server.uri(), "bad");
        let err = api.resolve_file(1, 2).await.unwrap_err();
        assert!(matches!(err, LauncherError::DownloadFailed { status: 403, .. }));
    }
}
