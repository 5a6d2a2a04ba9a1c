use std::fmt;

use crate::core::error::{LauncherError, LauncherResult};

/// A parsed Maven coordinate, as used by libraries that ship without a
/// `downloads.artifact` block.
///
/// Supported formats:
///   `group:artifact:version`
///   `group:artifact:version:classifier`
///   either of the above with an `@extension` suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MavenArtifact {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub classifier: Option<String>,
    /// Defaults to `"jar"`.
    pub extension: String,
}

impl MavenArtifact {
    pub fn parse(coord: &str) -> LauncherResult<Self> {
        let invalid = || LauncherError::InvalidMavenCoordinate(coord.to_string());

        let (coord_part, extension) = match coord.rsplit_once('@') {
            Some((head, ext)) if !ext.is_empty() => (head, ext),
            Some(_) => return Err(invalid()),
            None => (coord, "jar"),
        };

        let mut parts = coord_part.split(':');
        let group_id = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let artifact_id = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let version = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let classifier = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            classifier,
            extension: extension.to_string(),
        })
    }

    /// Same coordinate with a classifier, e.g. for native artifacts.
    pub fn with_classifier(&self, classifier: &str) -> Self {
        Self {
            classifier: Some(classifier.to_string()),
            ..self.clone()
        }
    }

    pub fn filename(&self) -> String {
        match &self.classifier {
            Some(c) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, self.version, c, self.extension
            ),
            None => format!("{}-{}.{}", self.artifact_id, self.version, self.extension),
        }
    }

    /// Repository-relative path with forward slashes:
    /// `<group/as/path>/<artifact>/<version>/<filename>`.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group_id.replace('.', "/"),
            self.artifact_id,
            self.version,
            self.filename()
        )
    }

    pub fn url_in(&self, repository: &str) -> String {
        format!(
            "{}/{}",
            repository.trim_end_matches('/'),
            self.relative_path()
        )
    }
}

impl fmt::Display for MavenArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{c}")?;
        }
        if self.extension != "jar" {
            write!(f, "@{}", self.extension)?;
        }
        Ok(())
    }
}
