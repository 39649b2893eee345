//! Module manifests and installed-module records.
//!
//! A manifest is the JSON file a repository publishes for each module. The
//! catalog pairs it with where the module landed on disk and when, which is
//! everything needed to load the binary again later.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CatalogError, CatalogResult};

/// Content categories a module declares it can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKind {
    Video,
    Image,
    Text,
}

impl MetaKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for MetaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The manifest a repository publishes for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Stable identifier, unique within a repository.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional blurb shown in listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Path of the module binary, relative to the module's directory.
    pub file: String,
    /// Version string as published.
    pub version: String,
    /// Optional icon, either absolute or relative to the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Content categories the module serves.
    #[serde(default)]
    pub meta: Vec<MetaKind>,
}

impl ModuleManifest {
    /// Check the manifest is usable before it goes anywhere near the
    /// catalog or the filesystem.
    pub fn validate(&self) -> CatalogResult<()> {
        if self.id.trim().is_empty() {
            return Err(CatalogError::InvalidManifest("id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(CatalogError::InvalidManifest(
                "name must not be empty".into(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(CatalogError::InvalidManifest(
                "version must not be empty".into(),
            ));
        }
        if self.file.trim().is_empty() {
            return Err(CatalogError::InvalidManifest(
                "file must not be empty".into(),
            ));
        }
        // The binary must stay inside the module's own directory.
        if Path::new(&self.file).is_absolute() || self.file.split('/').any(|part| part == "..") {
            return Err(CatalogError::InvalidManifest(format!(
                "file must be a relative path inside the module directory: {}",
                self.file
            )));
        }
        Ok(())
    }

    /// Resolve the icon against the repository base URL.
    ///
    /// Absolute icon URLs pass through untouched; relative ones are joined
    /// onto `repo`. Returns `None` when there is no icon or it cannot be
    /// resolved.
    pub fn icon_url(&self, repo: &Url) -> Option<Url> {
        let icon = self.icon.as_deref()?;
        match Url::parse(icon) {
            Ok(url) => Some(url),
            Err(_) => repo.join(icon).ok(),
        }
    }
}

/// One installed module: its manifest plus where and when it landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModule {
    /// Directory the module's files were installed into.
    pub directory: PathBuf,
    /// When the install happened.
    pub installed_at: DateTime<Utc>,
    /// The manifest as published at install time.
    pub manifest: ModuleManifest,
}

impl InstalledModule {
    /// Record an install that happened right now.
    pub fn new(directory: PathBuf, manifest: ModuleManifest) -> Self {
        Self {
            directory,
            installed_at: Utc::now(),
            manifest,
        }
    }

    /// Absolute path of the module binary on disk.
    pub fn binary_path(&self) -> PathBuf {
        self.directory.join(&self.manifest.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ModuleManifest {
        ModuleManifest {
            id: "weather".into(),
            name: "Weather".into(),
            description: Some("Hourly forecasts".into()),
            file: "weather.wasm".into(),
            version: "1.2.0".into(),
            icon: Some("icons/weather.png".into()),
            meta: vec![MetaKind::Text],
        }
    }

    #[test]
    fn parses_a_published_manifest() {
        let json = r#"{
            "id": "weather",
            "name": "Weather",
            "file": "weather.wasm",
            "version": "1.2.0",
            "meta": ["video", "text"]
        }"#;
        let parsed: ModuleManifest = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, "weather");
        assert_eq!(parsed.meta, vec![MetaKind::Video, MetaKind::Text]);
        assert!(parsed.description.is_none());
        assert!(parsed.icon.is_none());
    }

    #[test]
    fn meta_kinds_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&MetaKind::Video).unwrap(), r#""video""#);
        assert_eq!(MetaKind::Image.to_string(), "image");
    }

    #[test]
    fn validate_accepts_a_complete_manifest() {
        assert!(manifest().validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let mut m = manifest();
        m.id = "  ".into();
        assert!(m.validate().is_err());

        let mut m = manifest();
        m.version = String::new();
        assert!(m.validate().is_err());
    }

    #[test]
    fn validate_rejects_escaping_file_paths() {
        let mut m = manifest();
        m.file = "../other/module.wasm".into();
        assert!(m.validate().is_err());

        let mut m = manifest();
        m.file = "/etc/passwd".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn icon_url_joins_relative_paths() {
        let repo = Url::parse("https://mods.example.com/repo/").unwrap();
        let resolved = manifest().icon_url(&repo).unwrap();
        assert_eq!(
            resolved.as_str(),
            "https://mods.example.com/repo/icons/weather.png"
        );
    }

    #[test]
    fn icon_url_passes_absolute_urls_through() {
        let mut m = manifest();
        m.icon = Some("https://cdn.example.com/weather.png".into());
        let repo = Url::parse("https://mods.example.com/repo/").unwrap();
        assert_eq!(
            m.icon_url(&repo).unwrap().as_str(),
            "https://cdn.example.com/weather.png"
        );
    }

    #[test]
    fn icon_url_is_none_without_an_icon() {
        let mut m = manifest();
        m.icon = None;
        let repo = Url::parse("https://mods.example.com/repo/").unwrap();
        assert!(m.icon_url(&repo).is_none());
    }

    #[test]
    fn binary_path_joins_directory_and_file() {
        let installed = InstalledModule::new(PathBuf::from("/data/modules/weather"), manifest());
        assert_eq!(
            installed.binary_path(),
            PathBuf::from("/data/modules/weather/weather.wasm")
        );
    }
}
