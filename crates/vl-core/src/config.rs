//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! server, upstream, harvest and library sections. Every section except the
//! upstream URL defaults sensibly. Once loaded the configuration is an
//! immutable snapshot: components receive it through `Arc<Config>` and a
//! reload would build a new snapshot rather than mutate this one.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::identity::IdentityRegistry;
use crate::Error;

/// Places searched for a config file when none is given explicitly.
pub const DEFAULT_CONFIG_PATHS: [&str; 4] = [
    "./config.toml",
    "./virtlib.toml",
    "~/.config/virtlib/config.toml",
    "/etc/virtlib/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    /// Which genuine libraries to suppress from the views list.
    pub hide: HidePolicy,
    pub harvest: HarvestConfig,
    /// Virtual libraries, in the order they are presented to clients.
    #[serde(rename = "library")]
    pub libraries: Vec<Library>,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| Error::Configuration(format!("config parse error: {e}")))
    }

    /// Load, expand and validate the configuration at `path`.
    ///
    /// Any problem here is fatal: the process must not start on a config it
    /// cannot fully honour.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.expand_paths();

        for warning in config.validate()? {
            tracing::warn!("Config warning: {warning}");
        }

        Ok(config)
    }

    /// Load from `custom_path`, or from the first default location that exists.
    pub fn discover(custom_path: Option<&Path>) -> Result<(Self, PathBuf)> {
        if let Some(path) = custom_path {
            return Ok((Self::load(path)?, path.to_path_buf()));
        }

        for path_str in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path_str);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                return Ok((Self::load(path)?, path.to_path_buf()));
            }
        }

        Err(Error::Configuration(format!(
            "no config file found (searched {})",
            DEFAULT_CONFIG_PATHS.join(", ")
        )))
    }

    /// Expand `~` in every configured filesystem path.
    pub fn expand_paths(&mut self) {
        self.harvest.images_dir = expand(&self.harvest.images_dir);
        self.harvest.store_path = expand(&self.harvest.store_path);
        self.harvest.legacy_done_log = self.harvest.legacy_done_log.as_deref().map(expand);
        self.harvest.cover_workdir = self.harvest.cover_workdir.as_deref().map(expand);
        self.harvest.placeholder = self.harvest.placeholder.as_deref().map(expand);
        for library in &mut self.libraries {
            library.image = library.image.as_deref().map(expand);
        }
    }

    /// Check the configuration.
    ///
    /// Returns non-fatal warnings on success; anything that would make the
    /// proxy misbehave is a [`Error::Configuration`].
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            return Err(Error::Configuration("server.port cannot be 0".into()));
        }

        let url = self.upstream.url.trim();
        if url.is_empty() {
            return Err(Error::Configuration("upstream.url is required".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Configuration(format!(
                "upstream.url must be an http(s) URL, got '{url}'"
            )));
        }

        let mut seen = HashSet::new();
        for (i, library) in self.libraries.iter().enumerate() {
            if library.name.trim().is_empty() {
                return Err(Error::Configuration(format!("library[{i}].name is empty")));
            }
            if library.name.contains(['/', '\\']) {
                return Err(Error::Configuration(format!(
                    "library '{}' name must not contain path separators",
                    library.name
                )));
            }
            if !library.has_plain_name() {
                return Err(Error::Configuration(format!(
                    "library '{}' name must be a plain file name",
                    library.name
                )));
            }
            if library.resource.id.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "library '{}' has an empty resource id",
                    library.name
                )));
            }
            if !seen.insert(library.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate library name '{}'",
                    library.name
                )));
            }
            if let Some(ref image) = library.image {
                if !image.exists() {
                    warnings.push(format!(
                        "library '{}' image {} does not exist",
                        library.name,
                        image.display()
                    ));
                }
            }
        }

        let registry = IdentityRegistry::new(self.libraries.clone());
        if let Some((a, b)) = registry.collisions().into_iter().next() {
            return Err(Error::Configuration(format!(
                "libraries '{a}' and '{b}' hash to the same id; rename one of them"
            )));
        }

        if self.harvest.enabled {
            if self.harvest.sample_size == 0 {
                return Err(Error::Configuration("harvest.sample_size must be at least 1".into()));
            }
            if self.harvest.cover_command.is_empty() {
                return Err(Error::Configuration(
                    "harvest.cover_command is empty but harvesting is enabled".into(),
                ));
            }
            if self.upstream.api_key.is_none() {
                warnings.push(
                    "harvesting is enabled but upstream.api_key is not set; covers will not be generated"
                        .into(),
                );
            }
        }

        Ok(warnings)
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// The media server being proxied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL, e.g. `http://emby:8096`.
    pub url: String,
    /// API key for background (privileged) calls.
    pub api_key: Option<String>,
    /// Prefix used for backend API calls made by the proxy itself.
    pub path_prefix: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            path_prefix: "/emby".into(),
            timeout_secs: default_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }
}

/// Background cover harvesting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub enabled: bool,
    /// Holds `<name>/<n>.jpg` samples and the generated `<name>.png` covers.
    pub images_dir: PathBuf,
    /// SQLite file holding the idempotency records.
    pub store_path: PathBuf,
    /// Completion log written by earlier releases, imported once at startup.
    pub legacy_done_log: Option<PathBuf>,
    /// Program and leading arguments; the library name is appended.
    pub cover_command: Vec<String>,
    pub cover_workdir: Option<PathBuf>,
    #[serde(default = "default_cover_timeout")]
    pub cover_timeout_secs: u64,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Overrides the placeholder image compiled into the binary.
    pub placeholder: Option<PathBuf>,
}

fn default_cover_timeout() -> u64 {
    300
}
fn default_sample_size() -> usize {
    9
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            images_dir: PathBuf::from("images"),
            store_path: PathBuf::from("virtlib.db"),
            legacy_done_log: Some(PathBuf::from("image_done.txt")),
            cover_command: ["uv", "run", "python", "cover_gen.py"]
                .into_iter()
                .map(String::from)
                .collect(),
            cover_workdir: None,
            cover_timeout_secs: default_cover_timeout(),
            sample_size: default_sample_size(),
            placeholder: None,
        }
    }
}

impl HarvestConfig {
    /// Directory holding the harvested samples for one library.
    pub fn sample_dir(&self, library_name: &str) -> PathBuf {
        self.images_dir.join(library_name)
    }

    /// Path of the generated cover for one library.
    pub fn cover_path(&self, library_name: &str) -> PathBuf {
        self.images_dir.join(format!("{library_name}.png"))
    }
}

// ---------------------------------------------------------------------------
// Hide policy
// ---------------------------------------------------------------------------

/// Which genuine upstream libraries are suppressed from the views list.
///
/// Written in config as a list of collection types; the literal `all`
/// suppresses every genuine library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum HidePolicy {
    All,
    CollectionTypes(Vec<String>),
}

impl Default for HidePolicy {
    fn default() -> Self {
        HidePolicy::CollectionTypes(Vec::new())
    }
}

impl From<Vec<String>> for HidePolicy {
    fn from(values: Vec<String>) -> Self {
        if values.iter().any(|v| v.eq_ignore_ascii_case("all")) {
            HidePolicy::All
        } else {
            HidePolicy::CollectionTypes(values)
        }
    }
}

impl From<HidePolicy> for Vec<String> {
    fn from(policy: HidePolicy) -> Self {
        match policy {
            HidePolicy::All => vec!["all".into()],
            HidePolicy::CollectionTypes(types) => types,
        }
    }
}

impl HidePolicy {
    /// Whether a genuine library with this collection type is hidden.
    pub fn suppresses(&self, collection_type: Option<&str>) -> bool {
        match self {
            HidePolicy::All => true,
            HidePolicy::CollectionTypes(types) => {
                collection_type.is_some_and(|ct| types.iter().any(|t| t == ct))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Libraries
// ---------------------------------------------------------------------------

/// What kind of upstream resource backs a virtual library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Collection,
    Tag,
    Genre,
    Studio,
    Person,
}

impl ResourceType {
    /// Upstream item-query parameter that scopes a listing to this resource.
    pub fn query_param(&self) -> &'static str {
        match self {
            ResourceType::Collection => "ParentId",
            ResourceType::Tag => "TagIds",
            ResourceType::Genre => "GenreIds",
            ResourceType::Studio => "StudioIds",
            ResourceType::Person => "PersonIds",
        }
    }
}

/// The upstream resource a virtual library stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceType,
    pub id: String,
}

/// A configured virtual library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LibraryEntry", into = "LibraryEntry")]
pub struct Library {
    pub name: String,
    pub resource: ResourceRef,
    /// Operator-supplied artwork.
    pub image: Option<PathBuf>,
    /// `CollectionType` advertised for the synthetic view.
    pub collection_type: Option<String>,
}

impl Library {
    /// Whether the name is a single plain path component, so that
    /// `images_dir/<name>` stays strictly inside `images_dir`.
    pub fn has_plain_name(&self) -> bool {
        let mut components = Path::new(&self.name).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(c)), None) if c == self.name.as_str()
        )
    }

    /// Filter-scoped libraries need recursive expansion; a container already
    /// defines its own membership.
    pub fn recursive(&self) -> bool {
        self.resource.kind != ResourceType::Collection
    }

    /// Whether membership comes from a single upstream container.
    pub fn is_container_scoped(&self) -> bool {
        self.resource.kind == ResourceType::Collection
    }
}

/// On-disk shape of a `[[library]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LibraryEntry {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_type: Option<ResourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collection_type: Option<String>,
}

impl TryFrom<LibraryEntry> for Library {
    type Error = String;

    fn try_from(entry: LibraryEntry) -> std::result::Result<Self, Self::Error> {
        let resource = match (entry.collection_id, entry.resource_id) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "library '{}': set either collection_id or resource_id, not both",
                    entry.name
                ))
            }
            (Some(id), None) => {
                if entry.resource_type.is_some_and(|t| t != ResourceType::Collection) {
                    return Err(format!(
                        "library '{}': collection_id cannot be combined with resource_type",
                        entry.name
                    ));
                }
                ResourceRef {
                    kind: ResourceType::Collection,
                    id,
                }
            }
            (None, Some(id)) => ResourceRef {
                kind: entry.resource_type.unwrap_or(ResourceType::Collection),
                id,
            },
            (None, None) => {
                return Err(format!(
                    "library '{}': one of collection_id or resource_id is required",
                    entry.name
                ))
            }
        };

        Ok(Library {
            name: entry.name,
            resource,
            image: entry.image,
            collection_type: entry.collection_type,
        })
    }
}

impl From<Library> for LibraryEntry {
    fn from(library: Library) -> Self {
        LibraryEntry {
            name: library.name,
            resource_type: Some(library.resource.kind),
            resource_id: Some(library.resource.id),
            collection_id: None,
            image: library.image,
            collection_type: library.collection_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
hide = ["boxsets"]

[upstream]
url = "http://emby:8096/"
api_key = "secret"

[[library]]
name = "Anime"
resource_type = "tag"
resource_id = "1234"

[[library]]
name = "Marvel"
collection_id = "5678"
image = "covers/marvel.png"
"#;

    #[test]
    fn parse_sample_config() {
        let cfg = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.upstream.base_url(), "http://emby:8096");
        assert_eq!(cfg.upstream.path_prefix, "/emby");
        assert_eq!(cfg.hide, HidePolicy::CollectionTypes(vec!["boxsets".into()]));
        assert_eq!(cfg.libraries.len(), 2);

        let anime = &cfg.libraries[0];
        assert_eq!(anime.resource.kind, ResourceType::Tag);
        assert!(anime.recursive());

        let marvel = &cfg.libraries[1];
        assert_eq!(marvel.resource.kind, ResourceType::Collection);
        assert_eq!(marvel.resource.id, "5678");
        assert!(!marvel.recursive());
        assert_eq!(marvel.image, Some(PathBuf::from("covers/marvel.png")));
    }

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.harvest.sample_size, 9);
        assert_eq!(cfg.harvest.images_dir, PathBuf::from("images"));
        assert_eq!(cfg.harvest.cover_path("Anime"), PathBuf::from("images/Anime.png"));
        assert_eq!(cfg.harvest.sample_dir("Anime"), PathBuf::from("images/Anime"));
        assert_eq!(cfg.hide, HidePolicy::default());
    }

    #[test]
    fn hide_all_wildcard() {
        let cfg = Config::from_toml("hide = [\"movies\", \"all\"]").unwrap();
        assert_eq!(cfg.hide, HidePolicy::All);
        assert!(cfg.hide.suppresses(Some("tvshows")));
        assert!(cfg.hide.suppresses(None));
    }

    #[test]
    fn hide_by_type() {
        let policy = HidePolicy::from(vec!["boxsets".to_string()]);
        assert!(policy.suppresses(Some("boxsets")));
        assert!(!policy.suppresses(Some("movies")));
        assert!(!policy.suppresses(None));
        assert!(!HidePolicy::default().suppresses(Some("movies")));
    }

    #[test]
    fn library_needs_a_resource() {
        let err = Config::from_toml("[[library]]\nname = \"Orphan\"\n").unwrap_err();
        assert!(err.to_string().contains("collection_id or resource_id"));
    }

    #[test]
    fn library_rejects_both_forms() {
        let toml = "[[library]]\nname = \"X\"\ncollection_id = \"1\"\nresource_id = \"2\"\n";
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn query_params_per_resource_type() {
        assert_eq!(ResourceType::Collection.query_param(), "ParentId");
        assert_eq!(ResourceType::Tag.query_param(), "TagIds");
        assert_eq!(ResourceType::Genre.query_param(), "GenreIds");
        assert_eq!(ResourceType::Studio.query_param(), "StudioIds");
        assert_eq!(ResourceType::Person.query_param(), "PersonIds");
    }

    #[test]
    fn validate_accepts_sample() {
        let cfg = Config::from_toml(SAMPLE).unwrap();
        let warnings = cfg.validate().unwrap();
        // The custom image path does not exist in the test environment.
        assert!(warnings.iter().any(|w| w.contains("marvel.png")));
    }

    #[test]
    fn validate_requires_upstream() {
        let cfg = Config::default();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("upstream.url"));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let toml = r#"
[upstream]
url = "http://emby:8096"

[[library]]
name = "Anime"
collection_id = "1"

[[library]]
name = "Anime"
collection_id = "2"
"#;
        let cfg = Config::from_toml(toml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate library name"));
    }

    #[test]
    fn validate_rejects_path_separators() {
        let toml = "[upstream]\nurl = \"http://emby\"\n[[library]]\nname = \"a/b\"\ncollection_id = \"1\"\n";
        let cfg = Config::from_toml(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_dir_names() {
        for name in [".", ".."] {
            let toml = format!(
                "[upstream]\nurl = \"http://emby\"\n[[library]]\nname = \"{name}\"\ncollection_id = \"1\"\n"
            );
            let cfg = Config::from_toml(&toml).unwrap();
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("plain file name"), "{name}");
        }
    }

    #[test]
    fn plain_names() {
        let mut lib = Config::from_toml("[[library]]\nname = \"Anime\"\ncollection_id = \"1\"\n")
            .unwrap()
            .libraries
            .remove(0);
        assert!(lib.has_plain_name());
        for name in [".", "..", "a/..", "./a"] {
            lib.name = name.into();
            assert!(!lib.has_plain_name(), "{name}");
        }
    }

    #[test]
    fn validate_warns_without_api_key() {
        let cfg = Config::from_toml("[upstream]\nurl = \"http://emby\"\n").unwrap();
        let warnings = cfg.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("api_key")));
    }

    #[test]
    fn load_missing_file_is_fatal() {
        let err = Config::load(Path::new("/nonexistent/virtlib.toml")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.libraries.len(), 2);
    }
}
