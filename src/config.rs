//! Configuration for the renderer component.
//!
//! Three layers:
//!
//! - [`RenderOptions`] - per-context settings handed to the native backend
//!   (max Vulkan API version, device memory ceiling, image cache size, exposed
//!   device extensions). Parsed from the container's `key=value` settings
//!   string.
//! - [`SocketConfig`] - where the listening Unix socket lives.
//! - [`ServerConfig`] - the JSON file read by the binary, with environment
//!   variable overrides.
//!
//! Everything is validated here, before the component starts. A bad version
//! string never reaches a client request.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Socket path relative to the environment root.
pub const DEFAULT_SOCKET_PATH: &str = "tmp/.vortek/V0";

/// `sun_path` is 104 bytes on macOS, 108 on Linux; use the conservative limit.
const MAX_SOCKET_PATH: usize = 104;

/// Settings-string value meaning "keep the default max API version".
pub const DEFAULT_VK_MAX_VERSION: &str = "1.3";

/// Patch level reported for every configured max API version.
const VK_PATCH_LEVEL: u32 = 128;

const DEFAULT_MAX_DEVICE_MEMORY: u16 = 4096;
const DEFAULT_IMAGE_CACHE_SIZE: u16 = 256;

// ─── API version ───────────────────────────────────────────────────────────

/// Vulkan-style packed version: `major << 22 | minor << 12 | patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiVersion(u32);

impl ApiVersion {
    /// Default max version exposed to clients (1.3.128).
    pub const DEFAULT: Self = Self::new(1, 3, VK_PATCH_LEVEL);

    /// Pack a version triple. Components are masked to their bit widths
    /// (7 / 10 / 12 bits).
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(((major & 0x7f) << 22) | ((minor & 0x3ff) << 12) | (patch & 0xfff))
    }

    /// The packed representation passed to the backend.
    #[must_use]
    pub const fn packed(self) -> u32 {
        self.0
    }

    /// Major component.
    #[must_use]
    pub const fn major(self) -> u32 {
        self.0 >> 22
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(self) -> u32 {
        (self.0 >> 12) & 0x3ff
    }

    /// Patch component.
    #[must_use]
    pub const fn patch(self) -> u32 {
        self.0 & 0xfff
    }

    /// Parse a `major.minor` settings value.
    ///
    /// The patch level is always 128. A trailing third component is accepted
    /// and ignored.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            bail!("Invalid API version '{s}': expected major.minor");
        }

        let component = |idx: usize, name: &str, max: u32| -> Result<u32> {
            let value: u32 = parts[idx]
                .parse()
                .with_context(|| format!("Invalid {name} component in API version '{s}'"))?;
            if value > max {
                bail!("{name} component {value} out of range (max {max}) in API version '{s}'");
            }
            Ok(value)
        };

        let major = component(0, "major", 0x7f)?;
        let minor = component(1, "minor", 0x3ff)?;
        if parts.len() == 3 {
            log::debug!("[Config] Ignoring patch component of API version '{s}'");
        }

        Ok(Self::new(major, minor, VK_PATCH_LEVEL))
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

// ─── Render options ────────────────────────────────────────────────────────

/// Which device extensions the backend may expose to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposedExtensions {
    /// No restriction.
    #[default]
    All,
    /// Only the listed extension names.
    Only(Vec<String>),
}

impl ExposedExtensions {
    /// Parse the settings value: `all` or empty means unrestricted, anything
    /// else is a `|`-separated list.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == "all" {
            return Self::All;
        }
        Self::Only(
            value
                .split('|')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Returns `true` if `name` may be exposed.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Settings handed to the native backend when a render context is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Highest API version the context reports.
    pub max_api_version: ApiVersion,
    /// Device memory ceiling in MiB.
    pub max_device_memory: u16,
    /// Image cache capacity in MiB.
    pub image_cache_size: u16,
    /// Device extension allow-list.
    pub exposed_device_extensions: ExposedExtensions,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_api_version: ApiVersion::DEFAULT,
            max_device_memory: DEFAULT_MAX_DEVICE_MEMORY,
            image_cache_size: DEFAULT_IMAGE_CACHE_SIZE,
            exposed_device_extensions: ExposedExtensions::All,
        }
    }
}

impl RenderOptions {
    /// Parse a container settings string such as
    /// `vkMaxVersion=1.2,maxDeviceMemory=2048,exposedDeviceExtensions=VK_KHR_swapchain|VK_KHR_maintenance1`.
    ///
    /// Keys: `vkMaxVersion`, `maxDeviceMemory`, `imageCacheSize`,
    /// `exposedDeviceExtensions`. Unknown keys are ignored. Empty input gives
    /// the defaults.
    pub fn from_key_values(settings: &str) -> Result<Self> {
        let mut options = Self::default();

        for (key, value) in parse_key_values(settings)? {
            match key {
                "vkMaxVersion" => {
                    if value != DEFAULT_VK_MAX_VERSION {
                        options.max_api_version = ApiVersion::parse(value)?;
                    }
                }
                "maxDeviceMemory" => {
                    options.max_device_memory = parse_u16(key, value)?;
                }
                "imageCacheSize" => {
                    options.image_cache_size = parse_u16(key, value)?;
                }
                "exposedDeviceExtensions" => {
                    options.exposed_device_extensions = ExposedExtensions::parse(value);
                }
                _ => log::debug!("[Config] Ignoring unknown render option '{key}'"),
            }
        }

        Ok(options)
    }
}

/// Split `a=1,b=2` into pairs. Blank entries are skipped.
fn parse_key_values(settings: &str) -> Result<Vec<(&str, &str)>> {
    settings
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .with_context(|| format!("Malformed render option '{entry}': expected key=value"))
        })
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .with_context(|| format!("Invalid value '{value}' for {key}: expected 0..=65535"))
}

// ─── Socket configuration ──────────────────────────────────────────────────

/// Location of the listening Unix socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    path: PathBuf,
}

impl SocketConfig {
    /// Use `path` as the socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path exceeds the `sun_path` limit.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let path_len = path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            bail!(
                "Socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                path.display()
            );
        }
        Ok(Self { path })
    }

    /// Socket at `relative` under the environment root directory.
    pub fn create(root: impl AsRef<Path>, relative: impl AsRef<Path>) -> Result<Self> {
        Self::new(root.as_ref().join(relative))
    }

    /// Path of the socket file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─── Server configuration ──────────────────────────────────────────────────

/// Configuration file read by the `vortek-bridge` binary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Environment root; relative socket paths are resolved against it.
    pub root_dir: PathBuf,
    /// Socket path, relative to `root_dir` unless absolute.
    pub socket_path: PathBuf,
    /// Render options in `key=value` settings form.
    pub render_options: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            render_options: String::new(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` (defaults if the file does not exist), then apply
    /// `VORTEK_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            Some(path) => {
                log::info!("[Config] {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Apply overrides from a variable lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("VORTEK_ROOT_DIR") {
            self.root_dir = PathBuf::from(root);
        }

        if let Some(socket) = lookup("VORTEK_SOCKET_PATH") {
            self.socket_path = PathBuf::from(socket);
        }

        if let Some(options) = lookup("VORTEK_RENDER_OPTIONS") {
            self.render_options = options;
        }
    }

    /// Resolved socket configuration.
    pub fn socket_config(&self) -> Result<SocketConfig> {
        SocketConfig::create(&self.root_dir, &self.socket_path)
    }

    /// Parsed render options.
    pub fn render(&self) -> Result<RenderOptions> {
        RenderOptions::from_key_values(&self.render_options)
    }
}
