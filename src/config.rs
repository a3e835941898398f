use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin all cached traffic belongs to (scheme + host, http(s) only)
  #[serde(deserialize_with = "deserialize_origin")]
  pub origin: Url,
  /// Version token embedded in generation names; bump on each deploy
  pub version: u32,
  /// Stem for generation names (defaults to "satchel")
  #[serde(default = "default_app")]
  pub app: String,
  /// Origin-relative path of the shell document served to offline navigations
  #[serde(default = "default_shell")]
  pub shell: String,
  /// Resources fetched and stored at install time
  pub precache: Vec<String>,
  /// Entry cap for the runtime generation (LRU eviction above it)
  #[serde(default = "default_runtime_cap")]
  pub runtime_cap: usize,
  /// Override for the cache database path
  #[serde(default)]
  pub cache_db: Option<PathBuf>,
}

fn default_app() -> String {
  "satchel".to_string()
}

fn default_shell() -> String {
  "/index.html".to_string()
}

fn default_runtime_cap() -> usize {
  512
}

fn deserialize_origin<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  let url = Url::parse(&s).map_err(serde::de::Error::custom)?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(serde::de::Error::custom(format!(
      "origin must be an http(s) URL, got scheme '{}'",
      url.scheme()
    )));
  }
  Ok(url)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./satchel.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/satchel/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/satchel/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("satchel.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("satchel").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
