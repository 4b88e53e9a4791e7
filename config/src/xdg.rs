//! `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn config_path(app_name: &str) -> Option<PathBuf> {
    // Respect an explicit XDG_CONFIG_HOME before falling back to the
    // platform default (dirs honors it on Linux but tests override it).
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)?;
    let path = base.join(app_name).join("config.toml");
    path.is_file().then_some(path)
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Key-value pairs from the `[env]` section. Missing file or section yields
/// an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = match config_path(app_name) {
        Some(path) => path,
        None => return Ok(HashMap::new()),
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::Path;

    fn with_xdg_home<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match prev {
            Some(v) => env::set_var("XDG_CONFIG_HOME", v),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    #[test]
    fn missing_config_returns_empty_map() {
        let map = load_env_map("weft-xdg-test-nonexistent-12345").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn reads_env_table() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("weft-xdg-test");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nFOO = \"from_toml\"\nBAR = \"baz\"\n",
        )
        .unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("weft-xdg-test")).unwrap();
        assert_eq!(map.get("FOO").map(String::as_str), Some("from_toml"));
        assert_eq!(map.get("BAR").map(String::as_str), Some("baz"));
    }

    #[test]
    fn config_without_env_section_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("weft-xdg-noenv");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[other]\nkey = \"ignored\"\n").unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("weft-xdg-noenv")).unwrap();
        assert!(map.is_empty());
    }
}
