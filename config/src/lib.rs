//! Load configuration from a project `.env` and an XDG `config.toml`, then
//! apply it to the process environment with priority:
//! **existing env > .env > XDG**.
//!
//! The gateway reads all settings from the environment once at startup
//! (`weft::Settings::from_env`); this crate only fills in the gaps so
//! deployments can choose between real environment variables, a checked-out
//! `.env`, and a per-user `~/.config/weft/config.toml`.

mod env_file;
mod xdg;

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Load `.env` (from `override_dir` or the current directory) and
/// `$XDG_CONFIG_HOME/<app_name>/config.toml`, then set every key that is not
/// already present in the process environment.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg::load_env_map(app_name)?;
    let dotenv_map = env_file::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<&String> = xdg_map.keys().collect();
    keys.extend(dotenv_map.keys());

    for key in keys {
        if std::env::var(key).is_ok() {
            continue; // existing env wins
        }
        // .env beats XDG for the same key.
        if let Some(value) = dotenv_map.get(key).or_else(|| xdg_map.get(key)) {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

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
    fn existing_env_wins() {
        env::set_var("WEFT_CONFIG_TEST_EXISTING", "from_env");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "WEFT_CONFIG_TEST_EXISTING=from_dotenv\n")
            .unwrap();
        load_and_apply("weft-test", Some(dir.path())).unwrap();
        assert_eq!(
            env::var("WEFT_CONFIG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("WEFT_CONFIG_TEST_EXISTING");
    }

    #[test]
    fn dotenv_overrides_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("weft-test-prio");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nWEFT_CONFIG_TEST_PRIO = \"from_xdg\"\n",
        )
        .unwrap();

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "WEFT_CONFIG_TEST_PRIO=from_dotenv\n",
        )
        .unwrap();

        env::remove_var("WEFT_CONFIG_TEST_PRIO");
        with_xdg_home(xdg_dir.path(), || {
            load_and_apply("weft-test-prio", Some(dotenv_dir.path())).unwrap();
        });
        assert_eq!(
            env::var("WEFT_CONFIG_TEST_PRIO").as_deref(),
            Ok("from_dotenv")
        );
        env::remove_var("WEFT_CONFIG_TEST_PRIO");
    }

    #[test]
    fn xdg_applies_when_no_dotenv() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("weft-test-xdg");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nWEFT_CONFIG_TEST_XDG = \"from_xdg\"\n",
        )
        .unwrap();

        let empty_dir = tempfile::tempdir().unwrap();
        env::remove_var("WEFT_CONFIG_TEST_XDG");
        with_xdg_home(xdg_dir.path(), || {
            load_and_apply("weft-test-xdg", Some(empty_dir.path())).unwrap();
        });
        assert_eq!(env::var("WEFT_CONFIG_TEST_XDG").as_deref(), Ok("from_xdg"));
        env::remove_var("WEFT_CONFIG_TEST_XDG");
    }

    #[test]
    fn missing_sources_are_fine() {
        let empty = tempfile::tempdir().unwrap();
        assert!(load_and_apply("weft-nonexistent-app-xyz", Some(empty.path())).is_ok());
    }

    #[test]
    fn invalid_xdg_toml_is_an_error() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("weft-test-bad");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "broken [[[\n").unwrap();

        let result = with_xdg_home(xdg_dir.path(), || load_and_apply("weft-test-bad", None));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
