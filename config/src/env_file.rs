//! Minimal `.env` parsing: `KEY=VALUE` lines, `#` comments, single or double
//! quotes stripped (double quotes support `\"` escapes). No multiline values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn env_file_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].replace("\\\"", "\"");
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

fn parse(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), unquote(value.trim()));
    }
    out
}

/// Read `.env` into a map. A missing file is an empty map, not an error.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    match env_file_path(override_dir) {
        Some(path) => Ok(parse(&std::fs::read_to_string(path)?)),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_pairs_and_skips_noise() {
        let map = parse("# comment\nFOO=bar\n\nnot-a-pair\n=no-key\nBAZ = quux \n");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(map.get("BAZ").map(String::as_str), Some("quux"));
    }

    #[test]
    fn quotes_are_stripped() {
        let map = parse("A=\"hello world\"\nB='single'\nC=\"say \\\"hi\\\"\"\nD=\"\"\n");
        assert_eq!(map.get("A").map(String::as_str), Some("hello world"));
        assert_eq!(map.get("B").map(String::as_str), Some("single"));
        assert_eq!(map.get("C").map(String::as_str), Some("say \"hi\""));
        assert_eq!(map.get("D").map(String::as_str), Some(""));
    }

    #[test]
    fn hash_inside_value_is_kept() {
        let map = parse("KEY=a#b\n");
        assert_eq!(map.get("KEY").map(String::as_str), Some("a#b"));
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_map(Some(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn reads_env_file_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "X=1\nY=2\n").unwrap();
        let map = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(map.get("X").map(String::as_str), Some("1"));
        assert_eq!(map.get("Y").map(String::as_str), Some("2"));
    }
}
