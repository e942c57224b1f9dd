//! Config file discovery, table merging and the environment overlay.

use crate::{ConfigError, MelodyConfig};
use std::path::{Path, PathBuf};

/// Where the effective values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files that were loaded, in load order.
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<String>,
}

/// Existing config files in load order (system, user, local/cli).
///
/// An existing `cli_path` replaces the local `./melodycraft.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/melodycraft/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("melodycraft/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("melodycraft.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Merge `files` in order, then overlay environment values from `env`.
pub fn load_files(
    files: &[PathBuf],
    env: impl Fn(&str) -> Option<String>,
) -> Result<(MelodyConfig, ConfigSources), ConfigError> {
    let mut sources = ConfigSources::default();
    let mut merged = toml::Table::new();

    for path in files {
        let table = read_table(path)?;
        // Each file must make sense on its own, so errors name the right file.
        from_table(table.clone(), path)?;
        merge_tables(&mut merged, table);
        sources.files.push(path.clone());
    }

    let origin = files.last().cloned().unwrap_or_else(|| PathBuf::from("<defaults>"));
    let mut config = from_table(merged, &origin)?;
    apply_env_overrides(&mut config, &mut sources, env);

    config.media.soundfont_dirs = config
        .media
        .soundfont_dirs
        .iter()
        .map(|dir| expand_path(&dir.to_string_lossy()))
        .collect();

    Ok((config, sources))
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn from_table(table: toml::Table, path: &Path) -> Result<MelodyConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Key-by-key merge; nested tables merge recursively, everything else
/// (including arrays) is replaced by the overlay.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Overlay `MELODYCRAFT_*` variables (and `RUST_LOG`) onto `config`.
pub fn apply_env_overrides(
    config: &mut MelodyConfig,
    sources: &mut ConfigSources,
    env: impl Fn(&str) -> Option<String>,
) {
    let mut take = |name: &str| {
        let value = env(name)?;
        sources.env_overrides.push(name.to_string());
        Some(value)
    };

    if let Some(v) = take("MELODYCRAFT_API_BASE_URL") {
        config.backend.base_url = v;
    }
    if let Some(v) = take("MELODYCRAFT_ENDPOINT") {
        config.client.endpoint = v;
    }
    if let Some(port) = take("MELODYCRAFT_HTTP_PORT").and_then(|v| v.parse().ok()) {
        config.proxy.http_port = port;
    }
    if let Some(n) = take("MELODYCRAFT_MEASURES_PER_LINE").and_then(|v| v.parse().ok()) {
        config.client.measures_per_line = n;
    }
    if let Some(v) = take("MELODYCRAFT_SOUNDFONT_DIRS") {
        config.media.soundfont_dirs = std::env::split_paths(&v).collect();
    }
    if let Some(v) = take("MELODYCRAFT_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v).filter(|s| !s.is_empty());
    }
    if let Some(v) = take("MELODYCRAFT_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    // RUST_LOG wins over the config-specific variable
    if let Some(v) = take("RUST_LOG") {
        config.telemetry.log_level = v;
    }
}

/// Expand a leading `~/` or `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        return directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path));
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var, rest) = stripped.split_once('/').unwrap_or((stripped, ""));
        return match std::env::var(var) {
            Ok(value) if rest.is_empty() => PathBuf::from(value),
            Ok(value) => PathBuf::from(value).join(rest),
            Err(_) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn later_files_win_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let system = write(
            dir.path(),
            "system.toml",
            "[backend]\nbase_url = \"http://backend:8000\"\ntimeout_ms = 5000\n",
        );
        let local = write(dir.path(), "local.toml", "[backend]\ntimeout_ms = 9000\n");

        let (config, sources) = load_files(&[system, local], no_env).unwrap();
        assert_eq!(config.backend.base_url, "http://backend:8000");
        assert_eq!(config.backend.timeout_ms, 9000);
        assert_eq!(sources.files.len(), 2);
    }

    #[test]
    fn env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "c.toml", "[proxy]\nhttp_port = 4000\n");
        let env: HashMap<&str, &str> = [
            ("MELODYCRAFT_HTTP_PORT", "4100"),
            ("MELODYCRAFT_MEASURES_PER_LINE", "2"),
            ("MELODYCRAFT_LOG_LEVEL", "debug"),
            ("RUST_LOG", "melodycraft=trace"),
        ]
        .into_iter()
        .collect();

        let (config, sources) =
            load_files(&[file], |name| env.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.proxy.http_port, 4100);
        assert_eq!(config.client.measures_per_line, 2);
        assert_eq!(config.telemetry.log_level, "melodycraft=trace");
        assert_eq!(sources.env_overrides.len(), 4);
    }

    #[test]
    fn bad_file_names_itself() {
        let dir = tempfile::tempdir().unwrap();
        let good = write(dir.path(), "good.toml", "[proxy]\nhttp_port = 1\n");
        let bad = write(dir.path(), "bad.toml", "[proxy]\nhttp_port = \"lots\"\n");

        match load_files(&[good, bad.clone()], no_env) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_files(&[PathBuf::from("/nonexistent/melodycraft.toml")], no_env);
        assert!(matches!(err, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn merge_replaces_arrays() {
        let mut base: toml::Table = "[media]\nsoundfont_dirs = [\"/a\", \"/b\"]\nsample_rate = 48000\n"
            .parse()
            .unwrap();
        let overlay: toml::Table = "[media]\nsoundfont_dirs = [\"/c\"]\n".parse().unwrap();
        merge_tables(&mut base, overlay);

        let media = base["media"].as_table().unwrap();
        assert_eq!(media["soundfont_dirs"].as_array().unwrap().len(), 1);
        assert_eq!(media["sample_rate"].as_integer(), Some(48000));
    }

    #[test]
    fn expand_path_forms() {
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
        let expanded = expand_path("~/midi/SF2");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("midi/SF2"));
    }
}
