use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const PROJECT_FILE: &str = ".csvflowrc";
const MAX_ALIAS_DEPTH: usize = 10;

/// Settings read from `.csvflowrc` / `config.ini`.
///
/// ```ini
/// defaults = --workers 8 --error-threshold 0.05
///
/// [aliases]
/// strict = --strict --abort-on-error --max-errors 1
/// ```
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigFile {
    /// Arguments inserted right after the program name.
    pub defaults: Option<String>,
    pub aliases: BTreeMap<String, String>,
}

impl ConfigFile {
    /// Walk up from the working directory looking for `.csvflowrc`.
    pub fn find_project_config() -> Option<PathBuf> {
        let start = env::current_dir().ok()?;
        Self::find_project_config_from(&start)
    }

    fn find_project_config_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            let candidate = current.join(PROJECT_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// User-level locations, most preferred first.
    pub fn user_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if cfg!(windows) {
            if let Ok(appdata) = env::var("APPDATA") {
                paths.push(PathBuf::from(appdata).join("csvflow").join("config.ini"));
            }
            if let Ok(profile) = env::var("USERPROFILE") {
                paths.push(PathBuf::from(profile).join(PROJECT_FILE));
            }
        } else {
            let xdg_config = env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    env::var("HOME")
                        .map(|h| PathBuf::from(h).join(".config"))
                        .unwrap_or_else(|_| PathBuf::from(".config"))
                });
            paths.push(xdg_config.join("csvflow").join("config.ini"));

            if let Ok(home) = env::var("HOME") {
                paths.push(PathBuf::from(home).join(PROJECT_FILE));
            }
        }

        paths
    }

    /// Project config first, then the user locations.
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Self::find_project_config().into_iter().collect();
        paths.extend(Self::user_config_paths());
        paths
    }

    /// Merge the first existing user config with the project config, the
    /// project taking precedence.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::user_config_paths().into_iter().find(|p| p.exists()) {
            config = config.merge(Self::load_from_path(&path)?);
        }
        if let Some(path) = Self::find_project_config() {
            config = config.merge(Self::load_from_path(&path)?);
        }

        Ok(config)
    }

    /// An explicit `--config-file` replaces discovery entirely.
    pub fn load_with_custom_path(custom: Option<&Path>) -> Result<Self> {
        match custom {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Ok(Self::parse_ini(&content))
    }

    /// Lines starting with `;` or `#` are comments. Unknown keys and
    /// sections are ignored.
    fn parse_ini(content: &str) -> Self {
        let mut config = Self::default();
        let mut section = String::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match section.as_str() {
                "" if key == "defaults" => config.defaults = Some(value.to_string()),
                "aliases" => {
                    config.aliases.insert(key.to_string(), value.to_string());
                }
                _ => {}
            }
        }

        config
    }

    fn merge(self, overlay: Self) -> Self {
        let mut aliases = self.aliases;
        aliases.extend(overlay.aliases);
        Self {
            defaults: overlay.defaults.or(self.defaults),
            aliases,
        }
    }

    /// Expand one alias, following `-a NAME` references inside it.
    pub fn resolve_alias(
        &self,
        name: &str,
        seen: &mut HashSet<String>,
        depth: usize,
    ) -> Result<Vec<String>> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(anyhow!("Alias chain too deep: {} levels", depth));
        }
        if !seen.insert(name.to_string()) {
            return Err(anyhow!("Circular dependency detected in alias: {}", name));
        }

        let value = self
            .aliases
            .get(name)
            .ok_or_else(|| anyhow!("Unknown alias: {}", name))?;
        let args = shell_words::split(value)
            .with_context(|| format!("Invalid alias '{}': failed to parse arguments", name))?;

        let mut expanded = Vec::with_capacity(args.len());
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            if is_alias_flag(&arg) {
                if let Some(reference) = iter.next() {
                    expanded.extend(self.resolve_alias(&reference, seen, depth + 1)?);
                    continue;
                }
            }
            expanded.push(arg);
        }

        seen.remove(name);
        Ok(expanded)
    }

    /// Insert `defaults` after the program name, then expand every
    /// `-a NAME` / `--alias NAME` pair.
    pub fn process_args(&self, args: Vec<String>) -> Result<Vec<String>> {
        let mut with_defaults = Vec::with_capacity(args.len());
        let mut args = args.into_iter();
        if let Some(program) = args.next() {
            with_defaults.push(program);
        }
        if let Some(defaults) = &self.defaults {
            let parsed = shell_words::split(defaults)
                .context("Invalid defaults: failed to parse arguments")?;
            with_defaults.extend(parsed);
        }
        with_defaults.extend(args);

        let mut expanded = Vec::with_capacity(with_defaults.len());
        let mut iter = with_defaults.into_iter();
        while let Some(arg) = iter.next() {
            if is_alias_flag(&arg) {
                if let Some(name) = iter.next() {
                    expanded.extend(self.resolve_alias(&name, &mut HashSet::new(), 0)?);
                    continue;
                }
            }
            expanded.push(arg);
        }
        Ok(expanded)
    }

    /// Text for `--show-config`: where configuration is looked up and what
    /// is active.
    pub fn describe() -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Configuration precedence: CLI > project {} > user config > defaults\n",
            PROJECT_FILE
        );

        let project = Self::find_project_config();
        let user_paths = Self::user_config_paths();
        let user = user_paths.iter().find(|p| p.exists());

        match Self::load() {
            Ok(merged) => {
                if project.is_none() && user.is_none() {
                    let _ = writeln!(out, "No configuration files found. Using defaults.");
                } else {
                    let _ = writeln!(out, "Configuration loaded from:");
                    if let Some(path) = &project {
                        let _ = writeln!(out, "  Project: {}", path.display());
                    }
                    if let Some(path) = user {
                        let _ = writeln!(out, "  User: {}", path.display());
                    }
                }
                out.push_str(&merged.describe_active());
            }
            Err(e) => {
                let _ = writeln!(out, "Error loading configuration: {:#}", e);
            }
        }

        let _ = writeln!(out, "\nConfiguration search locations (in precedence order):");
        match &project {
            Some(path) => {
                let _ = writeln!(out, "  1. Project: {} (found)", path.display());
            }
            None => {
                let _ = writeln!(
                    out,
                    "  1. Project: {} (searched up directory tree, not found)",
                    PROJECT_FILE
                );
            }
        }
        for (i, path) in user_paths.iter().enumerate() {
            let status = if path.exists() { "(found)" } else { "(not found)" };
            let _ = writeln!(out, "  {}. User: {} {}", i + 2, path.display(), status);
        }

        if project.is_none() && user.is_none() {
            let _ = writeln!(out, "\nExample configuration file ({}):\n", PROJECT_FILE);
            let _ = writeln!(out, "# Arguments applied to every csvflow command");
            let _ = writeln!(out, "defaults = --workers 8 --progress-interval 2s");
            let _ = writeln!(out);
            let _ = writeln!(out, "[aliases]");
            let _ = writeln!(out, "strict = --strict --abort-on-error --error-threshold 0.01");
            let _ = writeln!(out, "tsv = --delimiter '\\t'");
        }
        out
    }

    fn describe_active(&self) -> String {
        let mut out = String::new();
        if let Some(defaults) = &self.defaults {
            let _ = writeln!(out, "\nActive defaults:\n  defaults = {}", defaults);
        }
        if !self.aliases.is_empty() {
            let _ = writeln!(out, "\nActive aliases:");
            for (name, value) in &self.aliases {
                let _ = writeln!(out, "  {} = {}", name, value);
            }
        }
        out
    }
}

fn is_alias_flag(arg: &str) -> bool {
    arg == "-a" || arg == "--alias"
}
