use crate::compiler::CompilerOptions;
use crate::parser::ParserOptions;
use crate::registry::CommandRegistry;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub env_name: String,
    #[serde(default = "default_sigil")]
    pub sigil: char,
    #[serde(default = "default_invoker_keyword")]
    pub invoker_keyword: String,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub strict_references: bool,
    #[serde(default)]
    pub commands_file: Option<PathBuf>,
}

fn default_sigil() -> char {
    '$'
}

fn default_invoker_keyword() -> String {
    String::from("go")
}

fn env_name() -> String {
    env::var("GOLEM_ENV").unwrap_or_else(|_| String::from("default"))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            env_name: env_name(),
            sigil: default_sigil(),
            invoker_keyword: default_invoker_keyword(),
            strict: false,
            strict_references: false,
            commands_file: None,
        }
    }
}

impl Config {
    /// Reads the config for the current environment. A missing file is
    /// created with defaults; an unreadable one falls back to defaults.
    pub fn load() -> Self {
        let config_path = Self::get_config_path();
        if !config_path.exists() {
            let config = Config::default();
            if let Err(err) = config.save() {
                log::warn!("Could not write default config to {}: {}", config_path.display(), err);
            }
            return config;
        }

        let contents = match fs::read_to_string(&config_path) {
            Ok(contents) => contents,
            Err(err) => {
                log::warn!("Could not read {}: {}, using defaults", config_path.display(), err);
                return Config::default();
            }
        };

        Self::from_json(&contents).unwrap_or_else(|err| {
            log::warn!("Invalid config in {}: {}, using defaults", config_path.display(), err);
            Config::default()
        })
    }

    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }

    pub fn save(&self) -> io::Result<()> {
        let config_path = Self::get_config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, contents)
    }

    pub fn get_config_path() -> PathBuf {
        let home = if cfg!(windows) {
            env::var("USERPROFILE")
        } else {
            env::var("HOME")
        };

        PathBuf::from(home.unwrap_or_else(|_| String::from(".")))
            .join(".golem")
            .join(env_name())
            .join("config.json")
    }

    /// `GOLEM_COMMANDS` wins over `commands_file`.
    pub fn commands_path(&self) -> Option<PathBuf> {
        env::var("GOLEM_COMMANDS")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.commands_file.clone())
    }

    pub fn registry(&self) -> Result<CommandRegistry, crate::error::RegistryError> {
        match self.commands_path() {
            Some(path) => CommandRegistry::load(&path, &self.invoker_keyword),
            None => Ok(CommandRegistry::builtin(&self.invoker_keyword)),
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            strict: self.strict,
            inside_alias: false,
            sigil: self.sigil,
            invoker_keyword: self.invoker_keyword.clone(),
        }
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            strict_references: self.strict_references,
        }
    }
}
