//! Read-only command registry consulted by the lexer and the segment resolver.
//!
//! The registry is built once (from the built-in table or a JSON file) and is
//! never mutated while parsing, so one instance can be shared by any number of
//! concurrent parses.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArgDescriptor {
    pub name: String,
    /// Takes every remaining word.
    #[serde(default)]
    pub rest: bool,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubcommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ArgDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args: Vec<ArgDescriptor>,
    #[serde(default)]
    pub subcommands: Vec<SubcommandDescriptor>,
}

#[derive(Debug, Deserialize)]
struct CommandFile {
    commands: Vec<CommandDescriptor>,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: BTreeMap<char, TrieNode>,
    terminal: Option<String>,
}

/// Lowercased prefix tree over every command name and alias.
#[derive(Debug, Default)]
pub struct CommandTrie {
    root: TrieNode,
}

impl CommandTrie {
    pub fn insert(&mut self, word: &str) {
        let mut node = &mut self.root;
        for ch in word.chars().flat_map(char::to_lowercase) {
            node = node.children.entry(ch).or_default();
        }
        node.terminal = Some(word.to_lowercase());
    }

    /// Every stored word that is a case-insensitive prefix of `input`, as
    /// `(chars matched, word)`, shortest first.
    pub fn prefixes_of(&self, input: &[char]) -> Vec<(usize, &str)> {
        let mut found = Vec::new();
        let mut node = &self.root;

        for (depth, ch) in input.iter().enumerate() {
            let mut lower = ch.to_lowercase();
            // Multi-char lowercase forms never match a single trie edge.
            let (Some(key), None) = (lower.next(), lower.next()) else {
                break;
            };
            match node.children.get(&key) {
                Some(child) => node = child,
                None => break,
            }
            if let Some(word) = &node.terminal {
                found.push((depth + 1, word.as_str()));
            }
        }

        found
    }
}

#[derive(Debug)]
pub struct CommandRegistry {
    commands: Vec<CommandDescriptor>,
    lookup: HashMap<String, usize>,
    trie: CommandTrie,
}

impl CommandRegistry {
    /// Builds a registry; `invoker_keyword` (usually `go`) is kept out of the
    /// name matcher so it is never read as a command.
    pub fn new(
        commands: Vec<CommandDescriptor>,
        invoker_keyword: &str,
    ) -> Result<Self, RegistryError> {
        let mut lookup = HashMap::new();
        let mut trie = CommandTrie::default();
        let keyword = invoker_keyword.to_lowercase();

        for (index, command) in commands.iter().enumerate() {
            for name in std::iter::once(&command.name).chain(command.aliases.iter()) {
                let key = name.trim().to_lowercase();
                if key.is_empty() {
                    return Err(RegistryError::EmptyName);
                }
                if lookup.insert(key.clone(), index).is_some() {
                    return Err(RegistryError::DuplicateName(name.clone()));
                }
                if key != keyword {
                    trie.insert(&key);
                }
            }
        }

        log::debug!("Registered {} commands ({} names)", commands.len(), lookup.len());

        Ok(Self {
            commands,
            lookup,
            trie,
        })
    }

    pub fn from_json(json: &str, invoker_keyword: &str) -> Result<Self, RegistryError> {
        let file: CommandFile = serde_json::from_str(json)?;
        Self::new(file.commands, invoker_keyword)
    }

    pub fn load(path: &Path, invoker_keyword: &str) -> Result<Self, RegistryError> {
        let contents = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents, invoker_keyword)
    }

    pub fn builtin(invoker_keyword: &str) -> Self {
        let commands = builtin_commands();
        let count = commands.len();
        Self::new(commands, invoker_keyword).unwrap_or_else(|err| {
            log::warn!("Built-in command table rejected ({}), dropping {} commands", err, count);
            Self {
                commands: Vec::new(),
                lookup: HashMap::new(),
                trie: CommandTrie::default(),
            }
        })
    }

    /// Case-insensitive lookup by name or alias.
    pub fn resolve(&self, name: &str) -> Option<&CommandDescriptor> {
        let index = self.lookup.get(&name.trim().to_lowercase())?;
        self.commands.get(*index)
    }

    pub fn matches(&self, input: &[char]) -> Vec<(usize, &str)> {
        self.trie.prefixes_of(input)
    }

    pub fn commands(&self) -> &[CommandDescriptor] {
        &self.commands
    }
}

fn arg(name: &str, rest: bool, required: bool) -> ArgDescriptor {
    ArgDescriptor {
        name: name.to_string(),
        rest,
        required,
    }
}

fn command(
    name: &str,
    aliases: &[&str],
    description: &str,
    args: Vec<ArgDescriptor>,
) -> CommandDescriptor {
    CommandDescriptor {
        name: name.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        description: description.to_string(),
        args,
        subcommands: Vec::new(),
    }
}

fn builtin_commands() -> Vec<CommandDescriptor> {
    let mut perms = command("perms", &["permissions"], "Inspect or change permissions", Vec::new());
    perms.subcommands = vec![
        SubcommandDescriptor {
            name: "get".to_string(),
            args: vec![arg("target", false, true)],
        },
        SubcommandDescriptor {
            name: "set".to_string(),
            args: vec![arg("target", false, true), arg("permissions", true, true)],
        },
    ];

    let mut alias = command("alias", &[], "Manage command aliases", Vec::new());
    alias.subcommands = vec![
        SubcommandDescriptor {
            name: "add".to_string(),
            args: vec![arg("definition", true, true)],
        },
        SubcommandDescriptor {
            name: "delete".to_string(),
            args: vec![arg("name", false, true)],
        },
        SubcommandDescriptor {
            name: "list".to_string(),
            args: Vec::new(),
        },
    ];

    vec![
        command("play", &["p"], "Queue a song", vec![arg("query", true, true)]),
        command("skip", &["s"], "Skip the current song", vec![arg("count", false, false)]),
        command("stop", &[], "Stop playback and clear the queue", Vec::new()),
        command("pause", &[], "Pause playback", Vec::new()),
        command("resume", &[], "Resume playback", Vec::new()),
        command("queue", &["q"], "Show the queue", vec![arg("page", false, false)]),
        command("shuffle", &[], "Shuffle the queue", Vec::new()),
        command("volume", &["vol"], "Set the volume", vec![arg("level", false, false)]),
        command("nowplaying", &["np", "now playing"], "Show the current song", Vec::new()),
        perms,
        alias,
        command("help", &["h"], "Show command help", vec![arg("command", false, false)]),
        command("ping", &[], "Check that the bot is alive", Vec::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_resolve_by_name_and_alias() {
        let registry = CommandRegistry::builtin("go");
        assert_eq!(registry.resolve("play").map(|c| c.name.as_str()), Some("play"));
        assert_eq!(registry.resolve("P").map(|c| c.name.as_str()), Some("play"));
        assert_eq!(registry.resolve("NP").map(|c| c.name.as_str()), Some("nowplaying"));
        assert!(registry.resolve("badcommand").is_none());
    }

    #[test]
    fn test_trie_lists_every_prefix_case_insensitively() {
        let registry = CommandRegistry::builtin("go");
        let found = registry.matches(&chars("Now Playing please"));
        let words: Vec<&str> = found.iter().map(|(_, w)| *w).collect();
        assert_eq!(words, vec!["now playing"]);
        assert_eq!(found[0].0, 11);

        let found = registry.matches(&chars("pause"));
        let words: Vec<&str> = found.iter().map(|(_, w)| *w).collect();
        assert_eq!(words, vec!["p", "pause"]);
    }

    #[test]
    fn test_invoker_keyword_is_not_matchable() {
        let json = r#"{ "commands": [ { "name": "go" }, { "name": "gamble" } ] }"#;
        let registry = CommandRegistry::from_json(json, "go").unwrap();
        assert!(registry.matches(&chars("go play")).is_empty());
        assert!(registry.resolve("go").is_some());
    }

    #[test]
    fn test_duplicate_alias_is_rejected() {
        let json = r#"{ "commands": [
            { "name": "play", "aliases": ["p"] },
            { "name": "pause", "aliases": ["P"] }
        ] }"#;
        let err = CommandRegistry::from_json(json, "go").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "P"));
    }

    #[test]
    fn test_from_json_reads_arg_shapes() {
        let json = r#"{ "commands": [
            { "name": "play", "args": [ { "name": "query", "rest": true } ] }
        ] }"#;
        let registry = CommandRegistry::from_json(json, "go").unwrap();
        let play = registry.resolve("play").unwrap();
        assert_eq!(play.args.len(), 1);
        assert!(play.args[0].rest);
        assert!(!play.args[0].required);
        assert!(play.subcommands.is_empty());
    }
}
