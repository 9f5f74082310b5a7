//! Maps a compiled segment onto its command descriptor's declared arguments.

use crate::registry::{ArgDescriptor, CommandRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandInstance {
    pub command: String,
    pub subcommand: Option<String>,
    /// Declared arguments that were supplied. Missing ones are absent.
    pub params: BTreeMap<String, String>,
    /// Words left over after every declared argument was filled.
    pub rest_args: Vec<String>,
}

/// `arguments` are the resolved values following the command, in order.
pub fn resolve_segment(
    registry: &CommandRegistry,
    command: &str,
    arguments: &[String],
) -> Option<CommandInstance> {
    let descriptor = registry.resolve(command)?;
    let mut words: VecDeque<&str> = arguments.iter().flat_map(|a| a.split_whitespace()).collect();

    let mut subcommand = None;
    let mut shape: &[ArgDescriptor] = &descriptor.args;

    if let Some(first) = words.front() {
        if let Some(sub) = descriptor
            .subcommands
            .iter()
            .find(|sub| sub.name.eq_ignore_ascii_case(first))
        {
            words.pop_front();
            subcommand = Some(sub.name.clone());
            shape = &sub.args;
        }
    }

    let mut params = BTreeMap::new();
    for arg in shape {
        if arg.rest {
            if !words.is_empty() {
                let rest: Vec<&str> = words.drain(..).collect();
                params.insert(arg.name.clone(), rest.join(" "));
            }
            break;
        }
        match words.pop_front() {
            Some(word) => {
                params.insert(arg.name.clone(), word.to_string());
            }
            None => break,
        }
    }

    Some(CommandInstance {
        command: descriptor.name.clone(),
        subcommand,
        params,
        rest_args: words.into_iter().map(String::from).collect(),
    })
}
