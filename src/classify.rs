use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::config::Config;

/// A message whose first token is one of the configured trigger words.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCommand {
    pub word: String,
    pub text: String,
}

/// A `#<command> <module> [id]` message whose command name resolves in the
/// configured action table.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredCommand {
    pub action: String,
    pub module: String,
    pub id: Option<u64>,
}

/// Result of both classification passes over one message. The passes are
/// independent: a single message can match both grammars, and both matches
/// are acted on.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub trigger: Option<TriggerCommand>,
    pub structured: Option<StructuredCommand>,
}

pub struct Classifier {
    trigger_words: HashSet<String>,
    actions: HashMap<String, String>,
    grammar: Regex,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        Self {
            trigger_words: config.triggers.words.iter().cloned().collect(),
            actions: config.commands.table.clone(),
            // Grammar of structured commands: leading '#', command name,
            // module name, optional trailing integer.
            grammar: Regex::new(r"^#(\w+) (\w+)(?: (\d+))?$").expect("invalid command grammar"),
        }
    }

    /// Run both passes. Pure: no side effects, safe to call redundantly.
    pub fn classify(&self, text: &str) -> Classification {
        Classification {
            trigger: self.match_trigger(text),
            structured: self.match_structured(text),
        }
    }

    /// First whitespace-delimited token, matched case-sensitively against the
    /// trigger-word set.
    pub fn match_trigger(&self, text: &str) -> Option<TriggerCommand> {
        let word = text.trim().split_whitespace().next()?;
        if self.trigger_words.contains(word) {
            Some(TriggerCommand {
                word: word.to_string(),
                text: text.to_string(),
            })
        } else {
            None
        }
    }

    /// Full-match the trimmed text against the command grammar and resolve
    /// the command name through the action table. An unresolved name falls
    /// through to `None`; a non-numeric id group never matches the grammar.
    pub fn match_structured(&self, text: &str) -> Option<StructuredCommand> {
        let captures = self.grammar.captures(text.trim())?;
        let action = self.actions.get(&captures[1])?.clone();
        let module = captures[2].to_string();
        let id = match captures.get(3) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };

        Some(StructuredCommand { action, module, id })
    }
}
