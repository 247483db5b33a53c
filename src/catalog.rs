//! Character and script catalog.
//!
//! Characters and scripts are static JSON maps keyed by id
//! (`characters.json`, `scripts.json`). The catalog renders the persona block
//! that heads every generation context.

use crate::defaults;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Who the agent plays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Character {
    pub name: String,
    pub identity: String,
}

/// The conversational setting the agent plays it in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub description: String,
    pub assistant_role: String,
    pub assistant_goal: String,
    pub user_role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub characters: BTreeMap<String, Character>,
    pub scripts: BTreeMap<String, Script>,
}

impl Catalog {
    /// Loads `characters.json` and `scripts.json` from `dir`.
    ///
    /// A missing file yields an empty map; malformed JSON is an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        Ok(Self {
            characters: load_map(&dir.join("characters.json"))?,
            scripts: load_map(&dir.join("scripts.json"))?,
        })
    }

    pub fn character(&self, id: &str) -> Character {
        self.characters.get(id).cloned().unwrap_or_else(|| Character {
            name: "Companion".to_string(),
            identity: String::new(),
        })
    }

    pub fn script(&self, id: &str) -> Script {
        self.scripts.get(id).cloned().unwrap_or_default()
    }

    /// Renders the persona block for a character/script pair.
    pub fn persona(&self, character_id: &str, script_id: &str, language: &str) -> String {
        let character = self.character(character_id);
        let script = self.script(script_id);
        let directive = language_directive(language);

        let mut persona = String::new();
        push_line(&mut persona, "Conversation Setting for User", &script.description);
        persona.push_str(&format!(
            "Assistant(You)'s Identity: {},{}(Assistant is a human, not AI)\n",
            character.name, character.identity
        ));
        push_line(&mut persona, "Assistant(You)'s Role", &script.assistant_role);
        push_line(&mut persona, "Assistant(You)'s Goal", &script.assistant_goal);
        push_line(&mut persona, "User's Role", &script.user_role);
        persona.push_str(&format!(
            "Respond naturally and conversationally in spoken {directive} \
             Keep responses concise and suitable for voice. \
             Write only plain, readable text: no parentheses, brackets, asterisks or braces.\n"
        ));
        persona.push_str(&format!("IMPORTANT: You must respond in {directive} only.\n"));
        persona
    }
}

/// Reply-language directive for a session language code.
pub fn language_directive(language: &str) -> &'static str {
    if language.eq_ignore_ascii_case(defaults::CHINESE_LANGUAGE) {
        "Chinese."
    } else {
        "English."
    }
}

fn push_line(out: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        out.push_str(label);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
}

fn load_map<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<BTreeMap<String, T>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
