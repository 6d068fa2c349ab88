use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    List,
    #[default]
    Mosaic,
}

impl ViewMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "list" => Some(Self::List),
            "mosaic" => Some(Self::Mosaic),
            _ => None,
        }
    }
}

/// Allows or denies a path, by prefix or by regular expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub allow: bool,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub regex: Option<String>,
    /// `regex`, compiled on first use. `None` inside means it does not compile.
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl Rule {
    /// Match paths starting with `path`.
    pub fn prefix(allow: bool, path: impl Into<String>) -> Self {
        Self {
            allow,
            path: path.into(),
            regex: None,
            compiled: OnceLock::new(),
        }
    }

    /// Match paths against a regular expression.
    pub fn pattern(allow: bool, regex: impl Into<String>) -> Self {
        Self {
            allow,
            path: String::new(),
            regex: Some(regex.into()),
            compiled: OnceLock::new(),
        }
    }

    fn compiled(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| self.regex.as_deref().and_then(|p| Regex::new(p).ok()))
            .as_ref()
    }

    fn matches(&self, path: &str) -> bool {
        match &self.regex {
            // A pattern that fails to compile matches nothing.
            Some(_) => self.compiled().is_some_and(|re| re.is_match(path)),
            None => path.starts_with(&self.path),
        }
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.allow == other.allow && self.path == other.path && self.regex == other.regex
    }
}

/// Capability flags and scoping rules for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub allow_commands: bool,
    pub allow_edit: bool,
    pub allow_new: bool,
    pub allow_publish: bool,
    pub commands: Vec<String>,
    pub rules: Vec<Rule>,
    pub locale: String,
    /// Root of the user's files, relative to the server's file root.
    pub scope: String,
    pub view_mode: ViewMode,
    #[serde(rename = "customCSS")]
    pub custom_css: String,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            allow_commands: true,
            allow_edit: true,
            allow_new: true,
            allow_publish: true,
            commands: vec!["git".into(), "svn".into(), "hg".into()],
            rules: Vec::new(),
            locale: "en".into(),
            scope: ".".into(),
            view_mode: ViewMode::Mosaic,
            custom_css: String::new(),
        }
    }
}

impl Permissions {
    /// Whether `path` (relative to the user's scope) is accessible.
    /// The last matching rule decides; no match means allowed.
    pub fn allowed(&self, path: &str) -> bool {
        let path = normalize_rule_path(path);
        self.rules
            .iter()
            .rev()
            .find(|r| r.matches(&path))
            .map_or(true, |r| r.allow)
    }

    /// Reject rules whose regular expressions do not compile.
    pub fn validate(&self) -> Result<(), String> {
        for rule in &self.rules {
            if let Some(pattern) = &rule.regex {
                let re = Regex::new(pattern)
                    .map_err(|e| format!("invalid rule regex {pattern:?}: {e}"))?;
                let _ = rule.compiled.set(Some(re));
            }
        }
        Ok(())
    }
}

fn normalize_rule_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    format!("/{trimmed}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_rules(rules: Vec<Rule>) -> Permissions {
        Permissions {
            rules,
            ..Default::default()
        }
    }

    #[test]
    fn no_rules_allows_everything() {
        let p = Permissions::default();
        assert!(p.allowed("/anything/at/all"));
    }

    #[test]
    fn prefix_rule_denies() {
        let p = with_rules(vec![Rule::prefix(false, "/private")]);
        assert!(!p.allowed("/private/notes.md"));
        assert!(!p.allowed("private/notes.md"));
        assert!(p.allowed("/public/notes.md"));
    }

    #[test]
    fn last_matching_rule_wins() {
        let p = with_rules(vec![
            Rule::prefix(false, "/private"),
            Rule::prefix(true, "/private/shared"),
        ]);
        assert!(!p.allowed("/private/diary.md"));
        assert!(p.allowed("/private/shared/todo.md"));
    }

    #[test]
    fn regex_rule() {
        let p = with_rules(vec![Rule::pattern(false, r"\.env$")]);
        assert!(!p.allowed("/app/.env"));
        assert!(p.allowed("/app/.envrc"));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_regex() {
        let p = with_rules(vec![Rule::pattern(false, "(")]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn deserialized_regex_rule_compiles_once() {
        let p: Permissions = serde_json::from_value(serde_json::json!({
            "allowCommands": false,
            "allowEdit": true,
            "allowNew": true,
            "allowPublish": false,
            "commands": [],
            "rules": [{"allow": false, "regex": "^/secret"}],
            "locale": "en",
            "scope": ".",
            "viewMode": "list",
            "customCSS": ""
        }))
        .unwrap();
        p.validate().unwrap();
        let first = p.rules[0].compiled().unwrap() as *const Regex;
        assert!(!p.allowed("/secret/plan.md"));
        assert!(p.allowed("/public/plan.md"));
        assert_eq!(p.rules[0].compiled().unwrap() as *const Regex, first);
        assert_eq!(p.clone(), p);
    }

    #[test]
    fn broken_regex_matches_nothing() {
        let p = with_rules(vec![Rule::pattern(false, "(")]);
        assert!(p.allowed("/anything"));
    }

    #[test]
    fn view_mode_parse() {
        assert_eq!(ViewMode::from_str("list"), Some(ViewMode::List));
        assert_eq!(ViewMode::from_str("grid"), None);
    }
}
