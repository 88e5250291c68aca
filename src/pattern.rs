//! Variable substitution and line matching
//!
//! Commands and expected patterns may carry `$name` placeholders that are
//! resolved once, before sending or compiling. Matching is containment, not
//! full-line equality: real servers prefix and suffix lines with hostnames
//! and other unpredictable content.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::common::{Error, Result};

/// Replace every `$key` occurrence in `text` with its value.
///
/// Longer keys are substituted first so `$nickname` is never clobbered by a
/// `$nick` entry. Absent keys stay verbatim; that is the author's
/// responsibility, not an error.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    if !text.contains('$') || vars.is_empty() {
        return text.to_string();
    }

    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = text.to_string();
    for key in keys {
        let token = format!("${key}");
        if out.contains(&token) {
            out = out.replace(&token, &vars[key.as_str()]);
        }
    }
    out
}

/// A literal or regular-expression text-matching rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matched as a literal substring; special characters carry no meaning
    Literal(String),
    /// Matched as a regular expression
    Regex(String),
}

impl Pattern {
    /// The raw pattern text, before escaping
    pub fn text(&self) -> &str {
        match self {
            Self::Literal(s) | Self::Regex(s) => s,
        }
    }

    /// Resolve `$name` placeholders in the pattern text
    pub fn substituted(&self, vars: &HashMap<String, String>) -> Self {
        match self {
            Self::Literal(s) => Self::Literal(substitute(s, vars)),
            Self::Regex(s) => Self::Regex(substitute(s, vars)),
        }
    }

    /// Compile into a matcher; literals are escaped first
    pub fn compile(&self) -> Result<Regex> {
        let source = match self {
            Self::Literal(s) => regex::escape(s),
            Self::Regex(s) => s.clone(),
        };
        Regex::new(&source).map_err(|e| Error::Pattern {
            pattern: self.text().to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s}"),
            Self::Regex(s) => write!(f, "/{s}/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_every_occurrence() {
        let v = vars(&[("nick", "alice")]);
        assert_eq!(
            substitute("NICK $nick :$nick joined", &v),
            "NICK alice :alice joined"
        );
    }

    #[test]
    fn absent_keys_left_verbatim() {
        let v = vars(&[("nick", "alice")]);
        assert_eq!(substitute("PASS $password", &v), "PASS $password");
    }

    #[test]
    fn longer_keys_win_over_prefixes() {
        let v = vars(&[("nick", "alice"), ("nickname", "Alice B")]);
        assert_eq!(substitute("USER $nick 0 * :$nickname", &v), "USER alice 0 * :Alice B");
    }

    #[test]
    fn substitution_is_idempotent_once_resolved() {
        let v = vars(&[("chan", "#test"), ("msg", "Hi!")]);
        let once = substitute("PRIVMSG $chan :$msg", &v);
        assert_eq!(substitute(&once, &v), once);
    }

    #[test]
    fn literal_special_characters_match_literally() {
        let pattern = Pattern::Literal("PRIVMSG #test :(hi?)".to_string());
        let re = pattern.compile().unwrap();
        assert!(re.is_match(":alice!a@host PRIVMSG #test :(hi?)"));
        assert!(!re.is_match(":alice!a@host PRIVMSG #test :hi"));
    }

    #[test]
    fn containment_not_full_line_equality() {
        let re = Pattern::Literal(" 001 ".to_string()).compile().unwrap();
        assert!(re.is_match(":irc.example.net 001 alice :Welcome"));
    }

    #[test]
    fn regex_patterns_compile_unescaped() {
        let re = Pattern::Regex(r"\b40[13]\b".to_string()).compile().unwrap();
        assert!(re.is_match(":server 401 alice bob :No such nick"));
        assert!(re.is_match(":server 403 alice #none :No such channel"));
        assert!(!re.is_match(":server 402 alice :No such server"));
    }

    #[test]
    fn malformed_regex_is_an_error() {
        let err = Pattern::Regex("(unclosed".to_string()).compile().unwrap_err();
        assert!(matches!(err, Error::Pattern { .. }));
    }
}
