// src/context/template.rs

//! `{{var}}` placeholder substitution.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::debug;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}")
            .unwrap_or_else(|e| panic!("placeholder pattern is invalid: {e}"))
    })
}

/// Replace `{{name}}` with `vars[name]`.
///
/// Unknown placeholders are left untouched.
pub fn render(text: &str, vars: &BTreeMap<String, String>) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }

    placeholder()
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            match vars.get(name) {
                Some(value) => value.clone(),
                None => {
                    debug!(placeholder = name, "no value for template placeholder");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        let mut v = BTreeMap::new();
        v.insert("topic".to_string(), "rust".to_string());
        v
    }

    #[test]
    fn substitutes_known_names() {
        assert_eq!(render("Write about {{ topic }}.", &vars()), "Write about rust.");
    }

    #[test]
    fn leaves_unknown_names() {
        assert_eq!(render("{{missing}} and {{topic}}", &vars()), "{{missing}} and rust");
    }
}
