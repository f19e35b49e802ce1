//! Method name resolution across naming conventions.
//!
//! Host code names actions in `snake_case` while script authors may use
//! `PascalCase` (or the other way round). Before invoking a member the
//! requested name is matched against what the receiver actually defines.

use std::collections::BTreeSet;

/// Pick the member name to invoke for `requested`.
///
/// Tries the PascalCase form first, then the snake_case form, and falls
/// back to `requested` unchanged so a missing member fails naturally at
/// invocation time.
pub fn resolve_method_name(requested: &str, members: &BTreeSet<String>) -> String {
    let pascal = pascalize(requested);
    if members.contains(&pascal) {
        return pascal;
    }

    let snake = underscore(requested);
    if members.contains(&snake) {
        return snake;
    }

    requested.to_string()
}

/// Convert `my_action` to `MyAction`.
pub fn pascalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split('_').filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Convert `MyAction` to `my_action`.
///
/// Acronyms stay together: `HTMLParser` becomes `html_parser`.
pub fn underscore(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_pascalize() {
        assert_eq!(pascalize("my_action"), "MyAction");
        assert_eq!(pascalize("index"), "Index");
        assert_eq!(pascalize("MyAction"), "MyAction");
        assert_eq!(pascalize("__private"), "Private");
    }

    #[test]
    fn test_underscore() {
        assert_eq!(underscore("MyAction"), "my_action");
        assert_eq!(underscore("my_action"), "my_action");
        assert_eq!(underscore("HTMLParser"), "html_parser");
        assert_eq!(underscore("Show2Items"), "show2_items");
        assert_eq!(underscore("index"), "index");
    }

    #[test]
    fn test_snake_request_finds_pascal_member() {
        let defined = members(&["MyAction", "Other"]);
        assert_eq!(resolve_method_name("my_action", &defined), "MyAction");
    }

    #[test]
    fn test_pascal_request_finds_snake_member() {
        let defined = members(&["my_action"]);
        assert_eq!(resolve_method_name("MyAction", &defined), "my_action");
    }

    #[test]
    fn test_pascal_form_wins_when_both_exist() {
        let defined = members(&["MyAction", "my_action"]);
        assert_eq!(resolve_method_name("my_action", &defined), "MyAction");
    }

    #[test]
    fn test_unknown_name_is_returned_unchanged() {
        let defined = members(&["index"]);
        assert_eq!(resolve_method_name("missing_one", &defined), "missing_one");
    }
}
