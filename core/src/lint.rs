//! Static checks on a script, without executing it.

use crate::worker::bindings::{self, GUI_FUNCTIONS, SHAPE_FUNCTIONS, VOCABULARY};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Vocabulary functions called, in order of first use.
    pub used_functions: Vec<String>,
}

/// Parse `code` with the sandbox grammar and scan it for vocabulary calls.
pub fn validate_script(code: &str) -> ScriptReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if code.trim().is_empty() {
        warnings.push("script is empty".to_string());
    } else if let Err(e) = bindings::sandbox_engine().compile(code) {
        errors.push(e.to_string());
    }

    let calls = scan_calls(code);

    let mut used_functions: Vec<String> = Vec::new();
    for call in &calls {
        if !used_functions.iter().any(|f| f == call.name) {
            used_functions.push(call.name.to_string());
        }
    }

    if !code.trim().is_empty() && !calls.iter().any(|c| SHAPE_FUNCTIONS.contains(&c.name)) {
        warnings.push("script does not create any shapes".to_string());
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for call in calls.iter().filter(|c| GUI_FUNCTIONS.contains(&c.name)) {
        if let Some(label) = &call.label {
            if !seen.insert(label.clone()) && reported.insert(label.clone()) {
                warnings.push(format!("GUI control \"{}\" is declared more than once", label));
            }
        }
    }

    ScriptReport {
        valid: errors.is_empty(),
        errors,
        warnings,
        used_functions,
    }
}

#[derive(Debug)]
struct Call {
    name: &'static str,
    /// String-literal first argument, if any.
    label: Option<String>,
}

/// Find `Name(` for every vocabulary name outside strings and comments.
fn scan_calls(code: &str) -> Vec<Call> {
    let chars: Vec<char> = code.chars().collect();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
        } else if c == '"' || c == '\'' || c == '`' {
            i = skip_string(&chars, i).1;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            // Method calls like `console.log(` are not vocabulary.
            let after_dot = start > 0 && chars[start - 1] == '.';
            let ident: String = chars[start..i].iter().collect();
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if after_dot || chars.get(j) != Some(&'(') {
                continue;
            }
            if let Some(name) = VOCABULARY.iter().copied().find(|v| *v == ident) {
                calls.push(Call {
                    name,
                    label: first_string_arg(&chars, j + 1),
                });
            }
        } else {
            i += 1;
        }
    }
    calls
}

/// Returns the literal's contents and the index just past its closing quote.
fn skip_string(chars: &[char], open: usize) -> (String, usize) {
    let quote = chars[open];
    let mut text = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if quote != '`' => {
                if let Some(&next) = chars.get(i + 1) {
                    text.push(next);
                }
                i += 2;
            }
            c if c == quote => return (text, i + 1),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    (text, i)
}

fn first_string_arg(chars: &[char], mut i: usize) -> Option<String> {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    match chars.get(i) {
        Some('"') => Some(skip_string(chars, i).0),
        _ => None,
    }
}
