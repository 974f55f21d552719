//! Policy evaluation engine. First match wins; anything that looks like an
//! obfuscation attempt is denied.

use super::capability::Capability;
use super::policy::SecurityPolicy;
use super::request::PolicyVerdict;

/// Check `expr` against `policy`.
///
/// Checks run in order: length, obfuscation, denylist rules, then (in
/// sandbox mode) annotation and metadata access. Pure and allocation-light;
/// nothing here compiles or evaluates the expression.
pub fn validate_expression(policy: &SecurityPolicy, expr: &str) -> PolicyVerdict {
    let length = expr.chars().count();
    if length > policy.max_length {
        return denied(
            Capability::Length,
            format!(
                "expression is {length} characters, limit is {}",
                policy.max_length
            ),
        );
    }

    if let Some(reason) = obfuscation(expr) {
        return denied(Capability::Obfuscation, reason);
    }

    for rule in &policy.rules {
        if rule.matches(expr) {
            return rule.verdict();
        }
    }

    if policy.sandbox_mode {
        if policy.annotation_methods.is_match(expr) {
            return denied(
                Capability::Annotation,
                "annotation metadata access is disabled in sandbox mode".to_string(),
            );
        }
        for captures in policy.annotation_use.captures_iter(expr) {
            let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let simple = name.rsplit('.').next().unwrap_or(name);
            let allowed = policy
                .allowed_annotations
                .iter()
                .any(|a| a == name || a == simple);
            if !allowed {
                return denied(
                    Capability::Annotation,
                    format!("annotation '@{name}' is not allow-listed"),
                );
            }
        }
    }

    PolicyVerdict::Allowed
}

fn denied(category: Capability, reason: String) -> PolicyVerdict {
    PolicyVerdict::Denied { category, reason }
}

/// Text-level constructs with no legitimate use in the expression language.
fn obfuscation(expr: &str) -> Option<String> {
    if let Some(c) = expr
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Some(format!("control character U+{:04X}", c as u32));
    }
    if expr.contains('\\') {
        return Some("escape sequences are not supported".to_string());
    }
    if expr.contains(';') {
        return Some("statement separators are not supported".to_string());
    }
    if expr.contains('`') || expr.contains("${") || expr.contains("#{") {
        return Some("template markers are not supported".to_string());
    }

    let mut quote: Option<char> = None;
    let mut open: Vec<char> = Vec::new();
    for c in expr.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => open.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if open.pop() != Some(expected) {
                    return Some("unbalanced brackets".to_string());
                }
            }
            c if !c.is_ascii() => {
                return Some("non-ASCII characters outside string literals".to_string());
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Some("unterminated string literal".to_string());
    }
    if !open.is_empty() {
        return Some("unbalanced brackets".to_string());
    }
    None
}
