//! Static source analyzer for the `--static` breakpoint filter.
//!
//! A line is worth a breakpoint under `--static` filtering only if it
//! plausibly touches a variable's value — an assignment, an
//! increment/decrement, an initialized declaration, or a call.
//!
//! This is deliberately a shallow tokenizer, not a C parser: it is a
//! *filter* that trades perfect precision for zero false negatives (a
//! statement it can't classify is kept, never dropped).

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatementKind {
    Assignment,
    IncrementDecrement,
    InitializedDeclaration,
    FunctionCall,
    Other,
}

/// Strip comments and string/char literals well enough that operators
/// inside them don't get misread as code. Not a full preprocessor.
fn strip_noise(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut in_string = false;
    let mut in_char = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(' ');
            if c == '\\' {
                chars.next();
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if in_char {
            out.push(' ');
            if c == '\\' {
                chars.next();
            } else if c == '\'' {
                in_char = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(' ');
            }
            '\'' => {
                in_char = true;
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => break,
            _ => out.push(c),
        }
    }
    out
}

/// A conservative classification of a single source line for the
/// `--static` breakpoint filter. `identifiers` is the set of names in
/// scope (parameters, locals, globals) that this analyzer looks for an
/// assignment target among.
pub fn classify(line: &str, identifiers: &[String]) -> StatementKind {
    let code = strip_noise(line);
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return StatementKind::Other;
    }

    if contains_increment_decrement(trimmed) {
        return StatementKind::IncrementDecrement;
    }

    if let Some(kind) = classify_assignment(trimmed) {
        return kind;
    }

    if looks_like_initialized_declaration(trimmed, identifiers) {
        return StatementKind::InitializedDeclaration;
    }

    if looks_like_function_call(trimmed) {
        return StatementKind::FunctionCall;
    }

    StatementKind::Other
}

fn contains_increment_decrement(code: &str) -> bool {
    code.contains("++") || code.contains("--")
}

const ASSIGNMENT_OPERATORS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=",
];

fn classify_assignment(code: &str) -> Option<StatementKind> {
    let bytes = code.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'=' {
            continue;
        }
        // Skip ==, !=, <=, >=.
        if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
            continue;
        }
        if i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>') {
            continue;
        }
        let lhs = code[..i].trim();
        if lhs.is_empty() {
            continue;
        }
        let _ = ASSIGNMENT_OPERATORS;
        return Some(StatementKind::Assignment);
    }
    None
}

const C_TYPE_KEYWORDS: &[&str] = &[
    "int", "char", "short", "long", "unsigned", "signed", "float", "double", "void", "struct",
    "union", "enum", "const", "static", "auto", "register",
];

fn looks_like_initialized_declaration(code: &str, identifiers: &[String]) -> bool {
    if !code.contains('=') {
        return false;
    }
    let first_word = code.split_whitespace().next().unwrap_or("");
    if C_TYPE_KEYWORDS.contains(&first_word) {
        return true;
    }
    identifiers
        .iter()
        .any(|id| code.starts_with(id.as_str()) && code[id.len()..].trim_start().starts_with('='))
}

fn looks_like_function_call(code: &str) -> bool {
    match code.find('(') {
        Some(paren) => {
            let before = code[..paren].trim_end();
            let name_start = before
                .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
                .map(|i| i + 1)
                .unwrap_or(0);
            let name = &before[name_start..];
            !name.is_empty() && name.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
        }
        None => false,
    }
}

/// Decide whether a line should receive a breakpoint under `--static`
/// filtering: anything other than `Other` is interesting.
pub fn is_interesting(line: &str, identifiers: &[String]) -> bool {
    classify(line, identifiers) != StatementKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_assignment_is_interesting() {
        assert_eq!(classify("x = y + 1;", &[]), StatementKind::Assignment);
    }

    #[test]
    fn comparison_is_not_an_assignment() {
        assert_eq!(classify("if (x == y) {", &[]), StatementKind::Other);
    }

    #[test]
    fn increment_is_detected() {
        assert_eq!(classify("i++;", &[]), StatementKind::IncrementDecrement);
    }

    #[test]
    fn initialized_declaration_is_detected() {
        assert_eq!(
            classify("int total = 0;", &[]),
            StatementKind::InitializedDeclaration
        );
    }

    #[test]
    fn plain_declaration_without_initializer_is_not_interesting() {
        assert_eq!(classify("int total;", &[]), StatementKind::Other);
    }

    #[test]
    fn function_call_is_detected() {
        assert_eq!(classify("do_work(a, b);", &[]), StatementKind::FunctionCall);
    }

    #[test]
    fn string_literals_dont_confuse_the_assignment_scan() {
        assert_eq!(
            classify(r#"printf("a == b");"#, &[]),
            StatementKind::FunctionCall
        );
    }
}
