//! `(( ... ))` expression parsing

use crate::error::EvaluationError;
use ocm_artifact::FieldPath;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};

static EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*\(\((.*)\)\)\s*$").expect("expression pattern is valid"));

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_-]*|\[\d+\])(?:\.?\[\d+\]|\.[A-Za-z0-9_-]+)*$")
        .expect("reference pattern is valid")
});

/// One operand of an expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    /// Path from the document root, with its source text
    Reference { raw: String, path: FieldPath },
    Literal(Value),
}

/// Parsed expression node
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expression {
    pub(crate) raw: String,
    pub(crate) operands: Vec<Operand>,
}

/// Whether a string node is an expression
pub(crate) fn is_expression(text: &str) -> bool {
    EXPRESSION.is_match(text)
}

/// Parse a string node; `Ok(None)` if it is plain text
pub(crate) fn parse(text: &str) -> Result<Option<Expression>, EvaluationError> {
    let Some(captures) = EXPRESSION.captures(text) else {
        return Ok(None);
    };
    let raw = text.trim().to_string();
    let body = captures.get(1).map_or("", |m| m.as_str());

    let syntax = |message: String| EvaluationError::Syntax {
        expression: raw.clone(),
        message,
    };

    let operands = tokenize(body)
        .map_err(syntax)?
        .into_iter()
        .map(|token| classify(token).map_err(syntax))
        .collect::<Result<Vec<_>, _>>()?;

    if operands.is_empty() {
        return Err(syntax("empty expression".into()));
    }
    Ok(Some(Expression { raw, operands }))
}

enum Token {
    Quoted(String),
    Bare(String),
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => text.push(other),
                        None => return Err("unterminated string literal".into()),
                    },
                    Some(other) => text.push(other),
                    None => return Err("unterminated string literal".into()),
                }
            }
            tokens.push(Token::Quoted(text));
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token::Bare(text));
        }
    }
    Ok(tokens)
}

fn classify(token: Token) -> Result<Operand, String> {
    let text = match token {
        Token::Quoted(s) => return Ok(Operand::Literal(Value::String(s))),
        Token::Bare(text) => text,
    };

    match text.as_str() {
        "true" => return Ok(Operand::Literal(Value::Bool(true))),
        "false" => return Ok(Operand::Literal(Value::Bool(false))),
        "nil" | "~" => return Ok(Operand::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Operand::Literal(Value::Number(n.into())));
    }
    if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
        return Ok(Operand::Literal(Value::Number(n)));
    }
    if !REFERENCE.is_match(&text) {
        return Err(format!("unsupported operand '{text}'"));
    }
    let path = text
        .parse::<FieldPath>()
        .map_err(|e| format!("invalid reference '{text}': {e}"))?;
    Ok(Operand::Reference { raw: text, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_artifact::PathSegment;

    fn operands(text: &str) -> Vec<Operand> {
        parse(text).unwrap().unwrap().operands
    }

    #[test]
    fn plain_text_is_not_an_expression() {
        assert!(parse("hello").unwrap().is_none());
        assert!(parse("(( unbalanced").unwrap().is_none());
        assert!(!is_expression("red"));
    }

    #[test]
    fn single_reference() {
        let ops = operands("(( message ))");
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operand::Reference { raw, path } => {
                assert_eq!(raw, "message");
                assert_eq!(path.segments(), &[PathSegment::Key("message".into())]);
            }
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn indexed_references() {
        for text in ["(( a.[0].b ))", "(( a[0].b ))", "(( a.0.b ))"] {
            assert!(matches!(operands(text)[0], Operand::Reference { .. }), "{text}");
        }
    }

    #[test]
    fn literals_and_concatenation() {
        let ops = operands(r#"(( "prefix-" name 42 true nil ))"#);
        assert_eq!(ops[0], Operand::Literal(Value::String("prefix-".into())));
        assert!(matches!(ops[1], Operand::Reference { .. }));
        assert_eq!(ops[2], Operand::Literal(Value::from(42)));
        assert_eq!(ops[3], Operand::Literal(Value::Bool(true)));
        assert_eq!(ops[4], Operand::Literal(Value::Null));
    }

    #[test]
    fn quoted_strings_keep_spaces() {
        let ops = operands(r#"(( "hello world" ))"#);
        assert_eq!(ops, vec![Operand::Literal(Value::String("hello world".into()))]);
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(parse("(( ))"), Err(EvaluationError::Syntax { .. })));
        assert!(matches!(
            parse(r#"(( "open ))"#),
            Err(EvaluationError::Syntax { .. })
        ));
        assert!(matches!(parse("(( a + b ))"), Err(EvaluationError::Syntax { .. })));
    }
}
