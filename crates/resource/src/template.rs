//! Template evaluation for `{{…}}` strings
//!
//! Templates are plain text with embedded expressions. An expression is a
//! call to one of a closed set of functions with typed signatures; there is
//! no open function map. Arguments are string literals or parenthesized
//! nested calls:
//!
//! ```text
//! hello {{param "who"}}
//! {{join "," (paramList "ports")}}
//! {{jsonify (lookup "task.nginx.config")}}
//! ```
//!
//! Evaluation is pure: the same context always yields the same output and
//! the same set of recorded references, which is what lets the dependency
//! resolver dry-run templates to discover edges.

use crate::renderer::RenderError;
use crate::value::Value;
use std::cell::RefCell;

/// What a template evaluation can ask of its surroundings
pub(crate) trait TemplateContext {
    fn param(&self, name: &str) -> Result<Value, RenderError>;
    fn lookup(&self, target: &str, field: &str) -> Result<Value, RenderError>;
    fn env(&self, name: &str) -> String;

    /// Dry-run mode: reference-recording contexts return placeholders, so
    /// type enforcement is skipped
    fn scanning(&self) -> bool {
        false
    }
}

/// Param and lookup references discovered by a dry-run evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    /// Names passed to `param`, `paramList`, `paramMap`
    pub params: Vec<String>,
    /// Target ids passed to `lookup` (field part stripped)
    pub lookups: Vec<String>,
}

impl References {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.lookups.is_empty()
    }
}

/// A context that records references instead of resolving them
struct Recorder {
    refs: RefCell<References>,
}

impl TemplateContext for Recorder {
    fn param(&self, name: &str) -> Result<Value, RenderError> {
        let mut refs = self.refs.borrow_mut();
        if !refs.params.iter().any(|p| p == name) {
            refs.params.push(name.to_string());
        }
        Ok(Value::String(String::new()))
    }

    fn lookup(&self, target: &str, _field: &str) -> Result<Value, RenderError> {
        let mut refs = self.refs.borrow_mut();
        if !refs.lookups.iter().any(|l| l == target) {
            refs.lookups.push(target.to_string());
        }
        Ok(Value::String(String::new()))
    }

    fn env(&self, _name: &str) -> String {
        String::new()
    }

    fn scanning(&self) -> bool {
        true
    }
}

/// Dry-run a template, returning the references it makes
///
/// Parse errors surface exactly as they would during a real render.
pub fn scan(field: &str, source: &str) -> Result<References, RenderError> {
    let recorder = Recorder {
        refs: RefCell::new(References::default()),
    };
    eval_source(&recorder, field, source)?;
    Ok(recorder.refs.into_inner())
}

/// Evaluate a template against a context, producing the output string
pub(crate) fn eval_source(
    ctx: &dyn TemplateContext,
    field: &str,
    source: &str,
) -> Result<String, RenderError> {
    let mut out = String::new();
    let mut rest = source;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let expr_region = &rest[open + 2..];
        let close = find_close(expr_region).ok_or_else(|| RenderError::Parse {
            field: field.to_string(),
            reason: "unterminated {{ expression".to_string(),
        })?;

        let expr = &expr_region[..close];
        let value = eval_expr_str(ctx, field, expr)?;
        match &value {
            Value::List(_) | Value::Map(_) => {
                return Err(RenderError::Unprintable {
                    field: field.to_string(),
                    kind: value.kind(),
                });
            }
            scalar => out.push_str(&scalar.as_str()?),
        }

        rest = &expr_region[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Find the index of the closing `}}`, skipping string literals
fn find_close(region: &str) -> Option<usize> {
    let bytes = region.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
}

fn tokenize(field: &str, expr: &str) -> Result<Vec<Token>, RenderError> {
    let parse_err = |reason: String| RenderError::Parse {
        field: field.to_string(),
        reason,
    };

    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => lit.push('\n'),
                            Some('t') => lit.push('\t'),
                            Some(other) => lit.push(other),
                            None => return Err(parse_err("unterminated string".to_string())),
                        },
                        Some(other) => lit.push(other),
                        None => return Err(parse_err("unterminated string".to_string())),
                    }
                }
                tokens.push(Token::Str(lit));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(parse_err(format!("unexpected character {other:?}"))),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(String),
    Call(String, Vec<Expr>),
}

/// Parse a full expression: `IDENT arg*` where arg is a string literal or a
/// parenthesized call
fn parse(field: &str, tokens: &[Token]) -> Result<Expr, RenderError> {
    let mut pos = 0;
    let expr = parse_call(field, tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(RenderError::Parse {
            field: field.to_string(),
            reason: "trailing tokens after expression".to_string(),
        });
    }
    Ok(expr)
}

fn parse_call(field: &str, tokens: &[Token], pos: &mut usize) -> Result<Expr, RenderError> {
    let parse_err = |reason: &str| RenderError::Parse {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let name = match tokens.get(*pos) {
        Some(Token::Ident(name)) => name.clone(),
        _ => return Err(parse_err("expected a function name")),
    };
    *pos += 1;

    let mut args = Vec::new();
    loop {
        match tokens.get(*pos) {
            Some(Token::Str(lit)) => {
                args.push(Expr::Lit(lit.clone()));
                *pos += 1;
            }
            Some(Token::LParen) => {
                *pos += 1;
                let inner = parse_call(field, tokens, pos)?;
                match tokens.get(*pos) {
                    Some(Token::RParen) => *pos += 1,
                    _ => return Err(parse_err("expected )")),
                }
                args.push(inner);
            }
            _ => break,
        }
    }
    Ok(Expr::Call(name, args))
}

fn eval_expr_str(ctx: &dyn TemplateContext, field: &str, expr: &str) -> Result<Value, RenderError> {
    let tokens = tokenize(field, expr)?;
    let parsed = parse(field, &tokens)?;
    eval(ctx, field, &parsed)
}

fn eval(ctx: &dyn TemplateContext, field: &str, expr: &Expr) -> Result<Value, RenderError> {
    match expr {
        Expr::Lit(s) => Ok(Value::String(s.clone())),
        Expr::Call(name, args) => eval_call(ctx, field, name, args),
    }
}

fn eval_call(
    ctx: &dyn TemplateContext,
    field: &str,
    name: &str,
    args: &[Expr],
) -> Result<Value, RenderError> {
    let arity = |expected: usize| -> Result<(), RenderError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(RenderError::Arity {
                name: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    let string_arg = |i: usize| -> Result<String, RenderError> {
        Ok(eval(ctx, field, &args[i])?.as_str()?)
    };

    match name {
        "param" => {
            arity(1)?;
            ctx.param(&string_arg(0)?)
        }
        "paramList" => {
            arity(1)?;
            let value = ctx.param(&string_arg(0)?)?;
            if !ctx.scanning() {
                value.as_list()?;
            }
            Ok(value)
        }
        "paramMap" => {
            arity(1)?;
            let value = ctx.param(&string_arg(0)?)?;
            if !ctx.scanning() {
                value.as_map()?;
            }
            Ok(value)
        }
        "lookup" => {
            arity(1)?;
            let arg = string_arg(0)?;
            let (target, field_name) = arg.rsplit_once('.').ok_or_else(|| RenderError::Parse {
                field: field.to_string(),
                reason: format!("lookup target {arg:?} must be \"id.field\""),
            })?;
            ctx.lookup(target, field_name)
        }
        "env" => {
            arity(1)?;
            Ok(Value::String(ctx.env(&string_arg(0)?)))
        }
        "platform.os" => {
            arity(0)?;
            Ok(Value::String(std::env::consts::OS.to_string()))
        }
        "platform.arch" => {
            arity(0)?;
            Ok(Value::String(std::env::consts::ARCH.to_string()))
        }
        "platform.family" => {
            arity(0)?;
            Ok(Value::String(std::env::consts::FAMILY.to_string()))
        }
        "split" => {
            arity(2)?;
            let sep = string_arg(0)?;
            let input = string_arg(1)?;
            Ok(Value::List(
                input.split(&sep).map(|s| Value::String(s.to_string())).collect(),
            ))
        }
        "join" => {
            arity(2)?;
            let sep = string_arg(0)?;
            let value = eval(ctx, field, &args[1])?;
            if ctx.scanning() && value.as_list().is_err() {
                return Ok(Value::String(String::new()));
            }
            let parts: Vec<String> = value
                .as_list()?
                .iter()
                .map(Value::as_str)
                .collect::<Result<_, _>>()?;
            Ok(Value::String(parts.join(&sep)))
        }
        "jsonify" => {
            arity(1)?;
            let value = eval(ctx, field, &args[0])?;
            let json = serde_json::to_string(&value).map_err(|e| RenderError::Parse {
                field: field.to_string(),
                reason: format!("jsonify: {e}"),
            })?;
            Ok(Value::String(json))
        }
        other => Err(RenderError::UnknownFunction {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    struct FakeContext {
        params: IndexMap<String, Value>,
    }

    impl TemplateContext for FakeContext {
        fn param(&self, name: &str) -> Result<Value, RenderError> {
            self.params
                .get(name)
                .cloned()
                .ok_or_else(|| RenderError::NoSuchParam {
                    name: name.to_string(),
                })
        }

        fn lookup(&self, target: &str, field: &str) -> Result<Value, RenderError> {
            Ok(Value::String(format!("<{target}.{field}>")))
        }

        fn env(&self, name: &str) -> String {
            if name == "HOME" { "/home/test".to_string() } else { String::new() }
        }
    }

    fn ctx() -> FakeContext {
        let mut params = IndexMap::new();
        params.insert("who".to_string(), Value::from("world"));
        params.insert("count".to_string(), Value::from(3));
        params.insert(
            "ports".to_string(),
            Value::List(vec![Value::from(80), Value::from(443)]),
        );
        FakeContext { params }
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(eval_source(&ctx(), "f", "no templates here").unwrap(), "no templates here");
        assert_eq!(eval_source(&ctx(), "f", "").unwrap(), "");
    }

    #[test]
    fn test_param_interpolation() {
        assert_eq!(
            eval_source(&ctx(), "f", "hello {{param \"who\"}}").unwrap(),
            "hello world"
        );
        assert_eq!(
            eval_source(&ctx(), "f", "{{param \"count\"}} items").unwrap(),
            "3 items"
        );
    }

    #[test]
    fn test_missing_param_errors() {
        assert!(matches!(
            eval_source(&ctx(), "f", "{{param \"nope\"}}"),
            Err(RenderError::NoSuchParam { .. })
        ));
    }

    #[test]
    fn test_lookup_and_env() {
        assert_eq!(
            eval_source(&ctx(), "f", "{{lookup \"task.nginx.port\"}}").unwrap(),
            "<task.nginx.port>"
        );
        assert_eq!(eval_source(&ctx(), "f", "{{env \"HOME\"}}").unwrap(), "/home/test");
        // Unset env vars render as empty, not as an error.
        assert_eq!(eval_source(&ctx(), "f", "[{{env \"UNSET\"}}]").unwrap(), "[]");
    }

    #[test]
    fn test_nested_calls() {
        assert_eq!(
            eval_source(&ctx(), "f", "{{join \",\" (paramList \"ports\")}}").unwrap(),
            "80,443"
        );
        assert_eq!(
            eval_source(&ctx(), "f", "{{jsonify (paramList \"ports\")}}").unwrap(),
            "[80,443]"
        );
        assert_eq!(
            eval_source(&ctx(), "f", "{{join \"-\" (split \",\" \"a,b,c\")}}").unwrap(),
            "a-b-c"
        );
    }

    #[test]
    fn test_list_at_top_level_is_unprintable() {
        assert!(matches!(
            eval_source(&ctx(), "f", "{{paramList \"ports\"}}"),
            Err(RenderError::Unprintable { .. })
        ));
    }

    #[test]
    fn test_param_list_type_mismatch() {
        assert!(matches!(
            eval_source(&ctx(), "f", "{{paramList \"who\"}}"),
            Err(RenderError::Value(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            eval_source(&ctx(), "f", "{{param \"who\""),
            Err(RenderError::Parse { .. })
        ));
        assert!(matches!(
            eval_source(&ctx(), "f", "{{frobnicate \"x\"}}"),
            Err(RenderError::UnknownFunction { .. })
        ));
        assert!(matches!(
            eval_source(&ctx(), "f", "{{param \"a\" extra}}"),
            Err(RenderError::Parse { .. })
        ));
    }

    #[test]
    fn test_scan_records_references() {
        let refs = scan(
            "f",
            "{{param \"who\"}} {{lookup \"task.nginx.port\"}} {{param \"who\"}}",
        )
        .unwrap();
        assert_eq!(refs.params, vec!["who".to_string()]);
        assert_eq!(refs.lookups, vec!["task.nginx".to_string()]);
    }

    #[test]
    fn test_scan_tolerates_missing_params() {
        // Scanning records what is referenced without resolving anything.
        let refs = scan("f", "{{param \"undeclared\"}}").unwrap();
        assert_eq!(refs.params, vec!["undeclared".to_string()]);
    }

    #[test]
    fn test_scan_matches_render_parse_errors() {
        assert!(scan("f", "{{param }}").is_err());
    }

    #[test]
    fn test_platform_functions() {
        let os = eval_source(&ctx(), "f", "{{platform.os}}").unwrap();
        assert_eq!(os, std::env::consts::OS);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            eval_source(&ctx(), "f", "{{join \"\\n\" (split \",\" \"a,b\")}}").unwrap(),
            "a\nb"
        );
    }

    #[test]
    fn test_brace_inside_string_literal() {
        assert_eq!(
            eval_source(&ctx(), "f", "{{join \"}}\" (split \",\" \"a,b\")}}").unwrap(),
            "a}}b"
        );
    }
}
