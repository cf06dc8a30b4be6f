//! Sandboxed expression evaluation for `conditional` steps
//!
//! Rendered conditions are evaluated by a hand-written lexer and
//! recursive-descent parser. The language covers boolean/number/string
//! literals, comparison and boolean operators, list literals, and a fixed
//! helper set (`file_exists`, `all_files_exist`, `file_is_newer`, `and_`,
//! `or_`, `not_`). There is no access to anything outside that helper set.
//!
//! `and(...)`, `or(...)` and `not(...)` are accepted as sugar for the
//! underscore forms.

use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{RecipeError, Result};

/// `and(`/`or(`/`not(` directly followed by a parenthesis are call sugar;
/// with whitespace in between they stay operators.
static SUGAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(and|or|not)\(").unwrap());
static STRING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap());

/// Apply the sugar rewrite to the segments outside quoted strings; string
/// literals (file paths in particular) pass through untouched.
fn rewrite_sugar(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for literal in STRING_RE.find_iter(input) {
        out.push_str(&SUGAR_RE.replace_all(&input[last..literal.start()], "${1}_("));
        out.push_str(literal.as_str());
        last = literal.end();
    }
    out.push_str(&SUGAR_RE.replace_all(&input[last..], "${1}_("));
    out
}

/// Evaluate a rendered condition string to a boolean.
///
/// `"true"` / `"false"` (case-insensitive) short-circuit; anything else is
/// parsed and evaluated as an expression.
pub fn evaluate(expression: &str) -> Result<bool> {
    let trimmed = expression.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Ok(false);
    }

    let rewritten = rewrite_sugar(trimmed);
    let tokens = tokenize(&rewritten)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(eval(&expr)?.truthy())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
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
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Eq),
                    _ => return Err(condition_error("expected '==' after '='")),
                }
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some('=') => tokens.push(Token::Ne),
                    _ => return Err(condition_error("expected '!=' after '!'")),
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => literal.push(ch),
                        None => return Err(condition_error("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut literal = String::new();
                literal.push(c);
                chars.next();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        literal.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number: f64 = literal
                    .parse()
                    .map_err(|_| condition_error(format!("invalid number '{literal}'")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(condition_error(format!(
                    "unexpected character '{other}' in condition"
                )))
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Expr>),
    Call(String, Vec<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect_end(&self) -> Result<()> {
        if self.position == self.tokens.len() {
            Ok(())
        } else {
            Err(condition_error("trailing tokens after expression"))
        }
    }

    /// `or_expr → and_expr ('or' and_expr)*`
    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// `and_expr → not_expr ('and' not_expr)*`
    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") {
            self.next();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// `not_expr → 'not' not_expr | comparison`
    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek_keyword("not") {
            self.next();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    /// `comparison → primary ((==|!=|<|<=|>|>=) primary)?`
    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_primary()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(condition_error("expected ')'")),
                }
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.next();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expression()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err(condition_error("expected ',' or ']' in list")),
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => {
                let lowered = name.to_ascii_lowercase();
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() == Some(&Token::RParen) {
                        self.next();
                    } else {
                        loop {
                            args.push(self.parse_expression()?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                _ => {
                                    return Err(condition_error(
                                        "expected ',' or ')' in call arguments",
                                    ))
                                }
                            }
                        }
                    }
                    return Ok(Expr::Call(name, args));
                }
                match lowered.as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    _ => Err(condition_error(format!(
                        "unknown identifier '{name}' in condition"
                    ))),
                }
            }
            other => Err(condition_error(format!(
                "unexpected token {other:?} in condition"
            ))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name.eq_ignore_ascii_case(keyword))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CondValue {
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<CondValue>),
}

impl CondValue {
    fn truthy(&self) -> bool {
        match self {
            CondValue::Bool(b) => *b,
            CondValue::Number(n) => *n != 0.0,
            CondValue::Str(s) => !s.is_empty(),
            CondValue::List(items) => !items.is_empty(),
        }
    }
}

impl fmt::Display for CondValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CondValue::Bool(b) => write!(f, "{b}"),
            CondValue::Number(n) => write!(f, "{n}"),
            CondValue::Str(s) => write!(f, "{s}"),
            CondValue::List(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

fn eval(expr: &Expr) -> Result<CondValue> {
    match expr {
        Expr::Bool(b) => Ok(CondValue::Bool(*b)),
        Expr::Number(n) => Ok(CondValue::Number(*n)),
        Expr::Str(s) => Ok(CondValue::Str(s.clone())),
        Expr::List(items) => items
            .iter()
            .map(eval)
            .collect::<Result<Vec<_>>>()
            .map(CondValue::List),
        Expr::And(left, right) => {
            let left = eval(left)?;
            if !left.truthy() {
                return Ok(left);
            }
            eval(right)
        }
        Expr::Or(left, right) => {
            let left = eval(left)?;
            if left.truthy() {
                return Ok(left);
            }
            eval(right)
        }
        Expr::Not(inner) => Ok(CondValue::Bool(!eval(inner)?.truthy())),
        Expr::Compare(op, left, right) => {
            let left = eval(left)?;
            let right = eval(right)?;
            compare(*op, &left, &right)
        }
        Expr::Call(name, args) => {
            let args = args.iter().map(eval).collect::<Result<Vec<_>>>()?;
            call_helper(name, args)
        }
    }
}

fn compare(op: CompareOp, left: &CondValue, right: &CondValue) -> Result<CondValue> {
    use CondValue::*;
    let result = match (op, left, right) {
        (CompareOp::Eq, a, b) => a == b,
        (CompareOp::Ne, a, b) => a != b,
        (CompareOp::Lt, Number(a), Number(b)) => a < b,
        (CompareOp::Le, Number(a), Number(b)) => a <= b,
        (CompareOp::Gt, Number(a), Number(b)) => a > b,
        (CompareOp::Ge, Number(a), Number(b)) => a >= b,
        (CompareOp::Lt, Str(a), Str(b)) => a < b,
        (CompareOp::Le, Str(a), Str(b)) => a <= b,
        (CompareOp::Gt, Str(a), Str(b)) => a > b,
        (CompareOp::Ge, Str(a), Str(b)) => a >= b,
        (op, a, b) => {
            return Err(condition_error(format!(
                "cannot apply {op:?} to {a} and {b}"
            )))
        }
    };
    Ok(CondValue::Bool(result))
}

fn call_helper(name: &str, args: Vec<CondValue>) -> Result<CondValue> {
    match name {
        "file_exists" => {
            let path = single_string_arg("file_exists", &args)?;
            Ok(CondValue::Bool(Path::new(&path).exists()))
        }
        "all_files_exist" => {
            let paths = match args.as_slice() {
                [CondValue::List(items)] => items.clone(),
                _ => args,
            };
            for item in &paths {
                let path = match item {
                    CondValue::Str(s) => s,
                    other => {
                        return Err(condition_error(format!(
                            "all_files_exist expects string paths, got {other}"
                        )))
                    }
                };
                if !Path::new(path).exists() {
                    return Ok(CondValue::Bool(false));
                }
            }
            Ok(CondValue::Bool(true))
        }
        "file_is_newer" => {
            let (a, b) = match args.as_slice() {
                [CondValue::Str(a), CondValue::Str(b)] => (a.clone(), b.clone()),
                _ => {
                    return Err(condition_error(
                        "file_is_newer expects two string paths".to_string(),
                    ))
                }
            };
            let newer = match (modified_time(&a), modified_time(&b)) {
                (Some(a), Some(b)) => a > b,
                // A missing file is never newer than anything.
                _ => false,
            };
            Ok(CondValue::Bool(newer))
        }
        "and_" => Ok(CondValue::Bool(args.iter().all(CondValue::truthy))),
        "or_" => Ok(CondValue::Bool(args.iter().any(CondValue::truthy))),
        "not_" => {
            if args.len() != 1 {
                return Err(condition_error("not_ expects exactly one argument"));
            }
            Ok(CondValue::Bool(!args[0].truthy()))
        }
        other => Err(condition_error(format!(
            "unknown function '{other}' in condition"
        ))),
    }
}

fn single_string_arg(name: &str, args: &[CondValue]) -> Result<String> {
    match args {
        [CondValue::Str(s)] => Ok(s.clone()),
        _ => Err(condition_error(format!(
            "{name} expects a single string argument"
        ))),
    }
}

fn modified_time(path: &str) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn condition_error(message: impl Into<String>) -> RecipeError {
    RecipeError::Condition(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_booleans() {
        assert!(evaluate("true").unwrap());
        assert!(evaluate("TRUE").unwrap());
        assert!(!evaluate("false").unwrap());
        assert!(!evaluate("  False  ").unwrap());
    }

    #[test]
    fn comparisons() {
        assert!(evaluate("1 < 2").unwrap());
        assert!(evaluate("2 <= 2").unwrap());
        assert!(!evaluate("3 < 2").unwrap());
        assert!(evaluate("'abc' == 'abc'").unwrap());
        assert!(evaluate("'a' != 'b'").unwrap());
        assert!(evaluate("'a' < 'b'").unwrap());
        assert!(evaluate("10 >= 10").unwrap());
    }

    #[test]
    fn equality_across_types_is_false() {
        assert!(!evaluate("1 == 'one'").unwrap());
        assert!(evaluate("1 != 'one'").unwrap());
    }

    #[test]
    fn boolean_operators_short_circuit() {
        assert!(evaluate("true and true").unwrap());
        assert!(!evaluate("true and false").unwrap());
        assert!(evaluate("false or true").unwrap());
        assert!(evaluate("not false").unwrap());
        assert!(evaluate("not (1 > 2)").unwrap());
        assert!(evaluate("1 < 2 and 2 < 3 or false").unwrap());
    }

    #[test]
    fn operator_with_parenthesized_operand() {
        assert!(evaluate("true or (false)").unwrap());
        assert!(!evaluate("true and (false)").unwrap());
    }

    #[test]
    fn helper_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, "x").unwrap();

        assert!(evaluate(&format!("file_exists('{}')", present.display())).unwrap());
        assert!(!evaluate("file_exists('/does/not/exist')").unwrap());
    }

    #[test]
    fn helper_all_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "x").unwrap();
        std::fs::write(&b, "x").unwrap();

        let expr = format!("all_files_exist(['{}', '{}'])", a.display(), b.display());
        assert!(evaluate(&expr).unwrap());

        let expr = format!("all_files_exist(['{}', '/missing'])", a.display());
        assert!(!evaluate(&expr).unwrap());
    }

    #[test]
    fn helper_file_is_newer_missing_files() {
        assert!(!evaluate("file_is_newer('/missing/a', '/missing/b')").unwrap());
    }

    #[test]
    fn function_sugar_forms() {
        assert!(evaluate("and(true, true)").unwrap());
        assert!(!evaluate("and(true, false)").unwrap());
        assert!(evaluate("or(false, true)").unwrap());
        assert!(evaluate("not(false)").unwrap());
        assert!(evaluate("and_(true, or_(false, true))").unwrap());
        assert!(evaluate("not_(file_exists('/does/not/exist'))").unwrap());
    }

    #[test]
    fn sugar_rewrite_leaves_string_literals_alone() {
        assert!(evaluate("'and(b)' != 'and_(b)'").unwrap());
        assert!(evaluate("'not(x)' == 'not(x)'").unwrap());
        assert!(evaluate("and('or(', true)").unwrap());
    }

    #[test]
    fn file_helpers_accept_paths_containing_sugar_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let tricky = dir.path().join("and(b)");
        std::fs::write(&tricky, "x").unwrap();

        assert!(evaluate(&format!("file_exists('{}')", tricky.display())).unwrap());
        assert!(!evaluate(&format!("file_exists('{}')", dir.path().join("or(c)").display())).unwrap());
    }

    #[test]
    fn unknown_identifier_fails() {
        assert!(matches!(
            evaluate("maybe"),
            Err(RecipeError::Condition(_))
        ));
    }

    #[test]
    fn unknown_function_fails() {
        assert!(matches!(
            evaluate("shell('rm -rf /')"),
            Err(RecipeError::Condition(_))
        ));
    }

    #[test]
    fn malformed_expression_fails() {
        assert!(matches!(evaluate("1 <"), Err(RecipeError::Condition(_))));
        assert!(matches!(evaluate("(true"), Err(RecipeError::Condition(_))));
        assert!(matches!(evaluate("= ="), Err(RecipeError::Condition(_))));
    }

    #[test]
    fn empty_string_falsy_in_helpers() {
        assert!(!evaluate("and('', true)").unwrap());
        assert!(evaluate("or('', 'x')").unwrap());
    }
}
