//! Recognizer for Python expression syntax.
//!
//! Answers one question: would this source compile as a single expression
//! (`eval` mode)? No tree is built. The grammar follows the Python 3
//! expression rules closely enough for editor snippets; anything it does not
//! accept is treated as statement code by the caller.

use once_cell::sync::Lazy;
use regex::Regex;

static NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{L}\p{Nl}_][\p{L}\p{Nl}\p{Mn}\p{Mc}\p{Nd}\p{Pc}]*")
        .expect("identifier pattern is valid")
});

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:0[xX](?:_?[0-9a-fA-F])+",
        r"|0[oO](?:_?[0-7])+",
        r"|0[bB](?:_?[01])+",
        r"|(?:[0-9](?:_?[0-9])*)?\.[0-9](?:_?[0-9])*(?:[eE][+-]?[0-9](?:_?[0-9])*)?[jJ]?",
        r"|[0-9](?:_?[0-9])*\.?(?:[eE][+-]?[0-9](?:_?[0-9])*)?[jJ]?)",
    ))
    .expect("number pattern is valid")
});

// Longest first so that prefixes never shadow longer operators.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "!=", "%=", "&=", "**", "*=", "+=", "-=", "->", "//",
    "/=", ":=", "<<", "<=", "==", ">=", ">>", "@=", "^=", "|=", "(", ")", "[", "]", "{", "}",
    ",", ":", ".", ";", "+", "-", "*", "/", "%", "@", "&", "|", "^", "~", "<", ">", "=",
];

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

// Same bracket limit CPython's tokenizer enforces.
const MAX_BRACKET_DEPTH: usize = 200;

// Bounds recursion through unary operators, `not`, `**`, lambdas and
// conditional tails as well as brackets.
const MAX_NESTING: usize = 200;

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

const COMPARISON_OPS: &[&str] = &["==", "!=", "<", ">", "<=", ">="];

const AUGMENTED_ASSIGN: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "@=", "&=", "|=", "^=", ">>=", "<<=", "**=",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Lexical error: {0}")]
    Lex(String),
    #[error("Syntax error: {0}")]
    Syntax(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Number,
    Str,
    Op(&'static str),
    Newline,
    End,
}

/// Succeeds when `source` is exactly one Python expression.
pub fn parse_expression(source: &str) -> Result<(), ExpressionError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .parse()
}

pub fn is_expression(source: &str) -> bool {
    parse_expression(source).is_ok()
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut depth: usize = 0;
    let mut rest = source;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ' ' || c == '\t' || c == '\x0c');
        let Some(c) = rest.chars().next() else {
            break;
        };

        match c {
            '#' => {
                rest = rest.find('\n').map_or("", |i| &rest[i..]);
            }
            '\\' => {
                let after = &rest[1..];
                rest = after
                    .strip_prefix("\r\n")
                    .or_else(|| after.strip_prefix('\n'))
                    .ok_or_else(|| {
                        ExpressionError::Lex(
                            "unexpected character after line continuation".to_string(),
                        )
                    })?;
            }
            '\r' | '\n' => {
                rest = &rest[1..];
                if depth == 0 && !matches!(tokens.last(), None | Some(Token::Newline)) {
                    tokens.push(Token::Newline);
                }
            }
            '"' | '\'' => {
                rest = scan_string(rest)?;
                tokens.push(Token::Str);
            }
            c if c.is_ascii_digit()
                || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) =>
            {
                let found = NUMBER
                    .find(rest)
                    .ok_or_else(|| ExpressionError::Lex("invalid number literal".to_string()))?;
                rest = &rest[found.end()..];
                tokens.push(Token::Number);
            }
            c if c == '_' || c.is_alphabetic() => {
                let found = NAME
                    .find(rest)
                    .ok_or_else(|| ExpressionError::Lex(format!("invalid identifier at '{}'", c)))?;
                let word = found.as_str();
                let after = &rest[found.end()..];
                let prefixes_string = STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
                    && after.starts_with(|q: char| q == '"' || q == '\'');
                if prefixes_string {
                    rest = scan_string(after)?;
                    tokens.push(Token::Str);
                } else {
                    tokens.push(Token::Name(word.to_string()));
                    rest = after;
                }
            }
            _ => {
                let op = OPERATORS
                    .iter()
                    .copied()
                    .find(|op| rest.starts_with(op))
                    .ok_or_else(|| ExpressionError::Lex(format!("unexpected character '{}'", c)))?;
                match op {
                    "(" | "[" | "{" => {
                        if depth >= MAX_BRACKET_DEPTH {
                            return Err(ExpressionError::Syntax(
                                "too many nested parentheses".to_string(),
                            ));
                        }
                        depth += 1;
                    }
                    ")" | "]" | "}" => {
                        depth = depth.checked_sub(1).ok_or_else(|| {
                            ExpressionError::Syntax(format!("unmatched '{}'", op))
                        })?;
                    }
                    _ => {}
                }
                rest = &rest[op.len()..];
                tokens.push(Token::Op(op));
            }
        }
    }

    if depth > 0 {
        return Err(ExpressionError::Syntax("unclosed bracket".to_string()));
    }
    while matches!(tokens.last(), Some(Token::Newline)) {
        tokens.pop();
    }
    tokens.push(Token::End);
    Ok(tokens)
}

/// Consumes one string literal starting at the opening quote and returns the
/// remaining input.
fn scan_string(input: &str) -> Result<&str, ExpressionError> {
    let bytes = input.as_bytes();
    let quote = bytes[0];
    let triple = bytes.len() >= 3 && bytes[1] == quote && bytes[2] == quote;
    let mut i = if triple { 3 } else { 1 };

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i += 2;
            continue;
        }
        if !triple && (b == b'\n' || b == b'\r') {
            break;
        }
        if b == quote {
            if !triple {
                return Ok(&input[i + 1..]);
            }
            if i + 2 < bytes.len() && bytes[i + 1] == quote && bytes[i + 2] == quote {
                return Ok(&input[i + 3..]);
            }
        }
        i += 1;
    }

    Err(ExpressionError::Lex("unterminated string literal".to_string()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

type ParseResult = Result<(), ExpressionError>;

static END: Token = Token::End;

impl Parser {
    fn parse(mut self) -> ParseResult {
        if self.peek() == &Token::End {
            return Err(self.error("empty source"));
        }

        self.star_expressions()?;

        match self.peek() {
            Token::End => Ok(()),
            Token::Newline => Err(self.error("more than one logical line")),
            Token::Op("=") => Err(self.error("assignment is a statement")),
            Token::Op(op) if AUGMENTED_ASSIGN.contains(op) => {
                Err(self.error("augmented assignment is a statement"))
            }
            _ => Err(self.error("unexpected token")),
        }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&END)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Token::Op(current) if *current == op)
    }

    fn at_any_op(&self, ops: &[&str]) -> bool {
        matches!(self.peek(), Token::Op(current) if ops.contains(current))
    }

    fn at_kw(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Name(name) if name == keyword)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let found = self.at_op(op);
        if found {
            self.advance();
        }
        found
    }

    fn eat_kw(&mut self, keyword: &str) -> bool {
        let found = self.at_kw(keyword);
        if found {
            self.advance();
        }
        found
    }

    fn expect_op(&mut self, op: &str) -> ParseResult {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", op)))
        }
    }

    fn expect_kw(&mut self, keyword: &str) -> ParseResult {
        if self.eat_kw(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", keyword)))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult {
        match self.peek() {
            Token::Name(name) if !is_keyword(name) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error("expected an identifier")),
        }
    }

    /// Runs `rule` one nesting level deeper, failing past `MAX_NESTING`.
    fn nested(&mut self, rule: fn(&mut Self) -> ParseResult) -> ParseResult {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too deeply nested"));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn error(&self, reason: &str) -> ExpressionError {
        ExpressionError::Syntax(format!("{} (token {})", reason, self.pos))
    }

    fn at_plain_name_followed_by(&self, op: &str) -> bool {
        matches!(self.peek(), Token::Name(name) if !is_keyword(name))
            && matches!(self.peek_at(1), Token::Op(next) if *next == op)
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Token::Name(name) => {
                !is_keyword(name)
                    || matches!(name.as_str(), "None" | "True" | "False" | "not" | "lambda")
            }
            Token::Number | Token::Str => true,
            Token::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "..." | "*"),
            Token::Newline | Token::End => false,
        }
    }

    fn at_comprehension(&self) -> bool {
        self.at_kw("for")
            || (self.at_kw("async") && matches!(self.peek_at(1), Token::Name(n) if n == "for"))
    }

    // a, *b, c,
    fn star_expressions(&mut self) -> ParseResult {
        let starred = self.at_op("*");
        self.star_expression()?;
        if starred && !self.at_op(",") {
            return Err(self.error("starred expression outside a tuple"));
        }
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            self.star_expression()?;
        }
        Ok(())
    }

    fn star_expression(&mut self) -> ParseResult {
        if self.eat_op("*") {
            self.bitwise_or()
        } else {
            self.expression()
        }
    }

    fn star_named_expression(&mut self) -> ParseResult {
        if self.eat_op("*") {
            self.bitwise_or()
        } else {
            self.named_expression()
        }
    }

    fn named_expression(&mut self) -> ParseResult {
        if self.at_plain_name_followed_by(":=") {
            self.advance();
            self.advance();
        }
        self.expression()
    }

    fn expression(&mut self) -> ParseResult {
        if self.at_kw("lambda") {
            return self.lambda();
        }
        self.disjunction()?;
        if self.eat_kw("if") {
            self.disjunction()?;
            self.expect_kw("else")?;
            self.nested(Self::expression)?;
        }
        Ok(())
    }

    fn lambda(&mut self) -> ParseResult {
        self.nested(Self::lambda_body)
    }

    fn lambda_body(&mut self) -> ParseResult {
        self.expect_kw("lambda")?;
        while !self.at_op(":") {
            if self.eat_op("**") || self.eat_op("*") {
                if !self.at_op(",") && !self.at_op(":") {
                    self.expect_identifier()?;
                }
            } else if self.eat_op("/") {
                // positional-only marker
            } else {
                self.expect_identifier()?;
                if self.eat_op("=") {
                    self.expression()?;
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(":")?;
        self.expression()
    }

    fn disjunction(&mut self) -> ParseResult {
        self.conjunction()?;
        while self.eat_kw("or") {
            self.conjunction()?;
        }
        Ok(())
    }

    fn conjunction(&mut self) -> ParseResult {
        self.inversion()?;
        while self.eat_kw("and") {
            self.inversion()?;
        }
        Ok(())
    }

    fn inversion(&mut self) -> ParseResult {
        if self.eat_kw("not") {
            return self.nested(Self::inversion);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult {
        self.bitwise_or()?;
        loop {
            if self.at_any_op(COMPARISON_OPS) || self.at_kw("in") {
                self.advance();
            } else if self.at_kw("is") {
                self.advance();
                self.eat_kw("not");
            } else if self.at_kw("not") && matches!(self.peek_at(1), Token::Name(n) if n == "in") {
                self.advance();
                self.advance();
            } else {
                return Ok(());
            }
            self.bitwise_or()?;
        }
    }

    fn binary(&mut self, ops: &[&str], operand: fn(&mut Self) -> ParseResult) -> ParseResult {
        operand(self)?;
        while self.at_any_op(ops) {
            self.advance();
            operand(self)?;
        }
        Ok(())
    }

    fn bitwise_or(&mut self) -> ParseResult {
        self.binary(&["|"], Self::bitwise_xor)
    }

    fn bitwise_xor(&mut self) -> ParseResult {
        self.binary(&["^"], Self::bitwise_and)
    }

    fn bitwise_and(&mut self) -> ParseResult {
        self.binary(&["&"], Self::shift)
    }

    fn shift(&mut self) -> ParseResult {
        self.binary(&["<<", ">>"], Self::sum)
    }

    fn sum(&mut self) -> ParseResult {
        self.binary(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> ParseResult {
        self.binary(&["*", "/", "//", "%", "@"], Self::factor)
    }

    fn factor(&mut self) -> ParseResult {
        if self.at_any_op(&["+", "-", "~"]) {
            self.advance();
            return self.nested(Self::factor);
        }
        self.power()
    }

    fn power(&mut self) -> ParseResult {
        self.primary()?;
        if self.eat_op("**") {
            self.nested(Self::factor)?;
        }
        Ok(())
    }

    fn primary(&mut self) -> ParseResult {
        self.atom()?;
        loop {
            if self.eat_op(".") {
                self.expect_identifier()?;
            } else if self.eat_op("(") {
                self.nested(Self::arguments)?;
            } else if self.eat_op("[") {
                self.nested(Self::slices)?;
            } else {
                return Ok(());
            }
        }
    }

    fn atom(&mut self) -> ParseResult {
        match self.peek().clone() {
            Token::Name(name) => {
                if is_keyword(&name) && !matches!(name.as_str(), "None" | "True" | "False") {
                    return Err(self.error(&format!("'{}' cannot start an expression", name)));
                }
                self.advance();
                Ok(())
            }
            Token::Number => {
                self.advance();
                Ok(())
            }
            Token::Str => {
                // implicit concatenation
                while self.peek() == &Token::Str {
                    self.advance();
                }
                Ok(())
            }
            Token::Op("...") => {
                self.advance();
                Ok(())
            }
            Token::Op("(") => {
                self.advance();
                self.nested(Self::parenthesized)
            }
            Token::Op("[") => {
                self.advance();
                self.nested(Self::list_display)
            }
            Token::Op("{") => {
                self.advance();
                self.nested(Self::brace_display)
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parenthesized(&mut self) -> ParseResult {
        if self.eat_op(")") {
            return Ok(());
        }
        let starred = self.at_op("*");
        self.star_named_expression()?;
        if self.at_comprehension() {
            self.comprehension()?;
            return self.expect_op(")");
        }
        if starred && !self.at_op(",") {
            return Err(self.error("starred expression outside a tuple"));
        }
        self.sequence_tail(")")
    }

    fn list_display(&mut self) -> ParseResult {
        if self.eat_op("]") {
            return Ok(());
        }
        self.star_named_expression()?;
        if self.at_comprehension() {
            self.comprehension()?;
            return self.expect_op("]");
        }
        self.sequence_tail("]")
    }

    fn sequence_tail(&mut self, close: &str) -> ParseResult {
        while self.eat_op(",") {
            if self.at_op(close) {
                break;
            }
            self.star_named_expression()?;
        }
        self.expect_op(close)
    }

    fn brace_display(&mut self) -> ParseResult {
        if self.eat_op("}") {
            return Ok(());
        }

        let is_dict = if self.eat_op("**") {
            self.bitwise_or()?;
            true
        } else if self.eat_op("*") {
            self.bitwise_or()?;
            false
        } else {
            self.named_expression()?;
            if self.eat_op(":") {
                self.expression()?;
                true
            } else {
                false
            }
        };

        if self.at_comprehension() {
            self.comprehension()?;
            return self.expect_op("}");
        }

        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            if is_dict {
                if self.eat_op("**") {
                    self.bitwise_or()?;
                } else {
                    self.expression()?;
                    self.expect_op(":")?;
                    self.expression()?;
                }
            } else {
                self.star_named_expression()?;
            }
        }
        self.expect_op("}")
    }

    fn comprehension(&mut self) -> ParseResult {
        while self.at_comprehension() {
            self.eat_kw("async");
            self.expect_kw("for")?;
            self.targets()?;
            self.expect_kw("in")?;
            self.disjunction()?;
            while self.eat_kw("if") {
                self.disjunction()?;
            }
        }
        Ok(())
    }

    fn targets(&mut self) -> ParseResult {
        loop {
            self.eat_op("*");
            self.bitwise_or()?;
            if !self.eat_op(",") || self.at_kw("in") {
                return Ok(());
            }
        }
    }

    fn arguments(&mut self) -> ParseResult {
        if self.eat_op(")") {
            return Ok(());
        }
        loop {
            if self.eat_op("**") || self.eat_op("*") {
                self.expression()?;
            } else if self.at_plain_name_followed_by("=") {
                self.advance();
                self.advance();
                self.expression()?;
            } else {
                self.named_expression()?;
                if self.at_comprehension() {
                    self.comprehension()?;
                }
            }
            if !self.eat_op(",") || self.at_op(")") {
                break;
            }
        }
        self.expect_op(")")
    }

    fn slices(&mut self) -> ParseResult {
        loop {
            self.slice()?;
            if !self.eat_op(",") || self.at_op("]") {
                break;
            }
        }
        self.expect_op("]")
    }

    fn slice(&mut self) -> ParseResult {
        if !self.at_op(":") {
            self.star_named_expression()?;
        }
        if self.eat_op(":") {
            if !self.at_any_op(&[":", ",", "]"]) {
                self.expression()?;
            }
            if self.eat_op(":") && !self.at_any_op(&[",", "]"]) {
                self.expression()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_expressions() {
        for source in [
            "1+1",
            "df.head()",
            "print('a')",
            "x",
            "  x  # trailing comment\n",
            "a if b else c",
            "lambda x, *args, y=2, **kw: x + y",
            "[x * 2 for x in range(10) if x % 2]",
            "{k: v for k, v in items}",
            "{1, 2, *rest}",
            "{**a, 'b': 1}",
            "(x := 5)",
            "f(a, b=1, *c, **d)",
            "sum(x for x in y)",
            "df.iloc[1:3, ::2]",
            "not a and b or c",
            "a not in b is not c",
            "-x ** -2",
            "1, 2",
            "b'bytes' rb'raw' f\"{x}\"",
            "'''multi\nline'''",
            "(1 +\n 2)",
            "1 + \\\n 2",
            "0x_ff + 1_000.5e-3j + .5",
            "...",
        ] {
            assert!(is_expression(source), "should accept {:?}", source);
        }
    }

    #[test]
    fn test_rejects_statements() {
        for source in [
            "",
            "   \n",
            "x = 1",
            "x += 1",
            "x := 5",
            "import os",
            "def f(): pass",
            "for i in r: pass",
            "1\n2",
            "a; b",
            "%timeit x",
            "!ls",
            "return 1",
            "yield x",
            "(1, 2",
            "'unterminated",
            "x.def",
            "*a",
            "(*a)",
        ] {
            assert!(!is_expression(source), "should reject {:?}", source);
        }
    }

    #[test]
    fn test_starred_items_need_a_tuple() {
        for source in ["*a,", "a, *b", "(*a,)", "[*a]", "f(*a)"] {
            assert!(is_expression(source), "should accept {:?}", source);
        }
    }

    #[test]
    fn test_bracket_nesting_limit() {
        let within = format!("{}1{}", "(".repeat(MAX_BRACKET_DEPTH), ")".repeat(MAX_BRACKET_DEPTH));
        assert!(tokenize(&within).is_ok());

        let beyond = format!(
            "{}1{}",
            "(".repeat(MAX_BRACKET_DEPTH + 1),
            ")".repeat(MAX_BRACKET_DEPTH + 1)
        );
        let error = parse_expression(&beyond).unwrap_err();
        assert_eq!(error, ExpressionError::Syntax("too many nested parentheses".to_string()));
    }

    #[test]
    fn test_deep_unary_chains_are_rejected_not_overflowed() {
        for source in [
            format!("{}1", "-".repeat(200_000)),
            format!("{}x", "not ".repeat(50_000)),
            format!("2{}", "**2".repeat(50_000)),
            format!("a{}", " if b else a".repeat(50_000)),
            format!("{}x", "lambda: ".repeat(50_000)),
        ] {
            let error = parse_expression(&source).unwrap_err();
            assert!(error.to_string().contains("too deeply nested"), "{}", error);
        }
        assert!(is_expression(&format!("{}1", "-".repeat(50))));
    }
}
