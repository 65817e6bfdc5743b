use serde_json::{Map, Number, Value};
use std::fmt;

const MAX_DEPTH: usize = 200;

// `Syntax`: the text does not tokenize into one expression. `Value`: it does,
// but is not a pure literal. `foo bar` is the former, `foo` the latter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralError {
    Syntax(String),
    Value(String),
}

impl fmt::Display for LiteralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralError::Syntax(msg) => write!(f, "invalid syntax: {}", msg),
            LiteralError::Value(msg) => write!(f, "malformed literal: {}", msg),
        }
    }
}

impl std::error::Error for LiteralError {}

/// Parse one literal expression. A bare comma-separated sequence at the top
/// level (`1, 2.5`) reads as a tuple.
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
    let mut reader = Reader::new(text);
    let value = reader.read_top()?;
    if let Some(found) = reader.non_literal {
        return Err(LiteralError::Value(found));
    }
    Ok(value)
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
    // First non-literal construct seen; reported only if the whole text parses.
    non_literal: Option<String>,
}

impl Reader {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            depth: 0,
            non_literal: None,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' | '\x0c' => self.pos += 1,
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn syntax<T>(&self, msg: impl fmt::Display) -> Result<T, LiteralError> {
        Err(LiteralError::Syntax(format!(
            "{} at column {}",
            msg,
            self.pos + 1
        )))
    }

    fn mark_non_literal(&mut self, what: String) {
        if self.non_literal.is_none() {
            self.non_literal = Some(what);
        }
    }

    fn read_top(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        if self.peek().is_none() {
            return self.syntax("empty expression");
        }
        let first = self.read_expr()?;
        self.skip_ws();
        let value = if self.peek() == Some(',') {
            let mut items = vec![first];
            while self.eat(',') {
                self.skip_ws();
                if self.peek().is_none() {
                    break;
                }
                items.push(self.read_expr()?);
                self.skip_ws();
            }
            Value::Array(items)
        } else {
            first
        };
        self.skip_ws();
        match self.peek() {
            None => Ok(value),
            Some(c) => self.syntax(format!("unexpected '{}'", c)),
        }
    }

    fn read_expr(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        match self.peek() {
            None => self.syntax("unexpected end of input"),
            Some('[') => self.nested(Self::read_list),
            Some('(') => self.nested(Self::read_paren),
            Some('{') => self.nested(Self::read_brace),
            Some('"') | Some('\'') => self.read_strings().map(Value::String),
            Some('-') | Some('+') => self.nested(Self::read_signed),
            Some(c) if c.is_ascii_digit() || c == '.' => self.read_number(false),
            Some(c) if c.is_alphabetic() || c == '_' => self.read_name(),
            Some(c) => self.syntax(format!("unexpected '{}'", c)),
        }
    }

    fn nested(
        &mut self,
        read: fn(&mut Self) -> Result<Value, LiteralError>,
    ) -> Result<Value, LiteralError> {
        if self.depth >= MAX_DEPTH {
            return self.syntax("too deeply nested");
        }
        self.depth += 1;
        let value = read(self);
        self.depth -= 1;
        value
    }

    fn read_signed(&mut self) -> Result<Value, LiteralError> {
        let negative = self.bump() == Some('-');
        self.skip_ws();
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '.' => self.read_number(negative),
            _ => {
                let operand = self.read_expr()?;
                self.mark_non_literal(format!("unary operator applied to {}", operand));
                Ok(Value::Null)
            }
        }
    }

    fn read_number(&mut self, negative: bool) -> Result<Value, LiteralError> {
        let start = self.pos;
        let mut digits = String::new();
        if negative {
            digits.push('-');
        }
        let mut is_float = false;
        let mut saw_digit = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                saw_digit = true;
                digits.push(c);
                self.pos += 1;
            } else if c == '_' && saw_digit {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            is_float = true;
            digits.push('.');
            self.pos += 1;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    saw_digit = true;
                    digits.push(c);
                    self.pos += 1;
                } else if c == '_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if !saw_digit {
            self.pos = start;
            return self.syntax("expected a number");
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let exp_start = self.pos;
            let mut exponent = String::from("e");
            self.pos += 1;
            if let Some(sign) = self.peek().filter(|c| *c == '+' || *c == '-') {
                exponent.push(sign);
                self.pos += 1;
            }
            let mut exp_digits = false;
            while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
                exponent.push(c);
                exp_digits = true;
                self.pos += 1;
            }
            if !exp_digits {
                self.pos = exp_start;
                return self.syntax("incomplete exponent");
            }
            is_float = true;
            digits.push_str(&exponent);
        }
        if matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            return self.syntax("invalid number literal");
        }

        if !is_float {
            if let Ok(i) = digits.parse::<i64>() {
                return Ok(Value::from(i));
            }
            if let Ok(u) = digits.parse::<u64>() {
                return Ok(Value::from(u));
            }
        }
        let f: f64 = match digits.parse() {
            Ok(f) => f,
            Err(_) => return self.syntax("invalid number literal"),
        };
        match Number::from_f64(f) {
            Some(n) => Ok(Value::Number(n)),
            None => {
                self.mark_non_literal(format!("number {} is out of range", digits));
                Ok(Value::Null)
            }
        }
    }

    /// Adjacent string literals concatenate, as in `'a' "b"`.
    fn read_strings(&mut self) -> Result<String, LiteralError> {
        let mut out = self.read_string(false)?;
        loop {
            let save = self.pos;
            self.skip_ws();
            match self.peek() {
                Some('"') | Some('\'') => out.push_str(&self.read_string(false)?),
                _ => {
                    self.pos = save;
                    return Ok(out);
                }
            }
        }
    }

    fn read_string(&mut self, raw: bool) -> Result<String, LiteralError> {
        let quote = match self.bump() {
            Some(q) => q,
            None => return self.syntax("expected a string"),
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return self.syntax("unterminated string literal"),
                Some(c) if c == quote => return Ok(out),
                Some('\\') if raw => {
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                }
                Some('\\') => self.read_escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn read_escape(&mut self, out: &mut String) -> Result<(), LiteralError> {
        let c = match self.bump() {
            Some(c) => c,
            None => return self.syntax("unterminated string literal"),
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(c),
            '\n' => {}
            'x' => out.push(self.read_hex_escape(2)?),
            'u' => out.push(self.read_hex_escape(4)?),
            'U' => out.push(self.read_hex_escape(8)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn read_hex_escape(&mut self, len: usize) -> Result<char, LiteralError> {
        let mut code = 0u32;
        for _ in 0..len {
            let digit = match self.bump().and_then(|c| c.to_digit(16)) {
                Some(d) => d,
                None => return self.syntax("truncated escape sequence"),
            };
            code = code * 16 + digit;
        }
        match char::from_u32(code) {
            Some(c) => Ok(c),
            None => self.syntax("invalid escape sequence"),
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        name
    }

    fn read_name(&mut self) -> Result<Value, LiteralError> {
        let mut name = self.read_identifier();

        // String prefixes: r'..', b"..", u'..'.
        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = name.to_ascii_lowercase();
            return match lower.as_str() {
                "r" | "br" | "rb" => self.read_string(true).map(Value::String),
                "b" | "u" => self.read_string(false).map(Value::String),
                _ => self.syntax(format!("unexpected string after '{}'", name)),
            };
        }

        match name.as_str() {
            "True" | "true" => return Ok(Value::Bool(true)),
            "False" | "false" => return Ok(Value::Bool(false)),
            "None" | "null" => return Ok(Value::Null),
            _ => {}
        }

        while self.peek() == Some('.')
            && matches!(self.peek_at(1), Some(c) if c.is_alphabetic() || c == '_')
        {
            self.pos += 1;
            name.push('.');
            name.push_str(&self.read_identifier());
        }
        self.skip_ws();
        if self.peek() == Some('(') {
            self.nested(Self::read_paren)?;
            self.mark_non_literal(format!("call to '{}' is not a literal", name));
        } else {
            self.mark_non_literal(format!("name '{}' is not a literal", name));
        }
        Ok(Value::Null)
    }

    fn read_list(&mut self) -> Result<Value, LiteralError> {
        self.bump();
        let items = self.read_items(']')?;
        Ok(Value::Array(items))
    }

    /// Items up to and including `close`, allowing a trailing comma.
    fn read_items(&mut self, close: char) -> Result<Vec<Value>, LiteralError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.read_expr()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(close) {
                return Ok(items);
            }
            return match self.peek() {
                None => self.syntax(format!("'{}' was never closed", opening(close))),
                Some(c) => self.syntax(format!("unexpected '{}'", c)),
            };
        }
    }

    /// `()` is an empty tuple, `(x)` is grouping, `(x,)` and `(x, y)` are tuples.
    fn read_paren(&mut self) -> Result<Value, LiteralError> {
        self.bump();
        self.skip_ws();
        if self.eat(')') {
            return Ok(Value::Array(Vec::new()));
        }
        let first = self.read_expr()?;
        self.skip_ws();
        if self.eat(')') {
            return Ok(first);
        }
        if !self.eat(',') {
            return match self.peek() {
                None => self.syntax("'(' was never closed"),
                Some(c) => self.syntax(format!("unexpected '{}'", c)),
            };
        }
        let mut items = vec![first];
        items.extend(self.read_items(')')?);
        Ok(Value::Array(items))
    }

    fn read_brace(&mut self) -> Result<Value, LiteralError> {
        self.bump();
        self.skip_ws();
        if self.eat('}') {
            return Ok(Value::Object(Map::new()));
        }
        let first = self.read_expr()?;
        self.skip_ws();
        if !self.eat(':') {
            // A set literal.
            let mut items = vec![first];
            if self.eat(',') {
                items.extend(self.read_items('}')?);
            } else if !self.eat('}') {
                return match self.peek() {
                    None => self.syntax("'{' was never closed"),
                    Some(c) => self.syntax(format!("unexpected '{}'", c)),
                };
            }
            return Ok(Value::Array(items));
        }

        let mut map = Map::new();
        let value = self.read_expr()?;
        map.insert(key_string(first), value);
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Ok(Value::Object(map));
            }
            if !self.eat(',') {
                return match self.peek() {
                    None => self.syntax("'{' was never closed"),
                    Some(c) => self.syntax(format!("unexpected '{}'", c)),
                };
            }
            self.skip_ws();
            if self.eat('}') {
                return Ok(Value::Object(map));
            }
            let key = self.read_expr()?;
            self.skip_ws();
            if !self.eat(':') {
                return self.syntax("expected ':' in dict literal");
            }
            let value = self.read_expr()?;
            map.insert(key_string(key), value);
        }
    }
}

fn opening(close: char) -> char {
    match close {
        ']' => '[',
        ')' => '(',
        _ => '{',
    }
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
