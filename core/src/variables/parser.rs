//! Recursive-descent parser for numeric parameter expressions.
//!
//! Grammar (lowest to highest precedence):
//! ```text
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := atom ('^' unary)?
//! atom    := number | '@' ident | ident '(' args ')' | ident | '(' sum ')'
//! ```

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn at(position: usize, message: impl Into<String>) -> Self {
        Self { message: message.into(), position }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at {})", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// `@name`, stored without the sigil
    VarRef(String),
    /// `PI`, `E`
    Constant(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    VarRef(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' | '-' | '*' | '/' | '^' => {
                tokens.push((start, Token::Op(c)));
                i += 1;
            }
            '(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((start, Token::Comma));
                i += 1;
            }
            '@' => {
                i += 1;
                let name_start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if i == name_start {
                    return Err(ParseError::at(start, "Expected variable name after '@'"));
                }
                let name: String = chars[name_start..i].iter().collect();
                tokens.push((start, Token::VarRef(name)));
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent suffix: 1e-3, 2.5E4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::at(start, format!("Invalid number '{}'", text)))?;
                tokens.push((start, Token::Number(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            }
            other => {
                return Err(ParseError::at(start, format!("Unexpected character '{}'", other)));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.cursor).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|(_, t)| t.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        let pos = self.position();
        match self.bump() {
            Some(t) if t == expected => Ok(()),
            _ => Err(ParseError::at(pos, format!("Expected {}", what))),
        }
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.product()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { BinaryOperator::Add } else { BinaryOperator::Sub };
            self.bump();
            let right = self.product()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' { BinaryOperator::Mul } else { BinaryOperator::Div };
            self.bump();
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.bump();
                Ok(Expr::Negate(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.bump();
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.bump();
            // Right associative: 2^3^2 == 2^(3^2)
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinaryOperator::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let pos = self.position();
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::VarRef(name)) => Ok(Expr::VarRef(name)),
            Some(Token::LParen) => {
                let inner = self.sum()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.bump();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        args.push(self.sum()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.bump();
                            args.push(self.sum()?);
                        }
                    }
                    self.expect(Token::RParen, "')' after function arguments")?;
                    Ok(Expr::Call { name: name.to_lowercase(), args })
                } else {
                    match name.as_str() {
                        "PI" | "pi" => Ok(Expr::Constant("PI".to_string())),
                        "E" => Ok(Expr::Constant("E".to_string())),
                        _ => Err(ParseError::at(
                            pos,
                            format!("Unknown identifier '{}' (variables are written @{})", name, name),
                        )),
                    }
                }
            }
            Some(_) => Err(ParseError::at(pos, "Unexpected token")),
            None => Err(ParseError::at(pos, "Unexpected end of expression")),
        }
    }
}

pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::at(0, "Empty expression"));
    }
    let mut parser = Parser { tokens, cursor: 0, end: input.chars().count() };
    let expr = parser.sum()?;
    if parser.cursor < parser.tokens.len() {
        return Err(ParseError::at(parser.position(), "Unexpected trailing input"));
    }
    Ok(expr)
}
