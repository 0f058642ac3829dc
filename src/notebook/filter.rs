use std::str::FromStr;

use thiserror::Error;

/// Keyword expression selecting notebooks by name, e.g.
/// `kfp or (katib and not gpu)`. A keyword matches any name containing it,
/// ignoring case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    Keyword(String),
    Not(Box<NameFilter>),
    And(Box<NameFilter>, Box<NameFilter>),
    Or(Box<NameFilter>, Box<NameFilter>),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FilterError {
    #[error("Filter expression is empty")]
    Empty,

    #[error("Unexpected '{0}' in filter expression")]
    UnexpectedToken(String),

    #[error("Filter expression ended unexpectedly")]
    UnexpectedEnd,
}

impl NameFilter {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameFilter::Keyword(keyword) => name.to_lowercase().contains(&keyword.to_lowercase()),
            NameFilter::Not(inner) => !inner.matches(name),
            NameFilter::And(a, b) => a.matches(name) && b.matches(name),
            NameFilter::Or(a, b) => a.matches(name) || b.matches(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Word(String),
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in input.chars() {
        if c.is_whitespace() || c == '(' || c == ')' {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
            match c {
                '(' => tokens.push(Token::Open),
                ')' => tokens.push(Token::Close),
                _ => {}
            }
        } else {
            word.push(c);
        }
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek_word(&self, expected: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w == expected)
    }

    fn or_expr(&mut self) -> Result<NameFilter, FilterError> {
        let mut left = self.and_expr()?;
        while self.peek_word("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = NameFilter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<NameFilter, FilterError> {
        let mut left = self.not_expr()?;
        while self.peek_word("and") {
            self.pos += 1;
            let right = self.not_expr()?;
            left = NameFilter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<NameFilter, FilterError> {
        if self.peek_word("not") {
            self.pos += 1;
            return Ok(NameFilter::Not(Box::new(self.not_expr()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<NameFilter, FilterError> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            None => Err(FilterError::UnexpectedEnd),
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.tokens.get(self.pos) {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    Some(Token::Open) => Err(FilterError::UnexpectedToken("(".to_string())),
                    Some(Token::Word(w)) => Err(FilterError::UnexpectedToken(w.clone())),
                    None => Err(FilterError::UnexpectedEnd),
                }
            }
            Some(Token::Close) => Err(FilterError::UnexpectedToken(")".to_string())),
            Some(Token::Word(w)) if matches!(w.as_str(), "and" | "or") => {
                Err(FilterError::UnexpectedToken(w))
            }
            Some(Token::Word(w)) => Ok(NameFilter::Keyword(w)),
        }
    }
}

impl FromStr for NameFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s);
        if tokens.is_empty() {
            return Err(FilterError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let filter = parser.or_expr()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(filter),
            Some(Token::Close) => Err(FilterError::UnexpectedToken(")".to_string())),
            Some(Token::Open) => Err(FilterError::UnexpectedToken("(".to_string())),
            Some(Token::Word(w)) => Err(FilterError::UnexpectedToken(w.clone())),
        }
    }
}
