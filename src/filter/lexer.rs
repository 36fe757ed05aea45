use super::ast::CatuskotiState;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `+ - ~ ?`
    State(CatuskotiState),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Colon,
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    /// `..`
    Range,
    Regex { pattern: String, flags: String },
    Phrase(String),
    Wildcard(String),
    Word(String),
    Number(String),
    Date(String),
    StackRef(String),
    /// Malformed input, reported by the parser.
    Error(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token
    pub text: String,
    /// Offset in characters
    pub position: usize,
    /// Length in characters
    pub length: usize,
}

impl Token {
    pub fn end(&self) -> usize {
        self.position + self.length
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::State(state) => match state.prefix() {
                Some(ch) => write!(f, "'{ch}'"),
                None => write!(f, "state"),
            },
            TokenKind::And => write!(f, "'&'"),
            TokenKind::Or => write!(f, "'|'"),
            TokenKind::Not => write!(f, "'!'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::Gte => write!(f, "'>='"),
            TokenKind::Lte => write!(f, "'<='"),
            TokenKind::Range => write!(f, "'..'"),
            TokenKind::Regex { pattern, flags } => write!(f, "regex /{pattern}/{flags}"),
            TokenKind::Phrase(s) => write!(f, "phrase \"{s}\""),
            TokenKind::Wildcard(s) => write!(f, "wildcard '{s}'"),
            TokenKind::Word(s) => write!(f, "'{s}'"),
            TokenKind::Number(s) => write!(f, "number {s}"),
            TokenKind::Date(s) => write!(f, "date {s}"),
            TokenKind::StackRef(s) => write!(f, "'@{s}'"),
            TokenKind::Error(msg) => write!(f, "{msg}"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// Splits a query into tokens. Never fails: malformed pieces become
/// `TokenKind::Error` tokens so the parser reports every problem in one place.
/// The returned vector always ends with `Eof`.
pub fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let start = i;
        let ch = chars[i];

        let kind = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '"' => read_quoted(&chars, &mut i),
            '/' => read_regex(&chars, &mut i),
            '@' => {
                i += 1;
                let name = read_while(&chars, &mut i, is_name_char);
                if name.is_empty() {
                    TokenKind::Error("expected a stack name after '@'".to_string())
                } else {
                    TokenKind::StackRef(name)
                }
            }
            '(' => single(&mut i, TokenKind::LParen),
            ')' => single(&mut i, TokenKind::RParen),
            '&' => single(&mut i, TokenKind::And),
            '|' => single(&mut i, TokenKind::Or),
            '!' => single(&mut i, TokenKind::Not),
            ':' => single(&mut i, TokenKind::Colon),
            '=' => single(&mut i, TokenKind::Eq),
            '>' | '<' => {
                i += 1;
                let with_eq = chars.get(i) == Some(&'=');
                if with_eq {
                    i += 1;
                }
                match (ch, with_eq) {
                    ('>', false) => TokenKind::Gt,
                    ('>', true) => TokenKind::Gte,
                    ('<', false) => TokenKind::Lt,
                    _ => TokenKind::Lte,
                }
            }
            '.' if chars.get(i + 1) == Some(&'.') => {
                i += 2;
                TokenKind::Range
            }
            '+' | '-' | '~' | '?' => match CatuskotiState::from_prefix(ch) {
                Some(state) => single(&mut i, TokenKind::State(state)),
                None => single(&mut i, TokenKind::Error(format!("unexpected character '{ch}'"))),
            },
            c if c.is_alphanumeric() || c == '_' || c == '*' => {
                let word = read_word(&chars, &mut i);
                classify_word(word)
            }
            other => single(
                &mut i,
                TokenKind::Error(format!("unexpected character '{other}'")),
            ),
        };

        tokens.push(Token {
            kind,
            text: chars[start..i].iter().collect(),
            position: start,
            length: i - start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        text: String::new(),
        position: len,
        length: 0,
    });
    tokens
}

fn single(i: &mut usize, kind: TokenKind) -> TokenKind {
    *i += 1;
    kind
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn read_while(chars: &[char], i: &mut usize, pred: fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.get(*i) {
        if !pred(c) {
            break;
        }
        out.push(c);
        *i += 1;
    }
    out
}

/// Reads a bare term. `-` and `/` may continue a word but not start one; `.`
/// is kept only between word characters so `100..200` splits around `..`.
fn read_word(chars: &[char], i: &mut usize) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.get(*i) {
        let keep = match c {
            c if c.is_alphanumeric() => true,
            '_' | '*' | '-' | '/' => true,
            '.' => chars
                .get(*i + 1)
                .is_some_and(|next| next.is_alphanumeric() || *next == '_'),
            _ => false,
        };
        if !keep {
            break;
        }
        word.push(c);
        *i += 1;
    }
    word
}

fn classify_word(word: String) -> TokenKind {
    if is_date(&word) {
        TokenKind::Date(word)
    } else if is_number(&word) {
        TokenKind::Number(word)
    } else if word.contains('*') {
        TokenKind::Wildcard(word)
    } else {
        TokenKind::Word(word)
    }
}

/// `YYYY-MM-DD` or `YYYY-MM`
fn is_date(word: &str) -> bool {
    let bytes = word.as_bytes();
    let digits = |range: std::ops::Range<usize>| {
        bytes
            .get(range)
            .is_some_and(|b| b.iter().all(u8::is_ascii_digit))
    };
    match bytes.len() {
        7 => digits(0..4) && bytes[4] == b'-' && digits(5..7),
        10 => {
            digits(0..4) && bytes[4] == b'-' && digits(5..7) && bytes[7] == b'-' && digits(8..10)
        }
        _ => false,
    }
}

fn is_number(word: &str) -> bool {
    let mut parts = word.splitn(2, '.');
    let int = parts.next().unwrap_or_default();
    let frac = parts.next();
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}

fn read_quoted(chars: &[char], i: &mut usize) -> TokenKind {
    *i += 1; // skip opening quote
    let mut s = String::new();
    while *i < chars.len() {
        if chars[*i] == '\\' && *i + 1 < chars.len() {
            *i += 1;
            s.push(chars[*i]);
            *i += 1;
            continue;
        }
        if chars[*i] == '"' {
            *i += 1; // skip closing quote
            return TokenKind::Phrase(s);
        }
        s.push(chars[*i]);
        *i += 1;
    }
    TokenKind::Error("unterminated quoted phrase".to_string())
}

fn read_regex(chars: &[char], i: &mut usize) -> TokenKind {
    *i += 1; // skip opening slash
    let mut pattern = String::new();
    loop {
        match chars.get(*i) {
            None => return TokenKind::Error("unterminated regular expression".to_string()),
            Some('\\') if chars.get(*i + 1) == Some(&'/') => {
                pattern.push('/');
                *i += 2;
            }
            Some('\\') => {
                pattern.push('\\');
                if let Some(&next) = chars.get(*i + 1) {
                    pattern.push(next);
                }
                *i += 2;
            }
            Some('/') => {
                *i += 1;
                break;
            }
            Some(&c) => {
                pattern.push(c);
                *i += 1;
            }
        }
    }
    *i = (*i).min(chars.len());
    let flags = read_while(chars, i, |c| c.is_ascii_alphabetic());
    TokenKind::Regex { pattern, flags }
}
