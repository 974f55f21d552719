//! Expression lexer using logos.

use logos::Logos;

use super::error::EvalError;

/// A span in the source input (byte offsets).
pub type Span = std::ops::Range<usize>;

/// A token with its source span.
pub type SpannedToken = (Token, Span);

/// Expression tokens.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    // === Literals ===
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", lex_float)]
    Float(f64),

    /// Unsigned here; the parser folds a leading `-` so `i64::MIN` is writable.
    #[regex(r"[0-9]+", lex_int)]
    Int(u64),

    // Quotes are escaped by doubling them: 'it''s'
    #[regex(r"'([^']|'')*'", lex_single_quoted)]
    #[regex(r#""([^"]|"")*""#, lex_double_quoted)]
    Str(String),

    // === Keywords ===
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("in")]
    In,

    // === Names ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// `#this` and friends.
    #[regex(r"#[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Variable(String),

    // === Navigation ===
    #[token(".")]
    Dot,
    #[token("?.")]
    SafeDot,
    #[token(".?[")]
    Select,
    #[token(".![")]
    Project,
    #[token(".^[")]
    SelectFirst,
    #[token(".$[")]
    SelectLast,

    // === Operators (multi-char first) ===
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("?:")]
    Elvis,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Not,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // === Delimiters ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Float(n) => write!(f, "{n}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::In => write!(f, "in"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Variable(s) => write!(f, "#{s}"),
            Token::Dot => write!(f, "."),
            Token::SafeDot => write!(f, "?."),
            Token::Select => write!(f, ".?["),
            Token::Project => write!(f, ".!["),
            Token::SelectFirst => write!(f, ".^["),
            Token::SelectLast => write!(f, ".$["),
            Token::EqEq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Elvis => write!(f, "?:"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Not => write!(f, "!"),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn lex_int(lex: &mut logos::Lexer<Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

fn lex_float(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn unquote(raw: &str, quote: char) -> String {
    let inner = &raw[1..raw.len() - 1];
    let doubled = format!("{quote}{quote}");
    inner.replace(&doubled, &quote.to_string())
}

fn lex_single_quoted(lex: &mut logos::Lexer<Token>) -> String {
    unquote(lex.slice(), '\'')
}

fn lex_double_quoted(lex: &mut logos::Lexer<Token>) -> String {
    unquote(lex.slice(), '"')
}

/// Tokenize `input`, failing on the first unrecognised character.
pub fn lex(input: &str) -> Result<Vec<SpannedToken>, EvalError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(input);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                let fragment = input.get(span.clone()).unwrap_or("?");
                return Err(EvalError::syntax(
                    format!("unexpected input '{fragment}' at offset {}", span.start),
                    span.start,
                ));
            }
        }
    }

    Ok(tokens)
}
