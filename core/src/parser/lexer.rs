use core::fmt;

use logos::{FilterResult, Lexer, Logos};

use crate::parser::error::{LexError, LexErrorKind};
use crate::parser::syntax::{FileId, LineIndex, Span};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Keywords.
    #[token("int")]
    KwInt,
    #[token("float")]
    KwFloat,
    #[token("string")]
    KwString,
    #[token("object")]
    KwObject,
    #[token("vector")]
    KwVector,
    #[token("void")]
    KwVoid,
    #[token("action")]
    KwAction,
    #[token("effect")]
    KwEffect,
    #[token("event")]
    KwEvent,
    #[token("location")]
    KwLocation,
    #[token("talent")]
    KwTalent,
    #[token("struct")]
    KwStruct,
    #[token("const")]
    KwConst,
    #[token("if")]
    KwIf,
    #[token("else")]
    KwElse,
    #[token("while")]
    KwWhile,
    #[token("do")]
    KwDo,
    #[token("for")]
    KwFor,
    #[token("switch")]
    KwSwitch,
    #[token("case")]
    KwCase,
    #[token("default")]
    KwDefault,
    #[token("break")]
    KwBreak,
    #[token("continue")]
    KwContinue,
    #[token("return")]
    KwReturn,
    #[token("#include")]
    Include,

    // Literals.
    #[regex(r"[0-9]+", decimal)]
    #[regex(r"0[xX][0-9a-fA-F]+", hexadecimal)]
    #[regex(r"'([^'\\\n]|\\.)'", character)]
    IntLit(i32),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fF]?", float)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fF]?", float)]
    #[regex(r"[0-9]+([eE][+-]?[0-9]+)?[fF]", float)]
    FloatLit(f32),

    #[regex(r#""([^"\\\n]|\\.)*""#, string)]
    StrLit(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Never produced: the callback skips the comment or fails.
    #[token("/*", block_comment)]
    BlockComment,

    // Delimiters.
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,

    // Assignment.
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,
    #[token(">>>=")]
    UShrAssign,

    // Operators.
    #[token("||")]
    OrOr,
    #[token("&&")]
    AndAnd,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("&")]
    Amp,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token(">>>")]
    UShr,
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
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
}

fn decimal(lex: &mut Lexer<Token>) -> Result<i32, LexErrorKind> {
    lex.slice()
        .parse::<i32>()
        .map_err(|_| LexErrorKind::MalformedNumber)
}

/// Hex literals may use all 32 bits, so `0xFFFFFFFF` is `-1`.
fn hexadecimal(lex: &mut Lexer<Token>) -> Result<i32, LexErrorKind> {
    u32::from_str_radix(&lex.slice()[2..], 16)
        .map(|v| v as i32)
        .map_err(|_| LexErrorKind::MalformedNumber)
}

fn float(lex: &mut Lexer<Token>) -> Result<f32, LexErrorKind> {
    lex.slice()
        .trim_end_matches(['f', 'F'])
        .parse::<f32>()
        .map_err(|_| LexErrorKind::MalformedNumber)
}

fn character(lex: &mut Lexer<Token>) -> Result<i32, LexErrorKind> {
    let slice = lex.slice();
    let text = unescape(&slice[1..slice.len() - 1])?;
    Ok(text.chars().next().map_or(0, |c| c as i32))
}

fn string(lex: &mut Lexer<Token>) -> Result<String, LexErrorKind> {
    let slice = lex.slice();
    unescape(&slice[1..slice.len() - 1])
}

fn block_comment(lex: &mut Lexer<Token>) -> FilterResult<(), LexErrorKind> {
    let rest = lex.remainder();
    match rest.find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(rest.len());
            FilterResult::Error(LexErrorKind::UnterminatedComment)
        }
    }
}

fn unescape(body: &str) -> Result<String, LexErrorKind> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        let c = if c == '\\' {
            match chars.next() {
                Some('n') => '\n',
                Some('t') => '\t',
                Some('r') => '\r',
                Some('"') => '"',
                Some('\'') => '\'',
                Some('\\') => '\\',
                Some(other) => return Err(LexErrorKind::InvalidEscape(other)),
                None => return Err(LexErrorKind::UnterminatedString),
            }
        } else {
            c
        };
        if c as u32 > 0xFF {
            return Err(LexErrorKind::NonLatin1(c));
        }
        out.push(c);
    }
    Ok(out)
}

impl Token {
    /// Short human readable form used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::IntLit(v) => format!("integer {}", v),
            Token::FloatLit(v) => format!("float {}", v),
            Token::StrLit(s) => format!("string {:?}", s),
            Token::Ident(name) => format!("identifier '{}'", name),
            other => format!("'{}'", other),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::KwInt => "int",
            Token::KwFloat => "float",
            Token::KwString => "string",
            Token::KwObject => "object",
            Token::KwVector => "vector",
            Token::KwVoid => "void",
            Token::KwAction => "action",
            Token::KwEffect => "effect",
            Token::KwEvent => "event",
            Token::KwLocation => "location",
            Token::KwTalent => "talent",
            Token::KwStruct => "struct",
            Token::KwConst => "const",
            Token::KwIf => "if",
            Token::KwElse => "else",
            Token::KwWhile => "while",
            Token::KwDo => "do",
            Token::KwFor => "for",
            Token::KwSwitch => "switch",
            Token::KwCase => "case",
            Token::KwDefault => "default",
            Token::KwBreak => "break",
            Token::KwContinue => "continue",
            Token::KwReturn => "return",
            Token::Include => "#include",
            Token::IntLit(v) => return write!(f, "{}", v),
            Token::FloatLit(v) => return write!(f, "{:?}", v),
            Token::StrLit(s) => return write!(f, "{:?}", s),
            Token::Ident(name) => return f.write_str(name),
            Token::BlockComment => "/*",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semicolon => ";",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Colon => ":",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::AmpAssign => "&=",
            Token::PipeAssign => "|=",
            Token::CaretAssign => "^=",
            Token::ShlAssign => "<<=",
            Token::ShrAssign => ">>=",
            Token::UShrAssign => ">>>=",
            Token::OrOr => "||",
            Token::AndAnd => "&&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Amp => "&",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::UShr => ">>>",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::Tilde => "~",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
        };
        f.write_str(text)
    }
}

/// A token with its position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Splits `source` into tokens, stopping at the first malformed one.
///
/// The result is a plain vector, so the sequence can be walked any number
/// of times.
pub fn tokenize(source: &str, file: FileId) -> Result<Vec<SpannedToken>, LexError> {
    let lines = LineIndex::new(source);
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let (line, column) = lines.position(range.start as u32);
        let span = Span::new(file, range.start as u32, range.end as u32, line, column);
        match result {
            Ok(token) => tokens.push(SpannedToken { token, span }),
            Err(kind) => {
                let kind = match kind {
                    LexErrorKind::UnexpectedCharacter if lexer.slice().starts_with('"') => {
                        LexErrorKind::UnterminatedString
                    }
                    LexErrorKind::UnexpectedCharacter => {
                        match lexer.slice().chars().next() {
                            Some(c) if c as u32 > 0xFF => LexErrorKind::NonLatin1(c),
                            _ => kind,
                        }
                    }
                    other => other,
                };
                return Err(LexError { kind, span });
            }
        }
    }

    tracing::trace!(count = tokens.len(), "Tokenized source");
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source, FileId(0))
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    fn error(source: &str) -> LexError {
        tokenize(source, FileId(0)).unwrap_err()
    }

    #[test]
    fn test_declaration() {
        assert_eq!(
            kinds("int nValue = 0x10; // trailing"),
            vec![
                Token::KwInt,
                Token::Ident("nValue".into()),
                Token::Assign,
                Token::IntLit(16),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 1.5 2.f .25 3f 1e2f 0xFFFFFFFF 'a'"),
            vec![
                Token::IntLit(1),
                Token::FloatLit(1.5),
                Token::FloatLit(2.0),
                Token::FloatLit(0.25),
                Token::FloatLit(3.0),
                Token::FloatLit(100.0),
                Token::IntLit(-1),
                Token::IntLit(97),
            ]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            kinds("a >>>= b >> c >= d ++ --"),
            vec![
                Token::Ident("a".into()),
                Token::UShrAssign,
                Token::Ident("b".into()),
                Token::Shr,
                Token::Ident("c".into()),
                Token::Ge,
                Token::Ident("d".into()),
                Token::PlusPlus,
                Token::MinusMinus,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\n\"b\"\\""#),
            vec![Token::StrLit("a\n\"b\"\\".into())]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("/* block\n comment */ #include \"k_inc\""),
            vec![Token::Include, Token::StrLit("k_inc".into())]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("void\n  main", FileId(0)).unwrap();
        assert_eq!((tokens[1].span.line, tokens[1].span.column), (2, 3));
        assert_eq!(tokens[1].span.range(), 7..11);
    }

    #[test]
    fn test_unterminated_string() {
        let err = error("string s = \"oops;\nint x;");
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!((err.span.line, err.span.column), (1, 12));
    }

    #[test]
    fn test_unterminated_comment() {
        let err = error("int x; /* never closed");
        assert_eq!(err.kind, LexErrorKind::UnterminatedComment);
        assert_eq!(err.span.start, 7);
    }

    #[test]
    fn test_block_comments_between_tokens() {
        assert_eq!(
            kinds("/* c */ int/**/x /* a * b / c */;"),
            vec![Token::KwInt, Token::Ident("x".into()), Token::Semicolon]
        );
    }

    #[test]
    fn test_number_overflow() {
        assert_eq!(error("int x = 99999999999;").kind, LexErrorKind::MalformedNumber);
    }

    #[test]
    fn test_invalid_escape_and_encoding() {
        assert_eq!(error(r#""\q""#).kind, LexErrorKind::InvalidEscape('q'));
        assert_eq!(error("\"snow ☃\"").kind, LexErrorKind::NonLatin1('☃'));
    }

    #[test]
    fn test_unexpected_character() {
        assert_eq!(error("int x = $;").kind, LexErrorKind::UnexpectedCharacter);
    }
}
