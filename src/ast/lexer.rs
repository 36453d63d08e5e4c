use std::fmt::{self, Display};

use logos::{Lexer, Logos};

/// Numeric literal payload: no dot parses as an integer, otherwise a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i32),
    Float(f64),
}

fn parse_number(lex: &mut Lexer<Token>) -> Option<Number> {
    let slice = lex.slice();
    if slice.contains('.') {
        slice.parse().ok().map(Number::Float)
    } else {
        slice.parse().ok().map(Number::Int)
    }
}

fn decode_string_literal(lex: &mut Lexer<Token>) -> String {
    let raw = lex.slice();
    decode_escapes(&raw[1..raw.len() - 1])
}

fn name_string(lex: &mut Lexer<Token>) -> String {
    lex.slice().to_owned()
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[rustfmt::skip]
pub enum Token {
    // Operators & Separators
    #[token("(")] LeftParen,
    #[token(")")] RightParen,
    #[token("[")] LeftBracket,
    #[token("]")] RightBracket,
    #[token("{")] LeftCurly,
    #[token("}")] RightCurly,

    #[token("@")] At,
    #[token("$")] Dollar,
    #[token(".")] Dot,
    #[token(",")] Comma,
    #[token(":")] Colon,
    #[token(":+")] ColonPlus,
    #[token("->")] Arrow,
    #[token("\\\\")] Lambda,

    #[token("=")] Assign,
    #[token("==")] EqEq,
    #[token("!=")] NotEq,
    #[token("<=")] Le,
    #[token(">=")] Ge,
    #[token("<")] Lt,
    #[token(">")] Gt,

    #[token("+")] Plus,
    #[token("-")] Minus,
    #[token("*")] Star,
    #[token("**")] Pow,
    #[token("/")] Slash,
    #[token("//")] FloorDiv,
    #[token("%")] Percent,

    #[token("+=")] PlusAssign,
    #[token("-=")] MinusAssign,
    #[token("*=")] StarAssign,
    #[token("**=")] PowAssign,
    #[token("/=")] SlashAssign,
    #[token("//=")] FloorDivAssign,
    #[token("%=")] PercentAssign,

    // Keywords
    #[token("true")] True,
    #[token("false")] False,
    #[token("if")] If,
    #[token("else")] Else,
    #[token("elif")] Elif,
    #[token("for")] For,
    #[token("while")] While,
    #[token("in")] In,
    #[token("and")] And,
    #[token("or")] Or,
    #[token("not")] Not,
    #[token("def")] Def,
    #[token("return")] Return,
    #[token("break")] Break,
    #[token("continue")] Continue,
    #[token("pass")] Pass,
    #[token("import")] Import,
    #[token("from")] From,
    #[token("as")] As,
    #[token("assert")] Assert,

    // Literals
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", name_string)]
    Name(String),
    #[regex(r"[0-9]+(\.[0-9]+)?", parse_number)]
    Number(Number),
    #[regex(r#""([^"\\]|\\.)*""#, decode_string_literal)]
    Str(String),

    // Runs of spaces, newlines and #-comments merge into one token; the
    // indentation synthesis below consumes it.
    #[regex(r"([ \t\n]|#[^\n]*)+")]
    Whitespace,

    // Synthesized by `tokenize`, never matched directly.
    Newline,
    Indent,
    Dedent,
}

/// Decodes the escape set of string literals. Unknown escapes pass through
/// as a backslash followed by the character.
pub fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };
        match escape {
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            chars.next();
                            value = value * 8 + digit;
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' => push_hex_escape(&mut out, &mut chars, 'x', 2),
            'u' => push_hex_escape(&mut out, &mut chars, 'u', 4),
            'U' => push_hex_escape(&mut out, &mut chars, 'U', 8),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

fn push_hex_escape(
    out: &mut String,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    introducer: char,
    digits: usize,
) {
    let mut collected = String::new();
    let mut value: u32 = 0;
    while collected.len() < digits {
        match chars.peek().and_then(|c| c.to_digit(16)) {
            Some(digit) => {
                collected.push(chars.next().unwrap_or_default());
                value = value * 16 + digit;
            }
            None => break,
        }
    }
    if collected.len() == digits {
        out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
    } else {
        // too few digits: pass the escape through literally
        out.push('\\');
        out.push(introducer);
        out.push_str(&collected);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LexError {
    IllegalChar { character: char, line: usize },
    InconsistentIndent { width: usize, line: usize },
}

impl Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::IllegalChar { character, line } => {
                write!(f, "illegal character {character:?} on line {line}")
            }
            LexError::InconsistentIndent { width, line } => {
                write!(
                    f,
                    "indentation of width {width} on line {line} matches no \
                     enclosing block"
                )
            }
        }
    }
}

/// A lexed token: kind, literal text and the 1-based line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Tok {
    pub kind: Token,
    pub text: String,
    pub line: usize,
}

impl Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Token::Newline => write!(f, "newline (line {})", self.line),
            Token::Indent => write!(f, "indent (line {})", self.line),
            Token::Dedent => write!(f, "dedent (line {})", self.line),
            _ => write!(f, "{:?} (line {})", self.text, self.line),
        }
    }
}

/// Lexes `source` and synthesises NEWLINE/INDENT/DEDENT tokens from the
/// whitespace stream, maintaining a stack of indentation widths seeded with
/// zero. Plain inter-token whitespace disappears; each newline-carrying run
/// becomes one NEWLINE plus the indent adjustments implied by the text after
/// its final newline.
pub fn tokenize(source: &str) -> Result<Vec<Tok>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut toks: Vec<Tok> = Vec::new();
    let mut indent_stack: Vec<usize> = vec![0];
    let mut line = 1;

    while let Some(result) = lexer.next() {
        let slice = lexer.slice();
        let kind = match result {
            Ok(kind) => kind,
            Err(()) => {
                return Err(LexError::IllegalChar {
                    character: slice.chars().next().unwrap_or('\0'),
                    line,
                });
            }
        };
        if kind != Token::Whitespace {
            toks.push(Tok {
                kind,
                text: slice.to_owned(),
                line,
            });
            line += slice.matches('\n').count();
            continue;
        }
        let Some((before, indentation)) = slice.rsplit_once('\n') else {
            continue; // spaces only, no line break
        };
        if !toks.is_empty() {
            toks.push(Tok {
                kind: Token::Newline,
                text: "\n".to_owned(),
                line: line + before.matches('\n').count(),
            });
        }
        line += slice.matches('\n').count();
        if lexer.span().end >= source.len() {
            continue; // source exhausted, closing handled below
        }
        let width = indentation.len();
        let mut popped = false;
        while width < top(&indent_stack) {
            indent_stack.pop();
            popped = true;
            toks.push(Tok {
                kind: Token::Dedent,
                text: String::new(),
                line,
            });
        }
        if width > top(&indent_stack) {
            // a dedent must land exactly on an enclosing width
            if popped {
                return Err(LexError::InconsistentIndent { width, line });
            }
            indent_stack.push(width);
            toks.push(Tok {
                kind: Token::Indent,
                text: indentation.to_owned(),
                line,
            });
        }
    }

    while top(&indent_stack) > 0 {
        indent_stack.pop();
        toks.push(Tok {
            kind: Token::Dedent,
            text: String::new(),
            line,
        });
    }
    if toks.last().map(|t| &t.kind) != Some(&Token::Newline) {
        toks.push(Tok {
            kind: Token::Newline,
            text: String::new(),
            line,
        });
    }
    Ok(toks)
}

fn top(indent_stack: &[usize]) -> usize {
    *indent_stack.last().unwrap_or(&0)
}
