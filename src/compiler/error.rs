use std::fmt::{self, Display};

use crate::ast::lexer::LexError;
use crate::ast::parser::ParseError;
use crate::serialization::EncodeError;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    /// `break` or `continue` outside a loop.
    NoLoop { line: usize },
    /// A node shape the lowering has no translation for.
    UnsupportedNode { line: usize },
    /// Module paths may not start with a dot.
    RelativeImport { module: String, line: usize },
    /// Skip analysis: an instruction consumes more than any reaching stack
    /// holds.
    StackUnderflow { pos: usize },
    /// Skip analysis: no post-dominator qualifies as a skip point.
    NoSkip { pos: usize },
    Encode(EncodeError),
}

impl From<LexError> for CompileError {
    fn from(error: LexError) -> Self {
        CompileError::Lex(error)
    }
}

impl From<ParseError> for CompileError {
    fn from(error: ParseError) -> Self {
        match error {
            ParseError::Lex(error) => CompileError::Lex(error),
            other => CompileError::Parse(other),
        }
    }
}

impl From<EncodeError> for CompileError {
    fn from(error: EncodeError) -> Self {
        CompileError::Encode(error)
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(error) => write!(f, "{error}"),
            CompileError::Parse(error) => write!(f, "{error}"),
            CompileError::NoLoop { line } => {
                write!(f, "break/continue outside a loop on line {line}")
            }
            CompileError::UnsupportedNode { line } => {
                write!(f, "cannot compile node on line {line}")
            }
            CompileError::RelativeImport { module, line } => {
                write!(
                    f,
                    "relative import of {module} on line {line} is not \
                     supported"
                )
            }
            CompileError::StackUnderflow { pos } => {
                write!(f, "not enough on the stack at instruction {pos}")
            }
            CompileError::NoSkip { pos } => {
                write!(f, "could not find a skip position for instruction {pos}")
            }
            CompileError::Encode(error) => write!(f, "{error}"),
        }
    }
}
