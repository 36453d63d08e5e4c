pub mod lexer;
pub mod parser;

use std::fmt::{self, Display, Write};

use crate::serialization::Value;

/// An expression together with the 1-based source line it started on.
/// Equality ignores the location so trees parsed from differently formatted
/// sources can be compared structurally.
#[derive(Debug, Clone)]
pub struct Expr {
    pub data: ExprData,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub data: StmtData,
    pub line: usize,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl PartialEq for Stmt {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl ExprData {
    pub fn at(self, line: usize) -> Expr {
        Expr { data: self, line }
    }
}

impl StmtData {
    pub fn at(self, line: usize) -> Stmt {
        Stmt { data: self, line }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Le,
    Ge,
    Lt,
    Gt,
    Eq,
    Ne,
    Append, // :+
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Index, // x[y]
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Le => "<=",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Gt => ">",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Append => ":+",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::FloorDiv => "//",
            BinaryOperator::Mod => "%",
            BinaryOperator::Pow => "**",
            BinaryOperator::Index => "[]",
        }
    }

    /// Operators the engine dispatches through the dedicated BINOP opcode,
    /// trying a reverse dispatch on the right operand for numeric kinds.
    pub fn is_reflected(&self) -> bool {
        !matches!(
            self,
            BinaryOperator::Or
                | BinaryOperator::And
                | BinaryOperator::Append
                | BinaryOperator::Index
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Le
                | BinaryOperator::Ge
                | BinaryOperator::Lt
                | BinaryOperator::Gt
                | BinaryOperator::Eq
                | BinaryOperator::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Not,
}

impl UnaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOperator::Neg => "-",
            UnaryOperator::Not => "not",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Positional(Expr),
    Named(String, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqKind {
    /// `[ ... ]`
    List,
    /// `{ ... }`, a set or a map depending on the items
    Braces,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeqItem {
    Item(Expr),
    Pair(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompTrailer {
    For { name: String, iter: Expr },
    If(Expr),
}

/// Flags attached to `$...$` reads and writes via `@name` markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DollarFlags {
    pub partial: bool,
    pub modification: bool,
    pub default: bool,
}

impl DollarFlags {
    pub const PARTIAL: DollarFlags = DollarFlags {
        partial: true,
        modification: false,
        default: false,
    };

    pub const MODIFICATION: DollarFlags = DollarFlags {
        partial: false,
        modification: true,
        default: false,
    };

    pub fn from_name(name: &str) -> Option<DollarFlags> {
        match name {
            "partial" => Some(DollarFlags::PARTIAL),
            "modification" => Some(DollarFlags::MODIFICATION),
            "default" => Some(DollarFlags {
                default: true,
                ..DollarFlags::default()
            }),
            _ => None,
        }
    }

    pub fn union(self, other: DollarFlags) -> DollarFlags {
        DollarFlags {
            partial: self.partial || other.partial,
            modification: self.modification || other.modification,
            default: self.default || other.default,
        }
    }

    /// Bit encoding for the `$?` read call.
    pub fn read_bits(&self) -> i32 {
        if self.partial { 1 } else { 0 }
    }

    /// Bit encoding for the `$=` write call.
    pub fn write_bits(&self) -> i32 {
        (if self.modification { 1 } else { 0 })
            | (if self.default { 2 } else { 0 })
    }
}

impl Display for DollarFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.partial {
            write!(f, "@partial")?;
        }
        if self.modification {
            write!(f, "@modification")?;
        }
        if self.default {
            write!(f, "@default")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprData {
    Literal(Value),
    Name(String),
    Getattr(Box<Expr>, String),
    Monop(UnaryOperator, Box<Expr>),
    Binop(BinaryOperator, Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<CallArg>),
    SequenceLiteral(SeqKind, Vec<SeqItem>),
    Func(Vec<Param>, Box<Stmt>),
    IfExpr {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    DollarName(Vec<Expr>, DollarFlags),
    Comp {
        head: Box<SeqItem>,
        trailers: Vec<CompTrailer>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportName {
    Star,
    Named { name: String, alias: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtData {
    Pass,
    Break,
    Continue,
    Return(Expr),
    Assert(Expr),
    Expr(Expr),
    Assign(String, Expr),
    DollarSet {
        parts: Vec<Expr>,
        value: Expr,
        flags: DollarFlags,
    },
    If {
        cond: Expr,
        then_block: Box<Stmt>,
        else_block: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        name: String,
        iter: Expr,
        body: Box<Stmt>,
    },
    Import {
        module: String,
        names: Option<Vec<ImportName>>,
    },
    Block(Vec<Stmt>),
}

/// Renders a parsed program back to source text. The output is fully
/// parenthesised and 4-space indented; re-parsing it yields the same tree.
pub fn pretty(program: &Stmt) -> String {
    let mut out = String::new();
    write_stmt(program, &mut out, 0);
    out
}

fn pad(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("    ");
    }
}

fn write_stmt(stmt: &Stmt, out: &mut String, level: usize) {
    match &stmt.data {
        StmtData::Block(stmts) => {
            for s in stmts {
                write_stmt(s, out, level);
            }
        }
        StmtData::Pass => {
            pad(out, level);
            out.push_str("pass\n");
        }
        StmtData::Break => {
            pad(out, level);
            out.push_str("break\n");
        }
        StmtData::Continue => {
            pad(out, level);
            out.push_str("continue\n");
        }
        StmtData::Return(expr) => {
            pad(out, level);
            let _ = writeln!(out, "return {expr}");
        }
        StmtData::Assert(expr) => {
            pad(out, level);
            let _ = writeln!(out, "assert {expr}");
        }
        StmtData::Expr(expr) => {
            pad(out, level);
            let _ = writeln!(out, "{expr}");
        }
        StmtData::Assign(name, expr) => {
            // `def` sugar produces a function with a block body; everything
            // else prints as a plain assignment.
            if let ExprData::Func(params, body) = &expr.data
                && matches!(body.data, StmtData::Block(_))
            {
                pad(out, level);
                let _ = write!(out, "def {name}(");
                write_params(params, out);
                out.push_str("):\n");
                write_block(body, out, level + 1);
            } else {
                pad(out, level);
                let _ = writeln!(out, "{name} = {expr}");
            }
        }
        StmtData::DollarSet {
            parts,
            value,
            flags,
        } => {
            pad(out, level);
            out.push('$');
            write_dollar_parts(parts, out);
            let _ = writeln!(out, "{flags} = {value}");
        }
        StmtData::If { .. } => write_if(stmt, out, level, false),
        StmtData::While { cond, body } => {
            pad(out, level);
            let _ = writeln!(out, "while {cond}:");
            write_block(body, out, level + 1);
        }
        StmtData::For { name, iter, body } => {
            pad(out, level);
            let _ = writeln!(out, "for {name} in {iter}:");
            write_block(body, out, level + 1);
        }
        StmtData::Import { module, names } => {
            pad(out, level);
            match names {
                None => {
                    let _ = writeln!(out, "import {module}");
                }
                Some(names) => {
                    let _ = write!(out, "from {module} import ");
                    for (i, name) in names.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        match name {
                            ImportName::Star => out.push('*'),
                            ImportName::Named { name, alias } => {
                                if name == alias {
                                    out.push_str(name);
                                } else {
                                    let _ = write!(out, "{name} as {alias}");
                                }
                            }
                        }
                    }
                    out.push('\n');
                }
            }
        }
    }
}

fn write_if(stmt: &Stmt, out: &mut String, level: usize, as_elif: bool) {
    let StmtData::If {
        cond,
        then_block,
        else_block,
    } = &stmt.data
    else {
        return;
    };
    pad(out, level);
    let keyword = if as_elif { "elif" } else { "if" };
    let _ = writeln!(out, "{keyword} {cond}:");
    write_block(then_block, out, level + 1);
    match &else_block.data {
        StmtData::Pass => {}
        StmtData::If { .. } => write_if(else_block, out, level, true),
        _ => {
            pad(out, level);
            out.push_str("else:\n");
            write_block(else_block, out, level + 1);
        }
    }
}

fn write_block(body: &Stmt, out: &mut String, level: usize) {
    match &body.data {
        StmtData::Block(stmts) if stmts.is_empty() => {
            pad(out, level);
            out.push_str("pass\n");
        }
        _ => write_stmt(body, out, level),
    }
}

fn write_params(params: &[Param], out: &mut String) {
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&param.name);
        if let Some(default) = &param.default {
            let _ = write!(out, "={default}");
        }
    }
}

fn write_dollar_parts(parts: &[Expr], out: &mut String) {
    for (i, part) in parts.iter().enumerate() {
        match &part.data {
            ExprData::Literal(Value::Str(name)) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(name);
            }
            _ => {
                let _ = write!(out, "[{part}]");
            }
        }
    }
}

/// Writes a comprehension without surrounding parentheses; used directly
/// inside sequence literals where the brackets already delimit it.
fn write_comp(head: &SeqItem, trailers: &[CompTrailer], out: &mut String) {
    match head {
        SeqItem::Item(expr) => {
            let _ = write!(out, "{expr}");
        }
        SeqItem::Pair(key, value) => {
            let _ = write!(out, "{key}: {value}");
        }
    }
    for trailer in trailers {
        match trailer {
            CompTrailer::For { name, iter } => {
                let _ = write!(out, " for {name} in {iter}");
            }
            CompTrailer::If(cond) => {
                let _ = write!(out, " if {cond}");
            }
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ExprData::Literal(value) => write!(f, "{value}"),
            ExprData::Name(name) => write!(f, "{name}"),
            ExprData::Getattr(expr, name) => write!(f, "{expr}.{name}"),
            ExprData::Monop(op, expr) => match op {
                UnaryOperator::Neg => write!(f, "(-{expr})"),
                UnaryOperator::Not => write!(f, "(not {expr})"),
            },
            ExprData::Binop(op, left, right) => match op {
                BinaryOperator::Index => write!(f, "({left}[{right}])"),
                _ => write!(f, "({left} {} {right})", op.symbol()),
            },
            ExprData::Call(func, args) => {
                write!(f, "({func}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match arg {
                        CallArg::Positional(expr) => write!(f, "{expr}")?,
                        CallArg::Named(name, expr) => {
                            write!(f, "{name}={expr}")?
                        }
                    }
                }
                write!(f, "))")
            }
            ExprData::SequenceLiteral(kind, items) => {
                let (open, close) = match kind {
                    SeqKind::List => ('[', ']'),
                    SeqKind::Braces => ('{', '}'),
                };
                write!(f, "{open}")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        SeqItem::Item(expr) => {
                            if let ExprData::Comp { head, trailers } =
                                &expr.data
                            {
                                let mut buf = String::new();
                                write_comp(head, trailers, &mut buf);
                                write!(f, "{buf}")?;
                            } else {
                                write!(f, "{expr}")?;
                            }
                        }
                        SeqItem::Pair(key, value) => {
                            write!(f, "{key}: {value}")?
                        }
                    }
                }
                write!(f, "{close}")
            }
            ExprData::Func(params, body) => {
                write!(f, "(\\\\")?;
                let mut buf = String::new();
                write_params(params, &mut buf);
                write!(f, "{buf} -> ")?;
                match &body.data {
                    StmtData::Return(expr) => write!(f, "{expr})"),
                    // unreachable from parsing: block bodies only occur
                    // under `def`, which prints at statement level
                    _ => write!(f, "none)"),
                }
            }
            ExprData::IfExpr {
                cond,
                then_value,
                else_value,
            } => {
                write!(f, "({then_value} if {cond} else {else_value})")
            }
            ExprData::DollarName(parts, flags) => {
                write!(f, "$")?;
                let mut buf = String::new();
                write_dollar_parts(parts, &mut buf);
                write!(f, "{buf}{flags}")
            }
            ExprData::Comp { head, trailers } => {
                let mut buf = String::new();
                write_comp(head, trailers, &mut buf);
                write!(f, "({buf})")
            }
        }
    }
}
