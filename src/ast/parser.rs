use std::fmt::{self, Display};

use crate::ast::lexer::{self, LexError, Number, Tok, Token};
use crate::ast::{
    BinaryOperator, CallArg, CompTrailer, DollarFlags, Expr, ExprData,
    ImportName, Param, SeqItem, SeqKind, Stmt, StmtData, UnaryOperator,
};
use crate::serialization::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Lex(LexError),
    Invalid(Tok),
}

impl From<LexError> for ParseError {
    fn from(error: LexError) -> Self {
        ParseError::Lex(error)
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(error) => write!(f, "{error}"),
            ParseError::Invalid(tok) => write!(f, "invalid syntax at {tok}"),
        }
    }
}

/// Parses a whole program into a `Block` statement.
pub fn parse(source: &str) -> Result<Stmt, ParseError> {
    let toks = lexer::tokenize(source)?;
    Parser { toks, pos: 0 }.program()
}

// Binding powers, lowest to highest. `LOWPREC` from the grammar has no
// explicit level here: the dollar parser consumes the longest dotted chain,
// which is the resolution that precedence level existed to force.
const PREC_LAMBDA: u8 = 2;
const PREC_TERNARY: u8 = 3;
const PREC_COMP: u8 = 4;
const PREC_OR: u8 = 5;
const PREC_AND: u8 = 6;
const PREC_NOT: u8 = 7;
const PREC_CMP: u8 = 8;
const PREC_APPEND: u8 = 9;
const PREC_SUM: u8 = 10;
const PREC_PRODUCT: u8 = 11;
const PREC_UMINUS: u8 = 12;
const PREC_POW: u8 = 13;
const PREC_POSTFIX: u8 = 14;
const PREC_ANY: u8 = 0;

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos).map(|t| &t.kind)
    }

    fn peek2(&self) -> Option<&Token> {
        self.toks.get(self.pos + 1).map(|t| &t.kind)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos.min(self.toks.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &Token) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &Token) -> Result<Tok, ParseError> {
        if self.peek() == Some(kind) {
            Ok(self.advance().unwrap_or_else(|| Tok {
                kind: kind.clone(),
                text: String::new(),
                line: 1,
            }))
        } else {
            Err(self.invalid())
        }
    }

    fn expect_name(&mut self) -> Result<(String, usize), ParseError> {
        match self.peek() {
            Some(Token::Name(_)) => {
                let tok = self.advance().ok_or_else(|| self.invalid_eof())?;
                match tok.kind {
                    Token::Name(name) => Ok((name, tok.line)),
                    _ => Err(ParseError::Invalid(tok)),
                }
            }
            _ => Err(self.invalid()),
        }
    }

    /// The standard failure: report the token the parser is stuck on.
    fn invalid(&self) -> ParseError {
        let idx = self.pos.min(self.toks.len().saturating_sub(1));
        match self.toks.get(idx) {
            Some(tok) => ParseError::Invalid(tok.clone()),
            None => self.invalid_eof(),
        }
    }

    fn invalid_eof(&self) -> ParseError {
        ParseError::Invalid(Tok {
            kind: Token::Newline,
            text: String::new(),
            line: 1,
        })
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    // ---- statements ----

    fn program(&mut self) -> Result<Stmt, ParseError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !self.at_end() {
            stmts.push(self.stmt()?);
            self.skip_newlines();
        }
        Ok(StmtData::Block(stmts).at(1))
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(Token::If) => self.if_stmt(),
            Some(Token::While) => self.while_stmt(),
            Some(Token::For) => self.for_stmt(),
            Some(Token::Def) => self.def_stmt(),
            Some(Token::Import) => self.import_stmt(),
            Some(Token::From) => self.from_import_stmt(),
            _ => {
                let stmt = self.simple_stmt()?;
                self.expect(&Token::Newline)?;
                Ok(stmt)
            }
        }
    }

    /// `: NEWLINE INDENT stmts DEDENT`
    fn block(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.expect(&Token::Colon)?;
        self.expect(&Token::Newline)?;
        self.expect(&Token::Indent)?;
        let mut stmts = Vec::new();
        while self.peek() != Some(&Token::Dedent) {
            if self.at_end() {
                return Err(self.invalid());
            }
            stmts.push(self.stmt()?);
        }
        self.expect(&Token::Dedent)?;
        Ok(StmtData::Block(stmts).at(line))
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance(); // if / elif
        let cond = self.expr(PREC_ANY)?;
        let then_block = self.block()?;
        let else_block = match self.peek() {
            Some(Token::Elif) => self.if_stmt()?,
            Some(Token::Else) => {
                self.advance();
                self.block()?
            }
            _ => StmtData::Pass.at(line),
        };
        Ok(StmtData::If {
            cond,
            then_block: Box::new(then_block),
            else_block: Box::new(else_block),
        }
        .at(line))
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let cond = self.expr(PREC_ANY)?;
        let body = self.block()?;
        Ok(StmtData::While {
            cond,
            body: Box::new(body),
        }
        .at(line))
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let (name, _) = self.expect_name()?;
        self.expect(&Token::In)?;
        let iter = self.expr(PREC_ANY)?;
        let body = self.block()?;
        Ok(StmtData::For {
            name,
            iter,
            body: Box::new(body),
        }
        .at(line))
    }

    /// `def name(params):` sugars to `name = \\params -> block`.
    fn def_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let (name, _) = self.expect_name()?;
        self.expect(&Token::LeftParen)?;
        let params = self.params(&Token::RightParen)?;
        self.expect(&Token::RightParen)?;
        let body = self.block()?;
        let func = ExprData::Func(params, Box::new(body)).at(line);
        Ok(StmtData::Assign(name, func).at(line))
    }

    fn import_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let module = self.module_path()?;
        self.expect(&Token::Newline)?;
        Ok(StmtData::Import {
            module,
            names: None,
        }
        .at(line))
    }

    fn from_import_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let module = self.module_path()?;
        self.expect(&Token::Import)?;
        let mut names = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    names.push(ImportName::Star);
                }
                _ => {
                    let (name, _) = self.expect_name()?;
                    let alias = if self.eat(&Token::As) {
                        self.expect_name()?.0
                    } else {
                        name.clone()
                    };
                    names.push(ImportName::Named { name, alias });
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::Newline)?;
        Ok(StmtData::Import {
            module,
            names: Some(names),
        }
        .at(line))
    }

    /// Dotted module path; leading dots are kept so the compiler can reject
    /// relative imports.
    fn module_path(&mut self) -> Result<String, ParseError> {
        let mut path = String::new();
        while self.eat(&Token::Dot) {
            path.push('.');
        }
        let (first, _) = self.expect_name()?;
        path.push_str(&first);
        while self.peek() == Some(&Token::Dot) {
            self.advance();
            let (part, _) = self.expect_name()?;
            path.push('.');
            path.push_str(&part);
        }
        Ok(path)
    }

    fn simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Pass) => {
                self.advance();
                Ok(StmtData::Pass.at(line))
            }
            Some(Token::Break) => {
                self.advance();
                Ok(StmtData::Break.at(line))
            }
            Some(Token::Continue) => {
                self.advance();
                Ok(StmtData::Continue.at(line))
            }
            Some(Token::Return) => {
                self.advance();
                let expr = self.expr(PREC_ANY)?;
                Ok(StmtData::Return(expr).at(line))
            }
            Some(Token::Assert) => {
                self.advance();
                let expr = self.expr(PREC_ANY)?;
                Ok(StmtData::Assert(expr).at(line))
            }
            Some(Token::Dollar) => self.dollar_stmt(line),
            Some(Token::Name(_)) => match self.peek2() {
                Some(Token::Assign) => {
                    let (name, _) = self.expect_name()?;
                    self.advance(); // =
                    let expr = self.expr(PREC_ANY)?;
                    Ok(StmtData::Assign(name, expr).at(line))
                }
                Some(kind) if augmented_op(kind).is_some() => {
                    let (name, name_line) = self.expect_name()?;
                    let op = match self.advance().map(|t| t.kind) {
                        Some(ref kind) => match augmented_op(kind) {
                            Some(op) => op,
                            None => return Err(self.invalid()),
                        },
                        None => return Err(self.invalid()),
                    };
                    let expr = self.expr(PREC_ANY)?;
                    let left = ExprData::Name(name.clone()).at(name_line);
                    let value =
                        ExprData::Binop(op, Box::new(left), Box::new(expr))
                            .at(line);
                    Ok(StmtData::Assign(name, value).at(line))
                }
                _ => self.expr_stmt(line),
            },
            _ => self.expr_stmt(line),
        }
    }

    fn expr_stmt(&mut self, line: usize) -> Result<Stmt, ParseError> {
        let expr = self.expr(PREC_ANY)?;
        Ok(StmtData::Expr(expr).at(line))
    }

    /// A statement starting with `$`: either a keyed-store write (plain or
    /// augmented) or an expression statement that happens to read `$...`.
    fn dollar_stmt(&mut self, line: usize) -> Result<Stmt, ParseError> {
        let start = self.pos;
        self.advance(); // $
        let parts = self.dollar_parts()?;
        let flags = self.dollar_flags()?;
        match self.peek() {
            Some(Token::Assign) => {
                self.advance();
                let value = self.expr(PREC_ANY)?;
                Ok(StmtData::DollarSet {
                    parts,
                    value,
                    flags,
                }
                .at(line))
            }
            Some(kind) if augmented_op(kind).is_some() => {
                let op = match augmented_op(kind) {
                    Some(op) => op,
                    None => return Err(self.invalid()),
                };
                self.advance();
                let rhs = self.expr(PREC_ANY)?;
                let old_value = ExprData::DollarName(
                    parts.clone(),
                    DollarFlags::PARTIAL,
                )
                .at(line);
                let value = ExprData::Binop(
                    op,
                    Box::new(old_value),
                    Box::new(rhs),
                )
                .at(line);
                Ok(StmtData::DollarSet {
                    parts,
                    value,
                    flags: flags.union(DollarFlags::MODIFICATION),
                }
                .at(line))
            }
            _ => {
                // not a write: re-parse as an expression statement
                self.pos = start;
                self.expr_stmt(line)
            }
        }
    }

    /// `name(.name | [expr])*` — greedily takes the longest chain, which is
    /// the longest-dollar-scope resolution of `$a.b.c`.
    fn dollar_parts(&mut self) -> Result<Vec<Expr>, ParseError> {
        let (first, line) = self.expect_name()?;
        let mut parts = vec![ExprData::Literal(Value::Str(first)).at(line)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let (name, line) = self.expect_name()?;
                    parts.push(ExprData::Literal(Value::Str(name)).at(line));
                }
                Some(Token::LeftBracket) => {
                    self.advance();
                    let expr = self.expr(PREC_ANY)?;
                    self.expect(&Token::RightBracket)?;
                    parts.push(expr);
                }
                _ => break,
            }
        }
        Ok(parts)
    }

    fn dollar_flags(&mut self) -> Result<DollarFlags, ParseError> {
        let mut flags = DollarFlags::default();
        while self.eat(&Token::At) {
            let (name, _) = self.expect_name()?;
            match DollarFlags::from_name(&name) {
                Some(flag) => flags = flags.union(flag),
                None => return Err(self.invalid()),
            }
        }
        Ok(flags)
    }

    // ---- expressions ----

    fn expr(&mut self, min: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.prefix()?;
        loop {
            let Some(kind) = self.peek() else { break };
            match kind {
                Token::Dot if PREC_POSTFIX >= min => {
                    let line = self.line();
                    self.advance();
                    let (name, _) = self.expect_name()?;
                    lhs = ExprData::Getattr(Box::new(lhs), name).at(line);
                }
                Token::LeftParen if PREC_POSTFIX >= min => {
                    let line = self.line();
                    self.advance();
                    let args = self.call_args()?;
                    self.expect(&Token::RightParen)?;
                    lhs = ExprData::Call(Box::new(lhs), args).at(line);
                }
                Token::LeftBracket if PREC_POSTFIX >= min => {
                    let line = self.line();
                    self.advance();
                    let index = self.expr(PREC_ANY)?;
                    self.expect(&Token::RightBracket)?;
                    lhs = ExprData::Binop(
                        BinaryOperator::Index,
                        Box::new(lhs),
                        Box::new(index),
                    )
                    .at(line);
                }
                Token::Pow if PREC_POW >= min => {
                    lhs = self.binop(lhs, BinaryOperator::Pow, PREC_POW)?;
                }
                Token::Star | Token::Slash | Token::FloorDiv
                | Token::Percent
                    if PREC_PRODUCT >= min =>
                {
                    let op = match kind {
                        Token::Star => BinaryOperator::Mul,
                        Token::Slash => BinaryOperator::Div,
                        Token::FloorDiv => BinaryOperator::FloorDiv,
                        _ => BinaryOperator::Mod,
                    };
                    lhs = self.binop(lhs, op, PREC_PRODUCT + 1)?;
                }
                Token::Plus | Token::Minus if PREC_SUM >= min => {
                    let op = if kind == &Token::Plus {
                        BinaryOperator::Add
                    } else {
                        BinaryOperator::Sub
                    };
                    lhs = self.binop(lhs, op, PREC_SUM + 1)?;
                }
                Token::ColonPlus if PREC_APPEND >= min => {
                    lhs = self.binop(
                        lhs,
                        BinaryOperator::Append,
                        PREC_APPEND + 1,
                    )?;
                }
                Token::Le | Token::Ge | Token::Lt | Token::Gt
                | Token::EqEq | Token::NotEq
                    if PREC_CMP >= min =>
                {
                    let op = match kind {
                        Token::Le => BinaryOperator::Le,
                        Token::Ge => BinaryOperator::Ge,
                        Token::Lt => BinaryOperator::Lt,
                        Token::Gt => BinaryOperator::Gt,
                        Token::EqEq => BinaryOperator::Eq,
                        _ => BinaryOperator::Ne,
                    };
                    lhs = self.binop(lhs, op, PREC_CMP + 1)?;
                    // comparisons are non-associative
                    if matches!(
                        self.peek(),
                        Some(
                            Token::Le
                                | Token::Ge
                                | Token::Lt
                                | Token::Gt
                                | Token::EqEq
                                | Token::NotEq
                        )
                    ) {
                        return Err(self.invalid());
                    }
                }
                Token::And if PREC_AND >= min => {
                    lhs =
                        self.binop(lhs, BinaryOperator::And, PREC_AND + 1)?;
                }
                Token::Or if PREC_OR >= min => {
                    lhs = self.binop(lhs, BinaryOperator::Or, PREC_OR + 1)?;
                }
                Token::For if PREC_COMP >= min => {
                    let line = self.line();
                    self.advance();
                    let (name, _) = self.expect_name()?;
                    self.expect(&Token::In)?;
                    let iter = self.expr(PREC_COMP + 1)?;
                    lhs = push_comp_trailer(
                        lhs,
                        CompTrailer::For { name, iter },
                        line,
                    );
                }
                Token::If
                    if PREC_COMP >= min
                        && matches!(lhs.data, ExprData::Comp { .. }) =>
                {
                    // a comprehension `if` filter binds tighter than the
                    // ternary, so it wins once a `for` trailer exists
                    let line = self.line();
                    self.advance();
                    let cond = self.expr(PREC_COMP + 1)?;
                    lhs = push_comp_trailer(lhs, CompTrailer::If(cond), line);
                }
                Token::If if PREC_TERNARY >= min => {
                    let line = self.line();
                    self.advance();
                    let cond = self.expr(PREC_TERNARY)?;
                    self.expect(&Token::Else)?;
                    let else_value = self.expr(PREC_TERNARY)?;
                    lhs = ExprData::IfExpr {
                        cond: Box::new(cond),
                        then_value: Box::new(lhs),
                        else_value: Box::new(else_value),
                    }
                    .at(line);
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn binop(
        &mut self,
        lhs: Expr,
        op: BinaryOperator,
        rhs_min: u8,
    ) -> Result<Expr, ParseError> {
        let line = self.line();
        self.advance();
        let rhs = self.expr(rhs_min)?;
        Ok(ExprData::Binop(op, Box::new(lhs), Box::new(rhs)).at(line))
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let operand = self.expr(PREC_UMINUS)?;
                Ok(ExprData::Monop(UnaryOperator::Neg, Box::new(operand))
                    .at(line))
            }
            Some(Token::Not) => {
                self.advance();
                let operand = self.expr(PREC_NOT)?;
                Ok(ExprData::Monop(UnaryOperator::Not, Box::new(operand))
                    .at(line))
            }
            Some(Token::Lambda) => {
                self.advance();
                let params = self.params(&Token::Arrow)?;
                self.expect(&Token::Arrow)?;
                let body = self.expr(PREC_LAMBDA)?;
                let body_line = body.line;
                Ok(ExprData::Func(
                    params,
                    Box::new(StmtData::Return(body).at(body_line)),
                )
                .at(line))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Number(_)) => {
                let tok = self.advance().ok_or_else(|| self.invalid_eof())?;
                let value = match tok.kind {
                    Token::Number(Number::Int(v)) => Value::Int(v),
                    Token::Number(Number::Float(v)) => Value::from(v),
                    _ => return Err(ParseError::Invalid(tok)),
                };
                Ok(ExprData::Literal(value).at(line))
            }
            Some(Token::Str(_)) => {
                let tok = self.advance().ok_or_else(|| self.invalid_eof())?;
                match tok.kind {
                    Token::Str(value) => {
                        Ok(ExprData::Literal(Value::Str(value)).at(line))
                    }
                    _ => Err(ParseError::Invalid(tok)),
                }
            }
            Some(Token::True) => {
                self.advance();
                Ok(ExprData::Literal(Value::Bool(true)).at(line))
            }
            Some(Token::False) => {
                self.advance();
                Ok(ExprData::Literal(Value::Bool(false)).at(line))
            }
            Some(Token::Name(_)) => {
                let (name, _) = self.expect_name()?;
                Ok(ExprData::Name(name).at(line))
            }
            Some(Token::LeftParen) => {
                self.advance();
                let expr = self.expr(PREC_ANY)?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }
            Some(Token::LeftBracket) => {
                self.advance();
                let items = self.seq_items(&Token::RightBracket)?;
                self.expect(&Token::RightBracket)?;
                Ok(ExprData::SequenceLiteral(SeqKind::List, items).at(line))
            }
            Some(Token::LeftCurly) => {
                self.advance();
                let items = self.seq_items(&Token::RightCurly)?;
                self.expect(&Token::RightCurly)?;
                Ok(ExprData::SequenceLiteral(SeqKind::Braces, items).at(line))
            }
            Some(Token::Dollar) => {
                self.advance();
                let parts = self.dollar_parts()?;
                let flags = self.dollar_flags()?;
                Ok(ExprData::DollarName(parts, flags).at(line))
            }
            _ => Err(self.invalid()),
        }
    }

    fn call_args(&mut self) -> Result<Vec<CallArg>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RightParen) {
            return Ok(args);
        }
        loop {
            // `name=expr` is a named argument, `name ==` is a comparison
            if let (Some(Token::Name(_)), Some(Token::Assign)) =
                (self.peek(), self.peek2())
            {
                let (name, _) = self.expect_name()?;
                self.advance(); // =
                let value = self.expr(PREC_ANY)?;
                args.push(CallArg::Named(name, value));
            } else {
                args.push(CallArg::Positional(self.expr(PREC_ANY)?));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn params(&mut self, terminator: &Token) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.peek() == Some(terminator) {
            return Ok(params);
        }
        loop {
            let (name, _) = self.expect_name()?;
            let default = if self.eat(&Token::Assign) {
                Some(self.expr(PREC_ANY)?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    /// Items of a `[...]` or `{...}` literal: expressions or `key: value`
    /// pairs, comma separated. A pair whose value parses as a comprehension
    /// is rebuilt into a pair-headed comprehension (`{k: v for n in e}`).
    fn seq_items(
        &mut self,
        terminator: &Token,
    ) -> Result<Vec<SeqItem>, ParseError> {
        let mut items = Vec::new();
        if self.peek() == Some(terminator) {
            return Ok(items);
        }
        loop {
            let expr = self.expr(PREC_ANY)?;
            if self.eat(&Token::Colon) {
                let value = self.expr(PREC_ANY)?;
                let value_line = value.line;
                match value.data {
                    ExprData::Comp { head, trailers } => {
                        let head = match *head {
                            SeqItem::Item(head_value) => {
                                SeqItem::Pair(expr, head_value)
                            }
                            pair => pair,
                        };
                        items.push(SeqItem::Item(
                            ExprData::Comp {
                                head: Box::new(head),
                                trailers,
                            }
                            .at(value_line),
                        ));
                    }
                    data => items.push(SeqItem::Pair(
                        expr,
                        Expr {
                            data,
                            line: value_line,
                        },
                    )),
                }
            } else {
                items.push(SeqItem::Item(expr));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }
}

fn augmented_op(kind: &Token) -> Option<BinaryOperator> {
    match kind {
        Token::PlusAssign => Some(BinaryOperator::Add),
        Token::MinusAssign => Some(BinaryOperator::Sub),
        Token::StarAssign => Some(BinaryOperator::Mul),
        Token::SlashAssign => Some(BinaryOperator::Div),
        Token::FloorDivAssign => Some(BinaryOperator::FloorDiv),
        Token::PercentAssign => Some(BinaryOperator::Mod),
        Token::PowAssign => Some(BinaryOperator::Pow),
        _ => None,
    }
}

/// Attaches a trailer to an existing comprehension, or starts one with the
/// current expression as head.
fn push_comp_trailer(lhs: Expr, trailer: CompTrailer, line: usize) -> Expr {
    match lhs.data {
        ExprData::Comp { head, mut trailers } => {
            trailers.push(trailer);
            ExprData::Comp { head, trailers }.at(lhs.line)
        }
        _ => ExprData::Comp {
            head: Box::new(SeqItem::Item(lhs)),
            trailers: vec![trailer],
        }
        .at(line),
    }
}
