pub mod bytecode;
pub mod error;
pub mod skip;

use log::debug;

use crate::ast::parser;
use crate::ast::{
    CallArg, CompTrailer, Expr, ExprData, ImportName, Param, SeqItem,
    SeqKind, Stmt, StmtData, UnaryOperator,
};
use crate::compiler::bytecode::{
    Arg, Instr, Label, LabelMap, NO_STAR_INDEX, Node, Opcode, SkipTarget,
};
use crate::compiler::error::CompileError;
use crate::serialization::{self, EncodeError, Value};

/// Compilation configuration, created once per compiler call.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Run the skip-point dataflow pass over the linearized code before
    /// emission, planting a SETSKIP in front of every value-producing
    /// instruction.
    pub skip_analysis: bool,
}

/// Compiles source text into the two back-to-back module records (header and
/// body) consumed by the execution engine.
pub fn compile(
    source: &str,
    fname: &str,
    modname: &str,
    options: &CompileOptions,
) -> Result<Vec<u8>, CompileError> {
    let program = parser::parse(source)?;
    compile_ast(&program, fname, modname, options)?.to_bytes()
}

/// Compiles an already-parsed program, exposing the intermediate module for
/// inspection.
pub fn compile_ast(
    program: &Stmt,
    fname: &str,
    modname: &str,
    options: &CompileOptions,
) -> Result<CompiledModule, CompileError> {
    debug!("compiling module {modname} from {fname}");
    let mut compiler = Compiler::new(fname, modname);
    let mut code = Vec::new();
    compiler.stmt(program, &mut code)?;
    // module epilogue: return none, without a skip point
    let none = compiler.const_node(Value::None);
    code.push(Node::with(Opcode::RETURN, Arg::None, vec![none]));
    compiler.finish(code, options)
}

/// A constants-pool entry. Function entries hold the label of the function's
/// first instruction and are replaced by its byte position at serialisation
/// time.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Value(Value),
    FuncEntry(Label),
}

impl Const {
    pub fn to_value(&self, labels: &LabelMap) -> Result<Value, EncodeError> {
        match self {
            Const::Value(value) => Ok(value.clone()),
            Const::FuncEntry(label) => labels
                .get(label)
                .map(|pos| Value::Int(*pos as i32))
                .ok_or(EncodeError::Unsupported),
        }
    }
}

/// Conversion state for one module: the constants pool (append-only,
/// de-duplicated by value and concrete kind), the compiled function bodies,
/// the loop-label stack, the import list and the running stack-save counter
/// packed into skip arguments.
pub struct Compiler {
    consts: Vec<Const>,
    functions: Vec<Node>,
    loop_stack: Vec<(Label, Label)>,
    imports: Vec<String>,
    stack_save: u32,
    next_label: u32,
    fname: String,
    modname: String,
}

impl Compiler {
    pub fn new(fname: &str, modname: &str) -> Compiler {
        Compiler {
            consts: Vec::new(),
            functions: Vec::new(),
            loop_stack: Vec::new(),
            imports: Vec::new(),
            stack_save: 0,
            next_label: 0,
            fname: fname.to_owned(),
            modname: modname.to_owned(),
        }
    }

    pub fn label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Index of `value` in the constants pool, appending it when absent.
    /// Lookup requires equal value *and* equal concrete kind, so `1`, `1.0`
    /// and `true` occupy distinct slots.
    fn const_index(&mut self, value: Value) -> u32 {
        let candidate = Const::Value(value);
        match self.consts.iter().position(|c| c == &candidate) {
            Some(idx) => idx as u32,
            None => {
                self.consts.push(candidate);
                (self.consts.len() - 1) as u32
            }
        }
    }

    fn const_node(&mut self, value: Value) -> Node {
        let idx = self.const_index(value);
        Node::new(Opcode::CONST, Arg::Num(idx))
    }

    fn func_const_index(&mut self, label: Label) -> u32 {
        let candidate = Const::FuncEntry(label);
        match self.consts.iter().position(|c| c == &candidate) {
            Some(idx) => idx as u32,
            None => {
                self.consts.push(candidate);
                (self.consts.len() - 1) as u32
            }
        }
    }

    /// `GET` of a name constant.
    fn get_node(&mut self, name: &str) -> Node {
        let idx = self.const_index(Value::Str(name.to_owned()));
        Node::new(Opcode::GET, Arg::Num(idx))
    }

    fn add_function(&mut self, body: Node) -> Label {
        let label = self.label();
        self.functions.push(Node::seq(vec![Node::label(label), body]));
        label
    }

    fn setskip(&self, target: SkipTarget) -> Node {
        Node::new(
            Opcode::SETSKIP,
            Arg::Skip {
                target,
                save: self.stack_save,
            },
        )
    }

    // ---- expression lowering ----

    fn expr(&mut self, expr: &Expr) -> Result<Node, CompileError> {
        match &expr.data {
            ExprData::Literal(value) => Ok(self.const_node(value.clone())),
            ExprData::Name(name) => Ok(self.get_node(name)),
            ExprData::Getattr(obj, name) => {
                let obj = self.expr(obj)?;
                let name = self.const_node(Value::Str(name.clone()));
                Ok(Node::with(Opcode::GETATTR, Arg::None, vec![obj, name]))
            }
            ExprData::Monop(UnaryOperator::Not, operand) => {
                let not = self.get_node("not");
                let operand = self.expr(operand)?;
                Ok(Node::with(Opcode::CALL, Arg::None, vec![not, operand]))
            }
            ExprData::Monop(op, operand) => {
                // unary dispatch through a `u`-prefixed method
                let operand = self.expr(operand)?;
                let name =
                    self.const_node(Value::Str(format!("u{}", op.symbol())));
                let target = Node::with(
                    Opcode::GETATTR,
                    Arg::None,
                    vec![operand, name],
                );
                Ok(Node::with(Opcode::CALL, Arg::None, vec![target]))
            }
            ExprData::Binop(op, left, right) => {
                self.binop(*op, left, right)
            }
            ExprData::Call(func, args) => {
                let mut children = vec![self.expr(func)?];
                for arg in args {
                    match arg {
                        CallArg::Positional(value) => {
                            children.push(self.expr(value)?)
                        }
                        CallArg::Named(name, value) => {
                            let name_idx =
                                self.const_index(Value::Str(name.clone()));
                            let value = self.expr(value)?;
                            children.push(Node::with(
                                Opcode::KWARG,
                                Arg::Num(name_idx),
                                vec![value],
                            ));
                        }
                    }
                }
                Ok(Node::with(Opcode::CALL, Arg::None, children))
            }
            ExprData::SequenceLiteral(kind, items) => {
                self.sequence_literal(*kind, items, expr.line)
            }
            ExprData::Func(params, body) => {
                let mut nodes = Vec::new();
                self.stmt(body, &mut nodes)?;
                self.func_value(params, Node::seq(nodes))
            }
            ExprData::IfExpr {
                cond,
                then_value,
                else_value,
            } => {
                let else_label = self.label();
                let end_label = self.label();
                let cond = self.expr(cond)?;
                let then_value = self.expr(then_value)?;
                let else_value = self.expr(else_value)?;
                Ok(Node::seq(vec![
                    Node::with(
                        Opcode::JUMP_IFNOT,
                        Arg::Label(else_label),
                        vec![cond],
                    ),
                    then_value,
                    Node::new(Opcode::JUMP, Arg::Label(end_label)),
                    Node::label(else_label),
                    else_value,
                    Node::label(end_label),
                ]))
            }
            ExprData::DollarName(parts, flags) => {
                let get = self.get_node("$?");
                let parts = self.dollar_parts(parts)?;
                let flags =
                    self.const_node(Value::Int(flags.read_bits()));
                Ok(Node::with(
                    Opcode::CALL,
                    Arg::None,
                    vec![get, parts, flags],
                ))
            }
            ExprData::Comp { head, trailers } => {
                self.comp_value(head, trailers)
            }
        }
    }

    fn binop(
        &mut self,
        op: crate::ast::BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Node, CompileError> {
        use crate::ast::BinaryOperator;
        match op {
            // short-circuiting forms keep the left value on a jump
            BinaryOperator::And | BinaryOperator::Or => {
                let end = self.label();
                let jump_op = if op == BinaryOperator::And {
                    Opcode::JUMP_IFNOT_KEEP
                } else {
                    Opcode::JUMP_IF_KEEP
                };
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                Ok(Node::seq(vec![
                    Node::with(jump_op, Arg::Label(end), vec![left]),
                    Node::new(Opcode::DROP, Arg::Num(1)),
                    right,
                    Node::label(end),
                ]))
            }
            op if op.is_reflected() => {
                let op_idx =
                    self.const_index(Value::Str(op.symbol().to_owned()));
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                Ok(Node::with(
                    Opcode::BINOP,
                    Arg::Num(op_idx),
                    vec![left, right],
                ))
            }
            op => {
                // everything else dispatches as a method call on the left
                let left = self.expr(left)?;
                let name =
                    self.const_node(Value::Str(op.symbol().to_owned()));
                let target = Node::with(
                    Opcode::GETATTR,
                    Arg::None,
                    vec![left, name],
                );
                let right = self.expr(right)?;
                Ok(Node::with(
                    Opcode::CALL,
                    Arg::None,
                    vec![target, right],
                ))
            }
        }
    }

    fn sequence_literal(
        &mut self,
        kind: SeqKind,
        items: &[SeqItem],
        line: usize,
    ) -> Result<Node, CompileError> {
        // a lone comprehension becomes a synthesized function call
        if let [SeqItem::Item(item)] = items
            && let ExprData::Comp { head, trailers } = &item.data
        {
            let wrapper = match kind {
                SeqKind::List => None,
                SeqKind::Braces => {
                    Some(if matches!(**head, SeqItem::Pair(..)) {
                        "Dict"
                    } else {
                        "Set"
                    })
                }
            };
            let get = wrapper.map(|name| self.get_node(name));
            let call = self.comp_value(head, trailers)?;
            return Ok(match get {
                Some(get) => {
                    Node::with(Opcode::CALL, Arg::None, vec![get, call])
                }
                None => call,
            });
        }

        let is_dict = kind == SeqKind::Braces
            && (items.is_empty()
                || items.iter().all(|i| matches!(i, SeqItem::Pair(..))));
        let get = match kind {
            SeqKind::List => None,
            SeqKind::Braces => {
                Some(self.get_node(if is_dict { "Dict" } else { "Set" }))
            }
        };
        let mut children = Vec::with_capacity(items.len());
        for item in items {
            match item {
                SeqItem::Item(value) => children.push(self.expr(value)?),
                SeqItem::Pair(key, value) => {
                    if kind == SeqKind::List {
                        return Err(CompileError::UnsupportedNode { line });
                    }
                    let key = self.expr(key)?;
                    let value = self.expr(value)?;
                    children.push(Node::with(
                        Opcode::BUILDLIST,
                        Arg::Num(2),
                        vec![key, value],
                    ));
                }
            }
        }
        let list = Node::with(
            Opcode::BUILDLIST,
            Arg::Num(children.len() as u32),
            children,
        );
        Ok(match get {
            Some(get) => Node::with(Opcode::CALL, Arg::None, vec![get, list]),
            None => list,
        })
    }

    fn dollar_parts(
        &mut self,
        parts: &[Expr],
    ) -> Result<Node, CompileError> {
        let mut children = Vec::with_capacity(parts.len());
        for part in parts {
            children.push(self.expr(part)?);
        }
        Ok(Node::with(
            Opcode::BUILDLIST,
            Arg::Num(children.len() as u32),
            children,
        ))
    }

    /// Lowers a function value: the body is registered as a standalone
    /// function, the value itself is a `->` construction call carrying the
    /// entry position, the signature and the captured environment.
    fn func_value(
        &mut self,
        params: &[Param],
        body: Node,
    ) -> Result<Node, CompileError> {
        let mut body = body;
        // control must not run off the end of a function body
        if body.linearize().last().map(|i| i.op) != Some(Opcode::RETURN) {
            let none = self.const_node(Value::None);
            body.children
                .push(Node::with(Opcode::RETURN, Arg::None, vec![none]));
        }
        let entry = self.add_function(body);
        let arrow = self.get_node("->");
        let code = self.get_node("__code__");
        let entry_idx = self.func_const_index(entry);
        let entry_const = Node::new(Opcode::CONST, Arg::Num(entry_idx));
        let signature_get = self.get_node("Signature");
        let names = Value::List(
            params
                .iter()
                .map(|p| Value::Str(p.name.clone()))
                .collect(),
        );
        let names_const = self.const_node(names);
        let mut defaults = Vec::new();
        for param in params {
            if let Some(default) = &param.default {
                defaults.push(self.expr(default)?);
            }
        }
        let defaults_list = Node::with(
            Opcode::BUILDLIST,
            Arg::Num(defaults.len() as u32),
            defaults,
        );
        let zero = self.const_node(Value::Int(0));
        let signature = Node::with(
            Opcode::CALL,
            Arg::None,
            vec![signature_get, names_const, defaults_list, zero],
        );
        let env = Node::new(Opcode::GETENV, Arg::None);
        Ok(Node::with(
            Opcode::CALL,
            Arg::None,
            vec![arrow, code, entry_const, signature, env],
        ))
    }

    /// Lowers a comprehension to a synthesized zero-parameter function that
    /// folds the trailers into an accumulator, then calls it.
    fn comp_value(
        &mut self,
        head: &SeqItem,
        trailers: &[CompTrailer],
    ) -> Result<Node, CompileError> {
        let mut body = Vec::new();
        let accumulator = self.const_node(Value::List(Vec::new()));
        body.push(accumulator);
        self.stack_save += 1; // the accumulator stays on the stack throughout
        self.comp_trailers(head, trailers, 0, &mut body)?;
        self.stack_save -= 1;
        body.push(Node::with(
            Opcode::RETURN,
            Arg::None,
            vec![Node::ignore()],
        ));
        let func = self.func_value(&[], Node::seq(body))?;
        Ok(Node::with(Opcode::CALL, Arg::None, vec![func]))
    }

    fn comp_trailers(
        &mut self,
        head: &SeqItem,
        trailers: &[CompTrailer],
        depth: u32,
        out: &mut Vec<Node>,
    ) -> Result<(), CompileError> {
        match trailers.split_first() {
            None => {
                // rotate the accumulator past the iterator state, append,
                // and rotate the new accumulator back down
                out.push(Node::new(Opcode::RROT, Arg::Num(depth + 1)));
                let append_name =
                    self.const_node(Value::Str(":+".to_owned()));
                let target = Node::with(
                    Opcode::GETATTR,
                    Arg::None,
                    vec![Node::ignore(), append_name],
                );
                let value = match head {
                    SeqItem::Item(value) => self.expr(value)?,
                    SeqItem::Pair(key, value) => {
                        let key = self.expr(key)?;
                        let value = self.expr(value)?;
                        Node::with(
                            Opcode::BUILDLIST,
                            Arg::Num(2),
                            vec![key, value],
                        )
                    }
                };
                out.push(Node::with(
                    Opcode::CALL,
                    Arg::None,
                    vec![target, value],
                ));
                out.push(Node::new(Opcode::ROT, Arg::Num(depth + 1)));
            }
            Some((CompTrailer::For { name, iter }, rest)) => {
                let start = self.label();
                let end = self.label();
                let full_end = self.label();
                let iter_node = self.expr(iter)?;
                let iter_call = self.method_call(iter_node, "__iter__");
                let next_call =
                    self.method_call(Node::ignore(), "__next__");
                let name_idx = self.const_index(Value::Str(name.clone()));
                let outer = Arg::Skip {
                    target: SkipTarget::Label(end),
                    save: self.stack_save + 1,
                };
                let inner = Arg::Skip {
                    target: SkipTarget::Label(full_end),
                    save: self.stack_save,
                };
                out.push(Node::new(Opcode::SETSKIP, outer));
                out.push(iter_call);
                out.push(Node::label(start));
                out.push(Node::new(Opcode::SETSKIP, outer));
                out.push(next_call);
                out.push(Node::new(
                    Opcode::JUMP_IFNOT_KEEP,
                    Arg::Label(end),
                ));
                out.push(Node::new(Opcode::SETSKIP, inner));
                out.push(Node::new(
                    Opcode::UNPACK,
                    Arg::Pack {
                        low: 2,
                        high: NO_STAR_INDEX,
                    },
                ));
                out.push(Node::with(
                    Opcode::SET,
                    Arg::Num(name_idx),
                    vec![Node::ignore()],
                ));
                self.loop_stack.push((start, end));
                self.stack_save += 1;
                self.comp_trailers(head, rest, depth + 1, out)?;
                self.stack_save -= 1;
                self.loop_stack.pop();
                out.push(Node::new(Opcode::JUMP, Arg::Label(start)));
                out.push(Node::label(end));
                out.push(Node::new(Opcode::DROP, Arg::Num(1)));
                out.push(Node::label(full_end));
            }
            Some((CompTrailer::If(cond), rest)) => {
                let skip = self.label();
                let cond = self.expr(cond)?;
                out.push(Node::with(
                    Opcode::JUMP_IFNOT,
                    Arg::Label(skip),
                    vec![cond],
                ));
                self.comp_trailers(head, rest, depth, out)?;
                out.push(Node::label(skip));
            }
        }
        Ok(())
    }

    /// `CALL(GETATTR(obj, const name))` — a zero-argument method call.
    fn method_call(&mut self, obj: Node, name: &str) -> Node {
        let name = self.const_node(Value::Str(name.to_owned()));
        let target =
            Node::with(Opcode::GETATTR, Arg::None, vec![obj, name]);
        Node::with(Opcode::CALL, Arg::None, vec![target])
    }

    // ---- statement lowering ----

    fn stmt(
        &mut self,
        stmt: &Stmt,
        out: &mut Vec<Node>,
    ) -> Result<(), CompileError> {
        if !matches!(stmt.data, StmtData::Block(_) | StmtData::Pass) {
            out.push(Node::lineno(stmt.line));
        }
        match &stmt.data {
            StmtData::Block(stmts) => {
                for stmt in stmts {
                    self.stmt(stmt, out)?;
                }
            }
            StmtData::Pass => {}
            StmtData::Break => {
                let (_, end) = *self
                    .loop_stack
                    .last()
                    .ok_or(CompileError::NoLoop { line: stmt.line })?;
                out.push(Node::new(Opcode::JUMP, Arg::Label(end)));
            }
            StmtData::Continue => {
                let (start, _) = *self
                    .loop_stack
                    .last()
                    .ok_or(CompileError::NoLoop { line: stmt.line })?;
                out.push(Node::new(Opcode::JUMP, Arg::Label(start)));
            }
            StmtData::Return(value) => {
                out.push(self.setskip(SkipTarget::Return));
                let value = self.expr(value)?;
                out.push(Node::with(Opcode::RETURN, Arg::None, vec![value]));
            }
            StmtData::Assert(value) => {
                let end = self.label();
                out.push(self.setskip(SkipTarget::Label(end)));
                let assert = self.get_node("assert");
                let value = self.expr(value)?;
                out.push(Node::with(
                    Opcode::CALL,
                    Arg::None,
                    vec![assert, value],
                ));
                out.push(Node::new(Opcode::DROP, Arg::Num(1)));
                out.push(Node::label(end));
            }
            StmtData::Expr(value) => {
                let end = self.label();
                out.push(self.setskip(SkipTarget::Label(end)));
                out.push(self.expr(value)?);
                out.push(Node::new(Opcode::DROP, Arg::Num(1)));
                out.push(Node::label(end));
            }
            StmtData::Assign(name, value) => {
                let end = self.label();
                out.push(self.setskip(SkipTarget::Label(end)));
                let name_idx = self.const_index(Value::Str(name.clone()));
                let value = self.expr(value)?;
                out.push(Node::with(
                    Opcode::SET,
                    Arg::Num(name_idx),
                    vec![value],
                ));
                out.push(Node::label(end));
            }
            StmtData::DollarSet {
                parts,
                value,
                flags,
            } => {
                let end = self.label();
                out.push(self.setskip(SkipTarget::Label(end)));
                let set = self.get_node("$=");
                let parts = self.dollar_parts(parts)?;
                let value = self.expr(value)?;
                let flags =
                    self.const_node(Value::Int(flags.write_bits()));
                out.push(Node::with(
                    Opcode::CALL,
                    Arg::None,
                    vec![set, parts, value, flags],
                ));
                out.push(Node::new(Opcode::DROP, Arg::Num(1)));
                out.push(Node::label(end));
            }
            StmtData::If {
                cond,
                then_block,
                else_block,
            } => {
                let else_label = self.label();
                let end = self.label();
                let cond = self.expr(cond)?;
                let mut then_nodes = Vec::new();
                self.stmt(then_block, &mut then_nodes)?;
                let mut else_nodes = Vec::new();
                self.stmt(else_block, &mut else_nodes)?;
                // a returning arm redirects the statement's skip point
                let target = if any_return(&then_nodes)
                    || any_return(&else_nodes)
                {
                    SkipTarget::Return
                } else {
                    SkipTarget::Label(end)
                };
                out.push(self.setskip(target));
                out.push(Node::with(
                    Opcode::JUMP_IFNOT,
                    Arg::Label(else_label),
                    vec![cond],
                ));
                out.append(&mut then_nodes);
                out.push(Node::new(Opcode::JUMP, Arg::Label(end)));
                out.push(Node::label(else_label));
                out.append(&mut else_nodes);
                out.push(Node::label(end));
            }
            StmtData::While { cond, body } => {
                let start = self.label();
                let end = self.label();
                let cond = self.expr(cond)?;
                self.loop_stack.push((start, end));
                let mut body_nodes = Vec::new();
                self.stmt(body, &mut body_nodes)?;
                self.loop_stack.pop();
                let target = if any_return(&body_nodes) {
                    SkipTarget::Return
                } else {
                    SkipTarget::Label(end)
                };
                out.push(Node::label(start));
                out.push(self.setskip(target));
                out.push(Node::with(
                    Opcode::JUMP_IFNOT,
                    Arg::Label(end),
                    vec![cond],
                ));
                out.append(&mut body_nodes);
                out.push(Node::new(Opcode::JUMP, Arg::Label(start)));
                out.push(Node::label(end));
            }
            StmtData::For { name, iter, body } => {
                self.for_stmt(name, iter, body, out)?;
            }
            StmtData::Import { module, names } => {
                self.import_stmt(module, names.as_deref(), stmt.line, out)?;
            }
        }
        Ok(())
    }

    fn for_stmt(
        &mut self,
        name: &str,
        iter: &Expr,
        body: &Stmt,
        out: &mut Vec<Node>,
    ) -> Result<(), CompileError> {
        let start = self.label();
        let end = self.label();
        let full_end = self.label();
        let iter_node = self.expr(iter)?;
        let iter_call = self.method_call(iter_node, "__iter__");
        let next_call = self.method_call(Node::ignore(), "__next__");
        let name_idx = self.const_index(Value::Str(name.to_owned()));

        self.loop_stack.push((start, end));
        self.stack_save += 1; // the iterator lives on the stack across the body
        let mut body_nodes = Vec::new();
        self.stmt(body, &mut body_nodes)?;
        self.stack_save -= 1;
        self.loop_stack.pop();

        let has_return = any_return(&body_nodes);
        // outer skip keeps the iterator (landing on the trailing DROP);
        // the inner one assumes it was consumed
        let outer = Arg::Skip {
            target: if has_return {
                SkipTarget::Return
            } else {
                SkipTarget::Label(end)
            },
            save: self.stack_save + 1,
        };
        let inner = Arg::Skip {
            target: if has_return {
                SkipTarget::Return
            } else {
                SkipTarget::Label(full_end)
            },
            save: self.stack_save,
        };

        out.push(Node::new(Opcode::SETSKIP, outer));
        out.push(iter_call);
        out.push(Node::label(start));
        out.push(Node::new(Opcode::SETSKIP, outer));
        out.push(next_call);
        out.push(Node::new(Opcode::JUMP_IFNOT_KEEP, Arg::Label(end)));
        out.push(Node::new(Opcode::SETSKIP, inner));
        out.push(Node::new(
            Opcode::UNPACK,
            Arg::Pack {
                low: 2,
                high: NO_STAR_INDEX,
            },
        ));
        out.push(Node::with(
            Opcode::SET,
            Arg::Num(name_idx),
            vec![Node::ignore()],
        ));
        out.extend(body_nodes);
        out.push(Node::new(Opcode::JUMP, Arg::Label(start)));
        out.push(Node::label(end));
        out.push(Node::new(Opcode::DROP, Arg::Num(1)));
        out.push(Node::label(full_end));
        Ok(())
    }

    fn import_stmt(
        &mut self,
        module: &str,
        names: Option<&[ImportName]>,
        line: usize,
        out: &mut Vec<Node>,
    ) -> Result<(), CompileError> {
        if module.starts_with('.') {
            return Err(CompileError::RelativeImport {
                module: module.to_owned(),
                line,
            });
        }
        self.imports.push(module.to_owned());
        let last_component =
            module.rsplit('.').next().unwrap_or(module).to_owned();
        match names {
            None => {
                let alias_idx =
                    self.const_index(Value::Str(last_component));
                let import = self.get_node("import");
                let module_const =
                    self.const_node(Value::Str(module.to_owned()));
                let call = Node::with(
                    Opcode::CALL,
                    Arg::None,
                    vec![import, module_const],
                );
                out.push(Node::with(
                    Opcode::SET,
                    Arg::Num(alias_idx),
                    vec![call],
                ));
            }
            Some(names) => {
                let import = self.get_node("import");
                let module_const =
                    self.const_node(Value::Str(module.to_owned()));
                out.push(Node::with(
                    Opcode::CALL,
                    Arg::None,
                    vec![import, module_const],
                ));
                let count = names.len() as u32;
                out.push(Node::new(Opcode::DUP, Arg::Num(count - 1)));
                self.stack_save += count;
                for name in names {
                    self.stack_save -= 1;
                    match name {
                        ImportName::Star => {
                            let alias_idx = self.const_index(Value::Str(
                                last_component.clone(),
                            ));
                            out.push(Node::with(
                                Opcode::SET,
                                Arg::Num(alias_idx),
                                vec![Node::ignore()],
                            ));
                        }
                        ImportName::Named { name, alias } => {
                            let end = self.label();
                            out.push(self.setskip(SkipTarget::Label(end)));
                            let alias_idx =
                                self.const_index(Value::Str(alias.clone()));
                            let attr = self
                                .const_node(Value::Str(name.clone()));
                            let getattr = Node::with(
                                Opcode::GETATTR,
                                Arg::None,
                                vec![Node::ignore(), attr],
                            );
                            out.push(Node::with(
                                Opcode::SET,
                                Arg::Num(alias_idx),
                                vec![getattr],
                            ));
                            out.push(Node::label(end));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(
        mut self,
        code: Vec<Node>,
        options: &CompileOptions,
    ) -> Result<CompiledModule, CompileError> {
        let mut parts = vec![Node::seq(code)];
        parts.append(&mut self.functions);
        let mut root = Node::seq(parts);
        if options.skip_analysis {
            let lin = root.linearize();
            let instrs = skip::skipanalysis(lin, &mut self)?;
            root = Node::seq(
                instrs
                    .into_iter()
                    .map(|i| Node::new(i.op, i.arg))
                    .collect(),
            );
        }
        let mut labels = LabelMap::new();
        root.resolve_labels(0, &mut labels);
        let linenotab = lineno_table(&root.linearize());
        debug!(
            "compiled {} with {} constants",
            self.modname,
            self.consts.len()
        );
        Ok(CompiledModule {
            root,
            labels,
            linenotab,
            consts: self.consts,
            imports: self.imports,
            fname: self.fname,
            modname: self.modname,
        })
    }
}

fn any_return(nodes: &[Node]) -> bool {
    nodes.iter().any(contains_return)
}

fn contains_return(node: &Node) -> bool {
    node.op == Opcode::RETURN || node.children.iter().any(contains_return)
}

/// A fully lowered module, ready for emission.
pub struct CompiledModule {
    pub root: Node,
    pub consts: Vec<Const>,
    pub labels: LabelMap,
    pub linenotab: Vec<u8>,
    pub imports: Vec<String>,
    pub fname: String,
    pub modname: String,
}

impl CompiledModule {
    /// Serialises the header and body records back-to-back.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CompileError> {
        let header = Value::Dict(vec![
            (Value::from("fname"), Value::Str(self.fname.clone())),
            (
                Value::from("imports"),
                Value::List(
                    self.imports
                        .iter()
                        .map(|m| Value::Str(m.clone()))
                        .collect(),
                ),
            ),
            (Value::from("name"), Value::Str(self.modname.clone())),
        ]);
        let consts = self
            .consts
            .iter()
            .map(|c| c.to_value(&self.labels))
            .collect::<Result<Vec<_>, _>>()?;
        let body = Value::Dict(vec![
            (Value::from("consts"), Value::List(consts)),
            (
                Value::from("linenotab"),
                Value::Bytes(self.linenotab.clone()),
            ),
            (Value::from("code"), Value::Bytes(self.code_bytes()?)),
        ]);
        let mut out = serialization::serialise(&header);
        out.extend(serialization::serialise(&body));
        Ok(out)
    }

    pub fn code_bytes(&self) -> Result<Vec<u8>, CompileError> {
        let mut code = Vec::new();
        self.root.to_bytes(&self.labels, &mut code)?;
        Ok(code)
    }

    pub fn linearized(&self) -> Vec<Instr> {
        self.root.linearize()
    }
}

/// Builds the compact line-number table from the linearized stream: one
/// delta pair per `LINENO` whose line differs from the previous one.
pub fn lineno_table(lin: &[Instr]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut byte_pos: u32 = 0;
    let mut last_byte: u32 = 0;
    let mut last_line: i64 = 0;
    for instr in lin {
        if instr.op == Opcode::LINENO
            && let Arg::Num(line) = instr.arg
        {
            let line = line as i64;
            if line != last_line {
                encode_lineno_pair(
                    byte_pos - last_byte,
                    line - last_line,
                    &mut out,
                );
                last_byte = byte_pos;
                last_line = line;
            }
        }
        if instr.op.is_emitted() {
            byte_pos += Opcode::RECORD_SIZE;
        }
    }
    out
}

fn encode_lineno_pair(mut bytes: u32, mut delta: i64, out: &mut Vec<u8>) {
    while bytes > 255 {
        out.push(255);
        out.push(0);
        bytes -= 255;
    }
    while delta > 127 {
        out.push(0);
        out.push(127);
        delta -= 127;
    }
    while delta < -128 {
        out.push(0);
        out.push((-128i8) as u8);
        delta += 128;
    }
    out.push(bytes as u8);
    out.push((delta as i8) as u8);
}
