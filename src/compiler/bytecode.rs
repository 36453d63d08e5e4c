use std::collections::HashMap;
use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::Display;
use strum_macros::EnumIter;

use crate::serialization::EncodeError;
use crate::utils::buffers;

/// Signals a return-carrying skip in the low 16 bits of a SETSKIP argument.
pub const RETURN_SKIP: u32 = 0xFFFF;

/// "No star index" marker in the high 16 bits of an UNPACK argument.
pub const NO_STAR_INDEX: u32 = 0xFFFF;

/// The opcode catalogue. Emitted opcodes are declared first: their
/// discriminants, in declaration order, are the wire ids of the 5-byte
/// records. The trailing pseudo opcodes are structural and never emitted.
#[allow(non_camel_case_types)]
#[derive(
    EnumIter,
    Debug,
    Eq,
    PartialEq,
    TryFromPrimitive,
    Copy,
    Clone,
    Hash,
    Display,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum Opcode {
    KWARG = 0,
    GETATTR,
    CALL,
    BINOP,
    GET,
    SET,
    CONST,
    JUMP,
    JUMP_IF,
    JUMP_IFNOT,
    JUMP_IF_KEEP,
    JUMP_IFNOT_KEEP,
    DROP,
    RETURN,
    GETENV,
    SETSKIP,
    DUP,
    ROT,
    RROT,
    BUILDLIST,
    UNPACK,
    SKIPVAR,

    // pseudo opcodes
    SEQ,
    LABEL,
    LINENO,
    IGNORE,
}

impl Opcode {
    /// Size of one emitted record: `u8 opcode || u32le arg`.
    pub const RECORD_SIZE: u32 = 5;

    pub fn is_emitted(self) -> bool {
        (self as u8) < (Opcode::SEQ as u8)
    }

    /// Opcodes whose result can never be a thunk; the skip analysis does not
    /// plant a skip point in front of these.
    pub fn skip_not_required(self) -> bool {
        matches!(
            self,
            Opcode::CONST
                | Opcode::GETENV
                | Opcode::BUILDLIST
                | Opcode::UNPACK
                | Opcode::ROT
                | Opcode::RROT
                | Opcode::DUP
                | Opcode::JUMP_IF_KEEP
                | Opcode::JUMP_IFNOT_KEEP
        )
    }
}

/// A jump/skip target allocated by the compiler. Positions live in the
/// `LabelMap` produced by `resolve_labels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

pub type LabelMap = HashMap<Label, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipTarget {
    Label(Label),
    /// Resolves to `RETURN_SKIP` instead of a byte position.
    Return,
}

/// Inline argument of an instruction. `None` also covers CALL, whose
/// argument is derived from its child count at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    None,
    Num(u32),
    Label(Label),
    /// SETSKIP composite: low 16 bits target position (or RETURN_SKIP),
    /// high 16 bits the stack-save count.
    Skip { target: SkipTarget, save: u32 },
    /// UNPACK composite: low 16 bits element count, high 16 bits star index.
    Pack { low: u32, high: u32 },
}

/// A tree-shaped instruction: children emit depth-first before the node
/// itself. `SEQ` only groups, `LABEL` marks a position, `LINENO` feeds the
/// line-number table and `IGNORE` stands for a value the engine already has
/// on the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub op: Opcode,
    pub arg: Arg,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(op: Opcode, arg: Arg) -> Node {
        Node {
            op,
            arg,
            children: Vec::new(),
        }
    }

    pub fn with(op: Opcode, arg: Arg, children: Vec<Node>) -> Node {
        Node { op, arg, children }
    }

    pub fn seq(children: Vec<Node>) -> Node {
        Node::with(Opcode::SEQ, Arg::None, children)
    }

    pub fn label(label: Label) -> Node {
        Node::new(Opcode::LABEL, Arg::Label(label))
    }

    pub fn lineno(line: usize) -> Node {
        Node::new(Opcode::LINENO, Arg::Num(line as u32))
    }

    pub fn ignore() -> Node {
        Node::new(Opcode::IGNORE, Arg::None)
    }

    /// Assigns byte positions: children first, then the node. Physical nodes
    /// advance the position by the record size; labels capture it without
    /// advancing. Running this twice over an unchanged tree is a fixed point.
    pub fn resolve_labels(&self, start: u32, labels: &mut LabelMap) -> u32 {
        let mut pos = start;
        for child in &self.children {
            pos = child.resolve_labels(pos, labels);
        }
        if self.op == Opcode::LABEL {
            if let Arg::Label(label) = self.arg {
                labels.insert(label, pos);
            }
            pos
        } else if self.op.is_emitted() {
            pos + Opcode::RECORD_SIZE
        } else {
            pos
        }
    }

    /// Depth-first flattening into a linear stream. `SEQ` contributes only
    /// its children; CALL's derived argument count is materialised so the
    /// flat instructions are self-contained.
    pub fn linearize(&self) -> Vec<Instr> {
        let mut out = Vec::new();
        self.linearize_into(&mut out);
        out
    }

    fn linearize_into(&self, out: &mut Vec<Instr>) {
        for child in &self.children {
            child.linearize_into(out);
        }
        match self.op {
            Opcode::SEQ => {}
            Opcode::CALL => out.push(Instr {
                op: Opcode::CALL,
                arg: Arg::Num(self.children.len().saturating_sub(1) as u32),
            }),
            _ => out.push(Instr {
                op: self.op,
                arg: self.arg,
            }),
        }
    }

    /// Emits the 5-byte records of this tree, children before parents.
    pub fn to_bytes(
        &self,
        labels: &LabelMap,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        for child in &self.children {
            child.to_bytes(labels, out)?;
        }
        if self.op.is_emitted() {
            buffers::append_u8(out, self.op as u8);
            buffers::append_u32(out, self.emit_arg(labels)?);
        }
        Ok(())
    }

    fn emit_arg(&self, labels: &LabelMap) -> Result<u32, EncodeError> {
        match self.arg {
            Arg::None => {
                if self.op == Opcode::CALL {
                    Ok(self.children.len().saturating_sub(1) as u32)
                } else {
                    Ok(0)
                }
            }
            Arg::Num(value) => Ok(value),
            Arg::Label(label) => resolve(labels, label),
            Arg::Skip { target, save } => {
                let low = match target {
                    SkipTarget::Label(label) => {
                        resolve(labels, label)? & 0xFFFF
                    }
                    SkipTarget::Return => RETURN_SKIP,
                };
                Ok(low | (save << 16))
            }
            Arg::Pack { low, high } => Ok((low & 0xFFFF) | (high << 16)),
        }
    }

    /// Multi-line dump with one level of indentation per tree depth.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("    ");
        }
        out.push_str(&format!(
            "{}\n",
            Instr {
                op: self.op,
                arg: self.arg
            }
        ));
        for child in &self.children {
            child.dump_into(out, depth + 1);
        }
    }
}

fn resolve(labels: &LabelMap, label: Label) -> Result<u32, EncodeError> {
    labels.get(&label).copied().ok_or(EncodeError::Unsupported)
}

/// One linearized instruction. The stack-effect tables live here so the
/// compiler and the skip analysis cannot disagree about opcode semantics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr {
    pub op: Opcode,
    pub arg: Arg,
}

impl Instr {
    fn num_arg(&self) -> u32 {
        match self.arg {
            Arg::Num(value) => value,
            Arg::Pack { low, .. } => low,
            _ => 0,
        }
    }

    /// How many stack entries the instruction consumes.
    pub fn removes(&self) -> u32 {
        match self.op {
            Opcode::KWARG => 1,
            Opcode::GETATTR => 2,
            Opcode::CALL => self.num_arg() + 1,
            Opcode::BINOP => 2,
            Opcode::GET => 0,
            Opcode::SET => 1,
            Opcode::CONST => 0,
            Opcode::JUMP => 0,
            Opcode::JUMP_IF
            | Opcode::JUMP_IFNOT
            | Opcode::JUMP_IF_KEEP
            | Opcode::JUMP_IFNOT_KEEP => 1,
            Opcode::DROP => self.num_arg(),
            Opcode::RETURN => 1,
            Opcode::GETENV => 0,
            Opcode::SETSKIP => 0,
            Opcode::DUP => 1,
            Opcode::ROT | Opcode::RROT => self.num_arg(),
            Opcode::BUILDLIST => self.num_arg(),
            Opcode::UNPACK => 1,
            Opcode::SKIPVAR => 0,
            Opcode::SEQ
            | Opcode::LABEL
            | Opcode::LINENO
            | Opcode::IGNORE => 0,
        }
    }

    /// How many stack entries the instruction produces.
    pub fn adds(&self) -> u32 {
        match self.op {
            Opcode::KWARG => 1,
            Opcode::GETATTR => 1,
            Opcode::CALL => 1,
            Opcode::BINOP => 1,
            Opcode::GET => 1,
            Opcode::SET => 0,
            Opcode::CONST => 1,
            Opcode::JUMP => 0,
            Opcode::JUMP_IF | Opcode::JUMP_IFNOT => 0,
            Opcode::JUMP_IF_KEEP | Opcode::JUMP_IFNOT_KEEP => 1,
            Opcode::DROP => 0,
            Opcode::RETURN => 0,
            Opcode::GETENV => 1,
            Opcode::SETSKIP => 0,
            Opcode::DUP => 1 + self.num_arg(),
            Opcode::ROT | Opcode::RROT => self.num_arg(),
            Opcode::BUILDLIST => 1,
            Opcode::UNPACK => self.num_arg(),
            Opcode::SKIPVAR => 0,
            Opcode::SEQ
            | Opcode::LABEL
            | Opcode::LINENO
            | Opcode::IGNORE => 0,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arg {
            Arg::None => write!(f, "{}", self.op),
            Arg::Num(value) => write!(f, "{} {}", self.op, value),
            Arg::Label(label) => write!(f, "{} L{}", self.op, label.0),
            Arg::Skip { target, save } => match target {
                SkipTarget::Label(label) => {
                    write!(f, "{} L{}+{}", self.op, label.0, save)
                }
                SkipTarget::Return => {
                    write!(f, "{} return+{}", self.op, save)
                }
            },
            Arg::Pack { low, high } => {
                write!(f, "{} {}/{}", self.op, low, high)
            }
        }
    }
}
