//! Skip-point dataflow analysis.
//!
//! For every value-producing instruction the engine needs a recovery target:
//! the nearest instruction that post-dominates the producer and is not
//! affected by its result, together with the number of stack entries to drop
//! and the variables to shadow with thunks on the way there. The pass walks
//! the linearized code, reconstructs every stack shape that can reach each
//! instruction, and plants a `SETSKIP` in front of each producer (plus
//! `SKIPVAR` markers after it).

use std::collections::HashMap;

use indexmap::IndexSet;
use itertools::Itertools;

use crate::compiler::Compiler;
use crate::compiler::bytecode::{Arg, Instr, Label, Opcode, SkipTarget};
use crate::compiler::error::CompileError;

/// A control-flow node: an instruction index, or `None` for the post-return
/// sentinel.
type NodeId = Option<usize>;

type Stack = Vec<usize>;

struct Analysis {
    cfg: Vec<Vec<NodeId>>,
    possible_stacks: Vec<IndexSet<Stack>>,
    depends: Vec<IndexSet<usize>>,
    post_dominators: Vec<IndexSet<NodeId>>,
}

/// Inserts skip points into a linearized instruction stream. Fresh labels
/// are drawn from the compiler so targets survive later re-resolution.
pub fn skipanalysis(
    lin: Vec<Instr>,
    compiler: &mut Compiler,
) -> Result<Vec<Instr>, CompileError> {
    if lin.is_empty() {
        return Ok(lin);
    }
    let analysis = analyse(&lin)?;

    // plan insertions from last to first, like the in-place original
    let mut plans: Vec<Option<(NodeId, u32, Vec<u32>)>> =
        vec![None; lin.len()];
    for pos in (0..lin.len()).rev() {
        let item = &lin[pos];
        if item.adds() > 0 && !item.op.skip_not_required() {
            plans[pos] = Some(find_skip(pos, &lin, &analysis)?);
        }
    }

    // each instruction target gets a label planted directly in front of it
    // (after its own SETSKIP, so a skip landing there bypasses it)
    let mut target_labels: HashMap<usize, Label> = HashMap::new();
    for plan in plans.iter().flatten() {
        if let Some(target) = plan.0 {
            target_labels
                .entry(target)
                .or_insert_with(|| compiler.label());
        }
    }

    let mut out = Vec::with_capacity(lin.len() * 2);
    for (pos, instr) in lin.into_iter().enumerate() {
        if let Some((target, stack_drop, _)) = &plans[pos] {
            let target = match target {
                Some(t) => SkipTarget::Label(target_labels[t]),
                None => SkipTarget::Return,
            };
            out.push(Instr {
                op: Opcode::SETSKIP,
                arg: Arg::Skip {
                    target,
                    save: *stack_drop,
                },
            });
        }
        if let Some(label) = target_labels.get(&pos) {
            out.push(Instr {
                op: Opcode::LABEL,
                arg: Arg::Label(*label),
            });
        }
        let vars = plans[pos].as_ref().map(|p| p.2.clone());
        out.push(instr);
        if let Some(vars) = vars {
            for var in vars {
                out.push(Instr {
                    op: Opcode::SKIPVAR,
                    arg: Arg::Num(var),
                });
            }
        }
    }
    Ok(out)
}

fn analyse(lin: &[Instr]) -> Result<Analysis, CompileError> {
    let cfg = control_flow_graph(lin)?;
    // the argument tuples are recorded by the flow pass but only the stack
    // shapes feed the skip placement
    let (possible_stacks, _possible_args) = stack_flow(lin, &cfg)?;
    let depends = dependent_instructions(&possible_stacks);
    let post_dominators = post_dominating_nodes(&cfg);
    Ok(Analysis {
        cfg,
        possible_stacks,
        depends,
        post_dominators,
    })
}

/// Successors of each instruction: jumps go to their label's position,
/// conditional jumps additionally fall through, `RETURN` exits to the
/// sentinel, everything else falls through.
fn control_flow_graph(
    lin: &[Instr],
) -> Result<Vec<Vec<NodeId>>, CompileError> {
    let label_index: HashMap<Label, usize> = lin
        .iter()
        .enumerate()
        .filter_map(|(pos, instr)| match (instr.op, instr.arg) {
            (Opcode::LABEL, Arg::Label(label)) => Some((label, pos)),
            _ => None,
        })
        .collect();
    let target = |pos: usize, instr: &Instr| match instr.arg {
        Arg::Label(label) => label_index
            .get(&label)
            .copied()
            .ok_or(CompileError::NoSkip { pos }),
        _ => Err(CompileError::NoSkip { pos }),
    };

    let mut cfg = Vec::with_capacity(lin.len());
    for (pos, instr) in lin.iter().enumerate() {
        let successors = match instr.op {
            Opcode::JUMP => vec![Some(target(pos, instr)?)],
            Opcode::JUMP_IF
            | Opcode::JUMP_IFNOT
            | Opcode::JUMP_IF_KEEP
            | Opcode::JUMP_IFNOT_KEEP => {
                vec![Some(pos + 1), Some(target(pos, instr)?)]
            }
            Opcode::RETURN => vec![None],
            _ => vec![Some(pos + 1)],
        };
        cfg.push(successors);
    }
    Ok(cfg)
}

/// Worklist search over every stack shape reaching each instruction,
/// starting from `(0, empty)`. Pushed entries carry the producing
/// instruction's position as the value identity.
fn stack_flow(
    lin: &[Instr],
    cfg: &[Vec<NodeId>],
) -> Result<(Vec<IndexSet<Stack>>, Vec<IndexSet<Stack>>), CompileError> {
    let mut possible_stacks: Vec<IndexSet<Stack>> =
        vec![IndexSet::new(); lin.len()];
    let mut possible_args: Vec<IndexSet<Stack>> =
        vec![IndexSet::new(); lin.len()];

    let mut todo: Vec<(usize, Stack)> = vec![(0, Vec::new())];
    while let Some((pos, stack)) = todo.pop() {
        if !possible_stacks[pos].insert(stack.clone()) {
            continue;
        }
        let instr = &lin[pos];
        let remove = instr.removes() as usize;
        let add = instr.adds() as usize;
        if stack.len() < remove {
            return Err(CompileError::StackUnderflow { pos });
        }
        possible_args[pos].insert(stack[stack.len() - remove..].to_vec());
        let mut new_stack = stack[..stack.len() - remove].to_vec();
        new_stack.extend(std::iter::repeat_n(pos, add));
        for successor in &cfg[pos] {
            if let Some(next) = successor {
                todo.push((*next, new_stack.clone()));
            }
        }
    }
    Ok((possible_stacks, possible_args))
}

/// Transitive closure: instruction `i` depends on `j` when `j`'s result can
/// be on the stack when `i` executes, directly or through other producers.
fn dependent_instructions(
    possible_stacks: &[IndexSet<Stack>],
) -> Vec<IndexSet<usize>> {
    let mut depends: Vec<IndexSet<usize>> =
        vec![IndexSet::new(); possible_stacks.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for pos in 0..depends.len() {
            let before = depends[pos].len();
            let mut additions: IndexSet<usize> = IndexSet::new();
            for stack in &possible_stacks[pos] {
                for &value in stack {
                    additions.insert(value);
                    additions.extend(depends[value].iter().copied());
                }
            }
            depends[pos].extend(additions);
            changed = changed || depends[pos].len() != before;
        }
    }
    depends
}

/// Fixed-point intersection `postdom(p) = {p} ∪ ∩ postdom(succ)`, with the
/// exit sentinel post-dominating only itself, initialised to the universe.
fn post_dominating_nodes(cfg: &[Vec<NodeId>]) -> Vec<IndexSet<NodeId>> {
    let universe: IndexSet<NodeId> =
        (0..cfg.len()).map(Some).chain([None]).collect();
    let mut post_dominators: Vec<IndexSet<NodeId>> =
        vec![universe.clone(); cfg.len()];

    let mut changed = true;
    while changed {
        changed = false;
        for pos in 0..post_dominators.len() {
            let before = post_dominators[pos].len();
            let mut new_nodes = universe.clone();
            for successor in &cfg[pos] {
                match successor {
                    Some(next) => {
                        let succ_doms = &post_dominators[*next];
                        new_nodes.retain(|node| succ_doms.contains(node));
                    }
                    None => new_nodes.retain(|node| node.is_none()),
                }
            }
            new_nodes.insert(Some(pos));
            changed = changed || new_nodes.len() != before;
            post_dominators[pos] = new_nodes;
        }
    }
    post_dominators
}

/// Instructions reachable from `pos`, in depth-first discovery order, with
/// the exit sentinel appended last. The order ranks post-dominators by
/// nearness.
fn reachable_instrs(pos: usize, cfg: &[Vec<NodeId>]) -> Vec<NodeId> {
    let mut todo = vec![pos];
    let mut reached: IndexSet<usize> = IndexSet::new();
    while let Some(pos) = todo.pop() {
        if !reached.insert(pos) {
            continue;
        }
        for successor in &cfg[pos] {
            if let Some(next) = successor {
                todo.push(*next);
            }
        }
    }
    let mut order: Vec<NodeId> = reached.into_iter().map(Some).collect();
    order.push(None);
    order
}

/// Variables assigned by `SET` on any path from `pos` (exclusive) up to, but
/// not through, the skip target.
fn possibly_set_variables(
    pos: usize,
    skip_pos: NodeId,
    cfg: &[Vec<NodeId>],
    lin: &[Instr],
) -> Vec<u32> {
    let mut todo = vec![pos];
    let mut done: IndexSet<usize> = IndexSet::new();
    let mut variables: IndexSet<u32> = IndexSet::new();
    while let Some(pos) = todo.pop() {
        if !done.insert(pos) {
            continue;
        }
        if lin[pos].op == Opcode::SET
            && let Arg::Num(name) = lin[pos].arg
        {
            variables.insert(name);
        }
        for successor in &cfg[pos] {
            if let Some(next) = successor
                && skip_pos != Some(*next)
            {
                todo.push(*next);
            }
        }
    }
    variables.into_iter().collect()
}

fn is_prefix(stack: &[usize], prefix: &[usize]) -> bool {
    stack.len() >= prefix.len() && &stack[..prefix.len()] == prefix
}

/// Finds the skip point for the producer at `pos`: the nearest (by
/// reachability order) post-dominator that does not depend on the producer's
/// result and whose reaching stacks extend every stack at `pos` with the
/// producer's inputs popped. Returns the target, the stack-drop count and
/// the shadow variables.
fn find_skip(
    pos: usize,
    lin: &[Instr],
    analysis: &Analysis,
) -> Result<(NodeId, u32, Vec<u32>), CompileError> {
    let item = &lin[pos];
    let reachable = reachable_instrs(pos, &analysis.cfg);
    let rank: HashMap<NodeId, usize> = reachable
        .iter()
        .enumerate()
        .map(|(idx, node)| (*node, idx))
        .collect();
    let empty_stacks: IndexSet<Stack> = [Vec::new()].into_iter().collect();

    let candidates = analysis.post_dominators[pos]
        .iter()
        .sorted_by_key(|node| rank.get(node).copied().unwrap_or(usize::MAX));
    for &dom in candidates {
        if dom == Some(pos) {
            continue;
        }
        if let Some(d) = dom
            && analysis.depends[d].contains(&pos)
        {
            continue;
        }
        let skip_stacks = match dom {
            Some(d) => &analysis.possible_stacks[d],
            None => &empty_stacks,
        };
        let mut prefix_lengths: IndexSet<usize> = IndexSet::new();
        let mut ok = true;
        for stack in &analysis.possible_stacks[pos] {
            let removed = item.removes() as usize;
            let stack = &stack[..stack.len() - removed];
            if !skip_stacks.iter().any(|ss| is_prefix(stack, ss)) {
                ok = false;
                break;
            }
            for ss in skip_stacks {
                prefix_lengths.insert(stack.len().saturating_sub(ss.len()));
            }
        }
        if !ok {
            continue;
        }
        if prefix_lengths.len() > 1 {
            // reaching stacks disagree about the drop depth
            return Err(CompileError::NoSkip { pos });
        }
        let stack_drop =
            prefix_lengths.into_iter().next().unwrap_or(0) as u32;
        let variables =
            possibly_set_variables(pos, dom, &analysis.cfg, lin);
        return Ok((dom, stack_drop, variables));
    }
    Err(CompileError::NoSkip { pos })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: Opcode, arg: Arg) -> Instr {
        Instr { op, arg }
    }

    #[test]
    fn stack_flow_records_stacks_and_argument_tuples() {
        let lin = vec![
            instr(Opcode::CONST, Arg::Num(0)),
            instr(Opcode::CONST, Arg::Num(1)),
            instr(Opcode::BINOP, Arg::Num(2)),
            instr(Opcode::RETURN, Arg::None),
        ];
        let cfg = control_flow_graph(&lin).unwrap();
        let (stacks, args) = stack_flow(&lin, &cfg).unwrap();
        assert!(stacks[2].contains(&vec![0, 1]));
        assert!(args[2].contains(&vec![0, 1]));
        assert!(stacks[3].contains(&vec![2]));
        assert!(args[3].contains(&vec![2]));
    }

    #[test]
    fn consuming_an_empty_stack_underflows() {
        let lin = vec![
            instr(Opcode::DROP, Arg::Num(1)),
            instr(Opcode::RETURN, Arg::None),
        ];
        let cfg = control_flow_graph(&lin).unwrap();
        let err = stack_flow(&lin, &cfg).unwrap_err();
        assert_eq!(err, CompileError::StackUnderflow { pos: 0 });
    }

    #[test]
    fn postdominators_of_straight_line_code_are_the_suffix() {
        let lin = vec![
            instr(Opcode::CONST, Arg::Num(0)),
            instr(Opcode::SET, Arg::Num(1)),
            instr(Opcode::CONST, Arg::Num(2)),
            instr(Opcode::RETURN, Arg::None),
        ];
        let cfg = control_flow_graph(&lin).unwrap();
        let doms = post_dominating_nodes(&cfg);
        assert!(doms[0].contains(&Some(1)));
        assert!(doms[0].contains(&Some(3)));
        assert!(doms[0].contains(&None));
        assert!(!doms[2].contains(&Some(1)));
    }

    #[test]
    fn conditional_jump_targets_join_the_flow() {
        let label = Label(0);
        // JUMP_IFNOT L with a GET condition, one GET on each arm
        let lin = vec![
            instr(Opcode::GET, Arg::Num(0)),
            instr(Opcode::JUMP_IFNOT, Arg::Label(label)),
            instr(Opcode::GET, Arg::Num(1)),
            instr(Opcode::DROP, Arg::Num(1)),
            instr(Opcode::LABEL, Arg::Label(label)),
            instr(Opcode::CONST, Arg::Num(2)),
            instr(Opcode::RETURN, Arg::None),
        ];
        let cfg = control_flow_graph(&lin).unwrap();
        assert_eq!(cfg[1], vec![Some(2), Some(4)]);
        let (stacks, _) = stack_flow(&lin, &cfg).unwrap();
        // both the fallthrough and the jump reach the label with an empty
        // stack
        assert_eq!(stacks[4].len(), 1);
        assert!(stacks[4].contains(&Vec::new()));
    }
}
