use elk_core::ast::parser::parse;
use elk_core::compiler::bytecode::{Arg, Instr, Opcode, SkipTarget};
use elk_core::compiler::error::CompileError;
use elk_core::compiler::skip::skipanalysis;
use elk_core::compiler::{CompileOptions, Compiler, compile, compile_ast};
use elk_core::logger::init_logger_debug;
use elk_core::serialization::{deserialise, deserialise_at};

fn analysed(source: &str) -> Vec<Instr> {
    let program = parse(source).unwrap();
    let options = CompileOptions {
        skip_analysis: true,
    };
    compile_ast(&program, "/src/test.elk", "test", &options)
        .unwrap()
        .linearized()
}

/// Walks back from an instruction over pseudo ops; the nearest preceding
/// physical instruction must be its SETSKIP.
fn has_skip_before(lin: &[Instr], pos: usize) -> bool {
    for instr in lin[..pos].iter().rev() {
        match instr.op {
            Opcode::SETSKIP => return true,
            op if op.is_emitted() => return false,
            _ => {} // labels and line markers may sit in between
        }
    }
    false
}

#[test]
fn every_producer_gets_a_skip_point() {
    init_logger_debug();
    let sources = [
        "x = 1\n",
        "x = f(1, 2)\n",
        "y = a.b + c * d\n",
        "if a:\n    b = 1\nelse:\n    b = f()\n",
        "while a:\n    x = x + 1\n",
        "for i in xs:\n    y = y + i\n",
        "g = \\\\x -> x + 1\n",
        "zs = [x * 2 for x in ys if x]\n",
    ];
    for source in sources {
        let lin = analysed(source);
        for (pos, instr) in lin.iter().enumerate() {
            if instr.adds() > 0 && !instr.op.skip_not_required() {
                assert!(
                    has_skip_before(&lin, pos),
                    "{source:?}: no SETSKIP before {} at {pos}",
                    instr
                );
            }
        }
    }
}

#[test]
fn skip_targets_resolve() {
    init_logger_debug();
    let program = parse("x = f(a, b)\ny = x\n").unwrap();
    let options = CompileOptions {
        skip_analysis: true,
    };
    let module =
        compile_ast(&program, "/src/test.elk", "test", &options).unwrap();
    let lin = module.linearized();
    let mut end = 0u32;
    for instr in &lin {
        if instr.op.is_emitted() {
            end += 5;
        }
    }
    for instr in &lin {
        if instr.op == Opcode::SETSKIP
            && let Arg::Skip { target, save } = instr.arg
        {
            assert!(save <= 4, "implausible stack save {save}");
            if let SkipTarget::Label(label) = target {
                let resolved = module.labels[&label];
                assert!(resolved <= end);
            }
        }
    }
    // the whole module still serialises
    let bytes = module.to_bytes().unwrap();
    let (_, next) = deserialise(&bytes).unwrap();
    let (_, total) = deserialise_at(&bytes, next).unwrap();
    assert_eq!(total, bytes.len());
}

#[test]
fn producers_feeding_an_assignment_shadow_the_variable() {
    init_logger_debug();
    // the skip of `c`'s read jumps past the assignment to `b`, so `b` must
    // be shadowed on the way
    let lin = analysed("if a:\n    b = c\nd = 1\n");
    assert!(
        lin.iter().any(|i| i.op == Opcode::SKIPVAR),
        "expected at least one SKIPVAR marker"
    );
}

#[test]
fn analysis_rejects_an_underflowing_stream() {
    init_logger_debug();
    let mut compiler = Compiler::new("/src/test.elk", "test");
    let lin = vec![
        Instr {
            op: Opcode::DROP,
            arg: Arg::Num(1),
        },
        Instr {
            op: Opcode::RETURN,
            arg: Arg::None,
        },
    ];
    let err = skipanalysis(lin, &mut compiler).unwrap_err();
    assert_eq!(err, CompileError::StackUnderflow { pos: 0 });
}

#[test]
fn analysed_modules_still_compile_to_valid_records() {
    init_logger_debug();
    let options = CompileOptions {
        skip_analysis: true,
    };
    let bytes = compile(
        "total = 0\nfor i in items:\n    total = total + i\n",
        "/src/test.elk",
        "test",
        &options,
    )
    .unwrap();
    let (_, next) = deserialise(&bytes).unwrap();
    let (_, end) = deserialise_at(&bytes, next).unwrap();
    assert_eq!(end, bytes.len());
}

#[test]
fn plain_compilation_leaves_producers_uncovered() {
    init_logger_debug();
    // sanity check that the pass is genuinely optional: without it, GETs
    // are not individually covered
    let program = parse("y = a.b + c\n").unwrap();
    let module = compile_ast(
        &program,
        "/src/test.elk",
        "test",
        &CompileOptions::default(),
    )
    .unwrap();
    let lin = module.linearized();
    let gets: Vec<usize> = lin
        .iter()
        .enumerate()
        .filter(|(_, i)| i.op == Opcode::GET)
        .map(|(pos, _)| pos)
        .collect();
    assert!(!gets.is_empty());
    assert!(
        gets.iter().any(|&pos| !has_skip_before(&lin, pos)),
        "statement-level skips only"
    );
}
