use elk_core::ast::lexer::LexError;
use elk_core::ast::parser::{ParseError, parse};
use elk_core::ast::{
    BinaryOperator, CompTrailer, DollarFlags, ExprData, SeqItem, SeqKind,
    StmtData, pretty,
};
use elk_core::logger::init_logger_debug;
use elk_core::serialization::Value;
use indoc::indoc;

fn statements(source: &str) -> Vec<elk_core::ast::Stmt> {
    match parse(source).unwrap().data {
        StmtData::Block(stmts) => stmts,
        other => panic!("expected a block, got {other:?}"),
    }
}

fn single_expr(source: &str) -> elk_core::ast::Expr {
    let stmts = statements(source);
    assert_eq!(stmts.len(), 1, "expected one statement in {source:?}");
    match &stmts[0].data {
        StmtData::Expr(expr) => expr.clone(),
        other => panic!("expected an expression statement, got {other:?}"),
    }
}

#[test]
fn empty_programs_parse() {
    init_logger_debug();
    for source in ["", "\n", "\n\n", "\n \n\n   \n\n "] {
        let stmts = statements(source);
        assert!(stmts.is_empty(), "expected no statements for {source:?}");
    }
}

#[test]
fn lambdas_nest_to_the_right() {
    init_logger_debug();
    assert_eq!(
        parse(r"\\x -> \\y -> x + y").unwrap(),
        parse(r"\\x -> (\\y -> (x + y))").unwrap()
    );
}

#[test]
fn ternary_is_right_associative() {
    init_logger_debug();
    assert_eq!(
        parse(r"1 if 2 else 4 if 5 else 6").unwrap(),
        parse(r"1 if 2 else (4 if 5 else 6)").unwrap()
    );
    assert_eq!(
        parse(r"1 if 2 if 4 else 5 else 6").unwrap(),
        parse(r"1 if (2 if 4 else 5) else 6").unwrap()
    );
}

#[test]
fn lambda_body_extends_over_ternary() {
    init_logger_debug();
    assert_eq!(
        parse(r"\\x -> x if y else 2").unwrap(),
        parse(r"\\x -> (x if y else 2)").unwrap()
    );
}

#[test]
fn arithmetic_precedence() {
    init_logger_debug();
    assert_eq!(
        parse("1 + 2 * 3").unwrap(),
        parse("1 + (2 * 3)").unwrap()
    );
    assert_eq!(
        parse("2 ** 3 ** 4").unwrap(),
        parse("2 ** (3 ** 4)").unwrap()
    );
    assert_eq!(
        parse("-x ** 2").unwrap(),
        parse("-(x ** 2)").unwrap()
    );
    assert_eq!(
        parse("not a and b or c").unwrap(),
        parse("((not a) and b) or c").unwrap()
    );
    assert_eq!(
        parse("1 + 2 == 3 and true").unwrap(),
        parse("((1 + 2) == 3) and true").unwrap()
    );
    assert_eq!(
        parse("x :+ 1 + 2").unwrap(),
        parse("x :+ (1 + 2)").unwrap()
    );
}

#[test]
fn comparisons_do_not_chain() {
    init_logger_debug();
    assert!(matches!(
        parse("1 < 2 < 3"),
        Err(ParseError::Invalid(_))
    ));
}

#[test]
fn dollar_chain_binds_longest() {
    init_logger_debug();
    let expr = single_expr("$a.b.c");
    let ExprData::DollarName(parts, flags) = &expr.data else {
        panic!("expected a dollar name, got {:?}", expr.data);
    };
    assert_eq!(parts.len(), 3);
    assert_eq!(*flags, DollarFlags::default());
    assert_eq!(
        parts[0].data,
        ExprData::Literal(Value::from("a"))
    );
    assert_eq!(
        parts[2].data,
        ExprData::Literal(Value::from("c"))
    );
}

#[test]
fn dollar_flags_and_subscripts() {
    init_logger_debug();
    let expr = single_expr("$a[k].b@partial");
    let ExprData::DollarName(parts, flags) = &expr.data else {
        panic!("expected a dollar name, got {:?}", expr.data);
    };
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[1].data, ExprData::Name("k".to_owned()));
    assert!(flags.partial);
}

#[test]
fn augmented_assignment_desugars() {
    init_logger_debug();
    assert_eq!(parse("x += 1").unwrap(), parse("x = x + 1").unwrap());
    assert_eq!(parse("x **= 2").unwrap(), parse("x = x ** 2").unwrap());
}

#[test]
fn augmented_dollar_assignment_desugars() {
    init_logger_debug();
    let stmts = statements("$k += 1");
    let StmtData::DollarSet {
        parts,
        value,
        flags,
    } = &stmts[0].data
    else {
        panic!("expected a dollar set, got {:?}", stmts[0].data);
    };
    assert_eq!(parts.len(), 1);
    assert!(flags.modification);
    assert!(!flags.partial);
    let ExprData::Binop(BinaryOperator::Add, old, _) = &value.data else {
        panic!("expected an addition, got {:?}", value.data);
    };
    let ExprData::DollarName(old_parts, old_flags) = &old.data else {
        panic!("expected a dollar read, got {:?}", old.data);
    };
    assert_eq!(old_parts.len(), 1);
    assert_eq!(*old_flags, DollarFlags::PARTIAL);
}

#[test]
fn def_is_assignment_sugar() {
    init_logger_debug();
    let stmts = statements(indoc! {"
        def add(x, y=1):
            return x + y
    "});
    let StmtData::Assign(name, func) = &stmts[0].data else {
        panic!("expected an assignment, got {:?}", stmts[0].data);
    };
    assert_eq!(name, "add");
    let ExprData::Func(params, body) = &func.data else {
        panic!("expected a function, got {:?}", func.data);
    };
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].name, "x");
    assert!(params[0].default.is_none());
    assert!(params[1].default.is_some());
    assert!(matches!(body.data, StmtData::Block(_)));
}

#[test]
fn comprehension_shape() {
    init_logger_debug();
    let expr = single_expr("[x * 2 for x in xs if x > 1]");
    let ExprData::SequenceLiteral(SeqKind::List, items) = &expr.data else {
        panic!("expected a list literal, got {:?}", expr.data);
    };
    assert_eq!(items.len(), 1);
    let SeqItem::Item(comp) = &items[0] else {
        panic!("expected a plain item");
    };
    let ExprData::Comp { head, trailers } = &comp.data else {
        panic!("expected a comprehension, got {:?}", comp.data);
    };
    assert!(matches!(**head, SeqItem::Item(_)));
    assert_eq!(trailers.len(), 2);
    assert!(matches!(trailers[0], CompTrailer::For { .. }));
    assert!(matches!(trailers[1], CompTrailer::If(_)));
}

#[test]
fn dict_comprehension_has_a_pair_head() {
    init_logger_debug();
    let expr = single_expr("{k: v * 2 for k in ks}");
    let ExprData::SequenceLiteral(SeqKind::Braces, items) = &expr.data
    else {
        panic!("expected a brace literal, got {:?}", expr.data);
    };
    let SeqItem::Item(comp) = &items[0] else {
        panic!("expected a plain item");
    };
    let ExprData::Comp { head, .. } = &comp.data else {
        panic!("expected a comprehension, got {:?}", comp.data);
    };
    assert!(matches!(**head, SeqItem::Pair(..)));
}

#[test]
fn elif_chains_nest_in_the_else_arm() {
    init_logger_debug();
    let source = indoc! {"
        if a:
            x = 1
        elif b:
            x = 2
        else:
            x = 3
    "};
    let stmts = statements(source);
    let StmtData::If { else_block, .. } = &stmts[0].data else {
        panic!("expected an if, got {:?}", stmts[0].data);
    };
    let StmtData::If {
        else_block: inner_else,
        ..
    } = &else_block.data
    else {
        panic!("expected an elif chain, got {:?}", else_block.data);
    };
    assert!(matches!(inner_else.data, StmtData::Block(_)));
}

#[test]
fn pretty_print_round_trips() {
    init_logger_debug();
    let sources = [
        "x = 1\n",
        "x = \"a\\nb\"\n",
        "y = a.b(1, c=2)[0]\n",
        "m = 1 if c else 2\n",
        "n = -x ** 2\n",
        "b = not a and c or d\n",
        "s = {1, 2}\n",
        "d = {}\n",
        "d = {1: 2, \"k\": v}\n",
        "l = [1, 2.5, true, false]\n",
        "xs = [x * 2 for x in ys if x > 1]\n",
        "d = {k: v * 2 for k in ks}\n",
        "g = \\\\x, y=2 -> x + y\n",
        "assert x == 1\n",
        "x += 1\n",
        "$a.b = 1\n",
        "$a.b@default = 1\n",
        "$k += 1\n",
        "v = $a.b.c@partial\n",
        "import a.b\n",
        "from a.b import x, y as z\n",
        "from m import *\n",
        indoc! {"
            def fib(n):
                if n <= 1:
                    return n
                return fib(n - 1) + fib(n - 2)
        "},
        indoc! {"
            while x < 10:
                x += 1
                if x == 5:
                    continue
                else:
                    pass
            for item in items:
                total = total + item
        "},
        indoc! {"
            if a:
                b = 1
            elif c:
                b = 2
            else:
                b = 3
        "},
    ];
    for source in sources {
        let first = parse(source).unwrap();
        let printed = pretty(&first);
        let reparsed = parse(&printed).unwrap_or_else(|e| {
            panic!("pretty output failed to parse: {e}\n{printed}")
        });
        assert_eq!(first, reparsed, "pretty round-trip for {source:?}");
    }
}

#[test]
fn lex_errors_surface_through_parse() {
    init_logger_debug();
    match parse("a = 1\n?\n") {
        Err(ParseError::Lex(LexError::IllegalChar { character, line })) => {
            assert_eq!(character, '?');
            assert_eq!(line, 2);
        }
        other => panic!("expected an illegal-char error, got {other:?}"),
    }
    assert!(matches!(
        parse("if a:\n        b\n   c\n"),
        Err(ParseError::Lex(LexError::InconsistentIndent { .. }))
    ));
}

#[test]
fn invalid_syntax_reports_the_offending_token() {
    init_logger_debug();
    assert!(matches!(parse("1 +"), Err(ParseError::Invalid(_))));
    assert!(matches!(parse("if x\n"), Err(ParseError::Invalid(_))));
    assert!(matches!(parse("x.y = 1\n"), Err(ParseError::Invalid(_))));
    assert!(matches!(parse("f(1,,2)\n"), Err(ParseError::Invalid(_))));
}
