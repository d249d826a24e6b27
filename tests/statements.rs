mod common;

use common::*;
use tyscript::ast::{BinaryOp, Expression, Modifiers, Statement, SwitchCase};
use tyscript::module::{Expr, NativeType};

fn body_of(result: &tyscript::compiler::CompileResult, name: &str) -> String {
    format!(
        "{:?}",
        result.module.get_function(name).expect("function compiled").body
    )
}

#[test]
fn const_locals_with_foldable_initializers_become_virtual() {
    let result = compile(vec![exported_function(
        "virt",
        vec![],
        Some("i32"),
        vec![
            var("x", Some("i32"), Some(int(3)), Modifiers::CONST),
            ret(Expression::binary(BinaryOp::Add, ident("x"), ident("x"))),
        ],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let function = result.module.get_function("virt").expect("compiled");
    // No slot was allocated; reads expanded to the literal.
    assert!(function.locals.is_empty());
    assert!(format!("{:?}", function.body).contains("I32(3)"));
    assert!(!format!("{:?}", function.body).contains("GetLocal"));
}

#[test]
fn assigning_to_a_const_local_is_rejected() {
    use tyscript::ast::AssignOp;
    let result = compile(vec![exported_function(
        "frozen",
        vec![],
        None,
        vec![
            var("x", Some("i32"), Some(int(3)), Modifiers::CONST),
            Statement::Expression(Expression::Assignment {
                op: AssignOp::Assign,
                target: Box::new(ident("x")),
                value: Box::new(int(4)),
            }),
        ],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("cannot assign to constant")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn duplicate_locals_in_one_scope_are_rejected() {
    let result = compile(vec![exported_function(
        "dup",
        vec![],
        None,
        vec![
            var("x", Some("i32"), Some(int(1)), Modifiers::LET),
            var("x", Some("i32"), Some(int(2)), Modifiers::LET),
        ],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("duplicate local")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn block_scopes_allow_shadowing() {
    let result = compile(vec![exported_function(
        "shadow",
        vec![],
        Some("i32"),
        vec![
            var("x", Some("i32"), Some(int(1)), Modifiers::LET),
            Statement::Block(vec![var("x", Some("i32"), Some(int(2)), Modifiers::LET)]),
            ret(ident("x")),
        ],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let function = result.module.get_function("shadow").expect("compiled");
    // Two slots: the outer x and the shadowing one.
    assert_eq!(function.locals.len(), 2);
}

#[test]
fn a_switch_compares_through_a_temp_local() {
    let result = compile(vec![exported_function(
        "dispatch",
        vec![param("v", "i32")],
        Some("i32"),
        vec![Statement::Switch {
            condition: ident("v"),
            cases: vec![
                SwitchCase {
                    label: Some(int(1)),
                    statements: vec![ret(int(10))],
                },
                SwitchCase {
                    label: Some(int(2)),
                    statements: vec![ret(int(20))],
                },
                SwitchCase {
                    label: None,
                    statements: vec![ret(int(0))],
                },
            ],
        }],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let body = body_of(&result, "dispatch");
    assert!(body.contains("case0|0"), "{body}");
    assert!(body.contains("case1|0"), "{body}");
    assert!(body.contains("break|0"), "{body}");
    assert!(body.contains("SetLocal"), "{body}");
    let function = result.module.get_function("dispatch").expect("compiled");
    assert_eq!(function.locals, vec![NativeType::I32]);
}

#[test]
fn empty_statements_disappear() {
    let result = compile(vec![exported_function(
        "quiet",
        vec![],
        None,
        vec![Statement::Empty, Statement::Empty],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let function = result.module.get_function("quiet").expect("compiled");
    match &function.body {
        Expr::Block { children, .. } => assert!(children.is_empty()),
        other => panic!("expected a block, got {other:?}"),
    }
}

#[test]
fn expression_statements_drop_their_value() {
    let result = compile(vec![
        function(
            "produce",
            Modifiers::NONE,
            vec![],
            Some("i32"),
            Some(vec![ret(int(5))]),
        ),
        exported_function(
            "consume",
            vec![],
            None,
            vec![Statement::Expression(call("produce", vec![]))],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert!(body_of(&result, "consume").contains("Drop"));
}

#[test]
fn temp_locals_are_pooled_per_function() {
    use tyscript::ast::PostfixOp;
    // Two postfix increments in sequence reuse one released temp slot.
    let result = compile(vec![exported_function(
        "steps",
        vec![],
        Some("i32"),
        vec![
            var("x", Some("i32"), Some(int(0)), Modifiers::LET),
            var(
                "a",
                Some("i32"),
                Some(Expression::Postfix {
                    op: PostfixOp::Increment,
                    operand: Box::new(ident("x")),
                }),
                Modifiers::LET,
            ),
            var(
                "b",
                Some("i32"),
                Some(Expression::Postfix {
                    op: PostfixOp::Increment,
                    operand: Box::new(ident("x")),
                }),
                Modifiers::LET,
            ),
            ret(Expression::binary(BinaryOp::Add, ident("a"), ident("b"))),
        ],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let function = result.module.get_function("steps").expect("compiled");
    // x, a, b, and a single shared temp.
    assert_eq!(function.locals.len(), 4);
}

#[test]
fn loop_continue_targets_sit_before_incrementor_and_condition() {
    use tyscript::ast::AssignOp;
    // In `for`, continue exits a body block that closes before the
    // incrementor; in `do`, before the condition check. The back edge gets
    // its own repeat label in both.
    let result = compile(vec![exported_function(
        "looping",
        vec![param("n", "i32")],
        None,
        vec![
            Statement::For {
                initializer: Some(Box::new(var("i", Some("i32"), Some(int(0)), Modifiers::LET))),
                condition: Some(Expression::binary(BinaryOp::Lt, ident("i"), ident("n"))),
                incrementor: Some(Expression::Assignment {
                    op: AssignOp::Add,
                    target: Box::new(ident("i")),
                    value: Box::new(int(1)),
                }),
                body: Box::new(Statement::Continue { label: None }),
            },
            Statement::Do {
                body: Box::new(Statement::Continue { label: None }),
                condition: Expression::False,
            },
        ],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let body = body_of(&result, "looping");
    assert!(body.contains("repeat|0"), "{body}");
    assert!(body.contains("continue|0"), "{body}");
    assert!(body.contains("repeat|1"), "{body}");
    assert!(body.contains("continue|1"), "{body}");
    // The continue branches target the inner blocks, never the loops.
    let loops: Vec<&str> = body.matches("Loop { label: \"repeat|").collect();
    assert_eq!(loops.len(), 2, "{body}");
}

#[test]
fn ternary_unifies_arm_types() {
    let result = compile(vec![exported_function(
        "pick",
        vec![param("c", "bool")],
        Some("f64"),
        vec![ret(Expression::Ternary {
            condition: Box::new(ident("c")),
            if_true: Box::new(Expression::Float(1.5)),
            if_false: Box::new(int(2)),
        })],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let body = body_of(&result, "pick");
    assert!(body.contains("F64(1.5)"), "{body}");
    assert!(body.contains("F64(2"), "{body}");
}
