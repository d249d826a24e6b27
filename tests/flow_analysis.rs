mod common;

use common::*;
use tyscript::ast::{Expression, Statement, SwitchCase};
use tyscript::module::Expr;

fn block(statements: Vec<Statement>) -> Statement {
    Statement::Block(statements)
}

#[test]
fn an_if_with_both_arms_returning_proves_a_return() {
    let result = compile(vec![exported_function(
        "pick",
        vec![param("c", "bool")],
        Some("i32"),
        vec![Statement::If {
            condition: ident("c"),
            if_true: Box::new(block(vec![ret(int(1))])),
            if_false: Some(Box::new(block(vec![ret(int(2))]))),
        }],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn an_if_missing_an_arm_does_not_prove_a_return() {
    let result = compile(vec![exported_function(
        "partial",
        vec![param("c", "bool")],
        Some("i32"),
        vec![Statement::If {
            condition: ident("c"),
            if_true: Box::new(block(vec![ret(int(1))])),
            if_false: None,
        }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("return a value")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn a_while_loop_never_proves_a_return() {
    // Even a constant-true condition does not propagate RETURNS out of
    // `while`; only `for` with an omitted condition does.
    let result = compile(vec![exported_function(
        "spin",
        vec![],
        Some("i32"),
        vec![Statement::While {
            condition: Expression::True,
            body: Box::new(block(vec![ret(int(1))])),
        }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("return a value")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn an_unconditional_for_with_a_returning_body_proves_a_return() {
    let result = compile(vec![exported_function(
        "forever",
        vec![],
        Some("i32"),
        vec![Statement::For {
            initializer: None,
            condition: None,
            incrementor: None,
            body: Box::new(block(vec![ret(int(1))])),
        }],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    // The validator hint lands after the loop.
    let function = result.module.get_function("forever").expect("compiled");
    match &function.body {
        Expr::Block { children, .. } => {
            assert_eq!(children.last(), Some(&Expr::Unreachable));
        }
        other => panic!("expected a block body, got {other:?}"),
    }
}

#[test]
fn a_breaking_unconditional_for_does_not_prove_a_return() {
    let result = compile(vec![exported_function(
        "escapes",
        vec![],
        Some("i32"),
        vec![Statement::For {
            initializer: None,
            condition: None,
            incrementor: None,
            body: Box::new(block(vec![
                Statement::Break { label: None },
                ret(int(1)),
            ])),
        }]),
    ]);
    assert!(
        errors(&result).iter().any(|e| e.contains("return a value")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn a_do_body_that_returns_proves_a_return() {
    let result = compile(vec![exported_function(
        "once",
        vec![],
        Some("i32"),
        vec![Statement::Do {
            body: Box::new(block(vec![ret(int(1))])),
            condition: Expression::False,
        }],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn a_do_body_that_continues_past_its_return_does_not_prove_a_return() {
    // `continue` transfers to the condition check, so the trailing return
    // may never run.
    let result = compile(vec![exported_function(
        "skips",
        vec![param("c", "bool")],
        Some("i32"),
        vec![Statement::Do {
            body: Box::new(block(vec![
                Statement::Continue { label: None },
                ret(int(1)),
            ])),
            condition: ident("c"),
        }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("return a value")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn a_continuing_unconditional_for_does_not_prove_a_return() {
    let result = compile(vec![exported_function(
        "spins",
        vec![param("c", "bool")],
        Some("i32"),
        vec![Statement::For {
            initializer: None,
            condition: None,
            incrementor: None,
            body: Box::new(block(vec![
                Statement::If {
                    condition: ident("c"),
                    if_true: Box::new(Statement::Continue { label: None }),
                    if_false: None,
                },
                ret(int(1)),
            ])),
        }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("return a value")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn throw_terminates_the_path() {
    let result = compile(vec![exported_function(
        "fail",
        vec![],
        Some("i32"),
        vec![Statement::Throw(int(1))],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let function = result.module.get_function("fail").expect("compiled");
    assert!(format!("{:?}", function.body).contains("Unreachable"));
}

#[test]
fn a_switch_with_a_default_where_all_cases_return_proves_a_return() {
    let result = compile(vec![exported_function(
        "classify",
        vec![param("v", "i32")],
        Some("i32"),
        vec![Statement::Switch {
            condition: ident("v"),
            cases: vec![
                SwitchCase {
                    label: Some(int(0)),
                    statements: vec![ret(int(10))],
                },
                SwitchCase {
                    label: None,
                    statements: vec![ret(int(20))],
                },
            ],
        }],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
}

#[test]
fn a_switch_case_that_continues_does_not_prove_a_return() {
    // The continuing case never falls into the returning default; treating
    // it as fallthrough would fabricate an all-paths-return proof.
    let result = compile(vec![exported_function(
        "restarts",
        vec![param("v", "i32")],
        Some("i32"),
        vec![Statement::For {
            initializer: None,
            condition: None,
            incrementor: None,
            body: Box::new(Statement::Switch {
                condition: ident("v"),
                cases: vec![
                    SwitchCase {
                        label: Some(int(1)),
                        statements: vec![Statement::Continue { label: None }],
                    },
                    SwitchCase {
                        label: None,
                        statements: vec![ret(int(0))],
                    },
                ],
            }),
        }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("return a value")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn a_switch_with_a_breaking_case_does_not_prove_a_return() {
    let result = compile(vec![exported_function(
        "leaky",
        vec![param("v", "i32")],
        Some("i32"),
        vec![Statement::Switch {
            condition: ident("v"),
            cases: vec![
                SwitchCase {
                    label: Some(int(0)),
                    statements: vec![Statement::Break { label: None }],
                },
                SwitchCase {
                    label: None,
                    statements: vec![ret(int(20))],
                },
            ],
        }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("return a value")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn break_and_continue_need_an_enclosing_loop() {
    let result = compile(vec![exported_function(
        "loose",
        vec![],
        None,
        vec![Statement::Break { label: None }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("break outside")),
        "{:?}",
        result.diagnostics
    );

    let result = compile(vec![exported_function(
        "loose2",
        vec![],
        None,
        vec![Statement::Continue { label: None }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("continue outside")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn labeled_break_and_continue_are_refused() {
    let result = compile(vec![exported_function(
        "labeled",
        vec![],
        None,
        vec![Statement::While {
            condition: Expression::True,
            body: Box::new(Statement::Break {
                label: Some("outer".to_string()),
            }),
        }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("labeled break")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn loop_labels_use_the_break_continue_scheme() {
    let result = compile(vec![exported_function(
        "looped",
        vec![param("n", "i32")],
        None,
        vec![
            Statement::While {
                condition: ident("n"),
                body: Box::new(Statement::Break { label: None }),
            },
            Statement::While {
                condition: ident("n"),
                body: Box::new(Statement::Continue { label: None }),
            },
        ],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let body = format!(
        "{:?}",
        result.module.get_function("looped").expect("compiled").body
    );
    assert!(body.contains("break|0"), "{body}");
    assert!(body.contains("continue|1"), "{body}");
}

#[test]
fn try_catch_is_refused() {
    let result = compile(vec![exported_function(
        "guarded",
        vec![],
        None,
        vec![Statement::Try { body: vec![] }],
    )]);
    assert!(
        errors(&result).iter().any(|e| e.contains("try/catch")),
        "{:?}",
        result.diagnostics
    );
}
