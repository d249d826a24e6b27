mod common;

use common::*;
use tyscript::ast::{EnumDeclaration, EnumValueDeclaration, Expression, Modifiers, Statement};
use tyscript::module::Expr;

fn enum_decl(name: &str, values: Vec<(&str, Option<Expression>)>) -> Statement {
    Statement::Enum(EnumDeclaration {
        name: name.to_string(),
        modifiers: Modifiers::NONE,
        values: values
            .into_iter()
            .map(|(value_name, value)| EnumValueDeclaration {
                name: value_name.to_string(),
                value,
            })
            .collect(),
    })
}

#[test]
fn constant_small_global_inlines_sign_extended() {
    // const K: i8 = 200 precomputes to the i8 representation -56; the
    // global itself is never emitted and every read is the literal.
    let result = compile(vec![
        var("K", Some("i8"), Some(int(200)), Modifiers::CONST),
        exported_function("read", vec![], Some("i8"), vec![ret(ident("K"))]),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert!(!result.module.has_global("K"));

    let function = result.module.get_function("read").expect("read compiled");
    let body = format!("{:?}", function.body);
    assert!(body.contains("I32(-56)"), "reads inline the literal: {body}");
}

#[test]
fn non_constant_global_initializes_in_start() {
    // A global whose initializer does not fold becomes mutable, zero
    // initialized, and assigned at module start.
    let result = compile(vec![
        function(
            "source",
            Modifiers::DECLARE,
            vec![],
            Some("i32"),
            None,
        ),
        var("g", Some("i32"), Some(call("source", vec![])), Modifiers::LET),
        exported_function("read", vec![], Some("i32"), vec![ret(ident("g"))]),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let global = result
        .module
        .globals()
        .iter()
        .find(|g| g.name == "g")
        .expect("g is emitted");
    assert!(global.mutable);
    assert_eq!(result.module.start(), Some("start"));
    let start = result.module.get_function("start").expect("start exists");
    let body = format!("{:?}", start.body);
    assert!(body.contains("SetGlobal"), "start assigns g: {body}");

    // Reads stay get-globals, never inline.
    let read = result.module.get_function("read").expect("read compiled");
    assert!(format!("{:?}", read.body).contains("GetGlobal"));
}

#[test]
fn const_with_unfoldable_initializer_warns() {
    let result = compile(vec![
        function("source", Modifiers::DECLARE, vec![], Some("i32"), None),
        var("c", Some("i32"), Some(call("source", vec![])), Modifiers::CONST),
        exported_function("read", vec![], Some("i32"), vec![ret(ident("c"))]),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert!(
        warnings(&result).iter().any(|w| w.contains("as mutable")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn mutable_imported_globals_are_rejected() {
    let result = compile(vec![
        var("m", Some("i32"), None, Modifiers::DECLARE),
        exported_function("read", vec![], Some("i32"), vec![ret(ident("m"))]),
    ]);
    assert!(
        errors(&result).iter().any(|e| e.contains("mutable imported")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn constant_imported_globals_become_global_imports() {
    let result = compile(vec![
        var(
            "limit",
            Some("i32"),
            None,
            Modifiers::DECLARE.with(Modifiers::CONST),
        ),
        exported_function("read", vec![], Some("i32"), vec![ret(ident("limit"))]),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert!(result
        .module
        .global_imports()
        .iter()
        .any(|g| g.name == "limit" && g.module == "env"));
}

#[test]
fn enum_values_count_up_and_inline() {
    let result = compile(vec![
        enum_decl("Color", vec![("Red", None), ("Green", None), ("Blue", Some(int(10))), ("Alpha", None)]),
        exported_function(
            "green",
            vec![],
            Some("i32"),
            vec![ret(Expression::PropertyAccess {
                target: Box::new(ident("Color")),
                property: "Green".to_string(),
            })],
        ),
        exported_function(
            "alpha",
            vec![],
            Some("i32"),
            vec![ret(Expression::PropertyAccess {
                target: Box::new(ident("Color")),
                property: "Alpha".to_string(),
            })],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let green = result.module.get_function("green").expect("green compiled");
    assert!(format!("{:?}", green.body).contains("I32(1)"));
    let alpha = result.module.get_function("alpha").expect("alpha compiled");
    assert!(format!("{:?}", alpha.body).contains("I32(11)"));
}

#[test]
fn enum_values_may_reference_earlier_values() {
    let result = compile(vec![
        enum_decl(
            "Bits",
            vec![
                ("One", Some(int(1))),
                (
                    "Two",
                    Some(Expression::binary(
                        tyscript::ast::BinaryOp::Add,
                        ident("One"),
                        int(1),
                    )),
                ),
            ],
        ),
        exported_function(
            "two",
            vec![],
            Some("i32"),
            vec![ret(Expression::PropertyAccess {
                target: Box::new(ident("Bits")),
                property: "Two".to_string(),
            })],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let two = result.module.get_function("two").expect("two compiled");
    assert!(format!("{:?}", two.body).contains("I32(2)"));
}

#[test]
fn forward_enum_references_are_rejected() {
    let result = compile(vec![
        enum_decl(
            "Bad",
            vec![
                ("A", Some(ident("B"))),
                ("B", Some(int(1))),
            ],
        ),
        exported_function(
            "a",
            vec![],
            Some("i32"),
            vec![ret(Expression::PropertyAccess {
                target: Box::new(ident("Bad")),
                property: "A".to_string(),
            })],
        ),
    ]);
    assert!(
        errors(&result)
            .iter()
            .any(|e| e.contains("before its initialization")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn exported_inlined_global_is_emitted_immutable() {
    let result = compile(vec![var(
        "VERSION",
        Some("i32"),
        Some(int(3)),
        Modifiers::CONST.with(Modifiers::EXPORT),
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let global = result
        .module
        .globals()
        .iter()
        .find(|g| g.name == "VERSION")
        .expect("VERSION emitted for export");
    assert!(!global.mutable);
    assert!(result
        .module
        .global_exports()
        .contains(&("VERSION".to_string(), "VERSION".to_string())));
}

#[test]
fn start_runs_top_level_statements_in_source_order() {
    use tyscript::ast::AssignOp;
    let result = compile(vec![
        var("a", Some("i32"), Some(int(0)), Modifiers::LET),
        Statement::Expression(Expression::Assignment {
            op: AssignOp::Assign,
            target: Box::new(ident("a")),
            value: Box::new(int(1)),
        }),
        Statement::Expression(Expression::Assignment {
            op: AssignOp::Assign,
            target: Box::new(ident("a")),
            value: Box::new(int(2)),
        }),
        exported_function("read", vec![], Some("i32"), vec![ret(ident("a"))]),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let start = result.module.get_function("start").expect("start exists");
    match &start.body {
        Expr::Block { children, .. } => {
            assert_eq!(children.len(), 2, "two assignments in order");
        }
        other => panic!("expected block, got {other:?}"),
    }
}
