mod common;

use common::*;
use tyscript::ast::{
    Expression, ExportMember, Modifiers, NamespaceDeclaration, Source, Statement,
};
use tyscript::compiler::Options;

#[test]
fn imports_compile_the_target_source_first() {
    let library = Source {
        normalized_path: "lib".to_string(),
        is_entry: false,
        statements: vec![exported_function("helper", vec![], Some("i32"), vec![ret(int(7))])],
    };
    let main = entry(
        "main",
        vec![
            Statement::Import { path: "lib".to_string() },
            exported_function("run", vec![], Some("i32"), vec![ret(call("helper", vec![]))]),
        ],
    );
    let result = compile_sources(vec![main, library], Options::default());
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert!(result.module.get_function("helper").is_some());
    assert!(result.module.get_function("run").is_some());
}

#[test]
fn sources_compile_at_most_once() {
    let library = Source {
        normalized_path: "lib".to_string(),
        is_entry: false,
        statements: vec![exported_function("helper", vec![], Some("i32"), vec![ret(int(7))])],
    };
    let main = entry(
        "main",
        vec![
            Statement::Import { path: "lib".to_string() },
            Statement::Import { path: "lib".to_string() },
            exported_function("run", vec![], Some("i32"), vec![ret(call("helper", vec![]))]),
        ],
    );
    let result = compile_sources(vec![main, library], Options::default());
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let count = result
        .module
        .functions()
        .iter()
        .filter(|f| f.name == "helper")
        .count();
    assert_eq!(count, 1, "no declaration is double-emitted");
}

#[test]
fn reexports_compile_and_rename() {
    let library = Source {
        normalized_path: "lib".to_string(),
        is_entry: false,
        statements: vec![exported_function("helper", vec![], Some("i32"), vec![ret(int(7))])],
    };
    let main = entry(
        "main",
        vec![Statement::Export {
            members: vec![ExportMember {
                name: "helper".to_string(),
                as_name: Some("renamed".to_string()),
            }],
            path: Some("lib".to_string()),
        }],
    );
    let result = compile_sources(vec![main, library], Options::default());
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert!(result
        .module
        .function_exports()
        .contains(&("renamed".to_string(), "helper".to_string())));
}

#[test]
fn unknown_import_paths_are_reported() {
    let result = compile(vec![Statement::Import {
        path: "missing".to_string(),
    }]);
    assert!(
        errors(&result).iter().any(|e| e.contains("cannot find source")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn namespace_members_resolve_inside_and_outside() {
    let math = Statement::Namespace(NamespaceDeclaration {
        name: "math".to_string(),
        modifiers: Modifiers::NONE,
        members: vec![
            var("BASE", Some("i32"), Some(int(10)), Modifiers::CONST),
            function(
                "scaled",
                Modifiers::EXPORT,
                vec![param("v", "i32")],
                Some("i32"),
                Some(vec![ret(Expression::binary(
                    tyscript::ast::BinaryOp::Mul,
                    ident("v"),
                    ident("BASE"),
                ))]),
            ),
        ],
    });
    let result = compile(vec![
        math,
        exported_function(
            "run",
            vec![],
            Some("i32"),
            vec![ret(Expression::Call {
                callee: Box::new(Expression::PropertyAccess {
                    target: Box::new(ident("math")),
                    property: "scaled".to_string(),
                }),
                type_arguments: vec![],
                arguments: vec![int(3)],
            })],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let scaled = result.module.get_function("math.scaled").expect("compiled");
    // BASE folded and inlined inside the namespace function.
    assert!(format!("{:?}", scaled.body).contains("I32(10)"));
}

#[test]
fn interfaces_are_refused_at_the_top_level() {
    let result = compile(vec![Statement::Interface {
        name: "Shape".to_string(),
    }]);
    assert!(
        errors(&result).iter().any(|e| e.contains("not supported")),
        "{:?}",
        result.diagnostics
    );
}

#[test]
fn function_references_share_table_indices() {
    use tyscript::ast::TypeNode;
    let result = compile(vec![
        function("cb", Modifiers::NONE, vec![], Some("i32"), Some(vec![ret(int(3))])),
        exported_function(
            "pick",
            vec![],
            Some("i32"),
            vec![
                Statement::Variable(tyscript::ast::VariableStatement {
                    modifiers: Modifiers::LET,
                    declarations: vec![tyscript::ast::VariableDeclaration {
                        name: "f".to_string(),
                        type_node: Some(TypeNode::Function {
                            parameters: vec![],
                            return_type: Box::new(TypeNode::named("i32")),
                        }),
                        initializer: Some(ident("cb")),
                    }],
                }),
                ret(Expression::Call {
                    callee: Box::new(ident("f")),
                    type_arguments: vec![],
                    arguments: vec![],
                }),
            ],
        ),
        exported_function(
            "again",
            vec![],
            Some("i32"),
            vec![
                Statement::Variable(tyscript::ast::VariableStatement {
                    modifiers: Modifiers::LET,
                    declarations: vec![tyscript::ast::VariableDeclaration {
                        name: "f".to_string(),
                        type_node: Some(TypeNode::Function {
                            parameters: vec![],
                            return_type: Box::new(TypeNode::named("i32")),
                        }),
                        initializer: Some(ident("cb")),
                    }],
                }),
                ret(Expression::Call {
                    callee: Box::new(ident("f")),
                    type_arguments: vec![],
                    arguments: vec![],
                }),
            ],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    // The address was taken twice; the table holds the function once.
    assert_eq!(result.module.table(), &["cb".to_string()]);
    let body = format!("{:?}", result.module.get_function("pick").expect("compiled").body);
    assert!(body.contains("CallIndirect"), "{body}");
}
