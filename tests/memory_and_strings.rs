mod common;

use common::*;
use tyscript::ast::{Expression, Modifiers, Statement};
use tyscript::compiler::Options;
use tyscript::module::ConstValue;
use tyscript::Target;

fn returns_string(name: &str, value: &str) -> Statement {
    exported_function(
        name,
        vec![],
        Some("usize"),
        vec![ret(Expression::Str(value.to_string()))],
    )
}

#[test]
fn identical_string_literals_share_one_segment() {
    // "hello" in two sources: one segment of 4 + 2*5 bytes, same offset.
    let result = compile_sources(
        vec![
            entry("a", vec![returns_string("from_a", "hello")]),
            entry("b", vec![returns_string("from_b", "hello")]),
        ],
        Options::default(),
    );
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let segments = result.module.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].data.len(), 4 + 2 * 5);
    assert_eq!(&segments[0].data[0..4], &5u32.to_le_bytes());

    let a = format!("{:?}", result.module.get_function("from_a").expect("compiled").body);
    let b = format!("{:?}", result.module.get_function("from_b").expect("compiled").body);
    assert_eq!(a, b, "both sites load the same offset");
}

#[test]
fn string_bytes_are_length_prefixed_utf16() {
    let result = compile(vec![returns_string("s", "hé")]);
    let segments = result.module.segments();
    assert_eq!(segments.len(), 1);
    let data = &segments[0].data;
    assert_eq!(&data[0..4], &2u32.to_le_bytes());
    assert_eq!(&data[4..6], &(b'h' as u16).to_le_bytes());
    assert_eq!(&data[6..8], &0x00e9u16.to_le_bytes());
}

#[test]
fn address_zero_stays_reserved() {
    let result = compile(vec![returns_string("s", "x")]);
    let segments = result.module.segments();
    assert!(segments[0].offset >= 4, "the first pointer is never handed out");
}

#[test]
fn heap_base_is_aligned_and_memory_sized() {
    let result = compile(vec![returns_string("s", "abc")]);
    let heap_base = result
        .module
        .globals()
        .iter()
        .find(|g| g.name == "HEAP_BASE")
        .expect("HEAP_BASE is emitted");
    assert!(!heap_base.mutable);
    match heap_base.init {
        ConstValue::I32(v) => assert_eq!(v % 4, 0, "aligned to pointer width"),
        other => panic!("expected an i32 HEAP_BASE, got {other:?}"),
    }
}

#[test]
fn wasm64_heap_base_is_pointer_wide() {
    let mut options = Options::default();
    options.target = Target::Wasm64;
    let result = compile_sources(vec![entry("main", vec![returns_string("s", "abc")])], options);
    let heap_base = result
        .module
        .globals()
        .iter()
        .find(|g| g.name == "HEAP_BASE")
        .expect("HEAP_BASE is emitted");
    assert!(matches!(heap_base.init, ConstValue::I64(v) if v % 8 == 0));
}

#[test]
fn no_memory_suppresses_the_memory_section() {
    let mut options = Options::default();
    options.no_memory = true;
    let result = compile_sources(
        vec![entry(
            "main",
            vec![exported_function("f", vec![], Some("i32"), vec![ret(int(1))])],
        )],
        options,
    );
    let bytes = result.module.emit().expect("emission succeeds");
    let wat = result.module.to_wat().expect("prints");
    assert!(bytes.len() > 8);
    assert!(!wat.contains("(memory"), "{wat}");
}

#[test]
fn memory_base_shifts_static_allocation() {
    let mut options = Options::default();
    options.memory_base = 1024;
    let result = compile_sources(vec![entry("main", vec![returns_string("s", "x")])], options);
    assert!(result.module.segments()[0].offset >= 1024);
}

#[test]
fn constant_array_literals_become_static_segments() {
    use tyscript::ast::{ClassDeclaration, ClassMember, FieldDeclaration, TypeNode, VariableDeclaration, VariableStatement};
    // A minimal contextual array class with one type parameter.
    let array_class = Statement::Class(ClassDeclaration {
        name: "Array".to_string(),
        modifiers: Modifiers::NONE,
        type_parameters: vec!["T".to_string()],
        extends: None,
        members: vec![ClassMember::Field(FieldDeclaration {
            name: "length".to_string(),
            modifiers: Modifiers::NONE,
            type_node: TypeNode::named("i32"),
            initializer: None,
        })],
    });
    let annotated = Statement::Variable(VariableStatement {
        modifiers: Modifiers::CONST,
        declarations: vec![VariableDeclaration {
            name: "DATA".to_string(),
            type_node: Some(TypeNode::Named {
                name: "Array".to_string(),
                arguments: vec![TypeNode::named("u8")],
            }),
            initializer: Some(Expression::Array(vec![int(1), int(2), int(200)])),
        }],
    });
    let result = compile(vec![
        array_class,
        annotated,
        exported_function(
            "data",
            vec![],
            Some("usize"),
            vec![ret(ident("DATA"))],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let segment = result
        .module
        .segments()
        .iter()
        .find(|s| s.data.len() == 3)
        .expect("three u8 elements");
    assert_eq!(segment.data, vec![1, 2, 200]);
}

#[test]
fn non_constant_array_literals_warn() {
    use tyscript::ast::{ClassDeclaration, TypeNode, VariableDeclaration, VariableStatement};
    let array_class = Statement::Class(ClassDeclaration {
        name: "Array".to_string(),
        modifiers: Modifiers::NONE,
        type_parameters: vec!["T".to_string()],
        extends: None,
        members: vec![],
    });
    let result = compile(vec![
        array_class,
        function("source", Modifiers::DECLARE, vec![], Some("i32"), None),
        Statement::Variable(VariableStatement {
            modifiers: Modifiers::CONST,
            declarations: vec![VariableDeclaration {
                name: "DATA".to_string(),
                type_node: Some(TypeNode::Named {
                    name: "Array".to_string(),
                    arguments: vec![TypeNode::named("i32")],
                }),
                initializer: Some(Expression::Array(vec![call("source", vec![])])),
            }],
        }),
        exported_function("data", vec![], Some("usize"), vec![ret(ident("DATA"))]),
    ]);
    assert!(
        warnings(&result)
            .iter()
            .any(|w| w.contains("non-constant elements")),
        "{:?}",
        result.diagnostics
    );
}
