//! End-to-end checks: emitted modules must instantiate and run.

mod common;

use common::*;
use tyscript::ast::{BinaryOp, Expression, Modifiers, Statement};
use wasmtime::{Engine, Instance, Module, Store};

fn instantiate(bytes: &[u8]) -> (Store<()>, Instance) {
    let engine = Engine::default();
    let module = Module::new(&engine, bytes).expect("the emitted module validates");
    let mut store = Store::new(&engine, ());
    let instance = Instance::new(&mut store, &module, &[]).expect("instantiation succeeds");
    (store, instance)
}

#[test]
fn add_runs() {
    let result = compile(vec![exported_function(
        "add",
        vec![param("a", "i32"), param("b", "i32")],
        Some("i32"),
        vec![ret(Expression::binary(BinaryOp::Add, ident("a"), ident("b")))],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let add = instance
        .get_typed_func::<(i32, i32), i32>(&mut store, "add")
        .expect("add is exported");
    assert_eq!(add.call(&mut store, (2, 3)).expect("call succeeds"), 5);
}

#[test]
fn small_integer_wrapping_runs() {
    // u8 arithmetic wraps: 250 + 10 == 4.
    let result = compile(vec![exported_function(
        "wrapped",
        vec![],
        Some("u8"),
        vec![
            var("x", Some("u8"), Some(int(250)), Modifiers::LET),
            ret(Expression::binary(BinaryOp::Add, ident("x"), int(10))),
        ],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let wrapped = instance
        .get_typed_func::<(), i32>(&mut store, "wrapped")
        .expect("wrapped is exported");
    assert_eq!(wrapped.call(&mut store, ()).expect("call succeeds"), 4);
}

#[test]
fn trampolines_fill_defaults_at_runtime() {
    let result = compile(vec![
        function(
            "g",
            Modifiers::NONE,
            vec![param("a", "i32"), optional_param("b", "i32", int(5))],
            Some("i32"),
            Some(vec![ret(Expression::binary(BinaryOp::Add, ident("a"), ident("b")))]),
        ),
        exported_function("partial", vec![], Some("i32"), vec![ret(call("g", vec![int(1)]))]),
        exported_function(
            "full",
            vec![],
            Some("i32"),
            vec![ret(call("g", vec![int(1), int(10)]))],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let partial = instance
        .get_typed_func::<(), i32>(&mut store, "partial")
        .expect("partial is exported");
    assert_eq!(partial.call(&mut store, ()).expect("call succeeds"), 6);
    let full = instance
        .get_typed_func::<(), i32>(&mut store, "full")
        .expect("full is exported");
    assert_eq!(full.call(&mut store, ()).expect("call succeeds"), 11);
}

#[test]
fn the_start_function_runs_top_level_code() {
    use tyscript::ast::AssignOp;
    let result = compile(vec![
        var("counter", Some("i32"), Some(int(0)), Modifiers::LET),
        Statement::Expression(Expression::Assignment {
            op: AssignOp::Add,
            target: Box::new(ident("counter")),
            value: Box::new(int(41)),
        }),
        Statement::Expression(Expression::Assignment {
            op: AssignOp::Add,
            target: Box::new(ident("counter")),
            value: Box::new(int(1)),
        }),
        exported_function("read", vec![], Some("i32"), vec![ret(ident("counter"))]),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let read = instance
        .get_typed_func::<(), i32>(&mut store, "read")
        .expect("read is exported");
    assert_eq!(read.call(&mut store, ()).expect("call succeeds"), 42);
}

#[test]
fn loops_and_switches_run() {
    use tyscript::ast::{AssignOp, SwitchCase};
    let result = compile(vec![
        exported_function(
            "triangle",
            vec![param("n", "i32")],
            Some("i32"),
            vec![
                var("total", Some("i32"), Some(int(0)), Modifiers::LET),
                Statement::For {
                    initializer: Some(Box::new(var("i", Some("i32"), Some(int(1)), Modifiers::LET))),
                    condition: Some(Expression::binary(BinaryOp::Le, ident("i"), ident("n"))),
                    incrementor: Some(Expression::Assignment {
                        op: AssignOp::Add,
                        target: Box::new(ident("i")),
                        value: Box::new(int(1)),
                    }),
                    body: Box::new(Statement::Expression(Expression::Assignment {
                        op: AssignOp::Add,
                        target: Box::new(ident("total")),
                        value: Box::new(ident("i")),
                    })),
                },
                ret(ident("total")),
            ],
        ),
        exported_function(
            "classify",
            vec![param("v", "i32")],
            Some("i32"),
            vec![Statement::Switch {
                condition: ident("v"),
                cases: vec![
                    SwitchCase {
                        label: Some(int(1)),
                        statements: vec![ret(int(100))],
                    },
                    SwitchCase {
                        label: Some(int(2)),
                        statements: vec![ret(int(200))],
                    },
                    SwitchCase {
                        label: None,
                        statements: vec![ret(int(0))],
                    },
                ],
            }],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let triangle = instance
        .get_typed_func::<i32, i32>(&mut store, "triangle")
        .expect("triangle is exported");
    assert_eq!(triangle.call(&mut store, 5).expect("call succeeds"), 15);
    let classify = instance
        .get_typed_func::<i32, i32>(&mut store, "classify")
        .expect("classify is exported");
    assert_eq!(classify.call(&mut store, 1).expect("call succeeds"), 100);
    assert_eq!(classify.call(&mut store, 2).expect("call succeeds"), 200);
    assert_eq!(classify.call(&mut store, 9).expect("call succeeds"), 0);
}

#[test]
fn continue_runs_the_incrementor_and_the_condition() {
    use tyscript::ast::AssignOp;
    let result = compile(vec![
        // for (let i = 0; i < 10; i += 1) { if (i % 2 == 0) continue; total += i; }
        exported_function(
            "odd_sum",
            vec![],
            Some("i32"),
            vec![
                var("total", Some("i32"), Some(int(0)), Modifiers::LET),
                Statement::For {
                    initializer: Some(Box::new(var("i", Some("i32"), Some(int(0)), Modifiers::LET))),
                    condition: Some(Expression::binary(BinaryOp::Lt, ident("i"), int(10))),
                    incrementor: Some(Expression::Assignment {
                        op: AssignOp::Add,
                        target: Box::new(ident("i")),
                        value: Box::new(int(1)),
                    }),
                    body: Box::new(Statement::Block(vec![
                        Statement::If {
                            condition: Expression::binary(
                                BinaryOp::Eq,
                                Expression::binary(BinaryOp::Rem, ident("i"), int(2)),
                                int(0),
                            ),
                            if_true: Box::new(Statement::Continue { label: None }),
                            if_false: None,
                        },
                        Statement::Expression(Expression::Assignment {
                            op: AssignOp::Add,
                            target: Box::new(ident("total")),
                            value: Box::new(ident("i")),
                        }),
                    ])),
                },
                ret(ident("total")),
            ],
        ),
        // do { i += 1; continue; } while (i < 3)  →  runs exactly 3 times.
        exported_function(
            "counted",
            vec![],
            Some("i32"),
            vec![
                var("i", Some("i32"), Some(int(0)), Modifiers::LET),
                Statement::Do {
                    body: Box::new(Statement::Block(vec![
                        Statement::Expression(Expression::Assignment {
                            op: AssignOp::Add,
                            target: Box::new(ident("i")),
                            value: Box::new(int(1)),
                        }),
                        Statement::Continue { label: None },
                    ])),
                    condition: Expression::binary(BinaryOp::Lt, ident("i"), int(3)),
                },
                ret(ident("i")),
            ],
        ),
    ]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let odd_sum = instance
        .get_typed_func::<(), i32>(&mut store, "odd_sum")
        .expect("odd_sum is exported");
    assert_eq!(odd_sum.call(&mut store, ()).expect("call succeeds"), 25);
    let counted = instance
        .get_typed_func::<(), i32>(&mut store, "counted")
        .expect("counted is exported");
    assert_eq!(counted.call(&mut store, ()).expect("call succeeds"), 3);
}

#[test]
fn indirect_calls_run_through_the_table() {
    use tyscript::ast::TypeNode;
    let result = compile(vec![
        function("three", Modifiers::NONE, vec![], Some("i32"), Some(vec![ret(int(3))])),
        exported_function(
            "dispatch",
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
                        initializer: Some(ident("three")),
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
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let dispatch = instance
        .get_typed_func::<(), i32>(&mut store, "dispatch")
        .expect("dispatch is exported");
    assert_eq!(dispatch.call(&mut store, ()).expect("call succeeds"), 3);
}

#[test]
fn string_data_lands_in_memory() {
    let result = compile(vec![exported_function(
        "greet",
        vec![],
        Some("usize"),
        vec![ret(Expression::Str("hi".to_string()))],
    )]);
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    let bytes = result.module.emit().expect("emission succeeds");
    let (mut store, instance) = instantiate(&bytes);
    let greet = instance
        .get_typed_func::<(), i32>(&mut store, "greet")
        .expect("greet is exported");
    let offset = greet.call(&mut store, ()).expect("call succeeds");
    let memory = instance.get_memory(&mut store, "memory").expect("memory is exported");
    let mut header = [0u8; 4];
    memory
        .read(&store, offset as usize, &mut header)
        .expect("the offset is in bounds");
    assert_eq!(u32::from_le_bytes(header), 2, "length prefix");
    let mut unit = [0u8; 2];
    memory
        .read(&store, offset as usize + 4, &mut unit)
        .expect("in bounds");
    assert_eq!(u16::from_le_bytes(unit), b'h' as u16);
}
