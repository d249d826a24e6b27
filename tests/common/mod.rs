//! Shared fixture builders for the integration tests. Programs are built
//! directly as resolved syntax trees, the same way the compiler receives
//! them from the frontend.
#![allow(dead_code)]

use tyscript::ast::{
    Expression, FunctionDeclaration, Modifiers, ParameterDeclaration, Source, Statement, TypeNode,
};
use tyscript::compiler::{compile_program, CompileResult, Options};
use tyscript::diagnostics::Severity;
use tyscript::{Program, Target};

pub fn entry(path: &str, statements: Vec<Statement>) -> Source {
    Source {
        normalized_path: path.to_string(),
        is_entry: true,
        statements,
    }
}

pub fn compile(statements: Vec<Statement>) -> CompileResult {
    compile_sources(vec![entry("main", statements)], Options::default())
}

pub fn compile_sources(sources: Vec<Source>, options: Options) -> CompileResult {
    let program = Program::new(sources, options.target);
    compile_program(program, options)
}

pub fn errors(result: &CompileResult) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect()
}

pub fn warnings(result: &CompileResult) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .map(|d| d.message.clone())
        .collect()
}

pub fn param(name: &str, ty: &str) -> ParameterDeclaration {
    ParameterDeclaration {
        name: name.to_string(),
        type_node: TypeNode::named(ty),
        initializer: None,
        is_rest: false,
    }
}

pub fn optional_param(name: &str, ty: &str, default: Expression) -> ParameterDeclaration {
    ParameterDeclaration {
        name: name.to_string(),
        type_node: TypeNode::named(ty),
        initializer: Some(default),
        is_rest: false,
    }
}

pub fn function(
    name: &str,
    modifiers: Modifiers,
    parameters: Vec<ParameterDeclaration>,
    return_type: Option<&str>,
    body: Option<Vec<Statement>>,
) -> Statement {
    Statement::Function(FunctionDeclaration {
        name: name.to_string(),
        modifiers,
        type_parameters: vec![],
        parameters,
        return_type: return_type.map(TypeNode::named),
        body,
    })
}

pub fn exported_function(
    name: &str,
    parameters: Vec<ParameterDeclaration>,
    return_type: Option<&str>,
    body: Vec<Statement>,
) -> Statement {
    function(name, Modifiers::EXPORT, parameters, return_type, Some(body))
}

pub fn int(value: u64) -> Expression {
    Expression::Integer(value)
}

pub fn ident(name: &str) -> Expression {
    Expression::ident(name)
}

pub fn ret(value: Expression) -> Statement {
    Statement::Return(Some(value))
}

pub fn var(name: &str, ty: Option<&str>, initializer: Option<Expression>, modifiers: Modifiers) -> Statement {
    Statement::Variable(tyscript::ast::VariableStatement {
        modifiers,
        declarations: vec![tyscript::ast::VariableDeclaration {
            name: name.to_string(),
            type_node: ty.map(TypeNode::named),
            initializer,
        }],
    })
}

pub fn call(name: &str, arguments: Vec<Expression>) -> Expression {
    Expression::Call {
        callee: Box::new(ident(name)),
        type_arguments: vec![],
        arguments,
    }
}
