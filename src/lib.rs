//! tyscript: a statically-typed TypeScript-like language compiler targeting
//! WebAssembly.
//!
//! This crate is the core lowering engine: given a fully resolved program
//! model, it walks declarations and expressions and emits a typed
//! intermediate representation, serialized to `.wasm` via `wasm-encoder`.
//!
//! # Architecture
//! - `types`: Semantic type lattice shared across all phases
//! - `ast`: Resolved syntax tree (the compiler's input)
//! - `element`: Named program elements and their flags
//! - `program`: The program oracle: element table, class arena, resolvers
//! - `module`: Typed IR tree, precompute pass, and binary serialization
//! - `compiler`: Declaration/statement/expression lowering, the numeric
//!   bridge, flow analysis, trampolines, and static memory layout
//! - `diagnostics`: The error/warning/info sink

pub mod ast;
pub mod compiler;
pub mod diagnostics;
pub mod element;
pub mod module;
pub mod program;
pub mod types;

pub use ast::Source;
pub use compiler::{compile_program, CompileResult, Compiler, Options};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use module::{EmitError, Module};
pub use program::Program;
pub use types::{Target, Type, TypeKind};
