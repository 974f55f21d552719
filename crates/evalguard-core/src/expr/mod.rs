//! The expression language: lexer, parser, value model and evaluator.
//!
//! Compilation is pure. A [`CompiledExpression`] holds an immutable syntax
//! tree and may be evaluated any number of times, against any context, from
//! any thread.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod value;

use std::sync::Arc;

pub use ast::Expr;
pub use error::{EvalError, EvalErrorKind, Frame};
pub use evaluator::{EvalLimits, Evaluator};
pub use value::Value;

/// Maximum height of a compiled syntax tree.
pub const MAX_TREE_DEPTH: usize = 256;

/// A parsed expression, ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: Arc<str>,
    ast: Arc<Expr>,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }
}

/// Parse `source` into a [`CompiledExpression`].
///
/// Performs no evaluation and touches no bindings.
pub fn compile(source: &str) -> Result<CompiledExpression, EvalError> {
    if source.trim().is_empty() {
        return Err(EvalError::syntax("expression is empty", 0));
    }
    let tokens = lexer::lex(source)?;
    let ast = parser::Parser::new(&tokens, source.len()).parse()?;
    if ast.depth() > MAX_TREE_DEPTH {
        return Err(EvalError::syntax(
            format!("expression nests deeper than {MAX_TREE_DEPTH} levels"),
            0,
        ));
    }
    Ok(CompiledExpression {
        source: Arc::from(source),
        ast: Arc::new(ast),
    })
}
