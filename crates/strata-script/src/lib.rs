//! Configuration-script language for strata.
//!
//! Strata configuration sources are small trusted scripts, executed on
//! load, whose top-level bindings become override attributes:
//!
//! ```text
//! MODULE = "weather"
//!
//! BATCH_SIZE = 128
//! computed AVERAGE_TEMP_FEATURE = TODAYS_TEMP_FEATURE
//! cached NUM_FEATURES = int(TODAYS_TEMP_FEATURE) + 1
//! LEARNING_RATE, BATCH_SIZE = sweep("grid.progress", [1e-5, 1e-4], [64, 128])
//! ```
//!
//! This crate owns the language only: lexing, parsing, and expression
//! evaluation. Binding the results to a namespace, the reserved `MODULE`
//! declaration, and the `sweep`/`env` host functions all live in the
//! `strata` crate, which drives the evaluator through the [`Scope`] and
//! [`Host`] traits.

mod ast;
mod error;
mod eval;
mod lexer;
mod parser;

pub use ast::{BinaryOp, Expr, Script, Stmt, UnaryOp};
pub use error::{HostError, ScriptError};
pub use eval::{eval, Host, NoHost, Scope};
pub use parser::parse;
