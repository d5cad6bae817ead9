//! Rill Compiler Middle-End
//!
//! The typed intermediate representation of the Rill compiler and the
//! passes that lower its high-level constructs into a form the code
//! generator consumes directly:
//!
//! - `show_lower`: resolves the overloaded `show` operator by
//!   synthesising per-type pretty-printer functions
//! - `rename`: makes every binder globally unique
//! - `await_lower`: converts async/await control flow into
//!   continuation-passing style
//!
//! The IR is produced once by the surface desugarer with both flavor
//! flags set; `pipeline::lower` applies the passes in order and hands a
//! fully lowered program (`has_await = has_show = false`) to the code
//! generator. Passes build IR exclusively through the `construct`
//! algebra, which maintains type and effect annotations as an invariant.
//!
//! # Error handling
//!
//! Contract violations *between* passes (wrong flavor, out-of-order
//! invocation) are reported as [`LowerError`] values. Malformed IR
//! *inside* a pass is a bug in an earlier stage and panics with an
//! `internal compiler error:` diagnostic naming the offending sub-term;
//! the middle-end has no partial-result mode.
//!
//! ```rust,ignore
//! use rillc::{LowerConfig, lower};
//!
//! let lowered = lower(prog, &LowerConfig::default())?;
//! codegen::compile(lowered)
//! ```

pub mod await_lower;
pub mod check;
pub mod config;
pub mod construct;
pub mod effect;
pub mod ir;
pub mod pipeline;
pub mod pretty;
pub mod rename;
pub mod show_lower;

pub use config::LowerConfig;
pub use construct::Names;
pub use ir::{Dec, Exp, Flavor, Pat, Prog};
pub use pipeline::{LowerError, lower};
