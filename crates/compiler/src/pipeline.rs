//! Pass orchestration
//!
//! The middle-end applies its passes in a fixed order, checking the
//! flavor precondition at each entry:
//!
//! ```text
//! IR(has_await, has_show)
//!   -> show desugaring   -> IR(has_await)
//!   -> alpha-renaming    -> IR(has_await, unique binders)
//!   -> await lowering    -> IR(lowered)
//! ```
//!
//! Out-of-order invocation is a contract violation reported as a
//! [`LowerError`]; inconsistencies *inside* a pass are internal compiler
//! errors and panic instead (see the crate docs).
//!
//! Fresh-name counters are created here, once per compilation, and
//! threaded through the algebra and the passes; repeated compilations of
//! the same input therefore produce identical output.

use std::fmt;

use crate::config::LowerConfig;
use crate::construct::Names;
use crate::ir::{Flavor, Prog};
use crate::{await_lower, check, pretty, rename, show_lower};

/// Pipeline-level failures: contract violations between passes.
#[derive(Debug)]
pub enum LowerError {
    /// A pass was handed a program whose flavor does not satisfy the
    /// pass's precondition.
    FlavorMismatch {
        pass: &'static str,
        expected: &'static str,
        found: Flavor,
    },
    /// The IR checker rejected a pass's output (only produced when
    /// checking is enabled in the configuration).
    Check { pass: &'static str, message: String },
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowerError::FlavorMismatch {
                pass,
                expected,
                found,
            } => write!(
                f,
                "pass '{}' requires {}, got has_await={}, has_show={}",
                pass, expected, found.has_await, found.has_show
            ),
            LowerError::Check { pass, message } => {
                write!(f, "IR check failed after pass '{}': {}", pass, message)
            }
        }
    }
}

impl std::error::Error for LowerError {}

fn after_pass(pass: &'static str, prog: &Prog, config: &LowerConfig) -> Result<(), LowerError> {
    if config.dumps(pass) {
        tracing::debug!(pass, dump = %pretty::prog_to_sexp(prog), "IR dump");
    }
    if config.check {
        check::check_prog(prog).map_err(|message| LowerError::Check { pass, message })?;
        // Unique binders are established by the renaming pass and must be
        // preserved from there on.
        if pass != "show" {
            check::check_unique_binders(prog)
                .map_err(|message| LowerError::Check { pass, message })?;
        }
    }
    Ok(())
}

/// Run the full middle-end over a freshly desugared program.
pub fn lower(prog: Prog, config: &LowerConfig) -> Result<Prog, LowerError> {
    let mut names = Names::new();

    if !prog.flavor.has_show {
        return Err(LowerError::FlavorMismatch {
            pass: "show",
            expected: "has_show",
            found: prog.flavor,
        });
    }
    let prog = show_lower::transform(prog);
    after_pass("show", &prog, config)?;

    let prog = rename::transform(&mut names, prog);
    after_pass("rename", &prog, config)?;

    if !prog.flavor.has_await {
        return Err(LowerError::FlavorMismatch {
            pass: "await",
            expected: "has_await",
            found: prog.flavor,
        });
    }
    let prog = await_lower::transform(&mut names, prog);
    after_pass("await", &prog, config)?;

    debug_assert_eq!(prog.flavor, Flavor::lowered());
    Ok(prog)
}
