//! Argument adaptation
//!
//! Reconciles the argument list supplied to `emit` with the parameter list
//! a handler declares. Surplus trailing arguments are dropped; missing
//! trailing parameters receive the zero value of their declared type. No
//! coercion happens between positions.

use crate::callback::{Arg, ParamSpec};

/// Map `args` onto `params` positionally, tolerating arity mismatch
pub fn adapt(params: &[ParamSpec], args: &[Arg]) -> Vec<Arg> {
    let supplied = args.len().min(params.len());
    let mut adapted = Vec::with_capacity(params.len());
    adapted.extend(args[..supplied].iter().cloned());
    adapted.extend(params[supplied..].iter().map(ParamSpec::zero));
    adapted
}
