//! Sticky key derivation.
//!
//! # Responsibilities
//! - Turn a route's declared sticky-key spec plus the request's parameters
//!   into zero or more concrete sticky values
//! - Keep multi-field session keys as a single stored string (joined with
//!   [`STICKY_VALUE_SEP`], declared order)
//!
//! # Design Decisions
//! - Pure and side-effect free; runs on every request
//! - A missing parameter simply contributes nothing: empty output means no
//!   stickiness is enforced for the request

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

/// Separator joining a tuple of parameter values into one sticky value.
pub const STICKY_VALUE_SEP: &str = ":";

/// Request parameters visible to derivation (query + form fields).
pub type Params = HashMap<String, String>;

/// Programmatic derivation hook for specs that cannot be expressed as
/// parameter names.
pub type DeriveFn = Arc<dyn Fn(&Params) -> Vec<String> + Send + Sync>;

/// Declares how sticky values are built for a route.
///
/// Deserialization (for config-declared routes) is untagged: a bare string
/// is a single parameter, an array of strings is a tuple (all present or
/// nothing, joined in declared order), and a nested array mixes specs.
#[derive(Clone, Deserialize)]
#[serde(untagged)]
pub enum StickySpec {
    /// Value of one named parameter; omitted when absent.
    Param(String),
    /// All named parameters must be present; their values join into one
    /// sticky value in declared order.
    Tuple(Vec<String>),
    /// Recursive concatenation of sub-spec results.
    Many(Vec<StickySpec>),
    /// Application-supplied derivation; its results are flattened in.
    #[serde(skip)]
    Derived(DeriveFn),
}

impl fmt::Debug for StickySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StickySpec::Param(name) => f.debug_tuple("Param").field(name).finish(),
            StickySpec::Tuple(names) => f.debug_tuple("Tuple").field(names).finish(),
            StickySpec::Many(specs) => f.debug_tuple("Many").field(specs).finish(),
            StickySpec::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Derive the sticky values for one request.
pub fn derive(spec: &StickySpec, params: &Params) -> Vec<String> {
    let mut values = Vec::new();
    collect(spec, params, &mut values);
    values
}

fn collect(spec: &StickySpec, params: &Params, out: &mut Vec<String>) {
    match spec {
        StickySpec::Param(name) => {
            if let Some(value) = params.get(name) {
                out.push(value.clone());
            }
        }
        StickySpec::Tuple(names) => {
            let mut parts = Vec::with_capacity(names.len());
            for name in names {
                match params.get(name) {
                    Some(value) => parts.push(value.as_str()),
                    // One absent field voids the whole tuple.
                    None => return,
                }
            }
            if !parts.is_empty() {
                out.push(parts.join(STICKY_VALUE_SEP));
            }
        }
        StickySpec::Many(specs) => {
            for sub in specs {
                collect(sub, params, out);
            }
        }
        StickySpec::Derived(f) => {
            out.extend(f(params));
        }
    }
}
