//! Name scopes.
//!
//! Locals and globals are plain insertion-ordered maps owned by one frame.
//! Builtins are shared by reference between a frame and every frame it calls,
//! so a builtin installed from any frame is visible along the whole chain.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use strum::IntoEnumIterator;

use crate::{builtins::Builtin, value::Value};

/// A name → value mapping in insertion order.
pub type Scope = IndexMap<String, Value>;

/// The builtins scope, shared between frames.
pub type SharedScope = Rc<RefCell<Scope>>;

/// Builds a builtins scope holding every native builtin.
#[must_use]
pub fn default_builtins() -> SharedScope {
    let scope = Builtin::iter()
        .map(|builtin| (builtin.name().to_owned(), Value::Builtin(builtin)))
        .collect();
    Rc::new(RefCell::new(scope))
}

/// Merges `locals` over `globals`: the effective globals of a called frame.
#[must_use]
pub fn merged(globals: &Scope, locals: &Scope) -> Scope {
    let mut merged = globals.clone();
    merged.extend(locals.iter().map(|(name, value)| (name.clone(), value.clone())));
    merged
}

/// Read-only view over a stack of scopes, searched from the last layer back.
///
/// Lookups never copy the layers, so nothing read through the view can leak
/// back into a scope.
#[derive(Debug, Clone, Copy)]
pub struct Layers<'a> {
    layers: [&'a Scope; 3],
    extras: &'a [(&'a str, Value)],
}

impl<'a> Layers<'a> {
    /// Layers `builtins`, then `globals`, then `locals`, then `extras`.
    #[must_use]
    pub fn new(builtins: &'a Scope, globals: &'a Scope, locals: &'a Scope, extras: &'a [(&'a str, Value)]) -> Self {
        Self {
            layers: [builtins, globals, locals],
            extras,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        if let Some((_, value)) = self.extras.iter().rev().find(|(key, _)| *key == name) {
            return Some(value);
        }
        self.layers.iter().rev().find_map(|layer| layer.get(name))
    }
}
