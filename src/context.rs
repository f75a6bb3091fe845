//! The ambient selection every query resolves against.
//!
//! An [`AttributeContext`] records the active package, the active domain and
//! the active function of each pin. It is an explicit value passed into every
//! query, never global state. [`AttributeContext::scoped`] hands out a
//! [`ContextGuard`] that restores the previous selection when dropped, so a
//! temporary switch is undone on every exit path, including early returns
//! through `?` and unwinding panics.

use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use crate::id::Id;

/// The active package, domain and per-pin function selection.
///
/// An unset package is the unconstrained "die" view in which every pin is
/// visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeContext {
    package: Option<Id>,
    domain: Option<Id>,
    functions: BTreeMap<Id, Id>,
}

impl AttributeContext {
    /// Creates an empty context: no package, no domain, no functions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active package, if any.
    #[must_use]
    pub fn package(&self) -> Option<&Id> {
        self.package.as_ref()
    }

    /// Sets the active package without validation, returning the previous
    /// one.
    ///
    /// Use [`Model::select_package`](crate::Model::select_package) to check
    /// the package is declared.
    pub fn set_package(&mut self, package: Option<Id>) -> Option<Id> {
        tracing::debug!(?package, "package selected");
        std::mem::replace(&mut self.package, package)
    }

    /// The active domain, if any.
    #[must_use]
    pub fn domain(&self) -> Option<&Id> {
        self.domain.as_ref()
    }

    /// Sets the active domain without validation, returning the previous one.
    pub fn set_domain(&mut self, domain: Option<Id>) -> Option<Id> {
        tracing::debug!(?domain, "domain selected");
        std::mem::replace(&mut self.domain, domain)
    }

    /// The active function of `pin`, if any.
    #[must_use]
    pub fn function(&self, pin: &str) -> Option<&Id> {
        self.functions.get(pin)
    }

    /// Sets or clears the active function of `pin`, returning the previous
    /// one.
    pub fn set_function(&mut self, pin: Id, function: Option<Id>) -> Option<Id> {
        tracing::debug!(%pin, ?function, "function selected");
        match function {
            Some(function) => self.functions.insert(pin, function),
            None => self.functions.remove(pin.as_str()),
        }
    }

    /// Starts a scope whose changes are undone when the guard drops.
    pub fn scoped(&mut self) -> ContextGuard<'_> {
        let saved = self.clone();
        ContextGuard {
            ctx: self,
            saved: Some(saved),
        }
    }

    /// Runs `f` inside a scope, restoring the current selection afterwards
    /// whatever `f` returns.
    pub fn scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let mut guard = self.scoped();
        f(&mut guard)
    }
}

/// Restores the context it was created from when dropped.
///
/// Dereferences to the underlying [`AttributeContext`], so selections made
/// through the guard are visible to queries for the lifetime of the scope.
/// Guards nest: calling [`AttributeContext::scoped`] through a guard saves the
/// guard's current state.
#[derive(Debug)]
pub struct ContextGuard<'a> {
    ctx: &'a mut AttributeContext,
    saved: Option<AttributeContext>,
}

impl Deref for ContextGuard<'_> {
    type Target = AttributeContext;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.ctx = saved;
        }
    }
}
