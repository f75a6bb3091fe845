//! Errors surfaced by model construction, context switches and queries.

use std::fmt;

use crate::{id::InvalidIdError, pin::ClockState};

/// The kind of item an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A hierarchy node.
    Node,
    /// A domain declared on a node.
    Domain,
    /// A register.
    Register,
    /// A named bit field of a register.
    Field,
    /// A pin.
    Pin,
    /// A pin group.
    PinGroup,
    /// A pin alias.
    Alias,
    /// A package.
    Package,
    /// A pin function.
    Function,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Node => "node",
            Self::Domain => "domain",
            Self::Register => "register",
            Self::Field => "field",
            Self::Pin => "pin",
            Self::PinGroup => "pin group",
            Self::Alias => "pin alias",
            Self::Package => "package",
            Self::Function => "function",
        };
        f.write_str(s)
    }
}

/// Why a bit access was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessViolation {
    /// The targeted bits include at least one bit that cannot be written.
    #[error("bit {position} is not writable")]
    NotWritable {
        /// Position of the first offending bit.
        position: usize,
    },
    /// The value does not fit the number of targeted bits.
    #[error("value {value:#x} does not fit in {width} bit(s)")]
    TooWide {
        /// The rejected value.
        value: u64,
        /// Width of the target.
        width: usize,
    },
}

/// Errors that can occur while building or querying a model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The identifier is unknown, or hidden by the current context.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// What was looked up.
        kind: ItemKind,
        /// The identifier that was looked up.
        id: String,
    },

    /// An address needs a domain and none could be resolved.
    #[error("address of register '{register}' is ambiguous without a domain (candidates: {candidates:?})")]
    AmbiguousDomain {
        /// The register being resolved.
        register: String,
        /// Domains that would disambiguate the lookup.
        candidates: Vec<String>,
    },

    /// The identifier is already taken in a scope requiring uniqueness.
    #[error("duplicate {kind} '{id}'")]
    DuplicateId {
        /// What was being declared.
        kind: ItemKind,
        /// The colliding identifier.
        id: String,
    },

    /// A write or value was rejected by the access policy or the field width.
    #[error("invalid access to '{target}': {violation}")]
    InvalidAccess {
        /// The register or field that was accessed.
        target: String,
        /// What went wrong.
        violation: AccessViolation,
    },

    /// A clock was started without any parameters ever being supplied.
    #[error("clock on pin '{pin}' has no parameters")]
    MissingParameters {
        /// The pin whose clock was started.
        pin: String,
    },

    /// An index or slice lies outside a collection.
    #[error("index {index} out of range for collection of size {size}")]
    IndexOutOfRange {
        /// The offending index (the exclusive end for slices).
        index: usize,
        /// The size of the collection.
        size: usize,
    },

    /// The clock operation is not valid in the clock's current state.
    #[error("cannot {operation} clock on pin '{pin}' while {state}")]
    InvalidClockTransition {
        /// The pin owning the clock.
        pin: String,
        /// The current clock state.
        state: ClockState,
        /// The rejected operation.
        operation: &'static str,
    },

    /// A declaration is structurally invalid.
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// An identifier failed validation.
    #[error(transparent)]
    InvalidId(#[from] InvalidIdError),
}

impl Error {
    pub(crate) fn not_found(kind: ItemKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn duplicate(kind: ItemKind, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            kind,
            id: id.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
