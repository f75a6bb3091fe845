use std::collections::BTreeMap;

use crate::{id::Id, meta::Metadata, register::BitOrder};

/// A named domain (bus, clock, ...) declared on a hierarchy node.
///
/// Descendants of the declaring node inherit it unless they declare a domain
/// with the same id themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    id: Id,
    /// Bit order of registers in this domain that do not declare their own.
    pub bit_order: Option<BitOrder>,
    /// Free-form properties.
    pub properties: Metadata,
}

impl Domain {
    /// Creates a domain with no ordering and no properties.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            bit_order: None,
            properties: Metadata::new(),
        }
    }

    /// Sets the bit order.
    #[must_use]
    pub const fn with_bit_order(mut self, bit_order: BitOrder) -> Self {
        self.bit_order = Some(bit_order);
        self
    }

    /// Sets the properties.
    #[must_use]
    pub fn with_properties(mut self, properties: Metadata) -> Self {
        self.properties = properties;
        self
    }

    /// The domain id.
    #[must_use]
    pub const fn id(&self) -> &Id {
        &self.id
    }
}

/// Base addresses declared on a node.
///
/// A node may declare a single unqualified base, a map of per-domain bases,
/// a default for that map, or any combination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BaseAddress {
    pub(crate) single: Option<u64>,
    pub(crate) by_domain: BTreeMap<Id, u64>,
    pub(crate) default: Option<u64>,
}

/// The outcome of a base address lookup on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Contribution {
    Address(u64),
    /// The node only has per-domain bases and no domain was given.
    NeedsDomain,
}

impl BaseAddress {
    /// Picks this node's contribution to an absolute address.
    ///
    /// Order: the entry for `domain`, the map default, the unqualified base,
    /// then zero.
    pub(crate) fn contribution(&self, domain: Option<&Id>) -> Contribution {
        if let Some(addr) = domain.and_then(|d| self.by_domain.get(d)) {
            return Contribution::Address(*addr);
        }
        if let Some(addr) = self.default.or(self.single) {
            return Contribution::Address(addr);
        }
        if domain.is_none() && !self.by_domain.is_empty() {
            return Contribution::NeedsDomain;
        }
        Contribution::Address(0)
    }
}
