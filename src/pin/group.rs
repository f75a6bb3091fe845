//! Pin group declarations and the collection view over resolved groups.
//!
//! Bit `n` of a driven or read value maps to one member according to the
//! group's endianness. Members past bit 63 carry 0.

use std::ops::RangeBounds;

use nonempty::NonEmpty;

use super::{Drivable, PinRef, PinState, check_fits};
use crate::{
    error::{Error, Result},
    id::Id,
    register::slice_bounds,
};

/// Which member of a group takes the least significant bit of a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endian {
    /// Member 0 takes bit 0.
    #[default]
    Little,
    /// Member 0 takes the most significant bit.
    Big,
}

/// Declaration of a pin group.
#[derive(Debug, Clone)]
pub struct GroupBuilder {
    pub(super) id: String,
    pub(super) members: Vec<(String, Option<String>)>,
    pub(super) size: Option<usize>,
    pub(super) endian: Endian,
    pub(super) package: Option<String>,
}

impl GroupBuilder {
    /// Declares group `id`, unqualified and little-endian.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            members: Vec::new(),
            size: None,
            endian: Endian::Little,
            package: None,
        }
    }

    /// Appends a pin or alias.
    #[must_use]
    pub fn member(mut self, id: &str) -> Self {
        self.members.push((id.to_string(), None));
        self
    }

    /// Appends a pin or alias that always acts with `function` inside this
    /// group.
    #[must_use]
    pub fn member_with_function(mut self, id: &str, function: &str) -> Self {
        self.members
            .push((id.to_string(), Some(function.to_string())));
        self
    }

    /// Sets the expected member count; without members, the group is filled
    /// with generated pins.
    #[must_use]
    pub const fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the endianness.
    #[must_use]
    pub const fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Makes this the definition used while `package` is active.
    #[must_use]
    pub fn package(mut self, package: &str) -> Self {
        self.package = Some(package.to_string());
        self
    }
}

#[derive(Debug)]
pub(crate) struct GroupDef {
    pub(crate) members: NonEmpty<Member>,
    pub(crate) endian: Endian,
}

#[derive(Debug)]
pub(crate) struct Member {
    pub(crate) pin: usize,
    pub(crate) function: Option<Id>,
}

/// An ordered view of pins: a resolved group, a slice of one, or an ad-hoc
/// selection.
///
/// Collections reference the model's pins; driving a collection drives the
/// pins themselves.
#[derive(Debug, Clone)]
pub struct PinCollection<'a> {
    id: Option<&'a Id>,
    members: Vec<PinRef<'a>>,
    endian: Endian,
}

impl<'a> PinCollection<'a> {
    pub(crate) const fn new(id: Option<&'a Id>, members: Vec<PinRef<'a>>, endian: Endian) -> Self {
        Self {
            id,
            members,
            endian,
        }
    }

    /// The group id, if the collection is a whole group.
    #[must_use]
    pub const fn id(&self) -> Option<&'a Id> {
        self.id
    }

    /// Number of pins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The endianness.
    #[must_use]
    pub const fn endian(&self) -> Endian {
        self.endian
    }

    /// The pin at member index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] past the end.
    pub fn get(&self, index: usize) -> Result<PinRef<'a>> {
        self.members
            .get(index)
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index,
                size: self.members.len(),
            })
    }

    /// An unnamed view of some members, keeping the endianness.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if the range ends past the
    /// collection.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<Self> {
        let range = slice_bounds(&range, self.members.len())?;
        Ok(Self::new(None, self.members[range].to_vec(), self.endian))
    }

    /// The members in declaration order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = PinRef<'a>> + '_ {
        self.members.iter().copied()
    }

    /// The state of each member in declaration order.
    #[must_use]
    pub fn states(&self) -> Vec<PinState> {
        self.iter().map(|pin| pin.state()).collect()
    }

    /// Member index paired with the value bit it carries.
    fn bits(&self) -> impl Iterator<Item = (PinRef<'a>, usize)> + '_ {
        let width = self.members.len();
        self.iter().enumerate().map(move |(i, pin)| {
            let bit = match self.endian {
                Endian::Little => i,
                Endian::Big => width - 1 - i,
            };
            (pin, bit)
        })
    }

    fn apply(&self, value: u64, state: fn(bool) -> PinState) -> Result<()> {
        let target = self.id.map_or("pins", Id::as_str);
        check_fits(target, value, self.members.len())?;
        for (pin, bit) in self.bits() {
            pin.set(state(shr(value, bit) & 1 == 1));
        }
        Ok(())
    }
}

impl Drivable for PinCollection<'_> {
    fn width(&self) -> usize {
        self.members.len()
    }

    fn drive(&self, value: u64) -> Result<()> {
        self.apply(value, PinState::Drive)
    }

    fn assert(&self, value: u64) -> Result<()> {
        self.apply(value, PinState::Compare)
    }

    fn dont_care(&self) {
        self.iter().for_each(|pin| pin.dont_care());
    }

    fn toggle(&self) {
        self.iter().for_each(|pin| pin.toggle());
    }

    fn reset(&self) {
        self.iter().for_each(|pin| Drivable::reset(&pin));
    }

    fn data(&self) -> u64 {
        self.bits()
            .fold(0, |acc, (pin, bit)| acc | shl(pin.data(), bit))
    }
}

fn shr(value: u64, bit: usize) -> u64 {
    u32::try_from(bit)
        .ok()
        .and_then(|bit| value.checked_shr(bit))
        .unwrap_or(0)
}

fn shl(value: u64, bit: usize) -> u64 {
    u32::try_from(bit)
        .ok()
        .and_then(|bit| value.checked_shl(bit))
        .unwrap_or(0)
}
