//! Views over the bits of a register.
//!
//! A [`BitCollection`] is an ordered list of positions in one register. It
//! never copies bit state: reads and writes go straight to the register's
//! bits. Index 0 of a collection is its lowest position, so the collection
//! value is assembled LSB-first whatever the register's bit order.

use std::ops::{Bound, Range, RangeBounds};

use super::{Access, Bit, BitOrder, Field, RegisterRef};
use crate::{
    error::{AccessViolation, Error, Result},
    id::Id,
    meta::Metadata,
};

/// Read, write and read-marking operations shared by single bits and bit
/// collections.
pub trait BitAccess {
    /// Number of bits.
    fn width(&self) -> usize;

    /// The stored value, bit 0 first.
    fn data(&self) -> u64;

    /// Writes `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAccess`] if `value` is wider than the target
    /// or any targeted bit is not writable, including a write-once bit
    /// already written since reset. Nothing is written on failure.
    fn write(&self, value: u64) -> Result<()>;

    /// Sets the value a subsequent read should return and marks the bits for
    /// reading. Bypasses the access policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAccess`] if `value` is wider than the target.
    fn expect(&self, value: u64) -> Result<()>;

    /// Marks every readable bit for reading.
    fn mark_read(&self);

    /// Clears the pending-read flag of every bit.
    fn clear_read_flag(&self);

    /// Whether any bit is marked for reading.
    fn is_to_be_read(&self) -> bool;

    /// Restores reset values and clears pending reads.
    fn reset(&self);

    /// The reset value, bit 0 first.
    fn reset_value(&self) -> u64;
}

/// A view of one bit.
#[derive(Debug, Clone, Copy)]
pub struct BitRef<'a> {
    owner: RegisterRef<'a>,
    position: usize,
}

impl<'a> BitRef<'a> {
    fn bit(&self) -> &'a Bit {
        &self.owner.reg.bits[self.position]
    }

    fn collection(&self) -> BitCollection<'a> {
        BitCollection::new(self.owner, vec![self.position], None)
    }

    /// Position from the least significant bit.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// The field covering this bit, if any.
    #[must_use]
    pub fn field(&self) -> Option<&'a Id> {
        self.bit().field.as_ref()
    }

    /// The stored value.
    #[must_use]
    pub fn value(&self) -> bool {
        self.bit().data.get()
    }

    /// Access policy: field, then register bit default, then configuration.
    #[must_use]
    pub fn access(&self) -> Access {
        self.field_decl()
            .and_then(|f| f.access)
            .or(self.owner.reg.bit_access)
            .unwrap_or(self.owner.model.config().bit_access)
    }

    /// Metadata merged from the configured bit defaults, the register's bit
    /// defaults and the field.
    #[must_use]
    pub fn meta(&self) -> Metadata {
        let field = self.field_decl().map(|f| &f.meta);
        Metadata::resolve(
            [self.owner.model.config().bit_meta(), &self.owner.reg.bit_meta]
                .into_iter()
                .chain(field),
        )
    }

    fn field_decl(&self) -> Option<&'a Field> {
        let fields = &self.owner.reg.fields;
        self.bit().field.as_ref().and_then(|f| fields.get(f))
    }
}

impl BitAccess for BitRef<'_> {
    fn width(&self) -> usize {
        1
    }

    fn data(&self) -> u64 {
        u64::from(self.value())
    }

    fn write(&self, value: u64) -> Result<()> {
        self.collection().write(value)
    }

    fn expect(&self, value: u64) -> Result<()> {
        self.collection().expect(value)
    }

    fn mark_read(&self) {
        if self.access().is_readable() {
            self.bit().to_be_read.set(true);
        }
    }

    fn clear_read_flag(&self) {
        self.bit().to_be_read.set(false);
    }

    fn is_to_be_read(&self) -> bool {
        self.bit().to_be_read.get()
    }

    fn reset(&self) {
        let bit = self.bit();
        bit.data.set(bit.reset);
        bit.to_be_read.set(false);
        bit.written.set(false);
    }

    fn reset_value(&self) -> u64 {
        u64::from(self.bit().reset)
    }
}

/// An ordered view of some bits of one register.
#[derive(Debug, Clone)]
pub struct BitCollection<'a> {
    owner: RegisterRef<'a>,
    positions: Vec<usize>,
    field: Option<&'a Id>,
}

impl<'a> BitCollection<'a> {
    pub(crate) const fn new(
        owner: RegisterRef<'a>,
        positions: Vec<usize>,
        field: Option<&'a Id>,
    ) -> Self {
        Self {
            owner,
            positions,
            field,
        }
    }

    /// The register this collection views.
    #[must_use]
    pub const fn register(&self) -> RegisterRef<'a> {
        self.owner
    }

    /// The field this collection was selected by, if any.
    #[must_use]
    pub const fn field(&self) -> Option<&'a Id> {
        self.field
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Register positions in collection order.
    #[must_use]
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// The bit at collection index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] past the end of the collection.
    pub fn get(&self, index: usize) -> Result<BitRef<'a>> {
        let position = *self.positions.get(index).ok_or(Error::IndexOutOfRange {
            index,
            size: self.positions.len(),
        })?;
        Ok(self.bit_ref(position))
    }

    /// A sub-collection by collection index, referencing the same bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if the range ends past the
    /// collection.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<Self> {
        let range = slice_bounds(&range, self.positions.len())?;
        Ok(Self::new(self.owner, self.positions[range].to_vec(), None))
    }

    /// The register's bit order.
    #[must_use]
    pub fn bit_order(&self) -> BitOrder {
        self.owner.bit_order()
    }

    /// Bits from the lowest position to the highest.
    #[must_use]
    pub fn shift_out(&self) -> ShiftOut<'_, 'a> {
        self.shift(false)
    }

    /// Bits from the highest position to the lowest.
    #[must_use]
    pub fn reverse_shift_out(&self) -> ShiftOut<'_, 'a> {
        self.shift(true)
    }

    /// Bits in print order, starting from the leftmost.
    ///
    /// With [`BitOrder::Lsb0`] the leftmost bit is the highest position, so
    /// this is [`BitCollection::reverse_shift_out`]; with [`BitOrder::Msb0`]
    /// it is [`BitCollection::shift_out`].
    #[must_use]
    pub fn shift_out_left(&self) -> ShiftOut<'_, 'a> {
        self.shift(self.bit_order() == BitOrder::Lsb0)
    }

    /// Bits in print order, starting from the rightmost.
    #[must_use]
    pub fn shift_out_right(&self) -> ShiftOut<'_, 'a> {
        self.shift(self.bit_order() == BitOrder::Msb0)
    }

    fn shift(&self, msb_first: bool) -> ShiftOut<'_, 'a> {
        ShiftOut {
            collection: self,
            front: 0,
            back: self.positions.len(),
            msb_first,
            index: 0,
        }
    }

    const fn bit_ref(&self, position: usize) -> BitRef<'a> {
        BitRef {
            owner: self.owner,
            position,
        }
    }

    fn bits(&self) -> impl Iterator<Item = BitRef<'a>> + '_ {
        self.positions.iter().map(|p| self.bit_ref(*p))
    }

    fn target(&self) -> String {
        let register = self.owner.id();
        self.field.map_or_else(
            || register.to_string(),
            |field| format!("{register}.{field}"),
        )
    }

    fn check_fits(&self, value: u64) -> Result<()> {
        let width = self.positions.len();
        if width < 64 && value >> width != 0 {
            return Err(Error::InvalidAccess {
                target: self.target(),
                violation: AccessViolation::TooWide { value, width },
            });
        }
        Ok(())
    }

    fn store(&self, value: u64) {
        for (i, bit) in self.bits().enumerate() {
            bit.bit().data.set((value >> i) & 1 == 1);
        }
    }
}

impl BitAccess for BitCollection<'_> {
    fn width(&self) -> usize {
        self.positions.len()
    }

    fn data(&self) -> u64 {
        self.bits()
            .enumerate()
            .fold(0, |acc, (i, bit)| acc | (bit.data() << i))
    }

    fn write(&self, value: u64) -> Result<()> {
        self.check_fits(value)?;
        if let Some(bit) = self.bits().find(|bit| match bit.access() {
            Access::WriteOnce => bit.bit().written.get(),
            access => !access.is_writable(),
        }) {
            return Err(Error::InvalidAccess {
                target: self.target(),
                violation: AccessViolation::NotWritable {
                    position: bit.position(),
                },
            });
        }
        self.store(value);
        self.bits().for_each(|bit| bit.bit().written.set(true));
        Ok(())
    }

    fn expect(&self, value: u64) -> Result<()> {
        self.check_fits(value)?;
        self.store(value);
        self.mark_read();
        Ok(())
    }

    fn mark_read(&self) {
        self.bits().for_each(|bit| bit.mark_read());
    }

    fn clear_read_flag(&self) {
        self.bits().for_each(|bit| bit.clear_read_flag());
    }

    fn is_to_be_read(&self) -> bool {
        self.bits().any(|bit| bit.is_to_be_read())
    }

    fn reset(&self) {
        self.bits().for_each(|bit| BitAccess::reset(&bit));
    }

    fn reset_value(&self) -> u64 {
        self.bits()
            .enumerate()
            .fold(0, |acc, (i, bit)| acc | (bit.reset_value() << i))
    }
}

/// A traversal over a [`BitCollection`], yielding each bit with its index in
/// traversal order.
///
/// Created by the `shift_out` family of methods. The iterator is `Clone`, and
/// calling the method again starts a fresh traversal.
#[derive(Debug, Clone)]
pub struct ShiftOut<'c, 'a> {
    collection: &'c BitCollection<'a>,
    front: usize,
    back: usize,
    msb_first: bool,
    index: usize,
}

impl<'a> Iterator for ShiftOut<'_, 'a> {
    type Item = (BitRef<'a>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        let slot = if self.msb_first {
            self.back -= 1;
            self.back
        } else {
            self.front += 1;
            self.front - 1
        };
        let index = self.index;
        self.index += 1;
        let bit = self.collection.bit_ref(self.collection.positions[slot]);
        Some((bit, index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ShiftOut<'_, '_> {}

/// Converts `range` into concrete bounds within a collection of `len`.
pub(crate) fn slice_bounds(range: &impl RangeBounds<usize>, len: usize) -> Result<Range<usize>> {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&e) => e.saturating_add(1),
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    };
    if end > len {
        return Err(Error::IndexOutOfRange { index: end, size: len });
    }
    if start > end {
        return Err(Error::IndexOutOfRange {
            index: start,
            size: len,
        });
    }
    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::{
        context::AttributeContext,
        error::ItemKind,
        meta::Value,
        model::Model,
        register::{FieldDecl, RegisterBuilder, RegisterId},
    };

    fn model_with(decl: RegisterBuilder) -> (Model, RegisterId) {
        let mut model = Model::new("dut").unwrap();
        let reg = model.add_register(model.root(), decl).unwrap();
        (model, reg)
    }

    fn positions(traversal: ShiftOut<'_, '_>) -> Vec<(usize, usize)> {
        traversal.map(|(bit, index)| (bit.position(), index)).collect()
    }

    #[test_case(BitOrder::Lsb0; "lsb0")]
    #[test_case(BitOrder::Msb0; "msb0")]
    fn every_traversal_yields_each_bit_once(order: BitOrder) {
        let (model, reg) = model_with(RegisterBuilder::new("r", 0).width(8).bit_order(order));
        let bits = model.reg(reg).unwrap().bits();

        for traversal in [
            bits.shift_out(),
            bits.reverse_shift_out(),
            bits.shift_out_left(),
            bits.shift_out_right(),
        ] {
            assert_eq!(traversal.len(), 8);
            let mut seen: Vec<_> = traversal.clone().map(|(bit, _)| bit.position()).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..8).collect::<Vec<_>>());
            let indices: Vec<_> = traversal.map(|(_, index)| index).collect();
            assert_eq!(indices, (0..8).collect::<Vec<_>>());
        }

        assert_eq!(bits.shift_out().next().unwrap().0.position(), 0);
        assert_eq!(bits.reverse_shift_out().next().unwrap().0.position(), 7);
    }

    #[test]
    fn lsb0_left_is_msb_first() {
        let (model, reg) = model_with(RegisterBuilder::new("r", 0).width(4));
        let bits = model.reg(reg).unwrap().bits();

        assert_eq!(positions(bits.shift_out_left()), positions(bits.reverse_shift_out()));
        assert_eq!(positions(bits.shift_out_right()), positions(bits.shift_out()));
        assert_eq!(
            positions(bits.shift_out_left()),
            vec![(3, 0), (2, 1), (1, 2), (0, 3)]
        );
    }

    #[test]
    fn msb0_left_is_lsb_first() {
        let (model, reg) =
            model_with(RegisterBuilder::new("r", 0).width(4).bit_order(BitOrder::Msb0));
        let bits = model.reg(reg).unwrap().bits();

        assert_eq!(positions(bits.shift_out_left()), positions(bits.shift_out()));
        assert_eq!(
            positions(bits.shift_out_right()),
            positions(bits.reverse_shift_out())
        );
    }

    #[test]
    fn traversal_is_restartable() {
        let (model, reg) = model_with(RegisterBuilder::new("r", 0).width(3));
        let bits = model.reg(reg).unwrap().bits();

        let mut first = bits.shift_out();
        first.next();
        assert_eq!(first.len(), 2);
        assert_eq!(positions(bits.shift_out()), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn field_traversal_counts_from_zero() {
        let (model, reg) =
            model_with(RegisterBuilder::new("r", 0).field(FieldDecl::new("mid", 4, 3)));
        let ctx = AttributeContext::new();
        let field = model.reg(reg).unwrap().field(&ctx, "mid").unwrap();

        assert_eq!(
            positions(field.reverse_shift_out()),
            vec![(6, 0), (5, 1), (4, 2)]
        );
    }

    #[test]
    fn write_then_read_returns_value() {
        let (model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(16)
                .field(FieldDecl::new("data", 4, 8)),
        );
        let ctx = AttributeContext::new();
        let reg = model.reg(reg).unwrap();
        let field = reg.field(&ctx, "data").unwrap();

        field.write(0xA5).unwrap();

        assert_eq!(field.data(), 0xA5);
        assert_eq!(reg.bits().data(), 0xA50);
    }

    #[test]
    fn read_only_write_fails_and_keeps_value() {
        let (model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(8)
                .field(FieldDecl::new("status", 0, 4).access(Access::ReadOnly).reset(0x3)),
        );
        let ctx = AttributeContext::new();
        let status = model.reg(reg).unwrap().field(&ctx, "status").unwrap();

        let err = status.write(0xC).unwrap_err();

        assert_eq!(
            err,
            Error::InvalidAccess {
                target: "r.status".into(),
                violation: AccessViolation::NotWritable { position: 0 },
            }
        );
        assert_eq!(status.data(), 0x3);
    }

    #[test]
    fn write_once_field_locks_until_reset() {
        let (model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(8)
                .field(FieldDecl::new("lock", 0, 4).access(Access::WriteOnce)),
        );
        let ctx = AttributeContext::new();
        let reg = model.reg(reg).unwrap();
        let lock = reg.field(&ctx, "lock").unwrap();

        lock.write(0x3).unwrap();
        assert_eq!(
            lock.write(0xC).unwrap_err(),
            Error::InvalidAccess {
                target: "r.lock".into(),
                violation: AccessViolation::NotWritable { position: 0 },
            }
        );
        assert_eq!(lock.data(), 0x3);
        assert!(reg.bits().write(0xF3).is_err());

        lock.reset();
        lock.write(0xC).unwrap();
        assert_eq!(lock.data(), 0xC);
    }

    #[test]
    fn whole_register_write_is_atomic() {
        let (model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(8)
                .field(FieldDecl::new("lo", 0, 4))
                .field(FieldDecl::new("hi", 4, 4).access(Access::ReadOnly)),
        );
        let bits = model.reg(reg).unwrap().bits();

        assert!(bits.write(0xFF).is_err());
        assert_eq!(bits.data(), 0);
    }

    #[test]
    fn value_wider_than_field_is_rejected() {
        let (model, reg) = model_with(RegisterBuilder::new("r", 0).width(4));
        let bits = model.reg(reg).unwrap().bits();

        let err = bits.write(0x10).unwrap_err();

        assert_eq!(
            err,
            Error::InvalidAccess {
                target: "r".into(),
                violation: AccessViolation::TooWide {
                    value: 0x10,
                    width: 4
                },
            }
        );
    }

    #[test]
    fn full_width_register_accepts_any_value() {
        let (model, reg) = model_with(RegisterBuilder::new("r", 0).width(64));
        let bits = model.reg(reg).unwrap().bits();

        bits.write(u64::MAX).unwrap();

        assert_eq!(bits.data(), u64::MAX);
    }

    #[test]
    fn read_marking_skips_write_only_bits() {
        let (model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(4)
                .field(FieldDecl::new("cmd", 0, 2).access(Access::WriteOnly)),
        );
        let reg = model.reg(reg).unwrap();
        let bits = reg.bits();

        bits.mark_read();

        assert!(!reg.bit(0).unwrap().is_to_be_read());
        assert!(reg.bit(2).unwrap().is_to_be_read());
        assert!(bits.is_to_be_read());

        bits.clear_read_flag();
        assert!(!bits.is_to_be_read());
    }

    #[test]
    fn expect_bypasses_access_and_marks_read() {
        let (model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(4)
                .bit_access(Access::ReadOnly),
        );
        let bits = model.reg(reg).unwrap().bits();

        bits.expect(0b1001).unwrap();

        assert_eq!(bits.data(), 0b1001);
        assert!(bits.is_to_be_read());
    }

    #[test]
    fn reset_restores_values_and_clears_reads() {
        let (model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(8)
                .field(FieldDecl::new("f", 0, 8).reset(0x5A)),
        );
        let bits = model.reg(reg).unwrap().bits();
        bits.write(0xFF).unwrap();
        bits.mark_read();

        bits.reset();

        assert_eq!(bits.data(), 0x5A);
        assert_eq!(bits.reset_value(), 0x5A);
        assert!(!bits.is_to_be_read());
    }

    #[test]
    fn slices_index_the_collection_not_the_register() {
        let (model, reg) =
            model_with(RegisterBuilder::new("r", 0).field(FieldDecl::new("f", 8, 8)));
        let ctx = AttributeContext::new();
        let field = model.reg(reg).unwrap().field(&ctx, "f").unwrap();

        let upper = field.slice(4..).unwrap();
        assert_eq!(upper.positions(), &[12, 13, 14, 15]);
        assert_eq!(field.get(0).unwrap().position(), 8);

        upper.write(0xF).unwrap();
        assert_eq!(field.data(), 0xF0);
    }

    #[test]
    fn out_of_range_selection_fails() {
        let (model, reg) = model_with(RegisterBuilder::new("r", 0).width(8));
        let reg = model.reg(reg).unwrap();

        assert_eq!(
            reg.bit(8).unwrap_err(),
            Error::IndexOutOfRange { index: 8, size: 8 }
        );
        assert_eq!(
            reg.range(4..=8).unwrap_err(),
            Error::IndexOutOfRange { index: 9, size: 8 }
        );
        assert_eq!(reg.range(2..=5).unwrap().width(), 4);
    }

    #[test]
    fn bit_attributes_follow_the_default_chain() {
        let (mut model, reg) = model_with(
            RegisterBuilder::new("r", 0)
                .width(8)
                .bit_access(Access::WriteOnly)
                .bit_meta(Metadata::new().with("sync", true))
                .field(
                    FieldDecl::new("f", 0, 4)
                        .access(Access::ReadOnly)
                        .meta(Metadata::new().with("sync", false)),
                ),
        );
        model
            .config_mut()
            .add_bit_meta(&Metadata::new().with("sync", true).with("doc", "none"));
        let reg = model.reg(reg).unwrap();

        let in_field = reg.bit(0).unwrap();
        assert_eq!(in_field.access(), Access::ReadOnly);
        assert_eq!(in_field.meta().get("sync"), Some(&Value::Bool(false)));
        assert_eq!(in_field.meta().get("doc"), Some(&Value::from("none")));

        let unnamed = reg.bit(6).unwrap();
        assert_eq!(unnamed.access(), Access::WriteOnly);
        assert_eq!(unnamed.meta().get("sync"), Some(&Value::Bool(true)));
    }

    #[test]
    fn config_access_default_applies_without_declarations() {
        let (mut model, reg) = model_with(RegisterBuilder::new("r", 0).width(2));
        model.config_mut().bit_access = Access::ReadOnly;
        let bits = model.reg(reg).unwrap().bits();

        assert!(matches!(
            bits.write(1),
            Err(Error::InvalidAccess { .. })
        ));
    }

    #[test]
    fn unknown_field_is_not_found() {
        let (model, reg) = model_with(RegisterBuilder::new("r", 0));
        let ctx = AttributeContext::new();
        assert_eq!(
            model.reg(reg).unwrap().field(&ctx, "nope").unwrap_err(),
            Error::not_found(ItemKind::Field, "r.nope")
        );
    }
}
