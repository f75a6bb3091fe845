//! Registers, their bits and named bit fields.
//!
//! Each register owns one [`Bit`] per position. Named fields group a range of
//! positions and carry the access policy, reset value and metadata of those
//! bits. Positions no field covers are unnamed bits that take every attribute
//! from the defaults.

use std::{cell::Cell, collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    context::AttributeContext,
    error::{Error, ItemKind, Result},
    id::Id,
    meta::Metadata,
    model::{Model, NodeId},
};

mod bits;

pub(crate) use bits::slice_bounds;
pub use bits::{BitAccess, BitCollection, BitRef, ShiftOut};

/// Whether position 0 is printed as the least or the most significant bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitOrder {
    /// Position 0 is the rightmost bit (the usual layout).
    #[default]
    Lsb0,
    /// Position 0 is the leftmost bit.
    Msb0,
}

/// Access policy of a bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    /// Read-write.
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
    /// Read-only.
    #[serde(rename = "ro")]
    ReadOnly,
    /// Write-only.
    #[serde(rename = "wo")]
    WriteOnly,
    /// Writing 1 clears the bit.
    #[serde(rename = "w1c")]
    Write1ToClear,
    /// Writing 1 sets the bit.
    #[serde(rename = "w1s")]
    Write1ToSet,
    /// Reading clears the bit; writes have no effect.
    #[serde(rename = "rc")]
    ReadClear,
    /// Writable once after reset.
    #[serde(rename = "w1")]
    WriteOnce,
}

impl Access {
    /// Whether a write may change the stored value.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly | Self::ReadClear)
    }

    /// Whether the bit can be read back.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadWrite => "rw",
            Self::ReadOnly => "ro",
            Self::WriteOnly => "wo",
            Self::Write1ToClear => "w1c",
            Self::Write1ToSet => "w1s",
            Self::ReadClear => "rc",
            Self::WriteOnce => "w1",
        };
        f.write_str(s)
    }
}

/// Handle to a register of a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterId(usize);

/// Declaration of a named bit field.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    name: String,
    position: usize,
    width: usize,
    access: Option<Access>,
    reset: u64,
    meta: Metadata,
    packages: Vec<String>,
}

impl FieldDecl {
    /// Declares field `name` covering `width` bits from `position` upwards.
    #[must_use]
    pub fn new(name: &str, position: usize, width: usize) -> Self {
        Self {
            name: name.to_string(),
            position,
            width,
            access: None,
            reset: 0,
            meta: Metadata::new(),
            packages: Vec::new(),
        }
    }

    /// Sets the access policy.
    #[must_use]
    pub const fn access(mut self, access: Access) -> Self {
        self.access = Some(access);
        self
    }

    /// Sets the reset value.
    #[must_use]
    pub const fn reset(mut self, reset: u64) -> Self {
        self.reset = reset;
        self
    }

    /// Sets the field metadata.
    #[must_use]
    pub fn meta(mut self, meta: Metadata) -> Self {
        self.meta = meta;
        self
    }

    /// Restricts the field to `package`. May be called repeatedly.
    #[must_use]
    pub fn package(mut self, package: &str) -> Self {
        self.packages.push(package.to_string());
        self
    }
}

/// Declaration of a register.
#[derive(Debug, Clone)]
pub struct RegisterBuilder {
    id: String,
    offset: u64,
    width: usize,
    bit_order: Option<BitOrder>,
    domains: Vec<String>,
    meta: Metadata,
    bit_access: Option<Access>,
    bit_meta: Metadata,
    fields: Vec<FieldDecl>,
}

impl RegisterBuilder {
    /// Declares a 32-bit register `id` at `offset` from its node.
    #[must_use]
    pub fn new(id: &str, offset: u64) -> Self {
        Self {
            id: id.to_string(),
            offset,
            width: 32,
            bit_order: None,
            domains: Vec::new(),
            meta: Metadata::new(),
            bit_access: None,
            bit_meta: Metadata::new(),
            fields: Vec::new(),
        }
    }

    /// Sets the width in bits (1 to 64).
    #[must_use]
    pub const fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Sets the bit order.
    #[must_use]
    pub const fn bit_order(mut self, bit_order: BitOrder) -> Self {
        self.bit_order = Some(bit_order);
        self
    }

    /// Adds a domain the register belongs to.
    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domains.push(domain.to_string());
        self
    }

    /// Sets the register metadata.
    #[must_use]
    pub fn meta(mut self, meta: Metadata) -> Self {
        self.meta = meta;
        self
    }

    /// Access policy for bits whose field does not declare one.
    #[must_use]
    pub const fn bit_access(mut self, access: Access) -> Self {
        self.bit_access = Some(access);
        self
    }

    /// Metadata defaults for the bits of this register.
    #[must_use]
    pub fn bit_meta(mut self, meta: Metadata) -> Self {
        self.bit_meta = meta;
        self
    }

    /// Adds a named field.
    #[must_use]
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }
}

#[derive(Debug)]
pub(crate) struct Field {
    pub(crate) position: usize,
    pub(crate) width: usize,
    pub(crate) access: Option<Access>,
    pub(crate) meta: Metadata,
    pub(crate) packages: Vec<Id>,
}

impl Field {
    fn is_visible(&self, ctx: &AttributeContext) -> bool {
        self.packages.is_empty() || ctx.package().is_none_or(|p| self.packages.contains(p))
    }
}

/// One bit of a register. Stored and pending-read state change through
/// [`BitAccess`] operations on shared views.
#[derive(Debug)]
pub(crate) struct Bit {
    field: Option<Id>,
    reset: bool,
    data: Cell<bool>,
    to_be_read: Cell<bool>,
    written: Cell<bool>,
}

#[derive(Debug)]
pub(crate) struct Register {
    pub(crate) id: Id,
    pub(crate) node: NodeId,
    pub(crate) offset: u64,
    bit_order: Option<BitOrder>,
    pub(crate) domains: Vec<Id>,
    meta: Metadata,
    bit_access: Option<Access>,
    bit_meta: Metadata,
    pub(crate) bits: Vec<Bit>,
    pub(crate) fields: BTreeMap<Id, Field>,
}

impl Register {
    fn build(model: &Model, node: NodeId, decl: RegisterBuilder) -> Result<Self> {
        let id = Id::try_from(decl.id)?;
        if !(1..=64).contains(&decl.width) {
            return Err(Error::InvalidDeclaration(format!(
                "register '{id}' has width {}, expected 1 to 64",
                decl.width
            )));
        }

        let mut domains: Vec<Id> = Vec::with_capacity(decl.domains.len());
        for domain in &decl.domains {
            let domain = model.domain(node, domain)?.id();
            if !domains.contains(domain) {
                domains.push(domain.clone());
            }
        }

        let mut bits: Vec<Bit> = (0..decl.width)
            .map(|_| Bit {
                field: None,
                reset: false,
                data: Cell::new(false),
                to_be_read: Cell::new(false),
                written: Cell::new(false),
            })
            .collect();

        let mut fields = BTreeMap::new();
        for field in decl.fields {
            let name = Id::try_from(field.name)?;
            if fields.contains_key(&name) {
                return Err(Error::duplicate(ItemKind::Field, name.as_str()));
            }
            let end = field.position.checked_add(field.width);
            if field.width == 0 || end.is_none_or(|end| end > decl.width) {
                return Err(Error::InvalidDeclaration(format!(
                    "field '{id}.{name}' does not fit in {} bit(s)",
                    decl.width
                )));
            }
            if field.width < 64 && field.reset >> field.width != 0 {
                return Err(Error::InvalidDeclaration(format!(
                    "reset value {:#x} of field '{id}.{name}' is wider than {} bit(s)",
                    field.reset, field.width
                )));
            }
            let packages = field
                .packages
                .iter()
                .map(|p| model.package_id(p))
                .collect::<Result<Vec<_>>>()?;

            for (i, bit) in bits[field.position..field.position + field.width]
                .iter_mut()
                .enumerate()
            {
                if let Some(other) = &bit.field {
                    return Err(Error::InvalidDeclaration(format!(
                        "field '{id}.{name}' overlaps field '{other}'"
                    )));
                }
                let reset = (field.reset >> i) & 1 == 1;
                bit.field = Some(name.clone());
                bit.reset = reset;
                bit.data.set(reset);
            }

            fields.insert(
                name,
                Field {
                    position: field.position,
                    width: field.width,
                    access: field.access,
                    meta: field.meta,
                    packages,
                },
            );
        }

        Ok(Self {
            id,
            node,
            offset: decl.offset,
            bit_order: decl.bit_order,
            domains,
            meta: decl.meta,
            bit_access: decl.bit_access,
            bit_meta: decl.bit_meta,
            bits,
            fields,
        })
    }
}

impl Model {
    /// Declares a register owned by `node`.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateId`] if `node` already owns a register with the
    ///   same id, or two fields share a name
    /// - [`Error::NotFound`] if a domain is not visible from `node` or a field
    ///   names an undeclared package
    /// - [`Error::InvalidDeclaration`] for a width outside 1 to 64, a field
    ///   outside the register, overlapping fields, or a reset value wider than
    ///   its field
    #[instrument(level = "debug", skip(self, decl), fields(register = %decl.id))]
    pub fn add_register(&mut self, node: NodeId, decl: RegisterBuilder) -> Result<RegisterId> {
        let register = Register::build(self, node, decl)?;
        if self.node(node)?.registers.contains_key(&register.id) {
            return Err(Error::duplicate(ItemKind::Register, register.id.as_str()));
        }

        let handle = RegisterId(self.registers.len());
        self.node_mut(node)?
            .registers
            .insert(register.id.clone(), handle);
        self.registers.push(register);
        Ok(handle)
    }

    /// Looks up the register `id` owned by `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `node` owns no such register.
    pub fn register(&self, node: NodeId, id: &str) -> Result<RegisterId> {
        self.node(node)?
            .registers
            .get(id)
            .copied()
            .ok_or_else(|| Error::not_found(ItemKind::Register, id))
    }

    /// The registers owned by `node`, in name order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `node` is not part of this model.
    pub fn registers(&self, node: NodeId) -> Result<impl Iterator<Item = RegisterId> + '_> {
        Ok(self.node(node)?.registers.values().copied())
    }

    /// A view of `register`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the handle belongs to another model.
    pub fn reg(&self, register: RegisterId) -> Result<RegisterRef<'_>> {
        Ok(RegisterRef {
            model: self,
            handle: register,
            reg: self.register_entry(register)?,
        })
    }

    pub(crate) fn register_entry(&self, register: RegisterId) -> Result<&Register> {
        self.registers
            .get(register.0)
            .ok_or_else(|| Error::not_found(ItemKind::Register, format!("#{}", register.0)))
    }
}

/// A borrowed view of a register.
#[derive(Debug, Clone, Copy)]
pub struct RegisterRef<'a> {
    model: &'a Model,
    handle: RegisterId,
    reg: &'a Register,
}

impl<'a> RegisterRef<'a> {
    /// The register id.
    #[must_use]
    pub const fn id(&self) -> &'a Id {
        &self.reg.id
    }

    /// The handle of this register.
    #[must_use]
    pub const fn handle(&self) -> RegisterId {
        self.handle
    }

    /// The owning node.
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.reg.node
    }

    /// Offset from the owning node's base.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.reg.offset
    }

    /// Width in bits.
    #[must_use]
    pub fn width(&self) -> usize {
        self.reg.bits.len()
    }

    /// Domains the register belongs to.
    #[must_use]
    pub fn domains(&self) -> &'a [Id] {
        &self.reg.domains
    }

    /// The bit order: declared, else that of the register's only domain,
    /// else the configured default.
    #[must_use]
    pub fn bit_order(&self) -> BitOrder {
        self.reg.bit_order.unwrap_or_else(|| {
            let from_domain = match self.reg.domains.as_slice() {
                [domain] => self
                    .model
                    .domain(self.reg.node, domain)
                    .ok()
                    .and_then(|d| d.bit_order),
                _ => None,
            };
            from_domain.unwrap_or(self.model.config().bit_order)
        })
    }

    /// Metadata merged from the configured defaults, the owning node's
    /// register defaults and the register itself.
    #[must_use]
    pub fn meta(&self) -> Metadata {
        let owner = self.model.node(self.reg.node).map(|n| &n.register_meta).ok();
        Metadata::resolve(
            std::iter::once(self.model.config().register_meta())
                .chain(owner)
                .chain(std::iter::once(&self.reg.meta)),
        )
    }

    /// Absolute address; see [`Model::address`].
    ///
    /// # Errors
    ///
    /// As for [`Model::address`].
    pub fn address(&self, ctx: &AttributeContext, domain: Option<&str>) -> Result<u64> {
        self.model.address(ctx, self.handle, domain)
    }

    /// Names of the fields visible under `ctx`, in position order.
    #[must_use]
    pub fn field_names(&self, ctx: &AttributeContext) -> Vec<&'a Id> {
        let mut names: Vec<_> = self
            .reg
            .fields
            .iter()
            .filter(|(_, field)| field.is_visible(ctx))
            .collect();
        names.sort_by_key(|(_, field)| field.position);
        names.into_iter().map(|(name, _)| name).collect()
    }

    /// Whether field `name` exists and is visible under `ctx`.
    #[must_use]
    pub fn has_field(&self, ctx: &AttributeContext, name: &str) -> bool {
        self.reg
            .fields
            .get(name)
            .is_some_and(|field| field.is_visible(ctx))
    }

    /// Every bit of the register.
    #[must_use]
    pub fn bits(&self) -> BitCollection<'a> {
        BitCollection::new(*self, (0..self.width()).collect(), None)
    }

    /// The bit at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] past the register width.
    pub fn bit(&self, position: usize) -> Result<BitRef<'a>> {
        self.bits().get(position)
    }

    /// The bits at the given positions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if the range ends past the register
    /// width.
    pub fn range(&self, positions: impl std::ops::RangeBounds<usize>) -> Result<BitCollection<'a>> {
        self.bits().slice(positions)
    }

    /// The bits of field `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no such field or it is hidden
    /// by the active package.
    pub fn field(&self, ctx: &AttributeContext, name: &str) -> Result<BitCollection<'a>> {
        let (name, field) = self
            .reg
            .fields
            .get_key_value(name)
            .filter(|(_, field)| field.is_visible(ctx))
            .ok_or_else(|| Error::not_found(ItemKind::Field, format!("{}.{name}", self.reg.id)))?;
        Ok(BitCollection::new(
            *self,
            (field.position..field.position + field.width).collect(),
            Some(name),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{meta::Value, model::Domain};

    fn model_with_ctrl() -> (Model, RegisterId) {
        let mut model = Model::new("dut").unwrap();
        model.add_package("bga").unwrap();
        model.add_package("qfn").unwrap();
        let ctrl = model
            .add_register(
                model.root(),
                RegisterBuilder::new("ctrl", 0x10)
                    .width(16)
                    .field(FieldDecl::new("en", 0, 1).reset(1))
                    .field(FieldDecl::new("mode", 1, 3).reset(0b101))
                    .field(FieldDecl::new("status", 8, 4).access(Access::ReadOnly))
                    .field(FieldDecl::new("trim", 12, 4).package("bga")),
            )
            .unwrap();
        (model, ctrl)
    }

    #[test]
    fn fields_take_reset_values() {
        let (model, ctrl) = model_with_ctrl();
        let reg = model.reg(ctrl).unwrap();
        let ctx = AttributeContext::new();

        assert_eq!(reg.bits().data(), 0b1011);
        assert_eq!(reg.field(&ctx, "mode").unwrap().data(), 0b101);
        assert_eq!(reg.bit(0).unwrap().field().map(Id::as_str), Some("en"));
        assert_eq!(reg.bit(4).unwrap().field(), None);
    }

    #[test]
    fn lookup_by_node_and_id() {
        let (model, ctrl) = model_with_ctrl();
        assert_eq!(model.register(model.root(), "ctrl").unwrap(), ctrl);
        assert_eq!(
            model.register(model.root(), "nope").unwrap_err(),
            Error::not_found(ItemKind::Register, "nope")
        );
        assert_eq!(model.registers(model.root()).unwrap().count(), 1);
    }

    #[test]
    fn package_gates_field_visibility() {
        let (model, ctrl) = model_with_ctrl();
        let reg = model.reg(ctrl).unwrap();
        let mut ctx = AttributeContext::new();

        assert!(reg.has_field(&ctx, "trim"));
        model.select_package(&mut ctx, Some("bga")).unwrap();
        assert!(reg.has_field(&ctx, "trim"));
        model.select_package(&mut ctx, Some("qfn")).unwrap();
        assert!(!reg.has_field(&ctx, "trim"));
        assert!(matches!(
            reg.field(&ctx, "trim"),
            Err(Error::NotFound {
                kind: ItemKind::Field,
                ..
            })
        ));
        assert_eq!(
            reg.field_names(&ctx)
                .into_iter()
                .map(Id::as_str)
                .collect::<Vec<_>>(),
            vec!["en", "mode", "status"]
        );
    }

    #[test]
    fn duplicate_register_in_node_is_rejected() {
        let (mut model, _) = model_with_ctrl();
        let err = model
            .add_register(model.root(), RegisterBuilder::new("ctrl", 0x20))
            .unwrap_err();
        assert_eq!(err, Error::duplicate(ItemKind::Register, "ctrl"));
    }

    #[test]
    fn same_register_id_under_different_nodes_is_allowed() {
        let (mut model, _) = model_with_ctrl();
        let sub = model.add_node(model.root(), "sub").unwrap();
        assert!(
            model
                .add_register(sub, RegisterBuilder::new("ctrl", 0x0))
                .is_ok()
        );
    }

    #[test]
    fn rejects_overlapping_and_oversized_fields() {
        let mut model = Model::new("dut").unwrap();
        let root = model.root();

        let overlap = model.add_register(
            root,
            RegisterBuilder::new("a", 0)
                .width(8)
                .field(FieldDecl::new("x", 0, 4))
                .field(FieldDecl::new("y", 3, 2)),
        );
        assert!(matches!(overlap, Err(Error::InvalidDeclaration(_))));

        let oversized = model.add_register(
            root,
            RegisterBuilder::new("b", 0)
                .width(8)
                .field(FieldDecl::new("x", 6, 4)),
        );
        assert!(matches!(oversized, Err(Error::InvalidDeclaration(_))));

        let wide_reset = model.add_register(
            root,
            RegisterBuilder::new("c", 0)
                .width(8)
                .field(FieldDecl::new("x", 0, 2).reset(0b100)),
        );
        assert!(matches!(wide_reset, Err(Error::InvalidDeclaration(_))));

        let zero_width = model.add_register(root, RegisterBuilder::new("d", 0).width(0));
        assert!(matches!(zero_width, Err(Error::InvalidDeclaration(_))));

        let duplicate_field = model.add_register(
            root,
            RegisterBuilder::new("e", 0)
                .field(FieldDecl::new("x", 0, 1))
                .field(FieldDecl::new("x", 1, 1)),
        );
        assert_eq!(
            duplicate_field.unwrap_err(),
            Error::duplicate(ItemKind::Field, "x")
        );

        assert_eq!(model.registers(root).unwrap().count(), 0);
    }

    #[test]
    fn unknown_domain_or_package_is_not_found() {
        let mut model = Model::new("dut").unwrap();
        let root = model.root();

        let err = model
            .add_register(root, RegisterBuilder::new("a", 0).domain("ips"))
            .unwrap_err();
        assert_eq!(err, Error::not_found(ItemKind::Domain, "ips"));

        let err = model
            .add_register(
                root,
                RegisterBuilder::new("b", 0).field(FieldDecl::new("x", 0, 1).package("bga")),
            )
            .unwrap_err();
        assert_eq!(err, Error::not_found(ItemKind::Package, "bga"));
    }

    #[test]
    fn bit_order_falls_back_to_domain_then_config() {
        let mut model = Model::new("dut").unwrap();
        let root = model.root();
        model
            .add_domain(
                root,
                Domain::new(Id::try_from("jtag").unwrap()).with_bit_order(BitOrder::Msb0),
            )
            .unwrap();

        let declared = model
            .add_register(
                root,
                RegisterBuilder::new("declared", 0)
                    .domain("jtag")
                    .bit_order(BitOrder::Lsb0),
            )
            .unwrap();
        let inherited = model
            .add_register(root, RegisterBuilder::new("inherited", 4).domain("jtag"))
            .unwrap();
        let plain = model
            .add_register(root, RegisterBuilder::new("plain", 8))
            .unwrap();

        assert_eq!(model.reg(declared).unwrap().bit_order(), BitOrder::Lsb0);
        assert_eq!(model.reg(inherited).unwrap().bit_order(), BitOrder::Msb0);
        assert_eq!(model.reg(plain).unwrap().bit_order(), BitOrder::Lsb0);

        model.config_mut().bit_order = BitOrder::Msb0;
        assert_eq!(model.reg(plain).unwrap().bit_order(), BitOrder::Msb0);
    }

    #[test]
    fn register_metadata_inherits_owner_and_process_defaults() {
        let mut model = Model::new("dut").unwrap();
        let sub = model.add_node(model.root(), "sub").unwrap();
        let reg = model
            .add_register(
                sub,
                RegisterBuilder::new("r", 0).meta(Metadata::new().with("secure", true)),
            )
            .unwrap();

        model
            .set_register_defaults(sub, &Metadata::new().with("owner", "sub").with("secure", false))
            .unwrap();
        model
            .config_mut()
            .add_register_meta(&Metadata::new().with("owner", "top").with("volatile", false));

        let meta = model.reg(reg).unwrap().meta();
        assert_eq!(meta.get("owner"), Some(&Value::from("sub")));
        assert_eq!(meta.get("secure"), Some(&Value::Bool(true)));
        assert_eq!(meta.get("volatile"), Some(&Value::Bool(false)));
    }

    #[test]
    fn access_policies() {
        assert!(Access::ReadWrite.is_writable());
        assert!(Access::Write1ToClear.is_writable());
        assert!(!Access::ReadOnly.is_writable());
        assert!(!Access::ReadClear.is_writable());
        assert!(!Access::WriteOnly.is_readable());
        assert_eq!(Access::Write1ToClear.to_string(), "w1c");
    }
}
