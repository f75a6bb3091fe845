//! Device pins, pin groups and aliases.
//!
//! Pins are owned by the [`Model`] as a whole. Pin ids, alias ids and group
//! ids share one namespace; a group id may be declared once per package so
//! that each package variant has its own member list.
//!
//! Attributes resolve lazily against an [`AttributeContext`]:
//!
//! | attribute        | most specific first                          |
//! |------------------|----------------------------------------------|
//! | `direction`      | active function, pin, configuration          |
//! | `location`       | active package, pin                          |
//! | `dib_assignment` | active package                               |
//! | `reset_state`    | pin, configuration                           |
//! | metadata         | function, package, pin, configuration merged |

use std::{
    cell::Cell,
    collections::{BTreeMap, btree_map::Entry},
};

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    context::AttributeContext,
    error::{AccessViolation, Error, ItemKind, Result},
    id::Id,
    meta::Metadata,
    model::Model,
};

mod clock;
mod group;

pub(crate) use clock::Clock;
pub use clock::{ClockParams, ClockState};
pub use group::{Endian, GroupBuilder, PinCollection};
use group::{GroupDef, Member};

/// Signal direction of a pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Input only.
    Input,
    /// Output only.
    Output,
    /// Input and output.
    #[default]
    Bidirectional,
}

/// What the tester does with a pin on the next cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    /// Drive the given level.
    Drive(bool),
    /// Compare against the given level.
    Compare(bool),
    /// Neither drive nor compare.
    #[default]
    DontCare,
}

impl PinState {
    /// The driven or expected level, if any.
    #[must_use]
    pub const fn level(self) -> Option<bool> {
        match self {
            Self::Drive(level) | Self::Compare(level) => Some(level),
            Self::DontCare => None,
        }
    }

    const fn toggled(self) -> Self {
        match self {
            Self::Drive(level) => Self::Drive(!level),
            Self::Compare(level) => Self::Compare(!level),
            Self::DontCare => Self::DontCare,
        }
    }
}

/// Attributes a pin takes while a package is active.
///
/// Declaring overrides for a package also restricts the pin to that package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageOverrides {
    /// Physical location (ball or pad name).
    pub location: Option<String>,
    /// Device interface board channel.
    pub dib_assignment: Option<String>,
    /// Metadata merged over the pin metadata.
    pub metadata: Metadata,
}

/// A named function a pin can be switched to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Function {
    /// Direction while the function is active.
    pub direction: Option<Direction>,
    /// Metadata merged over the pin and package metadata.
    pub metadata: Metadata,
}

/// Declaration of a pin.
#[derive(Debug, Clone)]
pub struct PinBuilder {
    id: String,
    direction: Option<Direction>,
    reset: Option<PinState>,
    location: Option<String>,
    meta: Metadata,
    packages: Vec<(String, PackageOverrides)>,
    functions: Vec<(String, Function)>,
}

impl PinBuilder {
    /// Declares pin `id`, visible in every package.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            direction: None,
            reset: None,
            location: None,
            meta: Metadata::new(),
            packages: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Sets the direction.
    #[must_use]
    pub const fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Sets the state [`Drivable::reset`] returns the pin to.
    #[must_use]
    pub const fn reset(mut self, state: PinState) -> Self {
        self.reset = Some(state);
        self
    }

    /// Sets the location used when the active package does not override it.
    #[must_use]
    pub fn location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    /// Sets the pin metadata.
    #[must_use]
    pub fn meta(mut self, meta: Metadata) -> Self {
        self.meta = meta;
        self
    }

    /// Restricts the pin to `package` without overriding anything.
    #[must_use]
    pub fn package(self, package: &str) -> Self {
        self.package_overrides(package, PackageOverrides::default())
    }

    /// Restricts the pin to `package`, with attributes for that package.
    #[must_use]
    pub fn package_overrides(mut self, package: &str, overrides: PackageOverrides) -> Self {
        self.packages.push((package.to_string(), overrides));
        self
    }

    /// Adds a function.
    #[must_use]
    pub fn function(mut self, name: &str, function: Function) -> Self {
        self.functions.push((name.to_string(), function));
        self
    }
}

#[derive(Debug)]
pub(crate) struct Pin {
    pub(crate) id: Id,
    direction: Option<Direction>,
    reset: Option<PinState>,
    location: Option<String>,
    meta: Metadata,
    packages: BTreeMap<Id, PackageOverrides>,
    functions: BTreeMap<Id, Function>,
    state: Cell<PinState>,
    clock: Cell<Clock>,
}

impl Pin {
    fn build(model: &Model, decl: PinBuilder) -> Result<Self> {
        let id = Id::try_from(decl.id)?;

        let mut packages = BTreeMap::new();
        for (package, overrides) in decl.packages {
            let package = model.package_id(&package)?;
            if packages.contains_key(&package) {
                return Err(Error::duplicate(ItemKind::Package, package.as_str()));
            }
            packages.insert(package, overrides);
        }

        let mut functions = BTreeMap::new();
        for (name, function) in decl.functions {
            let name = Id::try_from(name)?;
            if functions.contains_key(&name) {
                return Err(Error::duplicate(ItemKind::Function, name.as_str()));
            }
            functions.insert(name, function);
        }

        let state = decl.reset.unwrap_or(model.config().pin_reset);
        Ok(Self {
            id,
            direction: decl.direction,
            reset: decl.reset,
            location: decl.location,
            meta: decl.meta,
            packages,
            functions,
            state: Cell::new(state),
            clock: Cell::new(Clock::default()),
        })
    }

    fn is_visible(&self, ctx: &AttributeContext) -> bool {
        self.packages.is_empty() || ctx.package().is_none_or(|p| self.packages.contains_key(p))
    }
}

/// What a name in the pin namespace refers to.
#[derive(Debug)]
pub(crate) enum PinEntry {
    Pin(usize),
    /// A pin, a group, or one member of a group.
    Alias { target: Id, index: Option<usize> },
    /// Group definitions keyed by package; `None` is the unqualified one.
    Groups(BTreeMap<Option<Id>, GroupDef>),
}

/// Uniform driving interface of single pins and pin collections.
///
/// Operations take no context. The direction warnings on driving an
/// output-only pin or comparing an input-only one follow the function bound
/// through a group member or indexed alias, then the pin's own direction; a
/// function selected with [`Model::select_function`] is not consulted. Check
/// [`PinRef::direction`] for the direction under a context.
pub trait Drivable {
    /// Number of pins.
    fn width(&self) -> usize;

    /// Drives `value`, bit 0 to the pin of lowest significance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAccess`] if `value` does not fit the width.
    fn drive(&self, value: u64) -> Result<()>;

    /// Expects `value` on the next compare.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAccess`] if `value` does not fit the width.
    fn assert(&self, value: u64) -> Result<()>;

    /// Stops driving and comparing.
    fn dont_care(&self);

    /// Inverts every driven or expected level.
    fn toggle(&self);

    /// Returns every pin to its reset state.
    fn reset(&self);

    /// The driven or expected levels, bit 0 first; don't-care pins read as 0.
    fn data(&self) -> u64;
}

/// A borrowed view of a pin.
///
/// A view obtained through a group member or an indexed alias carries the
/// function bound to that member, which takes precedence over the function
/// selected in the context.
#[derive(Debug, Clone, Copy)]
pub struct PinRef<'a> {
    model: &'a Model,
    pin: &'a Pin,
    bound: Option<&'a Id>,
}

impl<'a> PinRef<'a> {
    /// The pin id (never an alias).
    #[must_use]
    pub const fn id(&self) -> &'a Id {
        &self.pin.id
    }

    /// The active function: the bound one, else the one selected in `ctx`
    /// if the pin declares it.
    #[must_use]
    pub fn function(&self, ctx: &AttributeContext) -> Option<&'a Id> {
        let functions = &self.pin.functions;
        self.bound.or_else(|| {
            ctx.function(&self.pin.id)
                .and_then(|f| functions.get_key_value(f))
                .map(|(name, _)| name)
        })
    }

    /// The declared function names.
    pub fn functions(&self) -> impl Iterator<Item = &'a Id> + 'a {
        self.pin.functions.keys()
    }

    /// The packages the pin is restricted to; empty if it is in every
    /// package.
    pub fn packages(&self) -> impl Iterator<Item = &'a Id> + 'a {
        self.pin.packages.keys()
    }

    /// Whether the pin exists under the active package of `ctx`.
    #[must_use]
    pub fn is_visible(&self, ctx: &AttributeContext) -> bool {
        self.pin.is_visible(ctx)
    }

    /// Direction under `ctx`.
    #[must_use]
    pub fn direction(&self, ctx: &AttributeContext) -> Direction {
        self.function_decl(ctx)
            .and_then(|f| f.direction)
            .or(self.pin.direction)
            .unwrap_or(self.model.config().pin_direction)
    }

    /// Location under `ctx`.
    #[must_use]
    pub fn location(&self, ctx: &AttributeContext) -> Option<&'a str> {
        self.package_overrides(ctx)
            .and_then(|p| p.location.as_deref())
            .or(self.pin.location.as_deref())
    }

    /// Interface board channel under the active package of `ctx`.
    #[must_use]
    pub fn dib_assignment(&self, ctx: &AttributeContext) -> Option<&'a str> {
        self.package_overrides(ctx)
            .and_then(|p| p.dib_assignment.as_deref())
    }

    /// The state [`Drivable::reset`] returns the pin to.
    #[must_use]
    pub fn reset_state(&self) -> PinState {
        self.pin.reset.unwrap_or(self.model.config().pin_reset)
    }

    /// Metadata under `ctx`, merged per key from the configured pin
    /// defaults, the pin, the active package and the active function.
    #[must_use]
    pub fn meta(&self, ctx: &AttributeContext) -> Metadata {
        let package = self.package_overrides(ctx).map(|p| &p.metadata);
        let function = self.function_decl(ctx).map(|f| &f.metadata);
        Metadata::resolve(
            [self.model.config().pin_meta(), &self.pin.meta]
                .into_iter()
                .chain(package)
                .chain(function),
        )
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> PinState {
        self.pin.state.get()
    }

    /// The clock state.
    #[must_use]
    pub fn clock_state(&self) -> ClockState {
        self.pin.clock.get().state
    }

    /// The last clock parameters supplied, kept across stops.
    #[must_use]
    pub fn clock_params(&self) -> Option<ClockParams> {
        self.pin.clock.get().params
    }

    /// Arms the clock with `params`. The drive state is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClockTransition`] if the clock is running or
    /// paused.
    pub fn enable_clock(&self, params: ClockParams) -> Result<()> {
        self.transition(|clock, pin| clock.enable(pin, params))
    }

    /// Starts the clock, arming it first if needed.
    ///
    /// Starting a running clock with new parameters restarts it with them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingParameters`] if no parameters were ever
    /// supplied.
    pub fn start_clock(&self, params: Option<ClockParams>) -> Result<()> {
        self.transition(|clock, pin| clock.start(pin, params))
    }

    /// Pauses a running clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClockTransition`] unless the clock is running.
    pub fn pause_clock(&self) -> Result<()> {
        self.transition(Clock::pause)
    }

    /// Resumes a paused clock, with new parameters if given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClockTransition`] unless the clock is paused.
    pub fn resume_clock(&self, params: Option<ClockParams>) -> Result<()> {
        self.transition(|clock, pin| clock.resume(pin, params))
    }

    /// Stops the clock, keeping its parameters.
    pub fn stop_clock(&self) {
        let clock = self.pin.clock.get();
        self.pin.clock.set(clock.stop());
        tracing::debug!(pin = %self.pin.id, from = %clock.state, "clock stopped");
    }

    fn transition(&self, f: impl FnOnce(Clock, &str) -> Result<Clock>) -> Result<()> {
        let clock = self.pin.clock.get();
        let next = f(clock, self.pin.id.as_str())?;
        self.pin.clock.set(next);
        tracing::debug!(pin = %self.pin.id, from = %clock.state, to = %next.state, "clock transition");
        Ok(())
    }

    fn function_decl(&self, ctx: &AttributeContext) -> Option<&'a Function> {
        let functions = &self.pin.functions;
        self.function(ctx).and_then(|f| functions.get(f))
    }

    fn package_overrides(&self, ctx: &AttributeContext) -> Option<&'a PackageOverrides> {
        let packages = &self.pin.packages;
        ctx.package().and_then(|p| packages.get(p))
    }

    fn set(&self, state: PinState) {
        let direction = self
            .bound
            .and_then(|f| self.pin.functions.get(f))
            .and_then(|f| f.direction)
            .or(self.pin.direction)
            .unwrap_or(self.model.config().pin_direction);
        match (state, direction) {
            (PinState::Drive(_), Direction::Output) => {
                tracing::warn!(pin = %self.pin.id, "driving an output-only pin");
            }
            (PinState::Compare(_), Direction::Input) => {
                tracing::warn!(pin = %self.pin.id, "comparing an input-only pin");
            }
            _ => {}
        }
        self.pin.state.set(state);
    }
}

impl Drivable for PinRef<'_> {
    fn width(&self) -> usize {
        1
    }

    fn drive(&self, value: u64) -> Result<()> {
        self.set(PinState::Drive(single_level(&self.pin.id, value)?));
        Ok(())
    }

    fn assert(&self, value: u64) -> Result<()> {
        self.set(PinState::Compare(single_level(&self.pin.id, value)?));
        Ok(())
    }

    fn dont_care(&self) {
        self.set(PinState::DontCare);
    }

    fn toggle(&self) {
        self.set(self.state().toggled());
    }

    fn reset(&self) {
        self.set(self.reset_state());
    }

    fn data(&self) -> u64 {
        u64::from(self.state().level().unwrap_or(false))
    }
}

fn single_level(pin: &Id, value: u64) -> Result<bool> {
    check_fits(pin.as_str(), value, 1)?;
    Ok(value == 1)
}

pub(crate) fn check_fits(target: &str, value: u64, width: usize) -> Result<()> {
    if width < 64 && value >> width != 0 {
        return Err(Error::InvalidAccess {
            target: target.to_string(),
            violation: AccessViolation::TooWide { value, width },
        });
    }
    Ok(())
}

impl Model {
    /// Declares a pin.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateId`] if the id is already used by a pin, alias or
    ///   group, or the declaration repeats a package or function
    /// - [`Error::NotFound`] if a package is not declared
    #[instrument(level = "debug", skip(self, pin), fields(pin = %pin.id))]
    pub fn add_pin(&mut self, pin: PinBuilder) -> Result<()> {
        let pin = Pin::build(self, pin)?;
        if self.pin_names.contains_key(&pin.id) {
            return Err(Error::duplicate(ItemKind::Pin, pin.id.as_str()));
        }
        self.pin_names
            .insert(pin.id.clone(), PinEntry::Pin(self.pins.len()));
        self.pins.push(pin);
        Ok(())
    }

    /// Declares `alias` for the pin or group `target`, or for member `index`
    /// of group `target`.
    ///
    /// An alias of an alias is stored as an alias of the final target.
    /// Indexed aliases resolve the group under the package active at lookup.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateId`] if `alias` is already used
    /// - [`Error::NotFound`] if `target` is not declared
    /// - [`Error::InvalidDeclaration`] if `index` is given for a target that
    ///   is not a group
    #[instrument(level = "debug", skip(self))]
    pub fn add_pin_alias(&mut self, alias: &str, target: &str, index: Option<usize>) -> Result<()> {
        let alias = Id::try_from(alias)?;
        if self.pin_names.contains_key(&alias) {
            return Err(Error::duplicate(ItemKind::Alias, alias.as_str()));
        }

        let (target, index) = match self.pin_names.get_key_value(target) {
            None => return Err(Error::not_found(ItemKind::Pin, target)),
            Some((_, PinEntry::Alias { target, index: inner })) => match (inner, index) {
                (Some(_), Some(_)) => {
                    return Err(Error::InvalidDeclaration(format!(
                        "alias '{alias}' indexes a single pin"
                    )));
                }
                (inner, index) => (target.clone(), index.or(*inner)),
            },
            Some((name, _)) => (name.clone(), index),
        };
        if index.is_some() && !matches!(self.pin_names.get(&target), Some(PinEntry::Groups(_))) {
            return Err(Error::InvalidDeclaration(format!(
                "alias '{alias}' indexes '{target}', which is not a pin group"
            )));
        }

        self.pin_names
            .insert(alias, PinEntry::Alias { target, index });
        Ok(())
    }

    /// Declares a pin group, or another package's definition of an existing
    /// group id.
    ///
    /// Members are resolved under the group's package. A group declared with
    /// a size and no members is filled with pins `<id>0` to `<id>N-1`,
    /// creating those that do not exist yet.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateId`] if the id is used by a pin or alias, or the
    ///   group is already defined for the same package
    /// - [`Error::NotFound`] if the package, a member or a member function is
    ///   not declared, or a member is hidden in the group's package
    /// - [`Error::InvalidDeclaration`] if the group is empty or the size does
    ///   not match the member count
    #[instrument(level = "debug", skip(self, group), fields(group = %group.id))]
    pub fn add_pin_group(&mut self, group: GroupBuilder) -> Result<()> {
        let id = Id::try_from(group.id.as_str())?;
        let package = group
            .package
            .as_deref()
            .map(|p| self.package_id(p))
            .transpose()?;
        match self.pin_names.get(&id) {
            None => {}
            Some(PinEntry::Groups(defs)) if !defs.contains_key(&package) => {}
            Some(_) => return Err(Error::duplicate(ItemKind::PinGroup, id.as_str())),
        }

        if !group.members.is_empty() && group.size.is_some_and(|size| size != group.members.len()) {
            return Err(Error::InvalidDeclaration(format!(
                "pin group '{id}' declares size {:?} but has {} member(s)",
                group.size,
                group.members.len()
            )));
        }
        let mut ctx = AttributeContext::new();
        ctx.set_package(package.clone());
        let members = if group.members.is_empty() {
            self.sized_members(&ctx, &id, group.size.unwrap_or(0))?
        } else {
            group
                .members
                .iter()
                .map(|(member, function)| self.group_member(&ctx, member, function.as_deref()))
                .collect::<Result<Vec<_>>>()?
        };
        let members = NonEmpty::from_vec(members).ok_or_else(|| {
            Error::InvalidDeclaration(format!("pin group '{id}' has no members"))
        })?;

        tracing::debug!(?package, size = members.len(), "pin group declared");
        let def = GroupDef {
            members,
            endian: group.endian,
        };
        match self.pin_names.entry(id) {
            Entry::Occupied(mut entry) => {
                if let PinEntry::Groups(defs) = entry.get_mut() {
                    defs.insert(package, def);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(PinEntry::Groups(BTreeMap::from([(package, def)])));
            }
        }
        Ok(())
    }

    /// Looks up a pin by pin id or alias under `ctx`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the id names no pin or pin alias, or the pin
    ///   is hidden by the active package
    /// - [`Error::IndexOutOfRange`] if an indexed alias points past the end
    ///   of the group selected by the active package
    pub fn pin(&self, ctx: &AttributeContext, id: &str) -> Result<PinRef<'_>> {
        let (pin, bound) = self.resolve_pin(ctx, id)?;
        Ok(self.pin_ref(pin, bound))
    }

    /// Whether `id` names a pin visible under `ctx`.
    #[must_use]
    pub fn has_pin(&self, ctx: &AttributeContext, id: &str) -> bool {
        self.resolve_pin(ctx, id).is_ok()
    }

    /// Looks up a pin group by group id or alias under the active package.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no definition matches the active
    /// package.
    pub fn pin_group(&self, ctx: &AttributeContext, id: &str) -> Result<PinCollection<'_>> {
        let (name, def) = self.group_def(ctx, id)?;
        let members = def
            .members
            .iter()
            .map(|m| self.pin_ref(m.pin, m.function.as_ref()))
            .collect();
        Ok(PinCollection::new(Some(name), members, def.endian))
    }

    /// Whether `id` names a pin group with a definition for `ctx`.
    #[must_use]
    pub fn has_pins(&self, ctx: &AttributeContext, id: &str) -> bool {
        self.group_def(ctx, id).is_ok()
    }

    /// An unnamed little-endian collection of the given pins or aliases.
    ///
    /// # Errors
    ///
    /// As for [`Model::pin`].
    pub fn pins(&self, ctx: &AttributeContext, ids: &[&str]) -> Result<PinCollection<'_>> {
        let members = ids
            .iter()
            .map(|id| self.pin(ctx, id))
            .collect::<Result<Vec<_>>>()?;
        Ok(PinCollection::new(None, members, Endian::Little))
    }

    /// Every pin visible under `ctx`, in id order. Aliases are not repeated.
    pub fn visible_pins<'a>(
        &'a self,
        ctx: &'a AttributeContext,
    ) -> impl Iterator<Item = PinRef<'a>> + 'a {
        self.pin_names
            .values()
            .filter_map(|entry| match entry {
                PinEntry::Pin(index) => Some(self.pin_ref(*index, None)),
                _ => None,
            })
            .filter(|pin| pin.is_visible(ctx))
    }

    /// Makes `function` the active function of `pin` in `ctx`, or clears it.
    ///
    /// `pin` may be an alias; the selection is recorded for the pin itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the pin is not visible under `ctx` or
    /// does not declare the function; `ctx` is left unchanged.
    pub fn select_function(
        &self,
        ctx: &mut AttributeContext,
        pin: &str,
        function: Option<&str>,
    ) -> Result<()> {
        let pin = self.pin(ctx, pin)?;
        let function = match function {
            Some(f) => Some(
                pin.functions()
                    .find(|name| name.as_str() == f)
                    .cloned()
                    .ok_or_else(|| Error::not_found(ItemKind::Function, format!("{}.{f}", pin.id())))?,
            ),
            None => None,
        };
        ctx.set_function(pin.id().clone(), function);
        Ok(())
    }

    fn pin_ref<'a>(&'a self, index: usize, bound: Option<&'a Id>) -> PinRef<'a> {
        PinRef {
            model: self,
            pin: &self.pins[index],
            bound,
        }
    }

    fn resolve_pin<'a>(
        &'a self,
        ctx: &AttributeContext,
        id: &str,
    ) -> Result<(usize, Option<&'a Id>)> {
        let resolved = match self.pin_names.get(id) {
            Some(PinEntry::Pin(index)) => (*index, None),
            Some(PinEntry::Alias {
                target,
                index: None,
            }) => match self.pin_names.get(target) {
                Some(PinEntry::Pin(index)) => (*index, None),
                _ => return Err(Error::not_found(ItemKind::Pin, id)),
            },
            Some(PinEntry::Alias {
                target,
                index: Some(index),
            }) => {
                let (_, def) = self.group_def(ctx, target)?;
                let member = def.members.get(*index).ok_or(Error::IndexOutOfRange {
                    index: *index,
                    size: def.members.len(),
                })?;
                (member.pin, member.function.as_ref())
            }
            Some(PinEntry::Groups(_)) | None => return Err(Error::not_found(ItemKind::Pin, id)),
        };
        if !self.pins[resolved.0].is_visible(ctx) {
            return Err(Error::not_found(ItemKind::Pin, id));
        }
        Ok(resolved)
    }

    fn group_def<'a>(&'a self, ctx: &AttributeContext, id: &str) -> Result<(&'a Id, &'a GroupDef)> {
        let (name, defs) = match self.pin_names.get_key_value(id) {
            Some((name, PinEntry::Groups(defs))) => (name, defs),
            Some((_, PinEntry::Alias {
                target,
                index: None,
            })) => match self.pin_names.get_key_value(target) {
                Some((name, PinEntry::Groups(defs))) => (name, defs),
                _ => return Err(Error::not_found(ItemKind::PinGroup, id)),
            },
            _ => return Err(Error::not_found(ItemKind::PinGroup, id)),
        };

        let package = ctx.package().cloned();
        let def = if package.is_some() {
            defs.get(&package).or_else(|| defs.get(&None))
        } else {
            defs.get(&None)
        };
        def.map(|def| (name, def))
            .ok_or_else(|| Error::not_found(ItemKind::PinGroup, id))
    }

    fn group_member(
        &self,
        ctx: &AttributeContext,
        member: &str,
        function: Option<&str>,
    ) -> Result<Member> {
        let (pin, bound) = self.resolve_pin(ctx, member)?;
        let function = match function {
            Some(f) => Some(
                self.pins[pin]
                    .functions
                    .get_key_value(f)
                    .map(|(name, _)| name.clone())
                    .ok_or_else(|| Error::not_found(ItemKind::Function, format!("{member}.{f}")))?,
            ),
            None => bound.cloned(),
        };
        Ok(Member { pin, function })
    }

    /// Pins `<id>0` to `<id>N-1`, created where missing. Existing pins must
    /// be visible under `ctx`; created pins are in every package.
    fn sized_members(
        &mut self,
        ctx: &AttributeContext,
        id: &Id,
        size: usize,
    ) -> Result<Vec<Member>> {
        let names = (0..size)
            .map(|i| Id::try_from(format!("{id}{i}")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if let Some(taken) = names
            .iter()
            .find(|name| {
                matches!(
                    self.pin_names.get(*name),
                    Some(PinEntry::Alias { .. } | PinEntry::Groups(_))
                )
            })
        {
            return Err(Error::duplicate(ItemKind::Pin, taken.as_str()));
        }
        if let Some(hidden) = names.iter().find(|name| {
            matches!(
                self.pin_names.get(*name),
                Some(PinEntry::Pin(index)) if !self.pins[*index].is_visible(ctx)
            )
        }) {
            return Err(Error::not_found(ItemKind::Pin, hidden.as_str()));
        }

        let mut members = Vec::with_capacity(size);
        for name in names {
            let pin = match self.pin_names.get(&name) {
                Some(PinEntry::Pin(index)) => *index,
                _ => {
                    tracing::debug!(pin = %name, "creating group member pin");
                    let pin = Pin::build(self, PinBuilder::new(&name))?;
                    let index = self.pins.len();
                    self.pins.push(pin);
                    self.pin_names.insert(name, PinEntry::Pin(index));
                    index
                }
            };
            members.push(Member {
                pin,
                function: None,
            });
        }
        Ok(members)
    }
}
