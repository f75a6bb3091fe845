//! Register, bit and pin modelling for silicon devices
//!
//! A [`Model`] describes one device: a tree of components that declare
//! domains and base addresses and own registers, plus a flat set of pins with
//! package variants and selectable functions. Queries resolve against an
//! explicit [`AttributeContext`] holding the active package, domain and pin
//! functions.
//!
//! ```
//! use silicon_map::{AttributeContext, BitAccess, FieldDecl, Model, RegisterBuilder};
//!
//! let mut model = Model::new("soc")?;
//! let timer = model.add_node(model.root(), "timer")?;
//! model.set_base_address(timer, 0x4000_0000)?;
//! let ctrl = model.add_register(
//!     timer,
//!     RegisterBuilder::new("ctrl", 0x10).field(FieldDecl::new("en", 0, 1)),
//! )?;
//!
//! let ctx = AttributeContext::new();
//! let reg = model.reg(ctrl)?;
//! assert_eq!(reg.address(&ctx, None)?, 0x4000_0010);
//! reg.field(&ctx, "en")?.write(1)?;
//! assert_eq!(reg.bits().data(), 1);
//! # Ok::<(), silicon_map::Error>(())
//! ```

mod config;
pub use config::Config;

mod context;
pub use context::{AttributeContext, ContextGuard};

mod error;
pub use error::{AccessViolation, Error, ItemKind, Result};

mod id;
pub use id::{Id, InvalidIdError};

mod meta;
pub use meta::{Metadata, Value};

pub mod model;
pub use model::{Domain, Model, NodeId};

pub mod pin;
pub use pin::{
    ClockParams, ClockState, Direction, Drivable, Endian, Function, GroupBuilder, PackageOverrides,
    PinBuilder, PinCollection, PinRef, PinState,
};

pub mod register;
pub use register::{
    Access, BitAccess, BitCollection, BitOrder, BitRef, FieldDecl, RegisterBuilder, RegisterId,
    RegisterRef, ShiftOut,
};
