//! The component tree that owns every register and pin of a device.
//!
//! A [`Model`] is a tree of hierarchy nodes rooted at the device itself.
//! Nodes declare domains and base addresses and own registers. Pins are owned
//! by the model as a whole, whichever component asked for them.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use petgraph::{Direction, Graph, graph::NodeIndex};
use tracing::instrument;

use crate::{
    config::Config,
    context::AttributeContext,
    error::{Error, ItemKind, Result},
    id::Id,
    meta::Metadata,
    pin::{Pin, PinEntry},
    register::{Register, RegisterId},
};

mod address;
mod domain;

use domain::BaseAddress;
pub use domain::Domain;

/// Handle to a hierarchy node of a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(NodeIndex);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.index())
    }
}

/// One component instance in the hierarchy.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: Id,
    pub(crate) base: BaseAddress,
    pub(crate) domains: BTreeMap<Id, Domain>,
    pub(crate) registers: BTreeMap<Id, RegisterId>,
    /// Metadata defaults for registers owned by this node.
    pub(crate) register_meta: Metadata,
}

impl Node {
    fn new(name: Id) -> Self {
        Self {
            name,
            base: BaseAddress::default(),
            domains: BTreeMap::new(),
            registers: BTreeMap::new(),
            register_meta: Metadata::new(),
        }
    }
}

/// The register, bit and pin model of one device.
///
/// Storage is decomposed:
/// - Hierarchy: `Graph<Node, ()>` with edges pointing from parent to child
/// - Registers: an arena indexed by [`RegisterId`], referenced from their node
/// - Pins: an arena, with pins, aliases and groups sharing one namespace
///
/// Every query takes the [`AttributeContext`] it should be answered under;
/// nothing is resolved ahead of time.
#[derive(Debug)]
pub struct Model {
    config: Config,
    graph: Graph<Node, ()>,
    root: NodeId,
    pub(crate) registers: Vec<Register>,
    pub(crate) pins: Vec<Pin>,
    pub(crate) pin_names: BTreeMap<Id, PinEntry>,
    packages: BTreeSet<Id>,
    /// Resolved addresses keyed by register and effective domain.
    address_cache: RefCell<BTreeMap<(RegisterId, Option<Id>), u64>>,
}

impl Model {
    /// Creates a model whose root node is called `name`, using the default
    /// [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if `name` is not a valid identifier.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_config(name, Config::default())
    }

    /// Creates a model with the given process-wide defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if `name` is not a valid identifier.
    pub fn with_config(name: &str, config: Config) -> Result<Self> {
        let mut graph = Graph::new();
        let root = NodeId(graph.add_node(Node::new(Id::try_from(name)?)));
        Ok(Self {
            config,
            graph,
            root,
            registers: Vec::new(),
            pins: Vec::new(),
            pin_names: BTreeMap::new(),
            packages: BTreeSet::new(),
            address_cache: RefCell::new(BTreeMap::new()),
        })
    }

    /// The process-wide defaults.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access to the process-wide defaults.
    ///
    /// Changes apply to items declared before and after the call.
    pub const fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// The root node, standing for the device itself.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Adds a child node under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `parent` already has a child called
    /// `name`, [`Error::NotFound`] if `parent` is not part of this model.
    #[instrument(level = "debug", skip(self))]
    pub fn add_node(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let name = Id::try_from(name)?;
        self.node(parent)?;
        if self.child(parent, &name).is_ok() {
            return Err(Error::duplicate(ItemKind::Node, name.as_str()));
        }
        let child = NodeId(self.graph.add_node(Node::new(name)));
        self.graph.add_edge(parent.0, child.0, ());
        Ok(child)
    }

    /// The name of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `node` is not part of this model.
    pub fn name(&self, node: NodeId) -> Result<&Id> {
        Ok(&self.node(node)?.name)
    }

    /// The parent of `node`, or `None` for the root.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.graph
            .neighbors_directed(node.0, Direction::Incoming)
            .next()
            .map(NodeId)
    }

    /// The children of `node`, in declaration order.
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut children: Vec<_> = self
            .graph
            .neighbors_directed(node.0, Direction::Outgoing)
            .map(NodeId)
            .collect();
        children.sort();
        children.into_iter()
    }

    /// Looks up the child of `node` called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no such child.
    pub fn child(&self, node: NodeId, name: &str) -> Result<NodeId> {
        self.children(node)
            .find(|child| self.graph[child.0].name.as_str() == name)
            .ok_or_else(|| Error::not_found(ItemKind::Node, name))
    }

    /// `node` followed by each of its ancestors up to the root.
    pub fn lineage(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), |n| self.parent(*n))
    }

    /// Dot-separated names from the root down to `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `node` is not part of this model.
    pub fn path(&self, node: NodeId) -> Result<String> {
        self.node(node)?;
        let mut names: Vec<&str> = self
            .lineage(node)
            .map(|n| self.graph[n.0].name.as_str())
            .collect();
        names.reverse();
        Ok(names.join("."))
    }

    /// Declares a domain on `node`, visible to it and its descendants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `node` already declares a domain with
    /// the same id.
    #[instrument(level = "debug", skip(self, domain), fields(domain = %domain.id()))]
    pub fn add_domain(&mut self, node: NodeId, domain: Domain) -> Result<()> {
        let declared = &mut self.node_mut(node)?.domains;
        if declared.contains_key(domain.id()) {
            return Err(Error::duplicate(ItemKind::Domain, domain.id().as_str()));
        }
        declared.insert(domain.id().clone(), domain);
        Ok(())
    }

    /// Resolves the domain `id` as seen from `node`.
    ///
    /// The nearest declaration on the path to the root wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no node on the path declares it.
    pub fn domain(&self, node: NodeId, id: &str) -> Result<&Domain> {
        self.node(node)?;
        self.lineage(node)
            .find_map(|n| self.graph[n.0].domains.get(id))
            .ok_or_else(|| Error::not_found(ItemKind::Domain, id))
    }

    /// Whether any node of the model declares the domain `id`.
    #[must_use]
    pub fn has_domain(&self, id: &str) -> bool {
        self.graph
            .node_weights()
            .any(|node| node.domains.contains_key(id))
    }

    /// Sets the unqualified base address of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `node` is not part of this model.
    #[instrument(level = "debug", skip(self))]
    pub fn set_base_address(&mut self, node: NodeId, address: u64) -> Result<()> {
        self.node_mut(node)?.base.single = Some(address);
        self.invalidate_addresses();
        Ok(())
    }

    /// Sets the base address `node` contributes for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `domain` is not visible from `node`.
    #[instrument(level = "debug", skip(self))]
    pub fn set_domain_base_address(
        &mut self,
        node: NodeId,
        domain: &str,
        address: u64,
    ) -> Result<()> {
        let domain = self.domain(node, domain)?.id().clone();
        self.node_mut(node)?.base.by_domain.insert(domain, address);
        self.invalidate_addresses();
        Ok(())
    }

    /// Sets the base address `node` contributes when its per-domain bases do
    /// not cover the requested domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `node` is not part of this model.
    #[instrument(level = "debug", skip(self))]
    pub fn set_default_base_address(&mut self, node: NodeId, address: u64) -> Result<()> {
        self.node_mut(node)?.base.default = Some(address);
        self.invalidate_addresses();
        Ok(())
    }

    /// Declares metadata defaults for the registers owned by `node`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `node` is not part of this model.
    pub fn set_register_defaults(&mut self, node: NodeId, meta: &Metadata) -> Result<()> {
        self.node_mut(node)?.register_meta.merge(meta);
        Ok(())
    }

    /// Declares a package variant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if the package already exists.
    #[instrument(level = "debug", skip(self))]
    pub fn add_package(&mut self, id: &str) -> Result<()> {
        let id = Id::try_from(id)?;
        if self.packages.contains(&id) {
            return Err(Error::duplicate(ItemKind::Package, id.as_str()));
        }
        self.packages.insert(id);
        Ok(())
    }

    /// The declared packages, in name order.
    pub fn packages(&self) -> impl Iterator<Item = &Id> {
        self.packages.iter()
    }

    /// Whether `id` is a declared package.
    #[must_use]
    pub fn has_package(&self, id: &str) -> bool {
        self.packages.contains(id)
    }

    /// Makes `package` the active package of `ctx`, or clears it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the package is not declared; `ctx` is
    /// left unchanged.
    pub fn select_package(&self, ctx: &mut AttributeContext, package: Option<&str>) -> Result<()> {
        let package = package.map(|p| self.package_id(p)).transpose()?;
        ctx.set_package(package);
        Ok(())
    }

    /// Makes `domain` the active domain of `ctx`, or clears it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no node declares the domain; `ctx` is
    /// left unchanged.
    pub fn select_domain(&self, ctx: &mut AttributeContext, domain: Option<&str>) -> Result<()> {
        let domain = match domain {
            Some(d) if self.has_domain(d) => Some(Id::try_from(d)?),
            Some(d) => return Err(Error::not_found(ItemKind::Domain, d)),
            None => None,
        };
        ctx.set_domain(domain);
        Ok(())
    }

    pub(crate) fn package_id(&self, id: &str) -> Result<Id> {
        self.packages
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(ItemKind::Package, id))
    }

    pub(crate) fn node(&self, node: NodeId) -> Result<&Node> {
        self.graph
            .node_weight(node.0)
            .ok_or_else(|| Error::not_found(ItemKind::Node, node.to_string()))
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> Result<&mut Node> {
        self.graph
            .node_weight_mut(node.0)
            .ok_or_else(|| Error::not_found(ItemKind::Node, node.to_string()))
    }

    fn invalidate_addresses(&self) {
        self.address_cache.borrow_mut().clear();
    }
}
