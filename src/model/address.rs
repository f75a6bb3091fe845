//! Absolute address resolution.
//!
//! A register's address is its offset plus the base address contributed by
//! its owning node and by every ancestor up to the root. Which base a node
//! contributes depends on the effective domain of the lookup.

use tracing::instrument;

use super::{Model, domain::Contribution};
use crate::{
    context::AttributeContext,
    error::{Error, ItemKind, Result},
    id::Id,
    register::{Register, RegisterId},
};

impl Model {
    /// Resolves the absolute address of `register`.
    ///
    /// The effective domain is `domain` when given, otherwise the domain of
    /// `ctx` if the register belongs to it. An explicit domain always wins
    /// over the context.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if `domain` is given but the register does not
    ///   belong to it (or, for a register without domains, it is not visible
    ///   from the register's node)
    /// - [`Error::AmbiguousDomain`] if no domain is in effect and either the
    ///   register belongs to several domains or an ancestor only declares
    ///   per-domain bases
    #[instrument(level = "trace", skip(self, ctx))]
    pub fn address(
        &self,
        ctx: &AttributeContext,
        register: RegisterId,
        domain: Option<&str>,
    ) -> Result<u64> {
        let reg = self.register_entry(register)?;
        let domain = self.effective_domain(ctx, reg, domain)?;

        let key = (register, domain);
        if let Some(address) = self.address_cache.borrow().get(&key) {
            return Ok(*address);
        }

        let address = self
            .sum_bases(reg, key.1.as_ref())?
            .checked_add(reg.offset)
            .ok_or_else(|| overflow(reg))?;
        self.address_cache.borrow_mut().insert(key, address);
        Ok(address)
    }

    /// The summed base addresses of the register's node and its ancestors,
    /// without the register offset.
    ///
    /// # Errors
    ///
    /// As for [`Model::address`].
    pub fn base_address(
        &self,
        ctx: &AttributeContext,
        register: RegisterId,
        domain: Option<&str>,
    ) -> Result<u64> {
        let reg = self.register_entry(register)?;
        let domain = self.effective_domain(ctx, reg, domain)?;
        self.sum_bases(reg, domain.as_ref())
    }

    /// The register offset relative to its owning node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the handle belongs to another model.
    pub fn local_address(&self, register: RegisterId) -> Result<u64> {
        Ok(self.register_entry(register)?.offset)
    }

    fn effective_domain(
        &self,
        ctx: &AttributeContext,
        reg: &Register,
        explicit: Option<&str>,
    ) -> Result<Option<Id>> {
        if let Some(domain) = explicit {
            if reg.domains.is_empty() {
                return Ok(Some(self.domain(reg.node, domain)?.id().clone()));
            }
            return reg
                .domains
                .iter()
                .find(|d| d.as_str() == domain)
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::not_found(ItemKind::Domain, domain));
        }

        if let Some(domain) = ctx.domain() {
            if reg.domains.is_empty() || reg.domains.contains(domain) {
                return Ok(Some(domain.clone()));
            }
            tracing::debug!(
                register = %reg.id,
                %domain,
                "ambient domain ignored, register does not belong to it"
            );
        }

        if reg.domains.len() > 1 {
            return Err(Error::AmbiguousDomain {
                register: reg.id.to_string(),
                candidates: reg.domains.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(None)
    }

    fn sum_bases(&self, reg: &Register, domain: Option<&Id>) -> Result<u64> {
        let mut total: u64 = 0;
        for node in self.lineage(reg.node) {
            let base = &self.node(node)?.base;
            match base.contribution(domain) {
                Contribution::Address(address) => {
                    total = total.checked_add(address).ok_or_else(|| overflow(reg))?;
                }
                Contribution::NeedsDomain => {
                    return Err(Error::AmbiguousDomain {
                        register: reg.id.to_string(),
                        candidates: base.by_domain.keys().map(ToString::to_string).collect(),
                    });
                }
            }
        }
        Ok(total)
    }
}

fn overflow(reg: &Register) -> Error {
    Error::InvalidDeclaration(format!("address of register '{}' overflows", reg.id))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::{model::Domain, register::RegisterBuilder};

    /// Node `a` (base 0x1000_0000) owns node `b` with per-domain bases
    /// `{ips: 0x2000_0000, ahb: 0x3000_0000}`; `b` owns `reg1` at 0x200 in
    /// domain `ips`.
    fn two_level_model() -> (Model, RegisterId) {
        let mut model = Model::new("a").unwrap();
        let a = model.root();
        model.set_base_address(a, 0x1000_0000).unwrap();
        let b = model.add_node(a, "b").unwrap();
        for domain in ["ips", "ahb"] {
            model
                .add_domain(b, Domain::new(Id::try_from(domain).unwrap()))
                .unwrap();
        }
        model.set_domain_base_address(b, "ips", 0x2000_0000).unwrap();
        model.set_domain_base_address(b, "ahb", 0x3000_0000).unwrap();

        let reg1 = model
            .add_register(b, RegisterBuilder::new("reg1", 0x200).domain("ips"))
            .unwrap();
        (model, reg1)
    }

    #[test]
    fn unqualified_lookup_through_per_domain_node_is_ambiguous() {
        let (model, reg1) = two_level_model();
        let ctx = AttributeContext::new();

        let err = model.address(&ctx, reg1, None).unwrap_err();

        assert_eq!(
            err,
            Error::AmbiguousDomain {
                register: "reg1".into(),
                candidates: vec!["ahb".into(), "ips".into()],
            }
        );
    }

    #[test]
    fn ambient_domain_selects_the_base() {
        let (model, reg1) = two_level_model();
        let mut ctx = AttributeContext::new();
        model.select_domain(&mut ctx, Some("ips")).unwrap();

        assert_eq!(model.address(&ctx, reg1, None).unwrap(), 0x3000_0200);
        assert_eq!(model.base_address(&ctx, reg1, None).unwrap(), 0x3000_0000);
        assert_eq!(model.local_address(reg1).unwrap(), 0x200);
    }

    #[test]
    fn explicit_domain_wins_over_context() {
        let mut model = Model::new("top").unwrap();
        let top = model.root();
        for domain in ["ips", "ahb"] {
            model
                .add_domain(top, Domain::new(Id::try_from(domain).unwrap()))
                .unwrap();
        }
        model.set_domain_base_address(top, "ips", 0x100).unwrap();
        model.set_domain_base_address(top, "ahb", 0x200).unwrap();
        let reg = model
            .add_register(
                top,
                RegisterBuilder::new("shared", 0x4)
                    .domain("ips")
                    .domain("ahb"),
            )
            .unwrap();

        let mut ctx = AttributeContext::new();
        model.select_domain(&mut ctx, Some("ips")).unwrap();

        assert_eq!(model.address(&ctx, reg, None).unwrap(), 0x104);
        assert_eq!(model.address(&ctx, reg, Some("ahb")).unwrap(), 0x204);
    }

    #[test]
    fn multi_domain_register_without_domain_is_ambiguous() {
        let mut model = Model::new("top").unwrap();
        let top = model.root();
        model.set_base_address(top, 0x4000).unwrap();
        for domain in ["ips", "ahb"] {
            model
                .add_domain(top, Domain::new(Id::try_from(domain).unwrap()))
                .unwrap();
        }
        let reg = model
            .add_register(
                top,
                RegisterBuilder::new("shared", 0x8)
                    .domain("ips")
                    .domain("ahb"),
            )
            .unwrap();

        let ctx = AttributeContext::new();
        assert!(matches!(
            model.address(&ctx, reg, None),
            Err(Error::AmbiguousDomain { .. })
        ));
        assert_eq!(model.address(&ctx, reg, Some("ahb")).unwrap(), 0x4008);
    }

    #[test]
    fn explicit_domain_outside_register_domains_is_not_found() {
        let (model, reg1) = two_level_model();
        let ctx = AttributeContext::new();

        let err = model.address(&ctx, reg1, Some("ahb")).unwrap_err();

        assert_eq!(err, Error::not_found(ItemKind::Domain, "ahb"));
    }

    #[test]
    fn ambient_domain_the_register_lacks_is_ignored() {
        let (mut model, _) = two_level_model();
        let b = model.child(model.root(), "b").unwrap();
        model.set_default_base_address(b, 0x0500_0000).unwrap();
        let reg = model
            .add_register(b, RegisterBuilder::new("reg2", 0x10).domain("ips"))
            .unwrap();

        let mut ctx = AttributeContext::new();
        model.select_domain(&mut ctx, Some("ahb")).unwrap();

        assert_eq!(model.address(&ctx, reg, None).unwrap(), 0x1500_0010);
    }

    #[test_case(None, 0x1000_0000 + 0x0500_0000 + 0x40; "default base without domain")]
    #[test_case(Some("ips"), 0x1000_0000 + 0x2000_0000 + 0x40; "per-domain base")]
    fn default_base_covers_missing_domain(domain: Option<&str>, expected: u64) {
        let (mut model, _) = two_level_model();
        let b = model.child(model.root(), "b").unwrap();
        model.set_default_base_address(b, 0x0500_0000).unwrap();
        let reg = model
            .add_register(b, RegisterBuilder::new("plain", 0x40))
            .unwrap();

        let ctx = AttributeContext::new();
        assert_eq!(model.address(&ctx, reg, domain).unwrap(), expected);
    }

    #[test]
    fn resolution_is_idempotent_and_tracks_base_changes() {
        let (mut model, reg1) = two_level_model();
        let mut ctx = AttributeContext::new();
        model.select_domain(&mut ctx, Some("ips")).unwrap();

        let first = model.address(&ctx, reg1, None).unwrap();
        let second = model.address(&ctx, reg1, None).unwrap();
        assert_eq!(first, second);

        model.add_node(model.root(), "unrelated").unwrap();
        assert_eq!(model.address(&ctx, reg1, None).unwrap(), first);

        model.set_base_address(model.root(), 0).unwrap();
        assert_eq!(model.address(&ctx, reg1, None).unwrap(), 0x2000_0200);
    }

    #[test]
    fn deep_hierarchy_sums_every_ancestor() {
        let mut model = Model::new("top").unwrap();
        let mut node = model.root();
        let mut expected = 0;
        for depth in 0..5_u64 {
            let base = 0x100 << depth;
            model.set_base_address(node, base).unwrap();
            expected += base;
            node = model.add_node(node, &format!("n{depth}")).unwrap();
        }
        let reg = model
            .add_register(node, RegisterBuilder::new("leaf", 0x4))
            .unwrap();

        let ctx = AttributeContext::new();
        assert_eq!(model.address(&ctx, reg, None).unwrap(), expected + 0x4);
    }
}
