//! Resolves register addresses through a deep hierarchy and walks every bit of
//! a wide register in each traversal order.

#![allow(missing_docs)]

use criterion::{Criterion, criterion_group, criterion_main};
use silicon_map::{
    AttributeContext, BitAccess, Domain, Id, Model, RegisterBuilder, RegisterId,
};

const DEPTH: u64 = 16;

/// A chain of nodes, each with a per-domain base, ending in one register.
fn deep_model() -> (Model, RegisterId) {
    let mut model = Model::new("soc").unwrap();
    let mut node = model.root();
    model
        .add_domain(node, Domain::new(Id::try_from("ips").unwrap()))
        .unwrap();
    for depth in 0..DEPTH {
        model
            .set_domain_base_address(node, "ips", 0x1000 * depth)
            .unwrap();
        node = model.add_node(node, &format!("level{depth}")).unwrap();
    }
    let reg = model
        .add_register(node, RegisterBuilder::new("leaf", 0x40).domain("ips").width(64))
        .unwrap();
    (model, reg)
}

fn address(c: &mut Criterion) {
    let (mut model, reg) = deep_model();
    let mut ctx = AttributeContext::new();
    model.select_domain(&mut ctx, Some("ips")).unwrap();

    c.bench_function("address (memoized)", |b| {
        b.iter(|| model.address(&ctx, reg, None).unwrap());
    });

    c.bench_function("address (cold)", |b| {
        b.iter(|| {
            model.set_base_address(model.root(), 0).unwrap();
            model.address(&ctx, reg, None).unwrap()
        });
    });
}

fn traversal(c: &mut Criterion) {
    let (model, reg) = deep_model();
    let bits = model.reg(reg).unwrap().bits();

    c.bench_function("shift out 64 bits", |b| {
        b.iter(|| {
            bits.shift_out_left()
                .chain(bits.shift_out_right())
                .filter(|(bit, _)| bit.value())
                .count()
        });
    });

    c.bench_function("write then read 64 bits", |b| {
        b.iter(|| {
            bits.write(0xDEAD_BEEF_0BAD_F00D).unwrap();
            bits.data()
        });
    });
}

criterion_group!(benches, address, traversal);
criterion_main!(benches);
