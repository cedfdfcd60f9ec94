//! Fuzzes register identifier parsing and address resolution.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_register_spec

#![deny(static_mut_refs)]
#![no_main]

use devif_engine::resolver::{self, TermId};
use devif_model::prelude::*;
use libfuzzer_sys::fuzz_target;

fn board() -> Option<Tree> {
    let ctrl = Tree::terminal("ctrl", 8, 12)
        .with_child(Tree::register("gains").with_attr(attr::ARRAY, 4u32))
        .ok()?
        .with_child(
            Tree::register("control")
                .with_child(Tree::subregister("enable", 1))
                .ok()?
                .with_child(Tree::subregister("limit", 20))
                .ok()?,
        )
        .ok()?;
    Tree::device_interface("board").with_child(ctrl).ok()
}

fuzz_target!(|data: &[u8]| {
    let Ok(spec) = std::str::from_utf8(data) else {
        return;
    };
    // Must never panic on arbitrary identifiers.
    let parsed = resolver::parse_register_spec(spec);
    let Some(tree) = board() else {
        return;
    };
    let term = TermId::Name("ctrl".into());
    if let Ok(target) = resolver::resolve(&tree, &term, &spec.into(), None) {
        assert!(parsed.is_ok(), "resolved an identifier that does not parse: {spec:?}");
        assert!(!target.addrs.is_empty());
        assert!((1..=32).contains(&target.word_bits()));
    }
});
