//! Property-based tests for tree structure and integer values.

use devif_model::bits;
use devif_model::prelude::*;
use proptest::prelude::*;

fn names() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z]{1,6}", 1..12)
}

proptest! {
    #[test]
    fn prop_sibling_names_stay_unique(candidates in names()) {
        let mut tree = Tree::generic("root");
        let root = tree.root();
        let mut accepted = std::collections::BTreeSet::new();
        for name in &candidates {
            let id = tree.create(NodeKind::Generic, name.as_str());
            let result = tree.add_child(root, id);
            prop_assert_eq!(result.is_ok(), accepted.insert(name.clone()));
        }
        let listed = tree.child_names(root).unwrap_or_default();
        prop_assert_eq!(listed.len(), accepted.len());
        for name in listed {
            prop_assert!(accepted.contains(name));
        }
    }

    #[test]
    fn prop_children_preserve_insertion_order(candidates in names()) {
        let mut tree = Tree::generic("root");
        let root = tree.root();
        let mut expected: Vec<String> = Vec::new();
        for name in &candidates {
            if tree.graft(root, Tree::generic(name.as_str())).is_ok() {
                expected.push(name.clone());
            }
        }
        let listed: Vec<String> = tree
            .child_names(root)
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect();
        prop_assert_eq!(listed, expected);
    }

    #[test]
    fn prop_clone_is_equal_and_independent(candidates in names(), value in any::<i32>()) {
        let mut tree = Tree::generic("root");
        let root = tree.root();
        for name in &candidates {
            let grafted = tree.graft(root, Tree::generic(name.as_str()).with_attr("v", value));
            prop_assert!(grafted.is_ok() || tree.has_child(root, name));
        }
        let mut copy = tree.clone_subtree(root).unwrap_or_else(|_| Tree::generic("x"));
        prop_assert!(copy == tree);

        let copy_root = copy.root();
        prop_assert!(copy.set_attr(copy_root, "marker", 1).is_ok());
        prop_assert!(copy != tree);
        prop_assert!(!tree.has_attr(root, "marker"));
    }

    #[test]
    fn prop_bigint_words_roundtrip(words in proptest::collection::vec(any::<u32>(), 1..6)) {
        let value = Value::from_words(words.clone());
        let mut expected = words;
        bits::normalize(&mut expected);
        prop_assert_eq!(value.as_bigint_words().unwrap_or_default(), expected);
    }

    #[test]
    fn prop_bigint_decimal_roundtrip(v in any::<u64>()) {
        let rendered = BigInt::from_u64(v).to_decimal_string();
        prop_assert_eq!(&rendered, &v.to_string());
        let parsed = BigInt::parse_decimal(&rendered);
        prop_assert_eq!(parsed.ok().and_then(|b| b.to_u64()), Some(v));
    }

    #[test]
    fn prop_deposit_then_extract(offset in 0usize..96, width in 1usize..=32, field in any::<u32>()) {
        let mut words = vec![u32::MAX; 4];
        bits::deposit(&mut words, offset, width, &[field]);
        let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
        prop_assert_eq!(bits::extract(&words, offset, width, false), field & mask);
        if offset > 0 {
            prop_assert!(bits::bit(&words, offset - 1, false));
        }
        prop_assert!(bits::bit(&words, offset + width, true));
    }

    #[test]
    fn prop_wide_span_matches_single_bits(
        words in proptest::collection::vec(any::<u32>(), 1..6),
        offset in 0usize..200,
        width in 1usize..160,
    ) {
        let span = bits::extract_span(&words, offset, width);
        for i in 0..width {
            prop_assert_eq!(bits::bit(&span, i, false), bits::bit(&words, offset + i, false), "bit {}", i);
        }

        let mut target = vec![0xA5A5_A5A5u32; 3];
        let before = target.clone();
        bits::deposit(&mut target, offset, width, &words);
        for i in 0..offset + width + 32 {
            let want = if i >= offset && i < offset + width {
                bits::bit(&words, i - offset, false)
            } else {
                bits::bit(&before, i, false)
            };
            prop_assert_eq!(bits::bit(&target, i, false), want, "bit {}", i);
        }
    }

    #[test]
    fn prop_register_addresses_never_overlap(widths in proptest::collection::vec(1u32..=70, 1..8)) {
        let mut term = Tree::terminal("t", 8, 16);
        for (i, w) in widths.iter().enumerate() {
            term = match term.with_child(Tree::register(format!("r{i}")).with_attr(attr::WIDTH, *w)) {
                Ok(t) => t,
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            };
        }
        let root = term.root();
        let mut spans = Vec::new();
        for (i, w) in widths.iter().enumerate() {
            let reg = term.get_child(root, &format!("r{i}")).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let addr = term.attr_u32(reg, attr::ADDR).ok().flatten().unwrap_or(u32::MAX);
            spans.push((addr, addr + w.div_ceil(16)));
        }
        for pair in spans.windows(2) {
            prop_assert_eq!(pair[0].1, pair[1].0);
        }
    }
}
