/// Structural equality of built graphs.

use crate::node::Node;

/// Structural equality.
///
/// Kinds must match, then primitive-ness. Primitives compare by typed value
/// (see [`Primitive::same_as`](crate::node::Primitive::same_as)); everything
/// else compares by recorded identity and then children pairwise, in order.
/// Stops at the first mismatch at any depth.
pub fn equal(a: &Node, b: &Node) -> bool {
    let mut pending: Vec<(&Node, &Node)> = vec![(a, b)];

    while let Some((x, y)) = pending.pop() {
        if x.kind() != y.kind() || x.is_primitive() != y.is_primitive() {
            return false;
        }
        if x.is_primitive() {
            match (x.value(), y.value()) {
                (Some(p), Some(q)) if p.same_as(q) => {}
                _ => return false,
            }
        } else if x.identity() != y.identity() {
            return false;
        }
        if x.children().len() != y.children().len() {
            return false;
        }
        // Reversed so the leftmost pair is examined first.
        pending.extend(x.children().iter().zip(y.children()).rev());
    }
    true
}

/// Byte-for-byte comparison of two serialized graphs.
///
/// Stricter than [`equal`]: two renderings of structurally equal graphs
/// that differ in whitespace (compact vs pretty) or float spelling are
/// unequal here. Only meaningful for texts produced by the same serializer.
pub fn equal_text(a: &str, b: &str) -> bool {
    a.as_bytes() == b.as_bytes()
}
