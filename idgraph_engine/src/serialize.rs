/// Canonical text form of a node tree.
///
/// Shape of every node, fields in this order:
///
/// ```text
/// {"obj_type":"list","obj_id":42,"children":[...]}
/// {"obj_type":"int","obj_val":"5","children":[]}
/// ```
///
/// Non-primitive nodes carry `obj_id`, primitive nodes carry `obj_val`
/// (the value rendered as text). The compact form has no whitespace and is
/// byte-identical for equal trees; it is the wire format used when graphs
/// are compared across processes.
///
/// Writer and reader both keep their own stack, so neither direction is
/// limited by nesting depth.

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::node::{Kind, Node, Primitive};

/// Compact canonical text.
pub fn to_text(node: &Node) -> String {
    Writer::new(false, true).write(node)
}

/// Indented rendering of the same document, for humans. Laid out the way
/// `serde_json::to_string_pretty` lays out the equivalent JSON value.
pub fn to_text_pretty(node: &Node) -> String {
    Writer::new(true, true).write(node)
}

/// Compact text with every `obj_id` written as 0. Orders sibling subtrees
/// by shape alone when their identities are not yet final.
pub(crate) fn to_shape_text(node: &Node) -> String {
    Writer::new(false, false).write(node)
}

struct Writer {
    out: String,
    pretty: bool,
    ids: bool,
}

impl Writer {
    fn new(pretty: bool, ids: bool) -> Self {
        Self {
            out: String::new(),
            pretty,
            ids,
        }
    }

    /// Each stack entry is a node, the index of its next child and its
    /// indentation level.
    fn write(mut self, root: &Node) -> String {
        self.open(root, 0);
        let mut stack: Vec<(&Node, usize, usize)> = vec![(root, 0, 0)];

        while let Some(top) = stack.last_mut() {
            let (current, index, level) = *top;
            match current.children().get(index) {
                Some(child) => {
                    top.1 += 1;
                    if index > 0 {
                        self.out.push(',');
                    }
                    self.newline(level + 2);
                    self.open(child, level + 2);
                    stack.push((child, 0, level + 2));
                }
                None => {
                    if index > 0 {
                        self.newline(level + 1);
                    }
                    self.out.push(']');
                    self.newline(level);
                    self.out.push('}');
                    stack.pop();
                }
            }
        }
        self.out
    }

    /// Everything up to and including the opening bracket of `children`.
    fn open(&mut self, node: &Node, level: usize) {
        self.out.push('{');
        self.field("obj_type", level + 1);
        self.out.push('"');
        self.out.push_str(node.kind().name());
        self.out.push('"');
        self.out.push(',');
        match node.value() {
            Some(value) => {
                self.field("obj_val", level + 1);
                self.out.push_str(&Value::String(value.render()).to_string());
            }
            None => {
                self.field("obj_id", level + 1);
                let identity = if self.ids { node.identity() } else { 0 };
                self.out.push_str(&identity.to_string());
            }
        }
        self.out.push(',');
        self.field("children", level + 1);
        self.out.push('[');
    }

    fn field(&mut self, name: &str, level: usize) {
        self.newline(level);
        self.out.push('"');
        self.out.push_str(name);
        self.out.push_str(if self.pretty { "\": " } else { "\":" });
    }

    fn newline(&mut self, level: usize) {
        if self.pretty {
            self.out.push('\n');
            for _ in 0..level {
                self.out.push_str("  ");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Parse canonical text (compact or pretty) back into a node tree.
///
/// Strict: unknown kinds, unknown or repeated fields, missing fields,
/// children on primitives, unparsable values and trailing input are all
/// rejected. Nesting depth is bounded by memory only.
pub fn from_text(text: &str) -> Result<Node> {
    let mut reader = Reader::new(text);
    reader.expect(b'{')?;
    let mut stack = vec![Partial::default()];
    let mut state = Expect::FirstMember;

    let root = loop {
        match state {
            Expect::FirstMember if reader.eat(b'}') => {}
            Expect::FirstMember => {
                state = member(&mut reader, &mut stack)?;
                continue;
            }
            Expect::NextMember if reader.eat(b',') => {
                state = member(&mut reader, &mut stack)?;
                continue;
            }
            Expect::NextMember => reader.expect(b'}')?,
            Expect::NextChild if reader.eat(b',') => {
                reader.expect(b'{')?;
                stack.push(Partial::default());
                state = Expect::FirstMember;
                continue;
            }
            Expect::NextChild => {
                reader.expect(b']')?;
                state = Expect::NextMember;
                continue;
            }
        }

        // The innermost node just closed.
        let partial = stack
            .pop()
            .ok_or_else(|| reader.error("unbalanced document"))?;
        let node = partial.finish()?;
        match stack.last_mut() {
            Some(parent) => {
                parent.push_child(node);
                state = Expect::NextChild;
            }
            None => break node,
        }
    };

    reader.skip_ws();
    if reader.pos != reader.bytes.len() {
        return Err(reader.error("trailing characters"));
    }
    Ok(root)
}

/// What the reader accepts next.
#[derive(Clone, Copy)]
enum Expect {
    /// Right after `{`: a field or `}`.
    FirstMember,
    /// After a field: `,` or `}`.
    NextMember,
    /// After a child node: `,` or `]`.
    NextChild,
}

/// Fields of a node whose closing brace has not been read yet.
#[derive(Default)]
struct Partial {
    kind: Option<Kind>,
    identity: Option<u64>,
    value: Option<String>,
    children: Option<Vec<Node>>,
}

impl Partial {
    fn push_child(&mut self, node: Node) {
        self.children.get_or_insert_with(Vec::new).push(node);
    }

    fn finish(self) -> Result<Node> {
        let kind = self.kind.ok_or_else(|| missing("obj_type"))?;
        let children = self.children.ok_or_else(|| missing("children"))?;
        if kind.is_primitive() {
            let text = self.value.ok_or_else(|| missing("obj_val"))?;
            if self.identity.is_some() {
                return Err(EngineError::Decode(format!(
                    "primitive {} node has an obj_id",
                    kind.name()
                )));
            }
            if !children.is_empty() {
                return Err(EngineError::Decode(format!(
                    "primitive {} node has children",
                    kind.name()
                )));
            }
            return Ok(Node::leaf(Primitive::parse(kind, &text)?));
        }
        if self.value.is_some() {
            return Err(EngineError::Decode(format!(
                "{} node has an obj_val",
                kind.name()
            )));
        }
        let identity = self.identity.ok_or_else(|| missing("obj_id"))?;
        Ok(Node::container(identity, kind, children))
    }
}

/// Read one `"key": value` pair into the innermost partial node. A
/// non-empty `children` array opens its first child.
fn member(reader: &mut Reader<'_>, stack: &mut Vec<Partial>) -> Result<Expect> {
    let key = reader.string()?;
    reader.expect(b':')?;
    let partial = stack
        .last_mut()
        .ok_or_else(|| reader.error("unbalanced document"))?;
    let repeated = match key.as_str() {
        "obj_type" => {
            let name = reader.string()?;
            let kind = Kind::from_name(&name)
                .ok_or_else(|| EngineError::Decode(format!("unknown obj_type {:?}", name)))?;
            partial.kind.replace(kind).is_some()
        }
        "obj_id" => {
            let identity = reader.unsigned()?;
            partial.identity.replace(identity).is_some()
        }
        "obj_val" => {
            let value = reader.string()?;
            partial.value.replace(value).is_some()
        }
        "children" => {
            if partial.children.replace(Vec::new()).is_some() {
                return Err(repeated_field(&key));
            }
            reader.expect(b'[')?;
            if reader.eat(b']') {
                return Ok(Expect::NextMember);
            }
            reader.expect(b'{')?;
            stack.push(Partial::default());
            return Ok(Expect::FirstMember);
        }
        _ => return Err(EngineError::Decode(format!("unknown field {:?}", key))),
    };
    if repeated {
        return Err(repeated_field(&key));
    }
    Ok(Expect::NextMember)
}

/// Byte cursor over the input. Only JSON's structural tokens are scanned
/// here; string escapes are resolved by `serde_json`.
struct Reader<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.bytes.get(self.pos), Some(b' ' | b'\n' | b'\r' | b'\t')) {
            self.pos += 1;
        }
    }

    /// Consume `byte` if it is the next token.
    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.bytes.get(self.pos) == Some(&byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", byte as char)))
        }
    }

    fn string(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let start = self.pos - 1;
        loop {
            match self.bytes.get(self.pos) {
                None => return Err(self.error("unterminated string")),
                Some(b'\\') => self.pos += 2,
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        let token = self
            .text
            .get(start..self.pos)
            .ok_or_else(|| self.error("malformed string"))?;
        serde_json::from_str(token).map_err(|e| self.error(&e.to_string()))
    }

    fn unsigned(&mut self) -> Result<u64> {
        self.skip_ws();
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        self.text[start..self.pos]
            .parse()
            .map_err(|_| self.error("expected an unsigned integer"))
    }

    fn error(&self, message: &str) -> EngineError {
        EngineError::Decode(format!("{} at byte {}", message, self.pos))
    }
}

fn missing(field: &str) -> EngineError {
    EngineError::Decode(format!("missing field {:?}", field))
}

fn repeated_field(field: &str) -> EngineError {
    EngineError::Decode(format!("repeated field {:?}", field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::equal;

    fn sample() -> Node {
        Node::container(
            9,
            Kind::Dict,
            vec![
                Node::leaf(Primitive::Str("x\"y".to_string())),
                Node::leaf(Primitive::Float(0.5)),
                Node::leaf(Primitive::Str("z".to_string())),
                Node::container(
                    10,
                    Kind::List,
                    vec![Node::leaf(Primitive::Bool(true)), Node::stub(9, Kind::Dict)],
                ),
            ],
        )
    }

    #[test]
    fn leaf_shape() {
        let text = to_text(&Node::leaf(Primitive::Int(-3)));
        assert_eq!(text, r#"{"obj_type":"int","obj_val":"-3","children":[]}"#);
    }

    #[test]
    fn container_shape() {
        let node = Node::container(
            4,
            Kind::Object,
            vec![
                Node::leaf(Primitive::Str("a".to_string())),
                Node::leaf(Primitive::Bool(false)),
            ],
        );
        assert_eq!(
            to_text(&node),
            concat!(
                r#"{"obj_type":"class","obj_id":4,"children":["#,
                r#"{"obj_type":"string","obj_val":"a","children":[]},"#,
                r#"{"obj_type":"bool","obj_val":"false","children":[]}]}"#
            )
        );
    }

    /// A chain of `depth` nested lists around one int.
    fn chain(depth: usize) -> Node {
        let mut node = Node::leaf(Primitive::Int(0));
        for i in 0..depth {
            node = Node::container(i as u64 + 1, Kind::List, vec![node]);
        }
        node
    }

    #[test]
    fn pretty_layout_matches_serde() {
        let node = sample();
        let doc: Value = serde_json::from_str(&to_text(&node)).unwrap();
        assert_eq!(to_text_pretty(&node), serde_json::to_string_pretty(&doc).unwrap());
        assert_eq!(to_text(&node), serde_json::to_string(&doc).unwrap());
    }

    #[test]
    fn shape_text_hides_identities() {
        let a = Node::container(3, Kind::List, vec![Node::stub(3, Kind::List)]);
        let b = Node::container(8, Kind::List, vec![Node::stub(8, Kind::List)]);
        assert_ne!(to_text(&a), to_text(&b));
        assert_eq!(to_shape_text(&a), to_shape_text(&b));
        assert!(to_shape_text(&a).contains(r#""obj_id":0"#));
    }

    #[test]
    fn deep_text_round_trips_on_a_small_stack() {
        const DEPTH: usize = 1_000;
        let worker = std::thread::Builder::new()
            .stack_size(128 * 1024)
            .spawn(|| {
                let node = chain(DEPTH);
                let compact = from_text(&to_text(&node)).unwrap();
                let pretty = from_text(&to_text_pretty(&node)).unwrap();
                equal(&node, &compact) && equal(&node, &pretty)
            })
            .unwrap();
        assert!(worker.join().unwrap());
    }

    #[test]
    fn deep_lists_decode_past_serde_recursion_limit() {
        let node = from_text(&to_text(&chain(300))).unwrap();
        assert_eq!(node.node_count(), 301);
    }

    #[test]
    fn decode_inverts_encode() {
        let node = sample();
        let back = from_text(&to_text(&node)).unwrap();
        assert!(equal(&node, &back));
        assert_eq!(to_text(&back), to_text(&node));

        let pretty = from_text(&to_text_pretty(&node)).unwrap();
        assert!(equal(&node, &pretty));
    }

    #[test]
    fn decode_rejects_malformed_documents() {
        for text in [
            "[]",
            r#"{"obj_type":"list","children":[]}"#,
            r#"{"obj_type":"widget","obj_id":1,"children":[]}"#,
            r#"{"obj_type":"int","obj_val":"x","children":[]}"#,
            r#"{"obj_type":"int","obj_val":"1","children":[{"obj_type":"int","obj_val":"1","children":[]}]}"#,
            "not json",
            r#"{"obj_type":"int","obj_val":"1","children":[]} x"#,
            r#"{"obj_type":"int","obj_val":"1","obj_id":2,"children":[]}"#,
            r#"{"obj_type":"list","obj_id":1,"obj_id":2,"children":[]}"#,
            r#"{"obj_type":"list","obj_id":1,"children":[],"extra":1}"#,
            r#"{"obj_type":"list","obj_id":-1,"children":[]}"#,
            r#"{"obj_type":"list","obj_id":1,"children":[{"obj_type":"int","obj_val":"1","children":[]}"#,
        ] {
            assert!(matches!(from_text(text), Err(EngineError::Decode(_))), "{text}");
        }
    }
}
