use crate::{CellData, Value};

pub trait Visitable {
    /// Calls the visitor once per outgoing value. Every reference the cell holds must be
    /// reported, a missing edge lets the collector free a reachable cell.
    fn visit_edges(&self, visitor: &mut impl Visitor);
}

pub trait Visitor {
    fn visit(&mut self, value: Value);
}

impl<F: FnMut(Value)> Visitor for F {
    #[inline]
    fn visit(&mut self, value: Value) {
        self(value)
    }
}

// one arm per cell kind, the payload types report their own fields
impl Visitable for CellData {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        match self {
            CellData::Free => (),
            CellData::Node(node) => node.visit_edges(visitor),
            CellData::TupleLeaf(leaf) => leaf.visit_edges(visitor),
            CellData::TupleIndirect(indirect) => indirect.visit_edges(visitor),
            CellData::Chunk(chunk) => visitor.visit(chunk.next),
            CellData::Object(object) => object.visit_edges(visitor),
            CellData::ParentLink(link) => link.visit_edges(visitor),
            CellData::Method(method) => method.visit_edges(visitor),
            CellData::External(_) | CellData::Thread(_) => (),
            CellData::Iterator(iterator) => visitor.visit(iterator.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ByteChunk, IteratorCell, MethodCell, ObjectCell, ParentLink, Tag, TreeNode, TupleIndirect,
        TupleLeaf, tagged::CellRef,
    };

    fn r(tag: Tag, index: u32) -> Value {
        Value::reference(tag, CellRef::new(index, 0))
    }

    fn edges(data: CellData) -> Vec<Value> {
        let mut seen = Vec::new();
        data.visit_edges(&mut |v: Value| seen.push(v));
        seen
    }

    #[test]
    fn tree_nodes_report_links_and_payload() {
        let node = TreeNode {
            previous: r(Tag::Set, 1),
            next: r(Tag::Set, 2),
            key: r(Tag::Object, 3),
            value: Value::from_i64(9),
            count: 3,
            height: 2,
        };
        let seen = edges(CellData::Node(node));
        for expected in [r(Tag::Set, 1), r(Tag::Set, 2), r(Tag::Object, 3)] {
            assert!(seen.contains(&expected), "missing {expected:?}");
        }
    }

    #[test]
    fn tuples_report_only_occupied_children() {
        let mut items = [Value::NONE; 5];
        items[0] = r(Tag::List, 4);
        items[1] = Value::from_i64(1);
        let leaf = TupleLeaf { len: 2, items };
        assert_eq!(edges(CellData::TupleLeaf(leaf)), vec![items[0], items[1]]);

        let mut children = [Value::NONE; 5];
        children[0] = r(Tag::Internal, 5);
        children[1] = r(Tag::Internal, 6);
        let indirect = TupleIndirect {
            count: 10,
            depth: 1,
            width: 2,
            children,
        };
        assert_eq!(
            edges(CellData::TupleIndirect(indirect)),
            vec![children[0], children[1]]
        );
    }

    #[test]
    fn object_kinds_report_every_reference() {
        let object = ObjectCell {
            id: 1,
            parents: r(Tag::Internal, 7),
            attributes: r(Tag::Dict, 8),
        };
        assert_eq!(edges(CellData::Object(object)), vec![r(Tag::Internal, 7), r(Tag::Dict, 8)]);

        let link = ParentLink {
            previous: r(Tag::Internal, 9),
            object: r(Tag::Object, 10),
        };
        assert_eq!(
            edges(CellData::ParentLink(link)),
            vec![r(Tag::Internal, 9), r(Tag::Object, 10)]
        );

        let method = MethodCell {
            selector: r(Tag::String, 11),
            body: r(Tag::Tuple, 12),
            arity: 2,
        };
        assert_eq!(edges(CellData::Method(method)), vec![r(Tag::String, 11), r(Tag::Tuple, 12)]);

        let chunk = ByteChunk {
            len: 0,
            bytes: [0; crate::CHUNK_BYTES],
            next: r(Tag::Internal, 13),
        };
        assert_eq!(edges(CellData::Chunk(chunk)), vec![r(Tag::Internal, 13)]);

        let iterator = IteratorCell {
            source: r(Tag::List, 14),
            position: 0,
        };
        assert_eq!(edges(CellData::Iterator(iterator)), vec![r(Tag::List, 14)]);
        assert!(edges(CellData::Free).is_empty());
    }
}
