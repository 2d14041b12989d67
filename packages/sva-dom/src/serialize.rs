use crate::document::Tree;
use crate::{Node, NodeData};
use sva_traits::NodeId;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

impl Tree {
    pub(crate) fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        match &node.data {
            NodeData::Text(text) => out.push_str(&html_escape::encode_text(text)),
            NodeData::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for attr in &element.attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(&attr.value));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&element.name.as_str()) {
                    return;
                }
                self.write_children(node, out);
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }

    pub(crate) fn write_children(&self, node: &Node, out: &mut String) {
        if let Some(raw) = node.element_data().and_then(|el| el.raw_inner.as_deref()) {
            out.push_str(raw);
            return;
        }
        for child in &node.children {
            self.write_node(*child, out);
        }
    }
}
