use sva_traits::{Attribute, NodeId, NodeView};

#[derive(Debug, Clone)]
pub struct Node {
    /// Our Id
    pub id: NodeId,
    /// Our parent's ID
    pub parent: Option<NodeId>,
    /// Our children, in document order
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ElementData {
    /// The element's tag name (lowercase for HTML, verbatim for foreign content)
    pub name: String,

    /// The element's attributes, in insertion order
    pub attrs: Vec<Attribute>,

    /// Markup inserted as an opaque fragment (injected icon content). When set the
    /// element has no child nodes and serializes this string as its contents.
    pub raw_inner: Option<String>,
}

impl ElementData {
    pub fn new(name: impl Into<String>, attrs: Vec<Attribute>) -> Self {
        Self {
            name: name.into(),
            attrs,
            raw_inner: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.as_str() == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|attr| attr.name.as_str() == name)
    }

    /// Set an attribute, returning the previous value
    pub fn set_attr(&mut self, name: &str, value: &str) -> Option<String> {
        match self
            .attrs
            .iter_mut()
            .find(|attr| attr.name.as_str() == name)
        {
            Some(attr) => Some(std::mem::replace(&mut attr.value, value.to_string())),
            None => {
                self.attrs.push(Attribute::new(name, value));
                None
            }
        }
    }

    /// Remove an attribute, returning its value if it was present
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self
            .attrs
            .iter()
            .position(|attr| attr.name.as_str() == name)?;
        Some(self.attrs.remove(idx).value)
    }
}

impl Node {
    pub fn new(id: NodeId, data: NodeData) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            data,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    pub fn is_text_node(&self) -> bool {
        matches!(self.data, NodeData::Text(_))
    }

    pub fn element_data(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(data) => Some(data),
            NodeData::Text(_) => None,
        }
    }

    pub fn element_data_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(data) => Some(data),
            NodeData::Text(_) => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.element_data()?.attr(name)
    }

    pub fn view(&self) -> Option<NodeView<'_>> {
        let element = self.element_data()?;
        Some(NodeView {
            id: self.id,
            tag: &element.name,
            attrs: &element.attrs,
        })
    }
}
