use smol_str::SmolStr;

/// Handle to a node in a host tree.
///
/// Ids are plain indices: holding one never keeps the node alive, and a stale id
/// simply stops resolving once the host removes the node.
pub type NodeId = usize;

/// A single element attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: SmolStr,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Borrowed view of an element handed to [`HostTree::query`](crate::HostTree::query) predicates
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub id: NodeId,
    pub tag: &'a str,
    pub attrs: &'a [Attribute],
}

impl<'a> NodeView<'a> {
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.as_str() == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|attr| attr.name.as_str() == name)
    }

    /// Whitespace separated tokens of the `class` attribute
    pub fn classes(self) -> impl Iterator<Item = &'a str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(self, token: &str) -> bool {
        self.classes().any(|class| class == token)
    }
}

/// A detached element built by the engine and swapped into the host with
/// [`HostTree::replace_children`](crate::HostTree::replace_children).
///
/// `inner_markup` is kept verbatim: hosts are free to parse it further or to
/// store it as an opaque fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentNode {
    pub tag: String,
    pub attrs: Vec<Attribute>,
    pub inner_markup: String,
}

impl ContentNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.as_str() == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|attr| attr.name.as_str() == name)
    }

    /// Insert or overwrite an attribute
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|attr| attr.name.as_str() == name) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attribute::new(name, value)),
        }
    }

    /// Insert an attribute only if it is not present yet. Returns whether it was inserted.
    pub fn set_attr_if_absent(&mut self, name: &str, value: impl Into<String>) -> bool {
        if self.has_attr(name) {
            return false;
        }
        self.attrs.push(Attribute::new(name, value));
        true
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    /// Append class tokens that are not already present, keeping existing order
    pub fn add_classes<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) {
        let mut classes: Vec<String> = self.classes().map(str::to_owned).collect();
        for token in tokens {
            if !token.is_empty() && !classes.iter().any(|class| class == token) {
                classes.push(token.to_owned());
            }
        }
        if !classes.is_empty() {
            self.set_attr("class", classes.join(" "));
        }
    }
}
