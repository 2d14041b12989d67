/// Options used when constructing a [`Document`](crate::Document)
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// Tag name of the root element
    pub root_tag: String,
    /// Whether [`observe`](sva_traits::HostTree::observe) hands out subscriptions.
    /// Turning this off models a host without change notifications.
    pub observable: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            root_tag: "body".to_string(),
            observable: true,
        }
    }
}

impl DocumentConfig {
    /// A document whose `observe` reports `Unsupported`
    pub fn without_observers() -> Self {
        Self {
            observable: false,
            ..Default::default()
        }
    }
}
