use crate::node::Node;

/// Callback invoked once per node materialized during pull or reset,
/// including stub nodes created to satisfy unresolved references.
pub trait NodeObserver: Send + Sync {
    fn on_node(&self, node: &Node);
}

/// Observer that drops all notifications.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl NodeObserver for NoopObserver {
    fn on_node(&self, _node: &Node) {}
}

impl<F> NodeObserver for F
where
    F: Fn(&Node) + Send + Sync,
{
    fn on_node(&self, node: &Node) {
        self(node)
    }
}
