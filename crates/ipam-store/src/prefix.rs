//! Prefix model: a named CIDR block with an optional parent

use std::fmt;
use std::sync::Arc;

/// Separator used when chaining a prefix name with its parent's id
const ID_SEPARATOR: char = '-';

/// A named CIDR block in the allocation tree
///
/// Identity is the name plus the parent chain. The CIDR is carried along but
/// is not part of equality.
#[derive(Clone, Debug)]
pub struct Prefix {
    name: String,
    cidr: String,
    parent: Option<Arc<Prefix>>,
}

impl Prefix {
    /// Create a root prefix (no parent)
    pub fn root(name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
            parent: None,
        }
    }

    /// Create a prefix under `parent`
    pub fn child(name: impl Into<String>, cidr: impl Into<String>, parent: &Prefix) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
            parent: Some(Arc::new(parent.clone())),
        }
    }

    /// Create a prefix with an optional parent
    pub fn new(name: impl Into<String>, cidr: impl Into<String>, parent: Option<&Prefix>) -> Self {
        match parent {
            Some(parent) => Self::child(name, cidr, parent),
            None => Self::root(name, cidr),
        }
    }

    /// Get the prefix name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the CIDR string
    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    /// Get the parent prefix, if any
    pub fn parent(&self) -> Option<&Prefix> {
        self.parent.as_deref()
    }

    /// Check whether this is a root prefix
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Storage key: the name for roots, `name-<parent id>` otherwise
    ///
    /// The join is not escaped, so ids stay readable by databases written by
    /// older releases. Distinct chains can therefore share an id: `worker`
    /// under `1-lb` and `worker-1` under `lb` are both `worker-1-lb`. The
    /// relational store rejects the second with [`StoreError::AlreadyExists`].
    ///
    /// [`StoreError::AlreadyExists`]: crate::StoreError::AlreadyExists
    pub fn id(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}{}{}", self.name, ID_SEPARATOR, parent.id()),
            None => self.name.clone(),
        }
    }

    /// Same identity with another CIDR
    pub fn with_cidr(&self, cidr: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            cidr: cidr.into(),
            parent: self.parent.clone(),
        }
    }

    /// Check whether `ancestor` appears anywhere in this prefix's parent chain
    pub fn descends_from(&self, ancestor: &Prefix) -> bool {
        let mut current = self.parent();
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = parent.parent();
        }
        false
    }
}

impl PartialEq for Prefix {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.parent() == other.parent()
    }
}

impl Eq for Prefix {}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.cidr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_cidr() {
        let trench = Prefix::root("trench-a", "172.16.0.0/16");
        let a = Prefix::child("conduit-a", "172.16.0.0/20", &trench);
        let b = Prefix::child("conduit-a", "172.16.16.0/20", &trench);
        assert_eq!(a, b);

        let other_trench = Prefix::root("trench-b", "172.16.0.0/16");
        let c = Prefix::child("conduit-a", "172.16.0.0/20", &other_trench);
        assert_ne!(a, c);
        assert_ne!(a, Prefix::root("conduit-a", "172.16.0.0/20"));
    }

    #[test]
    fn test_id_chains_parent_ids() {
        let trench = Prefix::root("trench-a", "172.16.0.0/16");
        let conduit = Prefix::child("load-balancer", "172.16.0.0/20", &trench);
        let node = Prefix::child("worker-1", "172.16.0.0/24", &conduit);

        assert_eq!(trench.id(), "trench-a");
        assert_eq!(conduit.id(), "load-balancer-trench-a");
        assert_eq!(node.id(), "worker-1-load-balancer-trench-a");
        assert!(node.descends_from(&trench));
        assert!(!trench.descends_from(&node));
    }

    #[test]
    fn test_unescaped_ids_can_collide() {
        let dashed = Prefix::root("1-lb", "172.16.0.0/20");
        let plain = Prefix::root("lb", "172.16.16.0/20");
        let a = Prefix::child("worker", "172.16.0.0/24", &dashed);
        let b = Prefix::child("worker-1", "172.16.16.0/24", &plain);

        assert_ne!(a, b);
        assert_eq!(a.id(), b.id());
    }
}
