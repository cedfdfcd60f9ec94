//! Arena-backed device-interface tree.
//!
//! A [`Tree`] owns every node it holds. Nodes are addressed by [`NodeId`]
//! handles; a node's parent is an index into the same arena, never a pointer.
//! A node created with [`Tree::create`] or moved in with [`Tree::import`]
//! starts out unlinked and can be linked under exactly one parent.
//!
//! Slots freed by removal are reused. Each slot carries a generation that is
//! bumped on removal, so a handle to a removed node keeps failing with
//! `NodeNotFound` even after its slot holds a new node.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result, TreeError};
use crate::kinds;
use crate::value::{Value, parse_int_literal};

/// Handle to a node inside one [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    slot: usize,
    generation: u32,
}

impl NodeId {
    /// Arena slot index.
    pub fn index(self) -> usize {
        self.slot
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// Node kinds. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Plain attribute container
    Generic,
    /// Root of a device interface; children are terminals
    DeviceInterface,
    /// Addressable sub-device; children are registers
    Terminal,
    /// Word or word group inside a terminal; children are sub-registers
    Register,
    /// Bit field inside a register
    Subregister,
    /// Name-to-integer table
    Valuemap,
}

impl NodeKind {
    /// Lower-case kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Generic => "node",
            NodeKind::DeviceInterface => "deviceinterface",
            NodeKind::Terminal => "terminal",
            NodeKind::Register => "register",
            NodeKind::Subregister => "subregister",
            NodeKind::Valuemap => "valuemap",
        }
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    name: String,
    kind: NodeKind,
    attrs: BTreeMap<String, Value>,
    children: Vec<NodeId>,
    index: HashMap<String, NodeId>,
    parent: Option<NodeId>,
}

impl NodeData {
    fn new(kind: NodeKind, name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            kind,
            attrs: BTreeMap::new(),
            children: Vec::new(),
            index: HashMap::new(),
            parent,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

/// Slot storage with a free list.
#[derive(Debug, Clone, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl Arena {
    fn insert(&mut self, data: NodeData) -> NodeId {
        if let Some(slot) = self.free.pop() {
            if let Some(entry) = self.slots.get_mut(slot) {
                entry.node = Some(data);
                return NodeId {
                    slot,
                    generation: entry.generation,
                };
            }
        }
        let slot = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            node: Some(data),
        });
        NodeId {
            slot,
            generation: 0,
        }
    }

    fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.slots
            .get(id.slot)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots
            .get_mut(id.slot)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    fn remove(&mut self, id: NodeId) -> Option<NodeData> {
        let entry = self
            .slots
            .get_mut(id.slot)
            .filter(|s| s.generation == id.generation)?;
        let node = entry.node.take()?;
        // A slot whose generation would wrap is retired rather than reused.
        if let Some(next) = entry.generation.checked_add(1) {
            entry.generation = next;
            self.free.push(id.slot);
        }
        Some(node)
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// An ordered, named tree of attribute maps.
#[derive(Debug, Clone)]
pub struct Tree {
    arena: Arena,
    root: NodeId,
}

impl Tree {
    /// Create a tree holding a single root node.
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        let mut arena = Arena::default();
        let root = arena.insert(NodeData::new(kind, name.into(), None));
        Self { arena, root }
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create an unlinked node in this arena.
    pub fn create(&mut self, kind: NodeKind, name: impl Into<String>) -> NodeId {
        self.arena.insert(NodeData::new(kind, name.into(), None))
    }

    /// Whether `id` names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some()
    }

    /// Nodes currently held, linked or not.
    pub fn node_count(&self) -> usize {
        self.arena.live()
    }

    /// Slots allocated so far; never more than the peak node count.
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.arena
            .get(id)
            .ok_or_else(|| Error::node_not_found(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.arena
            .get_mut(id)
            .ok_or_else(|| Error::node_not_found(id.to_string()))
    }

    /// Node name.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn name(&self, id: NodeId) -> Result<&str> {
        Ok(&self.node(id)?.name)
    }

    /// Node kind.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn kind(&self, id: NodeId) -> Result<NodeKind> {
        Ok(self.node(id)?.kind)
    }

    /// Parent handle, `None` for unlinked nodes and the root.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    // ----------------------------------------------------------------- attrs

    /// Look up an attribute by exact name.
    ///
    /// # Errors
    ///
    /// Returns `AttrNotFound` if absent.
    pub fn get_attr(&self, id: NodeId, name: &str) -> Result<&Value> {
        self.node(id)?
            .attrs
            .get(name)
            .ok_or_else(|| Error::attr_not_found(name))
    }

    /// Whether the attribute exists.
    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.node(id).is_ok_and(|n| n.attrs.contains_key(name))
    }

    /// Insert or replace an attribute.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn set_attr(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.node_mut(id)?.attrs.insert(name.into(), value.into());
        Ok(())
    }

    /// Remove an attribute, returning its value.
    ///
    /// # Errors
    ///
    /// Returns `AttrNotFound` if absent.
    pub fn del_attr(&mut self, id: NodeId, name: &str) -> Result<Value> {
        self.node_mut(id)?
            .attrs
            .remove(name)
            .ok_or_else(|| Error::attr_not_found(name))
    }

    /// Attribute names in sorted order.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn attr_names(&self, id: NodeId) -> Result<Vec<&str>> {
        Ok(self.node(id)?.attrs.keys().map(String::as_str).collect())
    }

    /// Iterate attributes in sorted order.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn attrs(&self, id: NodeId) -> Result<impl Iterator<Item = (&str, &Value)>> {
        Ok(self
            .node(id)?
            .attrs
            .iter()
            .map(|(k, v)| (k.as_str(), v)))
    }

    /// Read an optional unsigned attribute; numeric strings are accepted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAttr` when present but not an unsigned 32-bit number.
    pub fn attr_u32(&self, id: NodeId, name: &str) -> Result<Option<u32>> {
        let value = match self.node(id)?.attrs.get(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        let parsed = match value {
            Value::Str(s) => parse_int_literal(s).and_then(|v| u32::try_from(v).ok()),
            other => other.as_u32().ok(),
        };
        parsed
            .map(Some)
            .ok_or_else(|| Error::invalid_attr(name, format!("expected unsigned integer, got {value}")))
    }

    /// Read an optional string attribute.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAttr` when present but not a string.
    pub fn attr_str(&self, id: NodeId, name: &str) -> Result<Option<&str>> {
        match self.node(id)?.attrs.get(name) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(other) => Err(Error::invalid_attr(
                name,
                format!("expected string, got {}", other.type_name()),
            )),
        }
    }

    // -------------------------------------------------------------- children

    /// Look up a child by exact name.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if absent.
    pub fn get_child(&self, id: NodeId, name: &str) -> Result<NodeId> {
        self.node(id)?
            .index
            .get(name)
            .copied()
            .ok_or_else(|| Error::node_not_found(name))
    }

    /// Whether a child with this name exists.
    pub fn has_child(&self, id: NodeId, name: &str) -> bool {
        self.node(id).is_ok_and(|n| n.index.contains_key(name))
    }

    /// Children in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(&self.node(id)?.children)
    }

    /// Child at a position in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if out of range.
    pub fn child_at(&self, id: NodeId, index: usize) -> Result<NodeId> {
        self.node(id)?
            .children
            .get(index)
            .copied()
            .ok_or_else(|| Error::node_not_found(format!("child index {index}")))
    }

    /// Child names in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn child_names(&self, id: NodeId) -> Result<Vec<&str>> {
        let node = self.node(id)?;
        node.children.iter().map(|c| self.name(*c)).collect()
    }

    /// Number of children.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn num_children(&self, id: NodeId) -> Result<usize> {
        Ok(self.node(id)?.children.len())
    }

    /// Link `child` under `parent`.
    ///
    /// Structural checks run first, then the parent kind's construction rules
    /// (which may fill in defaults on `child`), then the link itself.
    ///
    /// # Errors
    ///
    /// - `SelfReference` if `child` is `parent` or one of its ancestors
    /// - `AlreadyLinked` if `child` already has a parent or is the tree root
    /// - `DuplicateChild` if `parent` has a child with the same name
    /// - any error raised by the parent kind's rules
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_link(parent, child)?;
        kinds::prepare_child(self, parent, child)?;
        self.link(parent, child)
    }

    fn check_link(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let child_node = self.node(child)?;
        self.node(parent)?;

        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(TreeError::SelfReference(child_node.name.clone()).into());
            }
            cursor = self.node(id)?.parent;
        }
        if child_node.parent.is_some() || child == self.root {
            return Err(TreeError::AlreadyLinked(child_node.name.clone()).into());
        }
        if self.node(parent)?.index.contains_key(&child_node.name) {
            return Err(TreeError::DuplicateChild(child_node.name.clone()).into());
        }
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let name = {
            let node = self.node_mut(child)?;
            node.parent = Some(parent);
            node.name.clone()
        };
        let p = self.node_mut(parent)?;
        p.children.push(child);
        p.index.insert(name, child);
        Ok(())
    }

    /// Move another tree into this arena as an unlinked subtree.
    ///
    /// Only nodes reachable from `other`'s root are kept.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if `other` is internally inconsistent.
    pub fn import(&mut self, other: Tree) -> Result<NodeId> {
        other.copy_into(other.root, &mut self.arena, None)
    }

    /// Import `other` and link it under `parent`.
    ///
    /// On failure the imported nodes are discarded.
    ///
    /// # Errors
    ///
    /// Same as [`Tree::add_child`].
    pub fn graft(&mut self, parent: NodeId, other: Tree) -> Result<NodeId> {
        let id = self.import(other)?;
        if let Err(e) = self.add_child(parent, id) {
            self.extract(id)?;
            return Err(e);
        }
        Ok(id)
    }

    /// Unlink the named child and return it as an independent tree.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if there is no such child.
    pub fn del_child(&mut self, parent: NodeId, name: &str) -> Result<Tree> {
        let id = self.get_child(parent, name)?;
        let p = self.node_mut(parent)?;
        p.index.remove(name);
        p.children.retain(|c| *c != id);
        self.node_mut(id)?.parent = None;
        self.extract(id)
    }

    /// Rename a node, keeping its parent's index in sync.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateChild` if a sibling already uses `name`.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let (old, parent) = {
            let node = self.node(id)?;
            (node.name.clone(), node.parent)
        };
        if old == name {
            return Ok(());
        }
        if let Some(p) = parent {
            let pnode = self.node_mut(p)?;
            if pnode.index.contains_key(&name) {
                return Err(TreeError::DuplicateChild(name).into());
            }
            pnode.index.remove(&old);
            pnode.index.insert(name.clone(), id);
        }
        self.node_mut(id)?.name = name;
        Ok(())
    }

    /// Deep, unlinked copy of the subtree rooted at `id`.
    ///
    /// Node-valued attributes are owned trees and are copied with it.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` for a stale handle.
    pub fn clone_subtree(&self, id: NodeId) -> Result<Tree> {
        let mut arena = Arena::default();
        let root = self.copy_into(id, &mut arena, None)?;
        Ok(Tree { arena, root })
    }

    fn copy_into(
        &self,
        id: NodeId,
        dst: &mut Arena,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let src = self.node(id)?;
        let mut data = NodeData::new(src.kind, src.name.clone(), parent);
        data.attrs = src.attrs.clone();
        let new_id = dst.insert(data);
        for child in &src.children {
            let copied = self.copy_into(*child, dst, Some(new_id))?;
            let name = self.name(*child)?.to_string();
            if let Some(node) = dst.get_mut(new_id) {
                node.children.push(copied);
                node.index.insert(name, copied);
            }
        }
        Ok(new_id)
    }

    /// Move the subtree rooted at `id` out of this arena.
    fn extract(&mut self, id: NodeId) -> Result<Tree> {
        let tree = self.clone_subtree(id)?;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.arena.remove(next) {
                stack.extend(node.children);
            }
        }
        Ok(tree)
    }

    fn subtree_eq(&self, a: NodeId, other: &Tree, b: NodeId) -> bool {
        let (Ok(x), Ok(y)) = (self.node(a), other.node(b)) else {
            return false;
        };
        x.name == y.name
            && x.kind == y.kind
            && x.attrs == y.attrs
            && x.children.len() == y.children.len()
            && x
                .children
                .iter()
                .zip(&y.children)
                .all(|(ca, cb)| self.subtree_eq(*ca, other, *cb))
    }

    // --------------------------------------------------------------- builder

    /// Set an attribute on the root, builder style.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Some(root) = self.arena.get_mut(self.root) {
            root.attrs.insert(name.into(), value.into());
        }
        self
    }

    /// Graft `child` under the root, builder style.
    ///
    /// # Errors
    ///
    /// Same as [`Tree::add_child`].
    pub fn with_child(mut self, child: Tree) -> Result<Self> {
        let root = self.root;
        self.graft(root, child)?;
        Ok(self)
    }
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }
}
