//! Context stacks: the per-node record of which conditional/rate-changed
//! regions a node lives inside.
//!
//! stacks are short in practice (a
//! handful of frames at most), so they are stored as a small inline vector
//! rather than anything shared or interned, and "is a sub-context of" is a
//! plain linear prefix scan.

use crate::ir::ids::Node;
use smallvec::SmallVec;

/// One context frame: a context root together with which of its numbered
/// sub-contexts this frame refers to.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ContextFrame {
    /// The context root (enabled subsystem, clock domain, or mux).
    pub root: Node,
    /// Which sub-context of `root` this frame selects (0 for enabled
    /// subsystems and clock domains, which have exactly one; the branch
    /// index for a mux).
    pub sub_context: u32,
}

impl ContextFrame {
    /// Construct a context frame.
    pub fn new(root: Node, sub_context: u32) -> Self {
        ContextFrame { root, sub_context }
    }
}

/// A node's ordered list of enclosing contexts, outermost first.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct ContextStack(SmallVec<[ContextFrame; 4]>);

impl ContextStack {
    /// The empty stack, used by nodes outside of any context.
    pub fn empty() -> Self {
        ContextStack(SmallVec::new())
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` iff this node is not inside any context.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The frames, outermost first.
    pub fn frames(&self) -> &[ContextFrame] {
        &self.0
    }

    /// The innermost (last) frame, if any.
    pub fn innermost(&self) -> Option<ContextFrame> {
        self.0.last().copied()
    }

    /// Push a new, innermost frame.
    pub fn push(&mut self, frame: ContextFrame) {
        self.0.push(frame);
    }

    /// Return a copy of this stack with `frame` appended.
    ///
    /// Used by the arc-rewiring step to model an arc leaving a context
    /// root's own output toward its family container, by momentarily
    /// treating the root as if it had one more frame pointing at itself.
    pub fn with_appended(&self, frame: ContextFrame) -> Self {
        let mut copy = self.clone();
        copy.push(frame);
        copy
    }

    /// `true` iff `self` is a sub-context of `other`, i.e. `other`'s frames
    /// are a prefix of `self`'s.
    pub fn is_sub_context_of(&self, other: &ContextStack) -> bool {
        other.0.len() <= self.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// Return a copy of this stack with its innermost frame removed, or the
    /// empty stack if already empty.
    ///
    /// Used to place a FIFO draining an enable-output port one level
    /// shallower than its source, so the FIFO lives outside the enabled
    /// subsystem it is reporting out of.
    pub fn without_innermost(&self) -> ContextStack {
        let mut copy = self.clone();
        copy.0.pop();
        copy
    }

    /// Length of the longest common prefix between two stacks -- the index
    /// `k` used by the rewiring rule to find "the most specific common
    /// context".
    pub fn common_prefix_len(&self, other: &ContextStack) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Iterate the context roots on this stack, outermost first.
    pub fn roots(&self) -> impl Iterator<Item = Node> + '_ {
        self.0.iter().map(|f| f.root)
    }
}

impl From<SmallVec<[ContextFrame; 4]>> for ContextStack {
    fn from(frames: SmallVec<[ContextFrame; 4]>) -> Self {
        ContextStack(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: u32) -> Node {
        use dataflow_entity::EntityRef;
        Node::new(i as usize)
    }

    #[test]
    fn prefix_relationship() {
        let mut outer = ContextStack::empty();
        outer.push(ContextFrame::new(node(0), 0));
        let mut inner = outer.clone();
        inner.push(ContextFrame::new(node(1), 2));

        assert!(inner.is_sub_context_of(&outer));
        assert!(!outer.is_sub_context_of(&inner));
        assert_eq!(inner.common_prefix_len(&outer), 1);
    }

    #[test]
    fn appended_self_frame_for_own_output() {
        let mut stack = ContextStack::empty();
        stack.push(ContextFrame::new(node(5), 0));
        let appended = stack.with_appended(ContextFrame::new(node(5), 0));
        assert_eq!(appended.len(), 2);
        assert_eq!(stack.len(), 1);
    }
}
