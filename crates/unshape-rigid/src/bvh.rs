//! Static bounding volume hierarchy over primitives identified by index.
//!
//! Nodes live in a flat arena; the tree is built once by median split along
//! the longest axis and queried by box or by segment.

use glam::Vec3;

use crate::aabb::Aabb;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        bounds: Aabb,
        item: u32,
    },
    Internal {
        bounds: Aabb,
        left: u32,
        right: u32,
    },
}

impl Node {
    fn bounds(&self) -> &Aabb {
        match self {
            Node::Leaf { bounds, .. } | Node::Internal { bounds, .. } => bounds,
        }
    }
}

/// A bounding volume hierarchy of `u32` primitive ids.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<Node>,
    root: Option<u32>,
}

impl Bvh {
    /// Builds a tree from `(bounds, id)` pairs.
    pub fn build(mut primitives: Vec<(Aabb, u32)>) -> Self {
        let mut bvh = Self {
            nodes: Vec::with_capacity(primitives.len() * 2),
            root: None,
        };
        if !primitives.is_empty() {
            let root = bvh.build_range(&mut primitives);
            bvh.root = Some(root);
        }
        bvh
    }

    fn build_range(&mut self, primitives: &mut [(Aabb, u32)]) -> u32 {
        if let [(bounds, item)] = primitives {
            self.nodes.push(Node::Leaf {
                bounds: *bounds,
                item: *item,
            });
            return (self.nodes.len() - 1) as u32;
        }

        let bounds = primitives
            .iter()
            .fold(Aabb::empty(), |acc, (b, _)| acc.union(b));
        let size = bounds.size();
        let axis = if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        };
        primitives.sort_by(|(a, _), (b, _)| a.center()[axis].total_cmp(&b.center()[axis]));

        let (lo, hi) = primitives.split_at_mut(primitives.len() / 2);
        let left = self.build_range(lo);
        let right = self.build_range(hi);
        self.nodes.push(Node::Internal {
            bounds,
            left,
            right,
        });
        (self.nodes.len() - 1) as u32
    }

    /// Appends ids of every primitive whose bounds overlap `query`.
    pub fn query_aabb(&self, query: &Aabb, out: &mut Vec<u32>) {
        self.visit(|bounds| bounds.overlaps(query), out);
    }

    /// Appends ids of every primitive whose bounds the segment `from → to` touches.
    pub fn query_segment(&self, from: Vec3, to: Vec3, out: &mut Vec<u32>) {
        self.visit(|bounds| bounds.overlaps_segment(from, to), out);
    }

    fn visit(&self, mut accept: impl FnMut(&Aabb) -> bool, out: &mut Vec<u32>) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !accept(node.bounds()) {
                continue;
            }
            match node {
                Node::Leaf { item, .. } => out.push(*item),
                Node::Internal { left, right, .. } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }
    }

    /// Bounds of the whole tree.
    pub fn bounds(&self) -> Option<Aabb> {
        self.root.map(|r| *self.nodes[r as usize].bounds())
    }

    /// Returns the number of primitives.
    pub fn len(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Returns `true` if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}
