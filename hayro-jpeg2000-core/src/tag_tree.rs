//! The tag tree, described in Section B.10.2.
//!
//! Tag trees are quad trees where each leaf stores an integer value.
//! Each intermediate node stores the smallest value of all of its children,
//! so the root stores the smallest value across all leaves.
//!
//! The tree is stored as a pyramid of levels in a single vector. Level zero
//! contains the leaves in raster order and each following level halves both
//! dimensions (rounding up) until a single root remains.

use crate::error::{DecodingError, Result, bail, try_resize};
use crate::reader::BitReader;

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
struct TagNode {
    /// The current lower bound (or, once `visited` is set, the exact value)
    /// of the node.
    value: u32,
    /// Whether the exact value of the node has been decoded. The tag tree is
    /// built up incrementally, each packet contributing part of it.
    visited: bool,
    /// The index of the parent node, or `u32::MAX` for the root.
    parent: u32,
}

/// A tag tree covering a `width` x `height` grid of code-blocks.
#[derive(Debug, Default, Clone)]
pub struct TagTree {
    nodes: Vec<TagNode>,
    width: u32,
    height: u32,
}

impl TagTree {
    /// Build a new tag tree for the given grid.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let mut tree = Self::default();
        tree.reallocate(width, height)?;

        Ok(tree)
    }

    /// Rebuild the tree for a (possibly) different grid size, reusing the
    /// existing allocation where possible.
    pub fn reallocate(&mut self, width: u32, height: u32) -> Result<()> {
        self.width = width;
        self.height = height;

        if width == 0 || height == 0 {
            self.nodes.clear();
            return Ok(());
        }

        let mut total = 0_usize;
        let (mut w, mut h) = (width, height);
        loop {
            total += w as usize * h as usize;

            if w == 1 && h == 1 {
                break;
            }

            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }

        try_resize(&mut self.nodes, total, TagNode::default())?;

        let mut level_start = 0_usize;
        let (mut w, mut h) = (width, height);
        loop {
            let parent_start = level_start + w as usize * h as usize;

            if w == 1 && h == 1 {
                self.nodes[level_start].parent = u32::MAX;
                break;
            }

            let parent_w = w.div_ceil(2);

            for y in 0..h {
                for x in 0..w {
                    let idx = level_start + (y * w + x) as usize;
                    let parent = parent_start + ((y >> 1) * parent_w + (x >> 1)) as usize;
                    self.nodes[idx].parent = parent as u32;
                }
            }

            level_start = parent_start;
            w = parent_w;
            h = h.div_ceil(2);
        }

        Ok(())
    }

    /// Reset the values and visited flags of all nodes without touching the
    /// tree structure.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.value = 0;
            node.visited = false;
        }
    }

    /// The width of the leaf grid.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The height of the leaf grid.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Decode the value of the leaf at `(x, y)`, reading bits only as long
    /// as the value is smaller than `threshold`.
    ///
    /// The returned value is exact if it is smaller than `threshold`,
    /// otherwise it only states that the value is at least `threshold`.
    pub(crate) fn decode(
        &mut self,
        x: u32,
        y: u32,
        reader: &mut BitReader<'_>,
        threshold: u32,
    ) -> Result<u32> {
        if x >= self.width || y >= self.height {
            bail!(DecodingError::InvalidSegmentLength);
        }

        // Collect the path from the leaf up to the first visited ancestor.
        let mut stack = [0_u32; 34];
        let mut depth = 0;
        let mut idx = y * self.width + x;

        loop {
            let node = self.nodes[idx as usize];

            if node.visited {
                break;
            }

            stack[depth] = idx;
            depth += 1;

            if node.parent == u32::MAX {
                break;
            }

            idx = node.parent;
        }

        // Either the first visited ancestor or the (unvisited) root.
        let mut cur_value = self.nodes[idx as usize].value;

        while depth > 0 && cur_value < threshold {
            depth -= 1;
            let node = &mut self.nodes[stack[depth] as usize];
            cur_value = cur_value.max(node.value);

            while cur_value < threshold {
                // A 0 bit means that the value is larger than the current
                // value, a 1 bit means that it is equal.
                match reader.read_bits_with_stuffing(1) {
                    Some(1) => {
                        node.visited = true;
                        break;
                    }
                    Some(_) => cur_value += 1,
                    None => bail!(DecodingError::UnexpectedEof),
                }
            }

            node.value = cur_value;
        }

        Ok(cur_value)
    }
}
