//! Dense fixed-depth octree with per-node dirty tracking
//!
//! Every node is allocated down to the configured depth, so positional access
//! is O(depth) via coordinate bit extraction and never allocates. Internal
//! nodes carry an 8-bit dirty mask (bit i = child i modified since the last
//! clean state), which drives delta serialization: only modified subtrees are
//! written.
//!
//! Child index at each level is taken from the most significant unconsumed bit
//! of each coordinate: `(bit(x) << 2) | (bit(y) << 1) | bit(z)`.
//!
//! Delta stream layout (no header, depth and leaf codec agreed out of band):
//!
//! ```text
//! internal node: [dirty: u8] child(i) for each set bit i, ascending
//! leaf:          leaf codec bytes
//! ```

use std::io::{self, Read, Write};

use glam::UVec3;

use crate::core::{Error, Result};

/// Deepest tree accepted by [`DenseOctree::new`] (256³ leaves)
pub const MAX_DEPTH: u8 = 8;

#[derive(Clone, Debug)]
enum Node<T> {
    Leaf(T),
    Branch {
        /// Bit i set = child i's subtree modified since last clean state
        dirty: u8,
        children: Box<[Node<T>; 8]>,
    },
}

/// Child index of `pos` at the level whose split bit is `bit`
#[inline]
fn child_index(pos: UVec3, bit: u8) -> usize {
    ((((pos.x >> bit) & 1) << 2) | (((pos.y >> bit) & 1) << 1) | ((pos.z >> bit) & 1)) as usize
}

/// Unit offset of child `index` (inverse of [`child_index`])
#[inline]
fn child_offset(index: usize) -> UVec3 {
    let index = index as u32;
    UVec3::new((index >> 2) & 1, (index >> 1) & 1, index & 1)
}

impl<T: Clone + Default> Node<T> {
    fn build(depth: u8) -> Self {
        if depth == 0 {
            Node::Leaf(T::default())
        } else {
            Node::Branch {
                dirty: 0,
                children: Box::new(std::array::from_fn(|_| Node::build(depth - 1))),
            }
        }
    }
}

impl<T> Node<T> {
    fn get(&self, pos: UVec3, level: u8) -> &T {
        match self {
            Node::Leaf(value) => value,
            Node::Branch { children, .. } => children[child_index(pos, level - 1)].get(pos, level - 1),
        }
    }

    fn write(&mut self, pos: UVec3, level: u8, value: T, mark_dirty: bool) {
        match self {
            Node::Leaf(slot) => *slot = value,
            Node::Branch { dirty, children } => {
                let index = child_index(pos, level - 1);
                if mark_dirty {
                    *dirty |= 1 << index;
                }
                children[index].write(pos, level - 1, value, mark_dirty);
            }
        }
    }

    fn clear_dirty(&mut self) {
        if let Node::Branch { dirty, children } = self {
            // Clean children never have dirty descendants
            for (index, child) in children.iter_mut().enumerate() {
                if *dirty & (1 << index) != 0 {
                    child.clear_dirty();
                }
            }
            *dirty = 0;
        }
    }

    fn write_delta<W, F>(&self, writer: &mut W, encode: &mut F) -> io::Result<()>
    where
        W: Write,
        F: FnMut(&T, &mut W) -> io::Result<()>,
    {
        match self {
            Node::Leaf(value) => encode(value, writer),
            Node::Branch { dirty, children } => {
                writer.write_all(&[*dirty])?;
                for (index, child) in children.iter().enumerate() {
                    if *dirty & (1 << index) != 0 {
                        child.write_delta(writer, encode)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Decode one subtree's worth of stream into `(position, value)` updates.
    ///
    /// Nothing is applied here so a failing stream leaves the tree untouched.
    fn read_delta<R, F>(
        &self,
        reader: &mut R,
        decode: &mut F,
        origin: UVec3,
        level: u8,
        out: &mut Vec<(UVec3, T)>,
    ) -> io::Result<()>
    where
        R: Read,
        F: FnMut(&mut R) -> io::Result<T>,
    {
        match self {
            Node::Leaf(_) => {
                out.push((origin, decode(reader)?));
                Ok(())
            }
            Node::Branch { children, .. } => {
                let mut mask = [0u8; 1];
                reader.read_exact(&mut mask)?;
                let half = 1u32 << (level - 1);
                for (index, child) in children.iter().enumerate() {
                    if mask[0] & (1 << index) != 0 {
                        let child_origin = origin + child_offset(index) * half;
                        child.read_delta(reader, decode, child_origin, level - 1, out)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Fully allocated octree of fixed depth storing one `T` per leaf cell
#[derive(Clone, Debug)]
pub struct DenseOctree<T> {
    root: Node<T>,
    depth: u8,
    /// Dirty flag for a depth-0 tree, whose root leaf has no mask
    leaf_dirty: bool,
}

impl<T: Clone + Default> DenseOctree<T> {
    /// Build a perfect octree of `depth` levels with every leaf at `T::default()`
    pub fn new(depth: u8) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::InvalidDepth(depth));
        }
        Ok(Self {
            root: Node::build(depth),
            depth,
            leaf_dirty: false,
        })
    }
}

impl<T> DenseOctree<T> {
    /// Number of subdivision levels
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Cells per axis (2^depth)
    pub fn side(&self) -> u32 {
        1 << self.depth
    }

    /// Total number of leaf cells (8^depth)
    pub fn len(&self) -> usize {
        1usize << (3 * self.depth as usize)
    }

    /// Always false: a tree holds at least one cell
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check if `pos` lies in [0, side)³
    pub fn contains(&self, pos: UVec3) -> bool {
        let side = self.side();
        pos.x < side && pos.y < side && pos.z < side
    }

    /// Read the value at `pos`.
    ///
    /// `pos` must lie in [0, side)³; out-of-range coordinates are only caught
    /// in debug builds and otherwise alias another cell.
    pub fn get(&self, pos: UVec3) -> &T {
        debug_assert!(self.contains(pos), "{pos} outside octree of side {}", self.side());
        self.root.get(pos, self.depth)
    }

    /// Write `value` at `pos`, marking every ancestor on the path dirty
    pub fn set(&mut self, pos: UVec3, value: T) {
        debug_assert!(self.contains(pos), "{pos} outside octree of side {}", self.side());
        self.write_dirty(pos, value);
    }

    /// Write `value` at `pos` without touching dirty masks (bulk/clean loads)
    pub fn set_clean(&mut self, pos: UVec3, value: T) {
        debug_assert!(self.contains(pos), "{pos} outside octree of side {}", self.side());
        self.root.write(pos, self.depth, value, false);
    }

    /// Range-checked [`get`](Self::get)
    pub fn try_get(&self, pos: UVec3) -> Result<&T> {
        if !self.contains(pos) {
            return Err(Error::OutOfRange { pos, side: self.side() });
        }
        Ok(self.root.get(pos, self.depth))
    }

    /// Range-checked [`set`](Self::set)
    pub fn try_set(&mut self, pos: UVec3, value: T) -> Result<()> {
        if !self.contains(pos) {
            return Err(Error::OutOfRange { pos, side: self.side() });
        }
        self.write_dirty(pos, value);
        Ok(())
    }

    /// Root dirty mask (always 0 for a depth-0 tree)
    pub fn dirty_mask(&self) -> u8 {
        match &self.root {
            Node::Leaf(_) => 0,
            Node::Branch { dirty, .. } => *dirty,
        }
    }

    /// Dirty masks of every internal node on the path from the root to `pos`
    pub fn path_dirty_masks(&self, pos: UVec3) -> Vec<u8> {
        let mut masks = Vec::with_capacity(self.depth as usize);
        let mut node = &self.root;
        let mut level = self.depth;
        while let Node::Branch { dirty, children } = node {
            masks.push(*dirty);
            level -= 1;
            node = &children[child_index(pos, level)];
        }
        masks
    }

    /// Check if any cell was modified since the last clean state
    pub fn is_dirty(&self) -> bool {
        self.leaf_dirty || self.dirty_mask() != 0
    }

    /// Forget all pending modifications
    pub fn mark_clean(&mut self) {
        self.root.clear_dirty();
        self.leaf_dirty = false;
    }

    fn write_dirty(&mut self, pos: UVec3, value: T) {
        if self.depth == 0 {
            self.leaf_dirty = true;
        }
        self.root.write(pos, self.depth, value, true);
    }

    /// Write the modified subtrees to `writer` without touching the dirty state
    pub fn write_delta<W, F>(&self, writer: &mut W, mut encode: F) -> Result<()>
    where
        W: Write,
        F: FnMut(&T, &mut W) -> io::Result<()>,
    {
        self.root.write_delta(writer, &mut encode)?;
        Ok(())
    }

    /// Write the modified subtrees to `writer`, then reset to clean.
    ///
    /// If writing fails the dirty state is kept, so the delta can be retried.
    pub fn serialize<W, F>(&mut self, writer: &mut W, encode: F) -> Result<()>
    where
        W: Write,
        F: FnMut(&T, &mut W) -> io::Result<()>,
    {
        self.write_delta(writer, encode)?;
        self.mark_clean();
        Ok(())
    }

    /// Apply a delta stream produced by a tree of the same depth.
    ///
    /// Decoded values are written clean. A truncated or corrupt stream fails
    /// with [`Error::Decode`] and leaves the tree unchanged.
    pub fn deserialize<R, F>(&mut self, reader: &mut R, mut decode: F) -> Result<()>
    where
        R: Read,
        F: FnMut(&mut R) -> io::Result<T>,
    {
        let mut updates = Vec::new();
        self.root
            .read_delta(reader, &mut decode, UVec3::ZERO, self.depth, &mut updates)
            .map_err(Error::from_stream)?;
        self.apply_clean(updates);
        Ok(())
    }

    /// [`deserialize`](Self::deserialize) from a complete buffer.
    ///
    /// Also rejects bytes left over after the tree is complete, which is what
    /// a stream from a deeper tree looks like.
    pub fn deserialize_slice<'b, F>(&mut self, bytes: &'b [u8], mut decode: F) -> Result<()>
    where
        F: FnMut(&mut &'b [u8]) -> io::Result<T>,
    {
        let mut cursor = bytes;
        let mut updates = Vec::new();
        self.root
            .read_delta(&mut cursor, &mut decode, UVec3::ZERO, self.depth, &mut updates)
            .map_err(Error::from_stream)?;
        if !cursor.is_empty() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after depth-{} delta",
                cursor.len(),
                self.depth
            )));
        }
        self.apply_clean(updates);
        Ok(())
    }

    fn apply_clean(&mut self, updates: Vec<(UVec3, T)>) {
        for (pos, value) in updates {
            self.root.write(pos, self.depth, value, false);
        }
    }

    /// Iterate `(coordinate, value)` over every cell, depth-first in child order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            stack: vec![(&self.root, UVec3::ZERO, self.depth)],
        }
    }
}

impl<'a, T> IntoIterator for &'a DenseOctree<T> {
    type Item = (UVec3, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Depth-first cell iterator returned by [`DenseOctree::iter`]
pub struct Iter<'a, T> {
    stack: Vec<(&'a Node<T>, UVec3, u8)>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (UVec3, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, origin, level)) = self.stack.pop() {
            match node {
                Node::Leaf(value) => return Some((origin, value)),
                Node::Branch { children, .. } => {
                    let half = 1u32 << (level - 1);
                    // Reversed so child 0 is popped first
                    for index in (0..8).rev() {
                        self.stack.push((&children[index], origin + child_offset(index) * half, level - 1));
                    }
                }
            }
        }
        None
    }
}
