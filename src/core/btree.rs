
//! B+-tree primary index: an ordered map from 64-bit document id to the
//! record's (page, slot) location. Nodes occupy one page each.
//!
//! Node layout: node_type u8 | is_root u8 | parent u32 (reserved) |
//! num_cells u16 | right_child u32 | cells. Leaf cells are
//! `key u64 | page u32 | slot u16`; internal cells are
//! `separator u64 | child u32`. Keys strictly below a separator route to
//! its cell's child; keys at or above every separator route to
//! `right_child`. Deletes remove leaf cells without rebalancing.

use crate::core::buffer_pool::PageBuf;
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::pager::{Header, Pager};
use log::debug;
use std::sync::{Arc, Mutex};

const NODE_TYPE_INTERNAL: u8 = 1;
const NODE_TYPE_LEAF: u8 = 2;

/// Descent bound; a deeper walk means a cycle in the node graph.
const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocLocation {
    pub page: PageNum,
    pub slot: u16,
}

struct SplitInfo {
    sep: u64,
    right_page: PageNum,
}

struct Node {
    page_num: PageNum,
    buf: PageBuf,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.buf[0] == NODE_TYPE_LEAF
    }

    fn set_node_type(&mut self, node_type: u8) {
        self.buf[0] = node_type;
    }

    fn set_is_root(&mut self, is_root: bool) {
        self.buf[1] = is_root as u8;
    }

    fn num_cells(&self) -> u16 {
        u16::from_le_bytes([self.buf[6], self.buf[7]])
    }

    fn set_num_cells(&mut self, num: u16) {
        self.buf[6..8].copy_from_slice(&num.to_le_bytes());
    }

    fn right_child(&self) -> PageNum {
        u32::from_le_bytes([self.buf[8], self.buf[9], self.buf[10], self.buf[11]])
    }

    fn set_right_child(&mut self, child: PageNum) {
        self.buf[8..12].copy_from_slice(&child.to_le_bytes());
    }

    fn leaf_cell(&self, index: u16) -> (u64, PageNum, u16) {
        let offset = NODE_HEADER_SIZE + index as usize * LEAF_CELL_SIZE;
        let key = u64::from_le_bytes(self.buf[offset..offset + 8].try_into().unwrap());
        let page = u32::from_le_bytes(self.buf[offset + 8..offset + 12].try_into().unwrap());
        let slot = u16::from_le_bytes([self.buf[offset + 12], self.buf[offset + 13]]);
        (key, page, slot)
    }

    fn set_leaf_cell(&mut self, index: u16, key: u64, loc: DocLocation) {
        let offset = NODE_HEADER_SIZE + index as usize * LEAF_CELL_SIZE;
        self.buf[offset..offset + 8].copy_from_slice(&key.to_le_bytes());
        self.buf[offset + 8..offset + 12].copy_from_slice(&loc.page.to_le_bytes());
        self.buf[offset + 12..offset + 14].copy_from_slice(&loc.slot.to_le_bytes());
    }

    fn insert_leaf_cell(&mut self, index: u16, key: u64, loc: DocLocation) {
        let num = self.num_cells();
        if index < num {
            let start = NODE_HEADER_SIZE + index as usize * LEAF_CELL_SIZE;
            let end = NODE_HEADER_SIZE + num as usize * LEAF_CELL_SIZE;
            self.buf.copy_within(start..end, start + LEAF_CELL_SIZE);
        }
        self.set_leaf_cell(index, key, loc);
        self.set_num_cells(num + 1);
    }

    fn remove_leaf_cell(&mut self, index: u16) {
        let num = self.num_cells();
        let start = NODE_HEADER_SIZE + (index as usize + 1) * LEAF_CELL_SIZE;
        let end = NODE_HEADER_SIZE + num as usize * LEAF_CELL_SIZE;
        self.buf.copy_within(start..end, start - LEAF_CELL_SIZE);
        self.set_num_cells(num - 1);
    }

    fn internal_cell(&self, index: u16) -> (u64, PageNum) {
        let offset = NODE_HEADER_SIZE + index as usize * INTERNAL_CELL_SIZE;
        let key = u64::from_le_bytes(self.buf[offset..offset + 8].try_into().unwrap());
        let child = u32::from_le_bytes(self.buf[offset + 8..offset + 12].try_into().unwrap());
        (key, child)
    }

    fn set_internal_cell(&mut self, index: u16, key: u64, child: PageNum) {
        let offset = NODE_HEADER_SIZE + index as usize * INTERNAL_CELL_SIZE;
        self.buf[offset..offset + 8].copy_from_slice(&key.to_le_bytes());
        self.buf[offset + 8..offset + 12].copy_from_slice(&child.to_le_bytes());
    }

    fn set_internal_child(&mut self, index: u16, child: PageNum) {
        let offset = NODE_HEADER_SIZE + index as usize * INTERNAL_CELL_SIZE + 8;
        self.buf[offset..offset + 4].copy_from_slice(&child.to_le_bytes());
    }

    fn insert_internal_cell(&mut self, index: u16, key: u64, child: PageNum) {
        let num = self.num_cells();
        if index < num {
            let start = NODE_HEADER_SIZE + index as usize * INTERNAL_CELL_SIZE;
            let end = NODE_HEADER_SIZE + num as usize * INTERNAL_CELL_SIZE;
            self.buf.copy_within(start..end, start + INTERNAL_CELL_SIZE);
        }
        self.set_internal_cell(index, key, child);
        self.set_num_cells(num + 1);
    }
}

/// Binary search within a leaf: returns the cell index holding `key`, or
/// the insertion position for it.
fn leaf_search(node: &Node, key: u64) -> (u16, bool) {
    let mut low = 0u16;
    let mut high = node.num_cells();

    while low < high {
        let mid = (low + high) / 2;
        let (cell_key, _, _) = node.leaf_cell(mid);
        if cell_key == key {
            return (mid, true);
        }
        if key > cell_key {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    (low, false)
}

/// First child whose separator is strictly greater than `key`, else the
/// right child.
fn route(node: &Node, key: u64) -> PageNum {
    for i in 0..node.num_cells() {
        let (sep, child) = node.internal_cell(i);
        if key < sep {
            return child;
        }
    }
    node.right_child()
}

/// Inserts a promoted separator into an internal node with room to spare.
/// The split child keeps the separator's cell and the new sibling takes the
/// pointer after it; at the tail position the old `right_child` moves into
/// the new cell and the sibling becomes the new `right_child`.
fn insert_internal_entry(node: &mut Node, info: &SplitInfo) {
    let num = node.num_cells();

    let mut idx = num;
    for i in 0..num {
        let (sep, _) = node.internal_cell(i);
        if info.sep < sep {
            idx = i;
            break;
        }
    }

    if idx == num {
        let old_right = node.right_child();
        node.insert_internal_cell(idx, info.sep, old_right);
        node.set_right_child(info.right_page);
    } else {
        let (_, existing_child) = node.internal_cell(idx);
        node.insert_internal_cell(idx, info.sep, existing_child);
        node.set_internal_child(idx + 1, info.right_page);
    }
}

/// Writes an empty leaf marked as root into `page_num`. Used when a
/// collection's index is first created.
pub fn init_leaf_root(pager: &Pager, page_num: PageNum) -> Result<()> {
    let mut buf = pager.get_buf();
    buf[0] = NODE_TYPE_LEAF;
    buf[1] = 1;
    pager.write_page(page_num, &buf)
}

pub struct BTree {
    pager: Arc<Pager>,
    header: Arc<Mutex<Header>>,
    root_page: PageNum,
}

impl BTree {
    pub fn open(pager: Arc<Pager>, header: Arc<Mutex<Header>>, root_page: PageNum) -> Self {
        Self {
            pager,
            header,
            root_page,
        }
    }

    pub fn root_page(&self) -> PageNum {
        self.root_page
    }

    pub fn search(&self, key: u64) -> Result<Option<DocLocation>> {
        let node = self.find_leaf(key)?;
        let (idx, found) = leaf_search(&node, key);
        if !found {
            return Ok(None);
        }
        let (_, page, slot) = node.leaf_cell(idx);
        Ok(Some(DocLocation { page, slot }))
    }

    pub fn insert(&mut self, key: u64, loc: DocLocation) -> Result<()> {
        match self.insert_into(self.root_page, key, loc, 0)? {
            None => Ok(()),
            Some(info) => self.grow_root(info),
        }
    }

    /// Rewrites the location stored for `key` in place.
    pub fn update(&mut self, key: u64, loc: DocLocation) -> Result<()> {
        let mut node = self.find_leaf(key)?;
        let (idx, found) = leaf_search(&node, key);
        if !found {
            return Err(Error::NotFound);
        }
        node.set_leaf_cell(idx, key, loc);
        self.write_node(&node)
    }

    /// Removes `key` from its leaf. No rebalancing; the tree may go sparse.
    pub fn delete(&mut self, key: u64) -> Result<()> {
        let mut node = self.find_leaf(key)?;
        let (idx, found) = leaf_search(&node, key);
        if !found {
            return Err(Error::NotFound);
        }
        node.remove_leaf_cell(idx);
        self.write_node(&node)
    }

    fn find_leaf(&self, key: u64) -> Result<Node> {
        let mut page_num = self.root_page;
        for _ in 0..MAX_TREE_DEPTH {
            let node = self.read_node(page_num)?;
            if node.is_leaf() {
                return Ok(node);
            }
            page_num = route(&node, key);
        }
        Err(Error::corruption(
            "btree",
            self.root_page,
            "descent exceeded maximum depth",
        ))
    }

    fn insert_into(
        &mut self,
        page_num: PageNum,
        key: u64,
        loc: DocLocation,
        depth: usize,
    ) -> Result<Option<SplitInfo>> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::corruption(
                "btree",
                page_num,
                "descent exceeded maximum depth",
            ));
        }

        let mut node = self.read_node(page_num)?;

        if node.is_leaf() {
            let (idx, found) = leaf_search(&node, key);
            if found {
                // Duplicate key: the later insert silently takes over the
                // index entry.
                node.set_leaf_cell(idx, key, loc);
                self.write_node(&node)?;
                return Ok(None);
            }
            if (node.num_cells() as usize) < MAX_LEAF_CELLS {
                node.insert_leaf_cell(idx, key, loc);
                self.write_node(&node)?;
                return Ok(None);
            }
            return self.split_leaf(node, key, loc).map(Some);
        }

        let child = route(&node, key);
        let info = match self.insert_into(child, key, loc, depth + 1)? {
            None => return Ok(None),
            Some(info) => info,
        };

        if (node.num_cells() as usize) < MAX_INTERNAL_CELLS {
            insert_internal_entry(&mut node, &info);
            self.write_node(&node)?;
            return Ok(None);
        }
        self.split_internal(node, info).map(Some)
    }

    fn split_leaf(&mut self, mut left: Node, key: u64, loc: DocLocation) -> Result<SplitInfo> {
        let num = left.num_cells();

        // Materialize the cells plus the incoming key and split at half of
        // the combined count, so sibling sizes never differ by more than
        // one cell.
        let (idx, _) = leaf_search(&left, key);
        let mut cells: Vec<(u64, DocLocation)> = Vec::with_capacity(num as usize + 1);
        for i in 0..num {
            let (cell_key, page, slot) = left.leaf_cell(i);
            cells.push((cell_key, DocLocation { page, slot }));
        }
        cells.insert(idx as usize, (key, loc));
        let mid = cells.len() / 2;

        for (i, &(cell_key, cell_loc)) in cells[..mid].iter().enumerate() {
            left.set_leaf_cell(i as u16, cell_key, cell_loc);
        }
        left.set_num_cells(mid as u16);
        left.set_is_root(false);

        let right_page = self.allocate()?;
        let mut right = self.fresh_node(right_page, NODE_TYPE_LEAF);
        for (i, &(cell_key, cell_loc)) in cells[mid..].iter().enumerate() {
            right.set_leaf_cell(i as u16, cell_key, cell_loc);
        }
        right.set_num_cells((cells.len() - mid) as u16);

        self.write_node(&left)?;
        self.write_node(&right)?;

        let sep = cells[mid].0;
        Ok(SplitInfo { sep, right_page })
    }

    fn split_internal(&mut self, mut left: Node, info: SplitInfo) -> Result<SplitInfo> {
        let num = left.num_cells();
        let mut pairs: Vec<(u64, PageNum)> = (0..num).map(|i| left.internal_cell(i)).collect();
        let mut tail_child = left.right_child();

        // Fold the incoming entry in, same child juggling as the in-place
        // path.
        let mut idx = pairs.len();
        for (i, (sep, _)) in pairs.iter().enumerate() {
            if info.sep < *sep {
                idx = i;
                break;
            }
        }
        if idx == pairs.len() {
            pairs.push((info.sep, tail_child));
            tail_child = info.right_page;
        } else {
            let existing = pairs[idx].1;
            pairs.insert(idx, (info.sep, existing));
            pairs[idx + 1].1 = info.right_page;
        }

        let mid = pairs.len() / 2;
        let promoted = pairs[mid].0;

        for (i, &(sep, child)) in pairs[..mid].iter().enumerate() {
            left.set_internal_cell(i as u16, sep, child);
        }
        left.set_num_cells(mid as u16);
        left.set_right_child(pairs[mid].1);
        left.set_is_root(false);

        let right_page = self.allocate()?;
        let mut right = self.fresh_node(right_page, NODE_TYPE_INTERNAL);
        for (i, &(sep, child)) in pairs[mid + 1..].iter().enumerate() {
            right.set_internal_cell(i as u16, sep, child);
        }
        right.set_num_cells((pairs.len() - mid - 1) as u16);
        right.set_right_child(tail_child);

        self.write_node(&left)?;
        self.write_node(&right)?;

        Ok(SplitInfo {
            sep: promoted,
            right_page,
        })
    }

    fn grow_root(&mut self, info: SplitInfo) -> Result<()> {
        let old_root = self.root_page;
        let new_root_page = self.allocate()?;

        let mut root = self.fresh_node(new_root_page, NODE_TYPE_INTERNAL);
        root.set_is_root(true);
        root.set_internal_cell(0, info.sep, old_root);
        root.set_num_cells(1);
        root.set_right_child(info.right_page);
        self.write_node(&root)?;

        debug!("btree root grew: {} -> {}", old_root, new_root_page);
        self.root_page = new_root_page;
        Ok(())
    }

    fn read_node(&self, page_num: PageNum) -> Result<Node> {
        let buf = self.pager.read_page(page_num)?;
        let node = Node { page_num, buf };
        if node.buf[0] != NODE_TYPE_LEAF && node.buf[0] != NODE_TYPE_INTERNAL {
            return Err(Error::corruption(
                "btree",
                page_num,
                format!("invalid node type {}", node.buf[0]),
            ));
        }

        let max = if node.is_leaf() {
            MAX_LEAF_CELLS
        } else {
            MAX_INTERNAL_CELLS
        };
        if node.num_cells() as usize > max {
            return Err(Error::corruption(
                "btree",
                page_num,
                format!("num_cells {} exceeds capacity {}", node.num_cells(), max),
            ));
        }

        Ok(node)
    }

    fn write_node(&self, node: &Node) -> Result<()> {
        self.pager.write_page(node.page_num, &node.buf)
    }

    fn fresh_node(&self, page_num: PageNum, node_type: u8) -> Node {
        let buf = self.pager.get_buf();
        let mut node = Node { page_num, buf };
        node.set_node_type(node_type);
        node
    }

    fn allocate(&self) -> Result<PageNum> {
        let mut header = self
            .header
            .lock()
            .map_err(|_| Error::LockPoisoned { lock_name: "header".to_string() })?;
        self.pager.allocate_page(&mut header)
    }
}
