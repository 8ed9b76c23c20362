
//! Vector-index primitives: Euclidean distance, the fixed-stride vector
//! page layout (`next_page u32 | count u16 | (docId u64, vec [f32; d])*`),
//! and the bounded result heap used by search.

use crate::core::constants::*;
use crate::core::document::DocId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
pub struct Bucket {
    pub centroid: Vec<f32>,
    pub root_page: PageNum,
}

/// Persisted shape of the bucket set, stored as the reserved `_id = 1`
/// document in the owning collection.
#[derive(Debug, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub buckets: Vec<BucketEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BucketEntry {
    pub root: PageNum,
    pub vec: Vec<f32>,
}

pub const BUCKET_CONFIG_KIND: &str = "bucket_config";

/// Euclidean distance. Mismatched lengths yield `f32::MAX` so a torn page
/// degrades a search instead of panicking; callers reject mismatched
/// dimensions before getting here.
pub fn dist(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }

    let mut sum = 0.0f32;
    for i in 0..a.len() {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }
    sum.sqrt()
}

/// Index of the bucket with the nearest centroid; ties go to the lowest
/// index.
pub fn nearest_bucket(buckets: &[Bucket], v: &[f32]) -> Option<usize> {
    let mut best = None;
    let mut best_dist = f32::MAX;
    for (i, bucket) in buckets.iter().enumerate() {
        let d = dist(v, &bucket.centroid);
        if best.is_none() || d < best_dist {
            best = Some(i);
            best_dist = d;
        }
    }
    best
}

pub fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

pub fn vector_from_bytes(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn init_vector_page(page: &mut [u8]) {
    page[0..4].copy_from_slice(&0u32.to_le_bytes());
    page[4..6].copy_from_slice(&0u16.to_le_bytes());
}

pub fn page_next(page: &[u8]) -> PageNum {
    u32::from_le_bytes([page[0], page[1], page[2], page[3]])
}

pub fn set_page_next(page: &mut [u8], next: PageNum) {
    page[0..4].copy_from_slice(&next.to_le_bytes());
}

pub fn page_count(page: &[u8]) -> u16 {
    u16::from_le_bytes([page[4], page[5]])
}

pub fn set_page_count(page: &mut [u8], count: u16) {
    page[4..6].copy_from_slice(&count.to_le_bytes());
}

/// One candidate in a vector search. Ordered by distance so a
/// `BinaryHeap<SearchHit>` is a max-heap keyed on distance: the worst
/// candidate sits on top, ready to be evicted.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub dist: f32,
}

impl PartialEq for SearchHit {
    fn eq(&self, other: &Self) -> bool {
        self.dist.total_cmp(&other.dist) == Ordering::Equal
    }
}

impl Eq for SearchHit {}

impl PartialOrd for SearchHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchHit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.total_cmp(&other.dist)
    }
}

/// Keeps the `top_k` nearest hits seen so far.
pub fn offer_hit(heap: &mut BinaryHeap<SearchHit>, top_k: usize, hit: SearchHit) {
    if heap.len() < top_k {
        heap.push(hit);
    } else if let Some(worst) = heap.peek() {
        if hit.dist < worst.dist {
            heap.pop();
            heap.push(hit);
        }
    }
}
