
use crate::core::btree::{BTree, DocLocation};
use crate::core::catalog;
use crate::core::constants::*;
use crate::core::document::{
    decode_doc, encode_doc, generate_id, take_embedding, DocId, Document, ID_KEY,
};
use crate::core::errors::*;
use crate::core::pager::{Header, Pager};
use crate::core::query;
use crate::core::record;
use crate::core::vector::{self, Bucket, BucketConfig, BucketEntry, SearchHit};
use log::debug;
use serde_json::Value;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Maximum number of documents to return; 0 means unlimited.
    pub limit: usize,
    /// Matching documents to pass over before collecting results.
    pub skip: usize,
}

/// A collection binds a chain of slotted data pages to a B+-tree over
/// document ids, plus the optional IVF-flat vector index.
///
/// Mutating operations hold the collection lock in write mode and point
/// reads in read mode. Full scans (`find`, `find_one`) deliberately take no
/// lock: they only follow the immutable `data_root` chain and tolerate
/// records written underneath them by skipping whatever fails to decode.
pub struct Collection {
    name: String,
    data_root: PageNum,
    pager: Arc<Pager>,
    header: Arc<Mutex<Header>>,
    inner: RwLock<CollectionInner>,
}

struct CollectionInner {
    /// Tail hint for chain inserts. Monotone: always a page in the chain,
    /// possibly lagging the true tail, which `next_page` links recover.
    last_page: PageNum,
    btree: BTree,
    buckets: Vec<Bucket>,
}

impl Collection {
    /// Binds an existing collection. Walks the data chain once to seed the
    /// tail hint.
    pub(crate) fn open(
        name: String,
        data_root: PageNum,
        index_root: PageNum,
        pager: Arc<Pager>,
        header: Arc<Mutex<Header>>,
    ) -> Result<Self> {
        let page_limit = {
            let header = header
                .lock()
                .map_err(|_| Error::LockPoisoned { lock_name: "header".to_string() })?;
            header.page_count
        };

        let mut last_page = data_root;
        let mut current = data_root;
        let mut steps = 0u32;
        while current != 0 {
            if steps > page_limit {
                return Err(Error::corruption(
                    "collection",
                    data_root,
                    "data page chain cycle",
                ));
            }
            steps += 1;

            let page = pager.read_page(current)?;
            let next = record::next_page(&page);
            if next == 0 {
                last_page = current;
                break;
            }
            current = next;
        }

        let btree = BTree::open(Arc::clone(&pager), Arc::clone(&header), index_root);

        Ok(Self {
            name,
            data_root,
            pager,
            header,
            inner: RwLock::new(CollectionInner {
                last_page,
                btree,
                buckets: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts a document, assigning it a fresh 48-bit id. An
    /// `_embeddings` array is stripped from the stored payload and indexed
    /// after the collection lock is released, so a concurrent reader may
    /// briefly see the document before its vector.
    pub fn insert(&self, mut doc: Document) -> Result<DocId> {
        let doc_id = generate_id();
        doc.insert(ID_KEY.to_string(), Value::from(doc_id));
        let embedding = take_embedding(&mut doc);
        let data = encode_doc(&doc)?;

        {
            let mut inner = self.write_inner()?;
            let old_root = inner.btree.root_page();
            let loc = self.place_record(&mut inner, doc_id, &data, None)?;
            inner.btree.insert(doc_id, loc)?;
            self.sync_catalog_if_changed(&inner, old_root)?;
        }

        if let Some(v) = embedding {
            self.insert_vector(doc_id, &v)?;
        }

        Ok(doc_id)
    }

    /// Batch insert under one write lock. Records are packed into the
    /// current page until it fills; B+-tree entries for a page are applied
    /// right after that page is written. Vector inserts run after the lock
    /// drops. Stops at the first document that cannot be stored and returns
    /// the ids inserted so far.
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<DocId>> {
        let mut ids = Vec::with_capacity(docs.len());
        let mut embeddings: Vec<(DocId, Vec<f32>)> = Vec::new();

        {
            let mut inner = self.write_inner()?;
            let old_root = inner.btree.root_page();

            let mut current = inner.last_page;
            let mut page = self.pager.read_page(current)?;
            let mut pending: Vec<(DocId, DocLocation)> = Vec::new();

            'docs: for mut doc in docs {
                let doc_id = generate_id();
                doc.insert(ID_KEY.to_string(), Value::from(doc_id));
                let embedding = take_embedding(&mut doc);
                let data = match encode_doc(&doc) {
                    Ok(data) => data,
                    Err(_) => break 'docs,
                };
                if data.len() > MAX_RECORD_DATA {
                    break 'docs;
                }

                loop {
                    if record::insert_record(&mut page, doc_id, &data) {
                        let slot = record::slot_count(&page) - 1;
                        pending.push((doc_id, DocLocation { page: current, slot }));
                        break;
                    }

                    let next = record::next_page(&page);
                    if next != 0 {
                        self.pager.write_page(current, &page)?;
                        self.apply_pending(&mut inner, &mut pending)?;
                        current = next;
                        page = self.pager.read_page(current)?;
                    } else {
                        let new_page = self.allocate()?;
                        record::set_next_page(&mut page, new_page);
                        self.pager.write_page(current, &page)?;
                        self.apply_pending(&mut inner, &mut pending)?;
                        current = new_page;
                        page = self.pager.get_buf();
                        record::init_data_page(&mut page);
                    }
                    inner.last_page = current;
                }

                ids.push(doc_id);
                if let Some(v) = embedding {
                    embeddings.push((doc_id, v));
                }
            }

            self.pager.write_page(current, &page)?;
            drop(page);
            self.apply_pending(&mut inner, &mut pending)?;
            inner.last_page = current;
            self.sync_catalog_if_changed(&inner, old_root)?;
        }

        for (doc_id, v) in embeddings {
            self.insert_vector(doc_id, &v)?;
        }

        Ok(ids)
    }

    pub fn find_by_id(&self, id: DocId) -> Result<Option<Document>> {
        let inner = self.read_inner()?;
        self.find_by_id_locked(&inner, id)
    }

    /// Replaces a document: the new payload is appended following the chain
    /// policy, the old slot is tombstoned, and the B+-tree entry is pointed
    /// at the new location.
    pub fn update_by_id(&self, id: DocId, mut new_doc: Document) -> Result<()> {
        let mut inner = self.write_inner()?;

        let old = inner.btree.search(id)?.ok_or(Error::NotFound)?;

        new_doc.insert(ID_KEY.to_string(), Value::from(id));
        let data = encode_doc(&new_doc)?;

        let loc = self.place_record(&mut inner, id, &data, Some(old))?;
        inner.btree.update(id, loc)
    }

    /// Merges `patch` into every document matching `query` (top-level keys,
    /// `_id` ignored) and returns the updated documents.
    pub fn update_many(&self, query: &Document, patch: &Document) -> Result<Vec<Document>> {
        let (docs, ids) = self.find(query, &FindOptions::default())?;

        let mut updated = Vec::with_capacity(docs.len());
        for (mut doc, id) in docs.into_iter().zip(ids) {
            for (key, value) in patch {
                if key == ID_KEY {
                    continue;
                }
                doc.insert(key.clone(), value.clone());
            }
            self.update_by_id(id, doc.clone())?;
            updated.push(doc);
        }

        Ok(updated)
    }

    pub fn delete_by_id(&self, id: DocId) -> Result<()> {
        let mut inner = self.write_inner()?;
        self.delete_by_id_locked(&mut inner, id)
    }

    /// Full linear scan in chain order, slot order within a page. Runs
    /// without the collection lock; slots that fail to read or decode are
    /// skipped, not fatal.
    pub fn find(&self, query: &Document, opts: &FindOptions) -> Result<(Vec<Document>, Vec<DocId>)> {
        let mut docs = Vec::new();
        let mut ids = Vec::new();
        let mut skip = opts.skip;

        let mut current = self.data_root;
        while current != 0 {
            let page = self.pager.read_page(current)?;
            for slot in 0..record::slot_count(&page) {
                let rec = match record::read_record(&page, slot, current) {
                    Ok(Some(rec)) => rec,
                    Ok(None) => continue,
                    Err(_) => continue,
                };
                let doc = match decode_doc(&rec.data) {
                    Ok(doc) => doc,
                    Err(_) => continue,
                };
                if !query::matches(&doc, query) {
                    continue;
                }
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                docs.push(doc);
                ids.push(rec.doc_id);
                if opts.limit > 0 && docs.len() == opts.limit {
                    return Ok((docs, ids));
                }
            }
            current = record::next_page(&page);
        }

        Ok((docs, ids))
    }

    pub fn find_one(&self, query: &Document) -> Result<Option<Document>> {
        let (mut docs, _) = self.find(query, &FindOptions { limit: 1, skip: 0 })?;
        Ok(docs.pop())
    }

    /// Tombstones every matching record and removes it from the B+-tree.
    pub fn find_and_delete(&self, query: &Document) -> Result<bool> {
        let mut inner = self.write_inner()?;

        let mut current = self.data_root;
        while current != 0 {
            let mut page = self.pager.read_page(current)?;
            let mut dirty = false;

            for slot in 0..record::slot_count(&page) {
                let rec = match record::read_record(&page, slot, current)? {
                    Some(rec) => rec,
                    None => continue,
                };
                let doc = match decode_doc(&rec.data) {
                    Ok(doc) => doc,
                    Err(_) => continue,
                };
                if !query::matches(&doc, query) {
                    continue;
                }

                record::mark_slot_deleted(&mut page, slot, current)?;
                dirty = true;
                match inner.btree.delete(rec.doc_id) {
                    Err(Error::NotFound) => {}
                    other => other?,
                }
            }

            if dirty {
                self.pager.write_page(current, &page)?;
            }
            current = record::next_page(&page);
        }

        Ok(true)
    }

    /// Adds a vector to the IVF-flat index. While the bucket set is below
    /// capacity every vector starts its own bucket; afterwards vectors are
    /// appended to the bucket with the nearest centroid.
    pub fn insert_vector(&self, doc_id: DocId, v: &[f32]) -> Result<()> {
        if v.is_empty() {
            return Err(Error::BadInput("empty embedding".to_string()));
        }
        if VECTOR_PAGE_HEADER_SIZE + 8 + v.len() * 4 > PAGE_SIZE {
            return Err(Error::BadInput(format!(
                "embedding of dimension {} does not fit a vector page",
                v.len()
            )));
        }

        let mut inner = self.write_inner()?;

        if let Some(first) = inner.buckets.first() {
            if first.centroid.len() != v.len() {
                return Err(Error::DimensionMismatch {
                    expected: first.centroid.len(),
                    got: v.len(),
                });
            }
        }

        let target = if inner.buckets.len() < MAX_BUCKETS {
            let root = self.allocate()?;
            let mut buf = self.pager.get_buf();
            vector::init_vector_page(&mut buf);
            self.pager.write_page(root, &buf)?;
            drop(buf);

            inner.buckets.push(Bucket {
                centroid: v.to_vec(),
                root_page: root,
            });
            if let Err(err) = self.save_buckets(&mut inner) {
                inner.buckets.pop();
                return Err(err);
            }
            debug!(
                "collection {}: new vector bucket {} (root {})",
                self.name,
                inner.buckets.len(),
                root
            );
            root
        } else {
            match vector::nearest_bucket(&inner.buckets, v) {
                Some(idx) => inner.buckets[idx].root_page,
                None => return Err(Error::BadInput("empty bucket set".to_string())),
            }
        };

        self.append_vector(target, doc_id, v)
    }

    /// Single-probe search: pick the nearest bucket, scan its page chain,
    /// keep the `top_k` closest. Results come back in ascending distance.
    pub fn search_vector(&self, query: &[f32], top_k: usize) -> Result<Vec<DocId>> {
        let inner = self.read_inner()?;

        if inner.buckets.is_empty() {
            return Ok(Vec::new());
        }
        let expected = inner.buckets[0].centroid.len();
        if query.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let best = match vector::nearest_bucket(&inner.buckets, query) {
            Some(idx) => idx,
            None => return Ok(Vec::new()),
        };

        let item_size = 8 + query.len() * 4;
        let mut heap: BinaryHeap<SearchHit> = BinaryHeap::with_capacity(top_k);

        let mut current = inner.buckets[best].root_page;
        while current != 0 {
            let page = self.pager.read_page(current)?;
            let count = vector::page_count(&page) as usize;
            for i in 0..count {
                let offset = VECTOR_PAGE_HEADER_SIZE + i * item_size;
                if offset + item_size > PAGE_SIZE {
                    return Err(Error::corruption(
                        "vector",
                        current,
                        format!("entry {} overruns page ({} stored)", i, count),
                    ));
                }
                let doc_id = u64::from_le_bytes(page[offset..offset + 8].try_into()?);
                let stored = vector::vector_from_bytes(&page[offset + 8..offset + item_size]);
                let d = vector::dist(query, &stored);
                vector::offer_hit(&mut heap, top_k, SearchHit { doc_id, dist: d });
            }
            current = vector::page_next(&page);
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|hit| hit.doc_id)
            .collect())
    }

    /// Rebuilds the in-memory bucket list from the reserved `_id = 1`
    /// document. Absence means the collection has no vectors yet.
    pub fn load_vector_index(&self) -> Result<()> {
        let mut inner = self.write_inner()?;

        let doc = match self.find_by_id_locked(&inner, BUCKET_CONFIG_ID)? {
            Some(doc) => doc,
            None => return Ok(()),
        };

        let config: BucketConfig = serde_json::from_value(Value::Object(doc))?;
        inner.buckets = config
            .buckets
            .into_iter()
            .map(|entry| Bucket {
                centroid: entry.vec,
                root_page: entry.root,
            })
            .collect();

        Ok(())
    }

    fn find_by_id_locked(&self, inner: &CollectionInner, id: DocId) -> Result<Option<Document>> {
        let loc = match inner.btree.search(id)? {
            Some(loc) => loc,
            None => return Ok(None),
        };

        let page = self.pager.read_page(loc.page)?;
        let rec = match record::read_record(&page, loc.slot, loc.page)? {
            Some(rec) => rec,
            None => return Ok(None),
        };

        Ok(Some(decode_doc(&rec.data)?))
    }

    fn delete_by_id_locked(&self, inner: &mut CollectionInner, id: DocId) -> Result<()> {
        let loc = inner.btree.search(id)?.ok_or(Error::NotFound)?;

        let mut page = self.pager.read_page(loc.page)?;
        record::mark_slot_deleted(&mut page, loc.slot, loc.page)?;
        self.pager.write_page(loc.page, &page)?;

        inner.btree.delete(id)
    }

    /// Appends a record to the data chain, starting from the tail hint and
    /// allocating + linking a fresh page when the chain runs out of room.
    /// `replace` names an old slot to tombstone in the same pass.
    fn place_record(
        &self,
        inner: &mut CollectionInner,
        doc_id: DocId,
        data: &[u8],
        replace: Option<DocLocation>,
    ) -> Result<DocLocation> {
        if data.len() > MAX_RECORD_DATA {
            return Err(Error::BadInput(format!(
                "document of {} bytes exceeds the {} byte page payload limit",
                data.len(),
                MAX_RECORD_DATA
            )));
        }

        let mut current = inner.last_page;
        loop {
            let mut page = self.pager.read_page(current)?;

            if record::insert_record(&mut page, doc_id, data) {
                let slot = record::slot_count(&page) - 1;

                if let Some(old) = replace {
                    if old.page == current {
                        record::mark_slot_deleted(&mut page, old.slot, current)?;
                    } else {
                        let mut old_page = self.pager.read_page(old.page)?;
                        record::mark_slot_deleted(&mut old_page, old.slot, old.page)?;
                        self.pager.write_page(old.page, &old_page)?;
                    }
                }

                self.pager.write_page(current, &page)?;
                inner.last_page = current;
                return Ok(DocLocation {
                    page: current,
                    slot,
                });
            }

            let next = record::next_page(&page);
            if next != 0 {
                current = next;
                continue;
            }

            let new_page = self.allocate()?;
            let mut fresh = self.pager.get_buf();
            record::init_data_page(&mut fresh);
            self.pager.write_page(new_page, &fresh)?;
            drop(fresh);

            record::set_next_page(&mut page, new_page);
            self.pager.write_page(current, &page)?;
            inner.last_page = new_page;
            current = new_page;
        }
    }

    fn apply_pending(
        &self,
        inner: &mut CollectionInner,
        pending: &mut Vec<(DocId, DocLocation)>,
    ) -> Result<()> {
        for (doc_id, loc) in pending.drain(..) {
            inner.btree.insert(doc_id, loc)?;
        }
        Ok(())
    }

    /// Persists the bucket set as the reserved document, replacing the
    /// previous one (tombstone + B+-tree delete, then a fresh insert).
    fn save_buckets(&self, inner: &mut CollectionInner) -> Result<()> {
        let config = BucketConfig {
            kind: vector::BUCKET_CONFIG_KIND.to_string(),
            buckets: inner
                .buckets
                .iter()
                .map(|b| BucketEntry {
                    root: b.root_page,
                    vec: b.centroid.clone(),
                })
                .collect(),
        };

        let mut doc = match serde_json::to_value(&config)? {
            Value::Object(map) => map,
            _ => {
                return Err(Error::BadInput(
                    "bucket config did not encode to an object".to_string(),
                ))
            }
        };
        doc.insert(ID_KEY.to_string(), Value::from(BUCKET_CONFIG_ID));
        let data = encode_doc(&doc)?;

        match self.delete_by_id_locked(inner, BUCKET_CONFIG_ID) {
            Ok(()) | Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        let old_root = inner.btree.root_page();
        let loc = self.place_record(inner, BUCKET_CONFIG_ID, &data, None)?;
        inner.btree.insert(BUCKET_CONFIG_ID, loc)?;
        self.sync_catalog_if_changed(inner, old_root)
    }

    fn append_vector(&self, root: PageNum, doc_id: DocId, v: &[f32]) -> Result<()> {
        let vec_bytes = vector::vector_to_bytes(v);
        let item_size = 8 + vec_bytes.len();

        let mut current = root;
        loop {
            let mut page = self.pager.read_page(current)?;
            let count = vector::page_count(&page);
            let offset = VECTOR_PAGE_HEADER_SIZE + item_size * count as usize;

            if offset + item_size > PAGE_SIZE {
                let next = vector::page_next(&page);
                if next != 0 {
                    current = next;
                    continue;
                }

                let new_page = self.allocate()?;
                vector::set_page_next(&mut page, new_page);
                self.pager.write_page(current, &page)?;
                // A freshly allocated page is zeroed on disk, which is a
                // valid empty vector page.
                current = new_page;
                continue;
            }

            page[offset..offset + 8].copy_from_slice(&doc_id.to_le_bytes());
            page[offset + 8..offset + 8 + vec_bytes.len()].copy_from_slice(&vec_bytes);
            vector::set_page_count(&mut page, count + 1);
            return self.pager.write_page(current, &page);
        }
    }

    fn sync_catalog_if_changed(&self, inner: &CollectionInner, old_root: PageNum) -> Result<()> {
        let root = inner.btree.root_page();
        if root == old_root {
            return Ok(());
        }
        catalog::sync_entry(&self.pager, &self.header, &self.name, self.data_root, root)
    }

    fn allocate(&self) -> Result<PageNum> {
        let mut header = self
            .header
            .lock()
            .map_err(|_| Error::LockPoisoned { lock_name: "header".to_string() })?;
        self.pager.allocate_page(&mut header)
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, CollectionInner>> {
        self.inner
            .read()
            .map_err(|_| Error::LockPoisoned { lock_name: format!("collection.{}", self.name) })
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, CollectionInner>> {
        self.inner
            .write()
            .map_err(|_| Error::LockPoisoned { lock_name: format!("collection.{}", self.name) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::btree;
    use serde_json::json;
    use std::fs;

    fn doc(v: Value) -> Document {
        v.as_object().unwrap().clone()
    }

    /// Sets up a file with a header, catalog page, and one registered
    /// collection, mirroring what the database facade does on create.
    fn open_collection(path: &str) -> Collection {
        let _ = fs::remove_file(path);
        let pager = Arc::new(Pager::open(path).unwrap());
        let mut header = Header::new();
        pager.write_header(&header).unwrap();

        let catalog_page = pager.allocate_page(&mut header).unwrap();
        assert_eq!(catalog_page, CATALOG_ROOT_PAGE);
        let mut buf = pager.get_buf();
        record::init_data_page(&mut buf);
        pager.write_page(catalog_page, &buf).unwrap();
        drop(buf);

        let data_root = pager.allocate_page(&mut header).unwrap();
        let mut buf = pager.get_buf();
        record::init_data_page(&mut buf);
        pager.write_page(data_root, &buf).unwrap();
        drop(buf);

        let index_root = pager.allocate_page(&mut header).unwrap();
        btree::init_leaf_root(&pager, index_root).unwrap();

        let header = Arc::new(Mutex::new(header));
        catalog::append_entry(
            &pager,
            &header,
            &catalog::CatalogEntry {
                name: "test".to_string(),
                data_root,
                index_root,
            },
        )
        .unwrap();

        Collection::open("test".to_string(), data_root, index_root, pager, header).unwrap()
    }

    #[test]
    fn test_insert_then_find_by_id() {
        let col = open_collection("/tmp/test_col_insert.db");

        let id = col.insert(doc(json!({"k": 7, "name": "ada"}))).unwrap();
        assert!(id < 1 << 48);

        let found = col.find_by_id(id).unwrap().unwrap();
        assert_eq!(found.get("k"), Some(&json!(7)));
        assert_eq!(found.get("name"), Some(&json!("ada")));
        assert_eq!(found.get(ID_KEY).and_then(|v| v.as_u64()), Some(id));

        let _ = fs::remove_file("/tmp/test_col_insert.db");
    }

    #[test]
    fn test_insert_strips_embeddings() {
        let col = open_collection("/tmp/test_col_embed_strip.db");

        let id = col
            .insert(doc(json!({"k": 1, "_embeddings": [1.0, 0.0]})))
            .unwrap();
        let found = col.find_by_id(id).unwrap().unwrap();
        assert!(!found.contains_key("_embeddings"));

        let _ = fs::remove_file("/tmp/test_col_embed_strip.db");
    }

    #[test]
    fn test_update_by_id_moves_record() {
        let col = open_collection("/tmp/test_col_update.db");

        let id = col.insert(doc(json!({"k": 1}))).unwrap();
        col.update_by_id(id, doc(json!({"k": 2, "extra": true}))).unwrap();

        let found = col.find_by_id(id).unwrap().unwrap();
        assert_eq!(found.get("k"), Some(&json!(2)));
        assert_eq!(found.get("extra"), Some(&json!(true)));

        // The old slot is tombstoned, so a full scan sees one copy.
        let (docs, _) = col.find(&Document::new(), &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 1);

        assert!(matches!(
            col.update_by_id(0xBEEF, doc(json!({"k": 9}))),
            Err(Error::NotFound)
        ));

        let _ = fs::remove_file("/tmp/test_col_update.db");
    }

    #[test]
    fn test_delete_by_id() {
        let col = open_collection("/tmp/test_col_delete.db");

        let id = col.insert(doc(json!({"k": 1}))).unwrap();
        col.delete_by_id(id).unwrap();

        assert!(col.find_by_id(id).unwrap().is_none());
        assert!(matches!(col.delete_by_id(id), Err(Error::NotFound)));

        let _ = fs::remove_file("/tmp/test_col_delete.db");
    }

    #[test]
    fn test_find_skip_and_limit() {
        let col = open_collection("/tmp/test_col_skip_limit.db");

        for i in 0..10 {
            col.insert(doc(json!({"k": i}))).unwrap();
        }

        let (docs, _) = col
            .find(&Document::new(), &FindOptions { limit: 3, skip: 0 })
            .unwrap();
        assert_eq!(docs.len(), 3);

        let (docs, _) = col
            .find(&Document::new(), &FindOptions { limit: 0, skip: 8 })
            .unwrap();
        assert_eq!(docs.len(), 2);

        let (docs, _) = col
            .find(&doc(json!({"k": {"$gte": 5}})), &FindOptions::default())
            .unwrap();
        assert_eq!(docs.len(), 5);

        let _ = fs::remove_file("/tmp/test_col_skip_limit.db");
    }

    #[test]
    fn test_insert_overflows_to_new_page() {
        let col = open_collection("/tmp/test_col_overflow.db");

        // ~150 bytes per record forces the chain past one 4 KiB page.
        let payload = "x".repeat(120);
        let mut ids = Vec::new();
        for i in 0..60 {
            ids.push(col.insert(doc(json!({"k": i, "pad": payload}))).unwrap());
        }

        for (i, id) in ids.iter().enumerate() {
            let found = col.find_by_id(*id).unwrap().unwrap();
            assert_eq!(found.get("k"), Some(&json!(i)));
        }

        let first = col.pager.read_page(col.data_root).unwrap();
        assert_ne!(record::next_page(&first), 0, "chain should have grown");

        let _ = fs::remove_file("/tmp/test_col_overflow.db");
    }

    #[test]
    fn test_insert_many_matches_single_inserts() {
        let col = open_collection("/tmp/test_col_insert_many.db");

        let docs: Vec<Document> = (0..500).map(|i| doc(json!({"k": i}))).collect();
        let ids = col.insert_many(docs).unwrap();
        assert_eq!(ids.len(), 500);

        for (i, id) in ids.iter().enumerate() {
            let found = col.find_by_id(*id).unwrap().unwrap();
            assert_eq!(found.get("k"), Some(&json!(i)));
        }

        let _ = fs::remove_file("/tmp/test_col_insert_many.db");
    }

    #[test]
    fn test_find_and_delete_by_predicate() {
        let col = open_collection("/tmp/test_col_find_delete.db");

        for i in 0..20 {
            col.insert(doc(json!({"k": i}))).unwrap();
        }

        assert!(col.find_and_delete(&doc(json!({"k": {"$lt": 10}}))).unwrap());

        let (docs, _) = col.find(&Document::new(), &FindOptions::default()).unwrap();
        assert_eq!(docs.len(), 10);
        assert!(docs
            .iter()
            .all(|d| d.get("k").and_then(|v| v.as_i64()).unwrap() >= 10));

        let _ = fs::remove_file("/tmp/test_col_find_delete.db");
    }

    #[test]
    fn test_update_many_merges_patch() {
        let col = open_collection("/tmp/test_col_update_many.db");

        for i in 0..6 {
            col.insert(doc(json!({"k": i, "flag": false}))).unwrap();
        }

        let updated = col
            .update_many(&doc(json!({"k": {"$gte": 3}})), &doc(json!({"flag": true, "_id": 99})))
            .unwrap();
        assert_eq!(updated.len(), 3);

        let (docs, _) = col
            .find(&doc(json!({"flag": true})), &FindOptions::default())
            .unwrap();
        assert_eq!(docs.len(), 3);
        // The patch's _id is ignored.
        assert!(docs.iter().all(|d| d.get(ID_KEY) != Some(&json!(99))));

        let _ = fs::remove_file("/tmp/test_col_update_many.db");
    }

    #[test]
    fn test_vector_insert_and_search() {
        let col = open_collection("/tmp/test_col_vectors.db");

        let a = col.insert(doc(json!({"n": "a", "_embeddings": [1.0, 0.0, 0.0]}))).unwrap();
        let b = col.insert(doc(json!({"n": "b", "_embeddings": [0.0, 1.0, 0.0]}))).unwrap();
        let c = col.insert(doc(json!({"n": "c", "_embeddings": [0.0, 0.0, 1.0]}))).unwrap();

        assert_eq!(col.search_vector(&[0.9, 0.1, 0.0], 1).unwrap(), vec![a]);
        assert_eq!(col.search_vector(&[0.1, 0.9, 0.0], 1).unwrap(), vec![b]);
        assert_eq!(col.search_vector(&[0.0, 0.1, 0.9], 1).unwrap(), vec![c]);

        let _ = fs::remove_file("/tmp/test_col_vectors.db");
    }

    #[test]
    fn test_vector_dimension_mismatch_rejected() {
        let col = open_collection("/tmp/test_col_vec_dim.db");

        col.insert(doc(json!({"_embeddings": [1.0, 0.0]}))).unwrap();

        assert!(matches!(
            col.insert_vector(42, &[1.0, 0.0, 0.0]),
            Err(Error::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert!(matches!(
            col.search_vector(&[1.0], 1),
            Err(Error::DimensionMismatch { expected: 2, got: 1 })
        ));

        let _ = fs::remove_file("/tmp/test_col_vec_dim.db");
    }

    #[test]
    fn test_vector_search_empty_collection() {
        let col = open_collection("/tmp/test_col_vec_empty.db");
        assert!(col.search_vector(&[1.0, 0.0], 5).unwrap().is_empty());
        let _ = fs::remove_file("/tmp/test_col_vec_empty.db");
    }

    #[test]
    fn test_bucket_config_survives_reload() {
        let path = "/tmp/test_col_vec_reload.db";
        let col = open_collection(path);

        let a = col.insert(doc(json!({"_embeddings": [1.0, 0.0]}))).unwrap();
        let b = col.insert(doc(json!({"_embeddings": [0.0, 1.0]}))).unwrap();

        // Re-bind the collection the way an open does and reload buckets.
        let entries = catalog::load_entries(&col.pager).unwrap();
        let entry = entries.iter().find(|e| e.name == "test").unwrap();
        let reopened = Collection::open(
            "test".to_string(),
            entry.data_root,
            entry.index_root,
            Arc::clone(&col.pager),
            Arc::clone(&col.header),
        )
        .unwrap();
        reopened.load_vector_index().unwrap();

        assert_eq!(reopened.search_vector(&[0.9, 0.1], 1).unwrap(), vec![a]);
        assert_eq!(reopened.search_vector(&[0.1, 0.9], 1).unwrap(), vec![b]);

        let _ = fs::remove_file(path);
    }
}
