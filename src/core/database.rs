
use crate::core::btree;
use crate::core::catalog::{self, CatalogEntry};
use crate::core::collection::Collection;
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::errors::PoisonedLockExt;
use crate::core::pager::{Header, Pager};
use crate::core::record;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Engine facade over one database file: the pager, the header, and the
/// registry of open collections.
///
/// The registry lock is held in write mode only while creating a collection;
/// resolving a name to a handle takes it briefly in read mode, and every
/// document operation runs against the returned `Arc<Collection>` with the
/// registry lock released.
pub struct Database {
    path: String,
    pager: Arc<Pager>,
    header: Arc<Mutex<Header>>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Opens (or creates) a database file. A fresh file gets the header at
    /// page 0 and the catalog's first data page at page 1; an existing file
    /// has its header validated and its catalog scanned to rebuild the
    /// collection registry.
    pub fn open(path: &str) -> Result<Self> {
        let pager = Arc::new(Pager::open(path)?);

        let header = if pager.file_len()? == 0 {
            let mut header = Header::new();
            pager.write_header(&header)?;

            let catalog_page = pager.allocate_page(&mut header)?;
            if catalog_page != CATALOG_ROOT_PAGE {
                return Err(Error::corruption(
                    "header",
                    catalog_page,
                    "catalog root did not land on page 1",
                ));
            }
            let mut buf = pager.get_buf();
            record::init_data_page(&mut buf);
            pager.write_page(catalog_page, &buf)?;

            debug!("initialized database at {}", path);
            header
        } else {
            let header = pager.read_header()?;
            if header.page_count < 2 {
                return Err(Error::corruption(
                    "header",
                    0,
                    format!("page_count {} below catalog minimum", header.page_count),
                ));
            }
            header
        };

        let db = Self {
            path: path.to_string(),
            pager,
            header: Arc::new(Mutex::new(header)),
            collections: RwLock::new(HashMap::new()),
        };
        db.load_collections()?;

        Ok(db)
    }

    fn load_collections(&self) -> Result<()> {
        let entries = catalog::load_entries(&self.pager)?;

        let mut registry = self
            .collections
            .write()
            .map_err(|_| Error::LockPoisoned { lock_name: "database.collections".to_string() })?;
        for entry in entries {
            let collection = Collection::open(
                entry.name.clone(),
                entry.data_root,
                entry.index_root,
                Arc::clone(&self.pager),
                Arc::clone(&self.header),
            )?;
            collection.load_vector_index()?;
            registry.insert(entry.name, Arc::new(collection));
        }

        debug!("loaded {} collection(s) from {}", registry.len(), self.path);
        Ok(())
    }

    /// Creates a collection: a fresh initialized data page, a fresh empty
    /// leaf as index root, and a catalog entry binding them to the name.
    pub fn create_collection(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > 255 {
            return Err(Error::BadInput(
                "collection name must be 1..=255 bytes".to_string(),
            ));
        }

        let mut registry = self
            .collections
            .write()
            .map_err(|_| Error::LockPoisoned { lock_name: "database.collections".to_string() })?;
        if registry.contains_key(name) {
            return Err(Error::AlreadyExists {
                name: name.to_string(),
            });
        }

        let (data_root, index_root) = {
            let mut header = self
                .header
                .lock()
                .map_err(|_| Error::LockPoisoned { lock_name: "header".to_string() })?;

            let data_root = self.pager.allocate_page(&mut header)?;
            let mut buf = self.pager.get_buf();
            record::init_data_page(&mut buf);
            self.pager.write_page(data_root, &buf)?;
            drop(buf);

            let index_root = self.pager.allocate_page(&mut header)?;
            btree::init_leaf_root(&self.pager, index_root)?;

            (data_root, index_root)
        };

        catalog::append_entry(
            &self.pager,
            &self.header,
            &CatalogEntry {
                name: name.to_string(),
                data_root,
                index_root,
            },
        )?;

        let collection = Collection::open(
            name.to_string(),
            data_root,
            index_root,
            Arc::clone(&self.pager),
            Arc::clone(&self.header),
        )?;
        registry.insert(name.to_string(), Arc::new(collection));

        debug!(
            "created collection {} (data root {}, index root {})",
            name, data_root, index_root
        );
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        let registry = self
            .collections
            .read()
            .map_err(|_| Error::LockPoisoned { lock_name: "database.collections".to_string() })?;
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound {
                name: name.to_string(),
            })
    }

    pub fn collection_names(&self) -> Vec<String> {
        let registry = self.collections.read().recover_poison();
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flushes the file. Pages and the header are written in place as
    /// operations run, so close has nothing to replay.
    pub fn close(self) -> Result<()> {
        self.pager.sync()?;
        debug!("closed database at {}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_fresh_file_layout() {
        let path = "/tmp/test_db_fresh.db";
        let _ = fs::remove_file(path);

        let db = Database::open(path).unwrap();
        assert!(db.collection_names().is_empty());

        let header = db.pager.read_header().unwrap();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, VERSION);
        assert_eq!(header.page_size, PAGE_SIZE as u32);
        assert_eq!(header.page_count, 2);
        assert_eq!(header.free_list, 0);

        // Page 1 is an initialized, empty catalog data page.
        let catalog_page = db.pager.read_page(CATALOG_ROOT_PAGE).unwrap();
        assert_eq!(record::slot_count(&catalog_page), 0);
        assert_eq!(record::next_page(&catalog_page), 0);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_create_collection_registers_and_allocates() {
        let path = "/tmp/test_db_create.db";
        let _ = fs::remove_file(path);

        let db = Database::open(path).unwrap();
        db.create_collection("users").unwrap();

        assert_eq!(db.collection_names(), vec!["users".to_string()]);
        assert_eq!(db.pager.read_header().unwrap().page_count, 4);

        assert!(matches!(
            db.create_collection("users"),
            Err(Error::AlreadyExists { .. })
        ));
        assert!(matches!(
            db.collection("ghosts"),
            Err(Error::CollectionNotFound { .. })
        ));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_reopen_preserves_collections_and_documents() {
        let path = "/tmp/test_db_reopen.db";
        let _ = fs::remove_file(path);

        let id = {
            let db = Database::open(path).unwrap();
            db.create_collection("users").unwrap();
            let users = db.collection("users").unwrap();
            let mut doc = crate::core::document::Document::new();
            doc.insert("k".to_string(), json!(41));
            let id = users.insert(doc).unwrap();
            db.close().unwrap();
            id
        };

        let db = Database::open(path).unwrap();
        assert_eq!(db.collection_names(), vec!["users".to_string()]);
        let users = db.collection("users").unwrap();
        let found = users.find_by_id(id).unwrap().unwrap();
        assert_eq!(found.get("k"), Some(&json!(41)));

        let _ = fs::remove_file(path);
    }
}
