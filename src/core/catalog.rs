
//! The catalog: a collection rooted at page 1 whose records list every user
//! collection as `name_len u8 | name | data_root u32 | index_root u32`.
//! It is scanned linearly on open; its own index root is never used.

use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::pager::{Header, Pager};
use crate::core::record;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub data_root: PageNum,
    pub index_root: PageNum,
}

pub fn encode_entry(entry: &CatalogEntry) -> Vec<u8> {
    let name = entry.name.as_bytes();
    let mut buf = Vec::with_capacity(name.len() + 9);
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.extend_from_slice(&entry.data_root.to_le_bytes());
    buf.extend_from_slice(&entry.index_root.to_le_bytes());
    buf
}

pub fn decode_entry(data: &[u8], page_num: PageNum) -> Result<CatalogEntry> {
    if data.is_empty() {
        return Err(Error::corruption("catalog", page_num, "empty catalog entry"));
    }
    let name_len = data[0] as usize;
    if data.len() < 1 + name_len + 8 {
        return Err(Error::corruption(
            "catalog",
            page_num,
            format!("catalog entry truncated ({} bytes)", data.len()),
        ));
    }

    let name = String::from_utf8(data[1..1 + name_len].to_vec())
        .map_err(|_| Error::corruption("catalog", page_num, "catalog entry name is not UTF-8"))?;
    let data_root = u32::from_le_bytes(data[1 + name_len..5 + name_len].try_into()?);
    let index_root = u32::from_le_bytes(data[5 + name_len..9 + name_len].try_into()?);

    Ok(CatalogEntry {
        name,
        data_root,
        index_root,
    })
}

/// Scans the catalog chain and returns every live entry.
pub fn load_entries(pager: &Pager) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();

    let mut current = CATALOG_ROOT_PAGE;
    while current != 0 {
        let page = pager.read_page(current)?;
        for slot in 0..record::slot_count(&page) {
            if let Some(rec) = record::read_record(&page, slot, current)? {
                entries.push(decode_entry(&rec.data, current)?);
            }
        }
        current = record::next_page(&page);
    }

    Ok(entries)
}

/// Appends an entry to the catalog chain, extending it like any collection's
/// data chain when the tail page is full.
pub fn append_entry(pager: &Pager, header: &Mutex<Header>, entry: &CatalogEntry) -> Result<()> {
    let data = encode_entry(entry);

    let mut current = CATALOG_ROOT_PAGE;
    loop {
        let mut page = pager.read_page(current)?;
        if record::insert_record(&mut page, 0, &data) {
            return pager.write_page(current, &page);
        }

        let next = record::next_page(&page);
        if next != 0 {
            current = next;
            continue;
        }

        let new_page = {
            let mut header = header
                .lock()
                .map_err(|_| Error::LockPoisoned { lock_name: "header".to_string() })?;
            pager.allocate_page(&mut header)?
        };
        let mut fresh = pager.get_buf();
        record::init_data_page(&mut fresh);
        pager.write_page(new_page, &fresh)?;

        record::set_next_page(&mut page, new_page);
        pager.write_page(current, &page)?;
        current = new_page;
    }
}

/// Rewrites the entry for `name` after an index-root change: tombstones the
/// old record and appends a replacement. The catalog is never compacted, so
/// the append may land anywhere in the chain.
pub fn sync_entry(
    pager: &Pager,
    header: &Mutex<Header>,
    name: &str,
    data_root: PageNum,
    index_root: PageNum,
) -> Result<()> {
    let mut current = CATALOG_ROOT_PAGE;
    while current != 0 {
        let mut page = pager.read_page(current)?;
        for slot in 0..record::slot_count(&page) {
            let rec = match record::read_record(&page, slot, current)? {
                Some(rec) => rec,
                None => continue,
            };
            if decode_entry(&rec.data, current)?.name != name {
                continue;
            }

            record::mark_slot_deleted(&mut page, slot, current)?;
            pager.write_page(current, &page)?;
            drop(page);

            return append_entry(
                pager,
                header,
                &CatalogEntry {
                    name: name.to_string(),
                    data_root,
                    index_root,
                },
            );
        }
        current = record::next_page(&page);
    }

    Err(Error::CollectionNotFound {
        name: name.to_string(),
    })
}
