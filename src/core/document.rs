
use crate::core::errors::*;
use rand::Rng;
use serde_json::Value;

pub type DocId = u64;

/// Documents are untyped maps of heterogeneous JSON values.
pub type Document = serde_json::Map<String, Value>;

pub const ID_KEY: &str = "_id";

pub const EMBEDDINGS_KEY: &str = "_embeddings";

/// Encodes a document to its stored byte form. The codec is self-describing;
/// `decode_doc(encode_doc(d)) == d` for all supported value types.
pub fn encode_doc(doc: &Document) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(doc)?)
}

pub fn decode_doc(data: &[u8]) -> Result<Document> {
    Ok(serde_json::from_slice(data)?)
}

/// Fresh random 48-bit document id. Collisions are treated as negligible;
/// 48 bits also survive a JSON f64 round-trip exactly, which the C ABI
/// relies on.
pub fn generate_id() -> DocId {
    rand::thread_rng().gen::<u64>() & 0xFFFF_FFFF_FFFF
}

/// Removes the `_embeddings` field and returns it as an f32 vector, so the
/// stored record never carries the embedding payload.
pub fn take_embedding(doc: &mut Document) -> Option<Vec<f32>> {
    match doc.remove(EMBEDDINGS_KEY) {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_round_trip() {
        let mut doc = Document::new();
        doc.insert("name".to_string(), json!("ada"));
        doc.insert("age".to_string(), json!(36));
        doc.insert("score".to_string(), json!(1.5));
        doc.insert("tags".to_string(), json!(["a", "b"]));
        doc.insert("nested".to_string(), json!({"x": null, "y": true}));

        let data = encode_doc(&doc).unwrap();
        let decoded = decode_doc(&data).unwrap();
        assert_eq!(doc, decoded);
    }

    #[test]
    fn test_generated_ids_are_48_bit() {
        for _ in 0..1000 {
            let id = generate_id();
            assert!(id < 1 << 48);
        }
    }

    #[test]
    fn test_take_embedding() {
        let mut doc = Document::new();
        doc.insert("k".to_string(), json!(1));
        doc.insert(EMBEDDINGS_KEY.to_string(), json!([1.0, 0.5, 0]));

        let emb = take_embedding(&mut doc).unwrap();
        assert_eq!(emb, vec![1.0, 0.5, 0.0]);
        assert!(!doc.contains_key(EMBEDDINGS_KEY));
        assert!(doc.contains_key("k"));
    }

    #[test]
    fn test_take_embedding_absent() {
        let mut doc = Document::new();
        doc.insert("k".to_string(), json!(1));
        assert!(take_embedding(&mut doc).is_none());
    }
}
