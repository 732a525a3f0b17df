//! Encoding of the opaque payload column.
//!
//! The `videos.value` column only ever sees bytes; swapping the codec does not
//! touch the relational schema.

use std::io::BufReader;

use serde_json::Value;

use crate::error::{CatalogError, Result};

pub trait PayloadCodec: Send + Sync {
    fn encode(&self, payload: &Value) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Plain JSON bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, payload: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(payload)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|err| CatalogError::corruption("json payload", err))
    }
}

/// JSON compressed with xz. Denormalized payloads repeat the same keys over
/// and over, so this shrinks the cache file considerably.
#[derive(Debug, Clone, Copy, Default)]
pub struct XzJsonCodec;

impl PayloadCodec for XzJsonCodec {
    fn encode(&self, payload: &Value) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(payload)?;
        let mut compressed = Vec::new();
        lzma_rs::xz_compress(&mut BufReader::new(json.as_slice()), &mut compressed)?;
        Ok(compressed)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut json = Vec::new();
        lzma_rs::xz_decompress(&mut BufReader::new(bytes), &mut json)
            .map_err(|err| CatalogError::corruption("xz payload", format!("{err:?}")))?;
        serde_json::from_slice(&json).map_err(|err| CatalogError::corruption("xz payload", err))
    }
}
