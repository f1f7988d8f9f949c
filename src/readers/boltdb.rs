//! Embedded key-value store reader.
//!
//! `boltdb:///path/to/store.db#TableName` opens the database file and reads
//! the key given as the argument. An argument ending in `/` lists the keys
//! under that prefix as a JSON array.

use redb::{Database, ReadableTable, TableDefinition};

use crate::data::Data;
use crate::error::{DatatapError, Result};
use crate::mime;
use crate::readers::{at_most_one_arg, Reader};
use crate::source::{Backend, Source};

pub struct BoltdbReader;

impl Reader for BoltdbReader {
    fn read(&self, _data: &Data, source: &Source, args: &[String]) -> Result<Vec<u8>> {
        let url = source.url();
        let table_name = url
            .fragment()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| DatatapError::ArgumentError {
                scheme: "boltdb".to_string(),
                message: format!("URL {url} must name a table in the fragment"),
            })?
            .to_string();

        let key = at_most_one_arg("boltdb", args)?.ok_or_else(|| DatatapError::ArgumentError {
            scheme: "boltdb".to_string(),
            message: "a key argument is required".to_string(),
        })?;

        let backend = source.backend_or_init(|| {
            let path = std::path::PathBuf::from(url.path());
            Ok(Backend::Kv(Database::open(&path).map_err(|e| {
                anyhow::anyhow!("couldn't open database {}: {e}", path.display())
            })?))
        })?;
        let Backend::Kv(db) = backend else {
            return Err(anyhow::anyhow!("wrong backend kind for {url}").into());
        };

        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);
        let txn = db.begin_read().map_err(anyhow::Error::from)?;
        let table = txn
            .open_table(def)
            .map_err(|e| anyhow::anyhow!("couldn't open table {table_name}: {e}"))?;

        if key.ends_with('/') {
            let prefix = key.trim_end_matches('/');
            let mut keys = Vec::new();
            for entry in table.iter().map_err(anyhow::Error::from)? {
                let (k, _) = entry.map_err(anyhow::Error::from)?;
                let k = k.value();
                if prefix.is_empty() || k.starts_with(prefix) {
                    keys.push(k.to_string());
                }
            }
            keys.sort();
            source.set_media_type(mime::JSON_ARRAY_MEDIATYPE);
            return Ok(serde_json::to_vec(&keys).map_err(anyhow::Error::from)?);
        }

        source.clear_media_type();
        let value = table
            .get(key)
            .map_err(anyhow::Error::from)?
            .ok_or_else(|| anyhow::anyhow!("key {key} not found in table {table_name}"))?;
        Ok(value.value().to_vec())
    }
}
