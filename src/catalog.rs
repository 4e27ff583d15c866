use crate::shared::{
    contracts::DbFile,
    definitions::TableId,
    error::{DbError, Result},
};
use crate::storage::tuple::TupleDesc;
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;

struct CatalogEntry {
    name: String,
    file: Arc<dyn DbFile>,
}

/// Registry resolving table ids and names to the files holding their pages.
#[derive(Default)]
pub struct Catalog {
    tables: DashMap<TableId, CatalogEntry>,
    names: DashMap<String, TableId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under `name`. A table already using either the name
    /// or the file's id is replaced.
    pub fn add_table(&self, file: Arc<dyn DbFile>, name: &str) -> TableId {
        let table_id = file.id();
        if let Some(previous) = self.names.insert(name.to_string(), table_id) {
            if previous != table_id {
                self.tables.remove(&previous);
            }
        }
        let entry = CatalogEntry {
            name: name.to_string(),
            file,
        };
        if let Some(previous) = self.tables.insert(table_id, entry) {
            if previous.name != name {
                self.names.remove(&previous.name);
            }
        }
        debug!("registered table {:?} as {}", name, table_id);
        table_id
    }

    pub fn get_db_file(&self, table_id: TableId) -> Result<Arc<dyn DbFile>> {
        self.tables
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or(DbError::UnknownTable(table_id))
    }

    pub fn table_id(&self, name: &str) -> Result<TableId> {
        self.names
            .get(name)
            .map(|id| *id)
            .ok_or_else(|| DbError::UnknownTableName(name.to_string()))
    }

    pub fn table_name(&self, table_id: TableId) -> Result<String> {
        self.tables
            .get(&table_id)
            .map(|entry| entry.name.clone())
            .ok_or(DbError::UnknownTable(table_id))
    }

    pub fn tuple_desc(&self, table_id: TableId) -> Result<Arc<TupleDesc>> {
        Ok(Arc::clone(self.get_db_file(table_id)?.tuple_desc()))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.tables.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.tables.clear();
        self.names.clear();
    }
}
