//! Copy-on-write routing table.
//!
//! Readers clone an `Arc<TabletList>` under a briefly held read lock and
//! then work on an immutable snapshot. Writers are serialized by a
//! separate mutex, compute a new list from the current one and publish it
//! with a pointer swap, so readers observe either the old list or the new
//! one and never block for the duration of a rebuild.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tabula_types::{HostId, Replica, TableName, Token};
use tracing::debug;

use crate::error::DirectoryResult;
use crate::list::TabletList;
use crate::tablet::Tablet;

/// The published tablet list of one table.
#[derive(Debug, Default)]
pub struct CowTabletList {
    current: RwLock<Arc<TabletList>>,
    writer: Mutex<()>,
}

impl CowTabletList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current list.
    pub fn load(&self) -> Arc<TabletList> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs `f` against the current list and publishes the list it
    /// returns. Returning `None` publishes nothing.
    pub fn update<F>(&self, f: F) -> DirectoryResult<bool>
    where
        F: FnOnce(&TabletList) -> DirectoryResult<Option<TabletList>>,
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.load();
        let Some(next) = f(&current)? else {
            return Ok(false);
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(true)
    }

    pub fn add_tablet(&self, tablet: Tablet) {
        // Single inserts can not fail.
        let _ = self.update(|current| {
            let mut next = current.clone();
            next.insert(tablet);
            Ok(Some(next))
        });
    }

    pub fn bulk_add_tablets(&self, tablets: Vec<Tablet>) -> DirectoryResult<()> {
        self.update(|current| {
            let mut next = current.clone();
            next.bulk_insert(tablets)?;
            Ok(Some(next))
        })
        .map(|_| ())
    }

    /// Drops tablets replicated on `host`. Returns true if any were removed.
    pub fn remove_tablets_with_host(&self, host: HostId) -> bool {
        self.update(|current| {
            let next = current.without_host(host);
            Ok((next.len() != current.len()).then_some(next))
        })
        .unwrap_or(false)
    }

    pub fn find_tablet_for_token(&self, token: Token) -> Option<Arc<Tablet>> {
        self.load().find(token).cloned()
    }
}

/// Tablet lists for every known table.
///
/// The map itself is guarded by a read-write lock; each entry is a
/// [`CowTabletList`] with its own writer serialization.
#[derive(Debug, Default)]
pub struct TabletDirectory {
    tables: RwLock<HashMap<TableName, Arc<CowTabletList>>>,
}

impl TabletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, table: &TableName) -> Option<Arc<CowTabletList>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }

    fn list_or_create(&self, table: &TableName) -> Arc<CowTabletList> {
        if let Some(list) = self.list(table) {
            return list;
        }
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(tables.entry(table.clone()).or_default())
    }

    /// Inserts one tablet for `keyspace.table`.
    pub fn add_tablet(&self, keyspace: &str, table: &str, tablet: Tablet) {
        let name = TableName::new(keyspace, table);
        debug!(table = %name, tablet = %tablet, "adding tablet");
        self.list_or_create(&name).add_tablet(tablet);
    }

    /// Inserts a sorted, non-overlapping block of tablets for `keyspace.table`.
    pub fn bulk_add_tablets(
        &self,
        keyspace: &str,
        table: &str,
        tablets: Vec<Tablet>,
    ) -> DirectoryResult<()> {
        let name = TableName::new(keyspace, table);
        debug!(table = %name, count = tablets.len(), "adding tablets");
        self.list_or_create(&name).bulk_add_tablets(tablets)
    }

    /// Drops every tablet replicated on `host`, in every table.
    pub fn remove_tablets_with_host(&self, host: HostId) {
        let lists: Vec<_> = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let removed = lists
            .iter()
            .filter(|list| list.remove_tablets_with_host(host))
            .count();
        debug!(%host, tables = removed, "removed tablets for host");
    }

    /// Forgets every table of `keyspace`.
    pub fn remove_tablets_with_keyspace(&self, keyspace: &str) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|name, _| name.keyspace() != keyspace);
        debug!(keyspace, "removed tablets for keyspace");
    }

    /// Forgets `keyspace.table`.
    pub fn remove_tablets_with_table(&self, keyspace: &str, table: &str) {
        let name = TableName::new(keyspace, table);
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
        debug!(table = %name, "removed tablets for table");
    }

    pub fn find_tablet_for_token(
        &self,
        keyspace: &str,
        table: &str,
        token: Token,
    ) -> Option<Arc<Tablet>> {
        self.list(&TableName::new(keyspace, table))?
            .find_tablet_for_token(token)
    }

    pub fn find_replicas_for_token(
        &self,
        keyspace: &str,
        table: &str,
        token: Token,
    ) -> Option<Vec<Replica>> {
        self.find_tablet_for_token(keyspace, table, token)
            .map(|tablet| tablet.replicas().to_vec())
    }

    /// Snapshot of one table's tablets; empty if the table is unknown.
    pub fn tablets_for_table(&self, keyspace: &str, table: &str) -> Arc<TabletList> {
        self.list(&TableName::new(keyspace, table))
            .map(|list| list.load())
            .unwrap_or_default()
    }

    /// Number of tables with a published list.
    pub fn table_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
