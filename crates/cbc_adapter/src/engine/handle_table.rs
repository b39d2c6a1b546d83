// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;

use super::*;

/// Handle table mapping opaque ids to engine-owned contexts.
///
/// The table lock is only held long enough to find an entry; each entry has
/// its own lock so independent contexts can be driven concurrently.
pub(crate) struct HandleTable<T> {
    table: RwLock<HandleTableInner<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            table: RwLock::new(HandleTableInner {
                table: HashMap::new(),
                id_counter: 0,
            }),
        }
    }
}

impl<T> HandleTable<T> {
    pub(crate) fn alloc_handle(&self, obj: T) -> CipherHandle {
        let mut table = self.table.write();
        table.alloc_handle(obj)
    }

    /// Runs `op` against the context behind `handle`.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidHandle`] if the handle has been freed, or whatever
    /// `op` returns.
    pub(crate) fn with_entry<R, F>(&self, handle: HandleRef, op: F) -> Result<R, CipherError>
    where
        F: FnOnce(&mut T) -> Result<R, CipherError>,
    {
        let entry = self.table.read().entry(handle)?;
        let mut obj = entry.lock();
        op(&mut *obj)
    }

    /// Removes the context behind `handle` and drops it.
    pub(crate) fn free_handle(&self, handle: CipherHandle) -> Result<(), CipherError> {
        let entry = self
            .table
            .write()
            .table
            .remove(&handle.0)
            .ok_or(CipherError::InvalidHandle)?;
        // An in-flight operation holding a clone finishes first; the context is
        // dropped with the last clone either way.
        drop(entry);
        Ok(())
    }

    /// Number of live contexts.
    pub(crate) fn len(&self) -> usize {
        self.table.read().table.len()
    }
}

struct HandleTableInner<T> {
    table: HashMap<NonZeroU32, Arc<Mutex<T>>>,
    id_counter: u32,
}

impl<T> HandleTableInner<T> {
    fn alloc_handle(&mut self, obj: T) -> CipherHandle {
        let id = loop {
            self.id_counter = self.id_counter.wrapping_add(1);
            if let Some(id) = NonZeroU32::new(self.id_counter) {
                if !self.table.contains_key(&id) {
                    break id;
                }
            }
        };
        self.table.insert(id, Arc::new(Mutex::new(obj)));
        CipherHandle::new(id)
    }

    fn entry(&self, handle: HandleRef) -> Result<Arc<Mutex<T>>, CipherError> {
        self.table
            .get(&handle.0)
            .cloned()
            .ok_or(CipherError::InvalidHandle)
    }
}
