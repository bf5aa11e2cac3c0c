/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;

/// Client address to session registry shared by the inbound loop and reverse readers.
///
/// The lock is only held inside each method, so it is never kept across an await point.
pub struct UdpSessionTable<S> {
    inner: Mutex<AHashMap<SocketAddr, Arc<S>>>,
}

impl<S> Default for UdpSessionTable<S> {
    fn default() -> Self {
        UdpSessionTable {
            inner: Mutex::new(AHashMap::new()),
        }
    }
}

impl<S> UdpSessionTable<S> {
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<S>> {
        let ht = self.inner.lock().unwrap();
        ht.get(addr).cloned()
    }

    /// Insert `session` if no session exists for `addr`.
    ///
    /// Returns the registered session and whether it is the one passed in.
    pub fn insert_or_get(&self, addr: SocketAddr, session: Arc<S>) -> (Arc<S>, bool) {
        let mut ht = self.inner.lock().unwrap();
        match ht.get(&addr) {
            Some(exist) => (exist.clone(), false),
            None => {
                ht.insert(addr, session.clone());
                (session, true)
            }
        }
    }

    /// Remove the entry for `addr` only if it still points to `session`.
    pub fn remove_if(&self, addr: &SocketAddr, session: &Arc<S>) -> bool {
        let mut ht = self.inner.lock().unwrap();
        match ht.get(addr) {
            Some(exist) if Arc::ptr_eq(exist, session) => {
                ht.remove(addr);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
