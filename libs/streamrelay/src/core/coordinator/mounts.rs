// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Published mount points.
//!
//! The coordinator is the only writer. The network listener gets a
//! [`MountTableView`] and only ever reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::graph::SessionId;

/// One externally served path and the descriptor that builds its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRegistration {
    pub path: String,
    /// gst-launch description of the session graph.
    pub launch: String,
    pub session_id: SessionId,
}

/// A publish path must be absolute and name something.
pub fn is_valid_publish_path(path: &str) -> bool {
    path.len() > 1 && path.starts_with('/') && !path.chars().any(char::is_whitespace)
}

#[derive(Debug, Default)]
pub(crate) struct MountTable {
    inner: Arc<RwLock<BTreeMap<String, MountRegistration>>>,
}

impl MountTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn view(&self) -> MountTableView {
        MountTableView {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.inner.read().contains_key(path)
    }

    /// Returns false, leaving the table untouched, if the path is taken.
    pub(crate) fn insert(&self, mount: MountRegistration) -> bool {
        let mut table = self.inner.write();
        if table.contains_key(&mount.path) {
            return false;
        }
        table.insert(mount.path.clone(), mount);
        true
    }

    /// Remove every mount of `session_id` under a single write lock.
    pub(crate) fn remove_session(&self, session_id: &SessionId) -> Vec<MountRegistration> {
        let mut table = self.inner.write();
        let paths: Vec<String> = table
            .values()
            .filter(|m| &m.session_id == session_id)
            .map(|m| m.path.clone())
            .collect();
        paths.iter().filter_map(|p| table.remove(p)).collect()
    }
}

/// Read-only handle on the mount table.
#[derive(Debug, Clone)]
pub struct MountTableView {
    inner: Arc<RwLock<BTreeMap<String, MountRegistration>>>,
}

impl MountTableView {
    pub fn get(&self, path: &str) -> Option<MountRegistration> {
        self.inner.read().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.read().contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn for_session(&self, session_id: &SessionId) -> Vec<MountRegistration> {
        self.inner
            .read()
            .values()
            .filter(|m| &m.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
