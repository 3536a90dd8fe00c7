//! In-memory photo store.
//!
//! The authoritative record of uploads. Deliberately not persisted; the
//! cleanup sweeper reconciles records against whatever files survive on
//! disk.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::job::Photo;
use crate::types::Id;

/// Mutex-guarded map of photo id to record.
#[derive(Debug, Default)]
pub struct PhotoStore {
    inner: Mutex<HashMap<Id, Photo>>,
}

impl PhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, photo: Photo) {
        self.inner
            .lock()
            .unwrap()
            .insert(photo.id.clone(), photo);
    }

    pub fn get(&self, id: &str) -> Option<Photo> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Photo> {
        self.inner.lock().unwrap().remove(id)
    }

    /// Remove every photo, returning the evicted records so callers can
    /// release backing files.
    pub fn clear(&self) -> Vec<Photo> {
        self.inner.lock().unwrap().drain().map(|(_, p)| p).collect()
    }

    /// All photos, oldest first.
    pub fn list(&self) -> Vec<Photo> {
        let mut photos: Vec<Photo> = self.inner.lock().unwrap().values().cloned().collect();
        photos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        photos
    }

    /// Keep only photos for which `keep` returns true; returns how many
    /// records were dropped.
    pub fn retain(&self, keep: impl Fn(&Photo) -> bool) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, p| keep(p));
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
