use std::hash::{DefaultHasher, Hasher};

use crate::error::{Error, Result};

/// Where a reader hands a record off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Route {
    /// Through the shared relay channel, any sender may pick it up.
    Shared,
    /// Straight to the sink of the sender slot with this index.
    Direct(usize),
}

/// Keyed records always go to the same sender slot so that the sink sees them in the order they
/// were read. Unkeyed records are load balanced through the shared channel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Router {
    slots: usize,
}

impl Router {
    pub(crate) fn new(slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(Error::Config(
                "at least one sender slot is required".to_string(),
            ));
        }
        Ok(Self { slots })
    }

    pub(crate) fn route(&self, key: Option<&[u8]>) -> Route {
        match key {
            Some(key) if !key.is_empty() => Route::Direct(slot_for_key(key, self.slots)),
            _ => Route::Shared,
        }
    }
}

/// Hashes the raw key bytes. The mapping only has to hold for the lifetime of the process.
fn slot_for_key(key: &[u8], slots: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(key);
    (hasher.finish() % slots as u64) as usize
}
