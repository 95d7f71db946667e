use std::fmt::Debug;

use crate::storage::page::PageId;

pub trait Replacer: Send + Sync + Debug {
    /// Record that a cached page was used.
    fn record_access(&mut self, page_id: PageId);

    /// Select a page to evict among those `can_evict` accepts and stop
    /// tracking it. Returns None if no page can be evicted.
    fn victim(&mut self, can_evict: &mut dyn FnMut(PageId) -> bool) -> Option<PageId>;

    /// Stop tracking a page that left the cache for another reason.
    fn remove(&mut self, page_id: PageId);

    /// Get the number of tracked pages.
    fn size(&self) -> usize;
}
