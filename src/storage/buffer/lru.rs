use std::collections::VecDeque;

use super::replacer::Replacer;
use crate::storage::page::PageId;

/// Least-recently-used ordering over cached pages. The front of the list
/// is the least recently used page.
#[derive(Debug, Default)]
pub struct LruReplacer {
    lru_list: VecDeque<PageId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, page_id: PageId) -> Option<usize> {
        self.lru_list.iter().position(|&p| p == page_id)
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, page_id: PageId) {
        if let Some(pos) = self.position(page_id) {
            self.lru_list.remove(pos);
        }
        self.lru_list.push_back(page_id);
    }

    fn victim(&mut self, can_evict: &mut dyn FnMut(PageId) -> bool) -> Option<PageId> {
        let pos = self.lru_list.iter().position(|&p| can_evict(p))?;
        self.lru_list.remove(pos)
    }

    fn remove(&mut self, page_id: PageId) {
        if let Some(pos) = self.position(page_id) {
            self.lru_list.remove(pos);
        }
    }

    fn size(&self) -> usize {
        self.lru_list.len()
    }
}
