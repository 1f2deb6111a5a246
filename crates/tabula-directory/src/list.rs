//! Sorted tablet lists for one table.
//!
//! A [`TabletList`] is sorted by first token and non-overlapping. Inserts
//! replace every existing tablet the incoming range overlaps, so the
//! invariant holds after any sequence of single and bulk inserts.

use std::sync::Arc;

use tabula_types::{HostId, Token};

use crate::error::{DirectoryError, DirectoryResult};
use crate::tablet::Tablet;

/// Immutable-by-convention list of tablets; shared as `Arc<TabletList>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabletList {
    tablets: Vec<Arc<Tablet>>,
}

impl TabletList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tablets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tablets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tablet>> {
        self.tablets.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Tablet>> {
        self.tablets.get(index)
    }

    /// Inserts one tablet, evicting every tablet it overlaps.
    pub fn insert(&mut self, tablet: Tablet) {
        let (first, last) = (tablet.first_token(), tablet.last_token());
        self.splice(first, last, vec![Arc::new(tablet)]);
    }

    /// Inserts a sorted, non-overlapping block of tablets as one unit.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::UnsortedBatch`] if the block is not sorted
    /// and non-overlapping; the list is left unchanged.
    pub fn bulk_insert(&mut self, tablets: Vec<Tablet>) -> DirectoryResult<()> {
        if let Some(index) = tablets
            .windows(2)
            .position(|pair| pair[0].last_token() > pair[1].first_token())
        {
            return Err(DirectoryError::UnsortedBatch { index: index + 1 });
        }
        let (Some(head), Some(tail)) = (tablets.first(), tablets.last()) else {
            return Ok(());
        };
        let (first, last) = (head.first_token(), tail.last_token());
        self.splice(first, last, tablets.into_iter().map(Arc::new).collect());
        Ok(())
    }

    /// Replaces the tablets overlapping `(first, last]` with `incoming`.
    fn splice(&mut self, first: Token, last: Token, incoming: Vec<Arc<Tablet>>) {
        let len = self.tablets.len();
        if len == 0 {
            self.tablets = incoming;
            return;
        }

        let mut start = self.tablets.partition_point(|t| t.first_token() < first);
        if start > 0 && self.tablets[start - 1].last_token() > first {
            start -= 1;
        }

        let mut end = Some(self.tablets.partition_point(|t| t.last_token() < last));
        if let Some(e) = end
            && e < len
            && self.tablets[e].first_token() >= last
        {
            end = e.checked_sub(1);
        }

        match end.map(|e| e.min(len - 1)) {
            Some(end) if start <= end => {
                self.tablets.splice(start..=end, incoming);
            }
            _ => {
                self.tablets.splice(start..start, incoming);
            }
        }
    }

    /// The tablet owning `token`: the one with the smallest last token not
    /// below it, provided its range actually contains `token`.
    pub fn find(&self, token: Token) -> Option<&Arc<Tablet>> {
        let index = self.tablets.partition_point(|t| t.last_token() < token);
        self.tablets.get(index).filter(|t| t.contains(token))
    }

    /// A copy without any tablet replicated on `host`.
    pub fn without_host(&self, host: HostId) -> TabletList {
        Self {
            tablets: self
                .tablets
                .iter()
                .filter(|t| !t.has_host(host))
                .cloned()
                .collect(),
        }
    }

    /// Returns true if every adjacent pair satisfies `a.last <= b.first`.
    pub fn is_sorted_and_disjoint(&self) -> bool {
        self.tablets
            .windows(2)
            .all(|pair| pair[0].last_token() <= pair[1].first_token())
    }
}

impl FromIterator<Tablet> for TabletList {
    /// Builds a list by inserting each tablet in turn.
    fn from_iter<I: IntoIterator<Item = Tablet>>(iter: I) -> Self {
        let mut list = Self::new();
        for tablet in iter {
            list.insert(tablet);
        }
        list
    }
}
