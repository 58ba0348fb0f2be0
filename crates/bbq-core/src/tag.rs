//! Item tags: a producer id and a per-producer sequence packed into one `u64`.
//!
//! Tagged items let the FIFO checks work per producer without carrying
//! any side table through the queue.

use std::fmt;

/// A `(producer, sequence)` pair that round-trips through a `u64` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemTag {
    pub producer: u32,
    pub sequence: u32,
}

impl ItemTag {
    #[must_use]
    pub const fn new(producer: u32, sequence: u32) -> Self {
        Self { producer, sequence }
    }

    /// Pack into an item value. The producer occupies the high half.
    #[must_use]
    pub const fn into_item(self) -> u64 {
        ((self.producer as u64) << 32) | self.sequence as u64
    }

    #[must_use]
    pub const fn from_item(item: u64) -> Self {
        Self {
            producer: (item >> 32) as u32,
            sequence: item as u32,
        }
    }
}

impl From<ItemTag> for u64 {
    fn from(tag: ItemTag) -> Self {
        tag.into_item()
    }
}

impl From<u64> for ItemTag {
    fn from(item: u64) -> Self {
        Self::from_item(item)
    }
}

impl fmt::Display for ItemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}#{}", self.producer, self.sequence)
    }
}
