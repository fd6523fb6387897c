use std::collections::HashMap;

use parking_lot::Mutex;

use crate::common::FrameId;

const NIL: usize = usize::MAX;

/// A node in the recency list. Nodes live in an arena and link to each
/// other by index, which gives O(1) unlink without pointer juggling.
struct Node {
    frame_id: FrameId,
    prev: usize,
    next: usize,
}

/// Doubly linked recency list over an arena, plus a side map from frame ID
/// to arena slot. Head is the most recently unpinned frame, tail the least.
struct LruList {
    nodes: Vec<Node>,
    free_slots: Vec<usize>,
    head: usize,
    tail: usize,
    map: HashMap<FrameId, usize>,
}

impl LruList {
    fn new(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            head: NIL,
            tail: NIL,
            map: HashMap::with_capacity(capacity),
        }
    }

    fn push_front(&mut self, frame_id: FrameId) {
        let node = Node {
            frame_id,
            prev: NIL,
            next: self.head,
        };
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };

        if self.head != NIL {
            self.nodes[self.head].prev = slot;
        } else {
            self.tail = slot;
        }
        self.head = slot;
        self.map.insert(frame_id, slot);
    }

    fn unlink(&mut self, slot: usize) -> FrameId {
        let (frame_id, prev, next) = {
            let node = &self.nodes[slot];
            (node.frame_id, node.prev, node.next)
        };

        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }

        self.free_slots.push(slot);
        self.map.remove(&frame_id);
        frame_id
    }
}

/// LRU replacement policy over buffer frames.
///
/// Frames enter the replacer when their pin count drops to zero and leave
/// when they are pinned again or chosen as a victim. `unpin` of a frame
/// already present is a no-op; recency is NOT refreshed on repeated unpins.
pub struct LruReplacer {
    list: Mutex<LruList>,
}

impl LruReplacer {
    /// Creates a replacer sized for `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            list: Mutex::new(LruList::new(num_frames)),
        }
    }

    /// Removes and returns the least recently unpinned frame.
    /// Returns None if no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut list = self.list.lock();
        if list.tail == NIL {
            return None;
        }
        let tail = list.tail;
        Some(list.unlink(tail))
    }

    /// Removes the frame from the replacer, if present. Called when a
    /// caller starts using the frame.
    pub fn pin(&self, frame_id: FrameId) {
        let mut list = self.list.lock();
        if let Some(&slot) = list.map.get(&frame_id) {
            list.unlink(slot);
        }
    }

    /// Marks the frame evictable, inserting it at the most-recent end.
    /// No-op if the frame is already present.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.list.lock();
        if list.map.contains_key(&frame_id) {
            return;
        }
        list.push_front(frame_id);
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.list.lock().map.len()
    }
}
