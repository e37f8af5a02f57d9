use core::{fmt, iter::FusedIterator, mem};

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RangeNode {
    /// Non-zero exactly at the first slot of an occupied range.
    length: u32,
    next: u32,
    prev: u32,
}

impl RangeNode {
    const VACANT: Self = RangeNode {
        length: 0,
        next: NIL,
        prev: NIL,
    };
}

/// Fixed-capacity table of slots that hands out contiguous ranges.
///
/// Occupied ranges form an index-linked list ordered by start index.
/// Every slot below [`low_water_mark`] is occupied, so searches start there.
///
/// [`low_water_mark`]: #method.low_water_mark
pub struct SlotTable<T> {
    nodes: Box<[RangeNode]>,
    slots: Box<[T]>,
    head: u32,
    tail: u32,
    occupied: u32,
    low_water_mark: u32,
}

impl<T> fmt::Debug for SlotTable<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied)
            .field("low_water_mark", &self.low_water_mark)
            .field("ranges", &self.ranges().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> SlotTable<T>
where
    T: Default,
{
    /// Creates empty table with `capacity` slots.
    pub fn new(capacity: u32) -> Self {
        assert_ne!(capacity, 0, "Slot table must have at least one slot");
        assert_ne!(capacity, NIL, "Slot table capacity is too large");

        SlotTable {
            nodes: vec![RangeNode::VACANT; capacity as usize].into_boxed_slice(),
            slots: (0..capacity).map(|_| T::default()).collect(),
            head: NIL,
            tail: NIL,
            occupied: 0,
            low_water_mark: 0,
        }
    }

    /// Extends table to `new_capacity` slots.
    /// Occupied ranges and their payload keep their indices.
    pub fn grow(&mut self, new_capacity: u32) {
        assert!(
            new_capacity >= self.capacity(),
            "Slot table cannot shrink from {} to {}",
            self.capacity(),
            new_capacity
        );
        assert_ne!(new_capacity, NIL, "Slot table capacity is too large");

        let mut nodes = mem::take(&mut self.nodes).into_vec();
        nodes.resize(new_capacity as usize, RangeNode::VACANT);
        self.nodes = nodes.into_boxed_slice();

        let mut slots = mem::take(&mut self.slots).into_vec();
        slots.resize_with(new_capacity as usize, T::default);
        self.slots = slots.into_boxed_slice();
    }
}

impl<T> SlotTable<T> {
    pub fn capacity(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Returns number of occupied slots.
    pub fn occupied(&self) -> u32 {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Returns index below which every slot is occupied.
    pub fn low_water_mark(&self) -> u32 {
        self.low_water_mark
    }

    /// Finds first free gap of `length` slots at or after low water mark.
    /// Returns start of the occupied range or `None` if no gap is large enough.
    pub fn allocate(&mut self, length: u32) -> Option<u32> {
        assert_ne!(length, 0, "Zero-length ranges are not allowed");

        if length > self.capacity() - self.occupied {
            return None;
        }

        let mut gap_start = self.low_water_mark;
        let mut next = self.head;

        while next != NIL {
            let node = self.nodes[next as usize];
            let end = next + node.length;

            if next >= gap_start {
                if next - gap_start >= length {
                    break;
                }
                gap_start = end;
            } else if end > gap_start {
                gap_start = end;
            }

            next = node.next;
        }

        if next == NIL && self.capacity() - gap_start < length {
            return None;
        }

        self.link_before(gap_start, length, next);
        self.occupied += length;

        if gap_start == self.low_water_mark {
            self.low_water_mark = gap_start + length;
        }

        Some(gap_start)
    }

    /// Frees range that starts at `start`.
    ///
    /// # Panics
    ///
    /// If `start` is not the first slot of an occupied range.
    pub fn free(&mut self, start: u32) {
        assert!(
            start < self.capacity(),
            "Slot {} is out of table bounds {}",
            start,
            self.capacity()
        );

        let node = self.nodes[start as usize];
        assert_ne!(
            node.length, 0,
            "Slot {} is not the start of an occupied range",
            start
        );

        if node.prev == NIL {
            self.head = node.next;
        } else {
            self.nodes[node.prev as usize].next = node.next;
        }

        if node.next == NIL {
            self.tail = node.prev;
        } else {
            self.nodes[node.next as usize].prev = node.prev;
        }

        self.nodes[start as usize] = RangeNode::VACANT;
        self.occupied -= node.length;
        self.low_water_mark = self.low_water_mark.min(start);
    }

    /// Returns length of the range that starts at `start`.
    pub fn range_len(&self, start: u32) -> Option<u32> {
        match self.nodes.get(start as usize) {
            Some(node) if node.length != 0 => Some(node.length),
            _ => None,
        }
    }

    /// Iterates over occupied ranges as `(start, length)` in index order.
    pub fn ranges(&self) -> Ranges<'_> {
        Ranges {
            nodes: &self.nodes,
            next: self.head,
        }
    }

    /// Returns payload of the range that starts at `start`.
    pub fn slots(&self, start: u32) -> &[T] {
        let length = self.expect_range(start);
        &self.slots[start as usize..][..length as usize]
    }

    /// Returns mutable payload of the range that starts at `start`.
    pub fn slots_mut(&mut self, start: u32) -> &mut [T] {
        let length = self.expect_range(start);
        &mut self.slots[start as usize..][..length as usize]
    }

    fn expect_range(&self, start: u32) -> u32 {
        match self.range_len(start) {
            Some(length) => length,
            None => panic!("Slot {} is not the start of an occupied range", start),
        }
    }

    fn link_before(&mut self, start: u32, length: u32, next: u32) {
        let prev = if next == NIL {
            self.tail
        } else {
            self.nodes[next as usize].prev
        };

        self.nodes[start as usize] = RangeNode { length, next, prev };

        if prev == NIL {
            self.head = start;
        } else {
            self.nodes[prev as usize].next = start;
        }

        if next == NIL {
            self.tail = start;
        } else {
            self.nodes[next as usize].prev = start;
        }
    }
}

/// Iterator over occupied ranges of [`SlotTable`].
#[derive(Clone, Debug)]
pub struct Ranges<'a> {
    nodes: &'a [RangeNode],
    next: u32,
}

impl Iterator for Ranges<'_> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        if self.next == NIL {
            return None;
        }
        let start = self.next;
        let node = &self.nodes[start as usize];
        self.next = node.next;
        Some((start, node.length))
    }
}

impl FusedIterator for Ranges<'_> {}
