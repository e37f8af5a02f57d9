/// Range handed out by [`RingDistributor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RingRange {
    /// Absolute index of the first slot, including ring base.
    pub start: u32,
    pub length: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct RingNode {
    /// Valid at the first slot of a range.
    length: u32,
    /// Valid at the last slot of a range.
    start: u32,
}

/// Circular distributor of contiguous slot ranges.
///
/// Ranges are released in FIFO order from the front or in LIFO order from the back.
/// Ranges never straddle the end of the ring.
#[derive(Debug)]
pub struct RingDistributor {
    base: u32,
    nodes: Box<[RingNode]>,
    front: u32,
    back: u32,
    used: u32,
}

impl RingDistributor {
    /// Creates empty ring over slots `base..base + capacity`.
    pub fn new(base: u32, capacity: u32) -> Self {
        assert_ne!(capacity, 0, "Ring must have at least one slot");
        assert!(
            base.checked_add(capacity).is_some(),
            "Ring slots {}+{} overflow",
            base,
            capacity
        );

        RingDistributor {
            base,
            nodes: vec![RingNode::default(); capacity as usize].into_boxed_slice(),
            front: 0,
            back: 0,
            used: 0,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn capacity(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Index of the oldest range, relative to base.
    pub fn front(&self) -> u32 {
        self.front
    }

    /// Index one past the newest range, relative to base.
    pub fn back(&self) -> u32 {
        self.back
    }

    /// Takes `length` contiguous slots.
    ///
    /// Returns `None` if there is no contiguous free region large enough.
    pub fn request_range(&mut self, length: u32) -> Option<RingRange> {
        assert_ne!(length, 0, "Zero-length ranges are not allowed");

        let capacity = self.capacity();
        if length > capacity - self.used {
            return None;
        }

        if self.used == 0 {
            self.front = 0;
            self.back = 0;
        }

        let start = if self.back >= self.front {
            // Free space is `back..capacity` followed by `0..front`.
            if capacity - self.back >= length {
                let start = self.back;
                self.back = (start + length) % capacity;
                start
            } else if self.front >= length {
                self.front -= length;
                self.front
            } else {
                return None;
            }
        } else if self.front - self.back >= length {
            let start = self.back;
            self.back = start + length;
            start
        } else {
            return None;
        };

        self.nodes[start as usize].length = length;
        self.nodes[(start + length - 1) as usize].start = start;
        self.used += length;

        Some(RingRange {
            start: self.base + start,
            length,
        })
    }

    /// Releases oldest range.
    pub fn free_front(&mut self) {
        assert_ne!(self.used, 0, "Ring is empty");

        let length = self.nodes[self.front as usize].length;
        debug_assert_ne!(length, 0);

        self.front = (self.front + length) % self.capacity();
        self.used -= length;
    }

    pub fn free_front_n(&mut self, count: usize) {
        for _ in 0..count {
            self.free_front();
        }
    }

    /// Releases newest range.
    pub fn free_back(&mut self) {
        assert_ne!(self.used, 0, "Ring is empty");

        let capacity = self.capacity();
        let last = (self.back + capacity - 1) % capacity;
        let start = self.nodes[last as usize].start;
        let length = self.nodes[start as usize].length;
        debug_assert_ne!(length, 0);

        self.back = start;
        self.used -= length;
    }

    pub fn free_back_n(&mut self, count: usize) {
        for _ in 0..count {
            self.free_back();
        }
    }

    /// Releases every range at once.
    pub fn free_all(&mut self) {
        self.front = 0;
        self.back = 0;
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_single_slots_return_to_start() {
        let mut ring = RingDistributor::new(0, 7);
        for i in 0..7 {
            assert_eq!(ring.request_range(1).unwrap().start, i);
        }
        assert_eq!(ring.request_range(1), None);

        ring.free_front_n(7);
        assert!(ring.is_empty());
        assert_eq!((ring.front(), ring.back()), (0, 0));
    }

    #[test]
    fn ranges_include_base() {
        let mut ring = RingDistributor::new(100, 8);
        assert_eq!(
            ring.request_range(3),
            Some(RingRange {
                start: 100,
                length: 3
            })
        );
        assert_eq!(ring.request_range(2).unwrap().start, 103);
    }

    #[test]
    fn wraps_without_straddling_end() {
        let mut ring = RingDistributor::new(0, 10);
        let a = ring.request_range(4).unwrap();
        let _b = ring.request_range(4).unwrap();
        ring.free_front();
        assert_eq!(ring.front(), a.length);

        // Only two slots left before the end, so the range goes in front.
        let c = ring.request_range(3).unwrap();
        assert_eq!(c.start, 1);
        assert_eq!(ring.front(), 1);
        assert_eq!(ring.used(), 7);

        let d = ring.request_range(2).unwrap();
        assert_eq!(d.start, 8);
        assert_eq!(ring.back(), 0);

        assert_eq!(ring.request_range(2), None);
        assert_eq!(ring.request_range(1).unwrap().start, 0);
    }

    #[test]
    fn contiguous_free_region_between_back_and_front() {
        let mut ring = RingDistributor::new(0, 8);
        let _a = ring.request_range(3).unwrap();
        let _b = ring.request_range(3).unwrap();
        let _c = ring.request_range(2).unwrap();
        assert_eq!(ring.back(), 0);

        ring.free_front_n(2);
        assert_eq!(ring.front(), 6);

        assert_eq!(ring.request_range(6).unwrap().start, 0);
        assert_eq!(ring.request_range(1), None);
    }

    #[test]
    fn free_back_rolls_back_newest() {
        let mut ring = RingDistributor::new(0, 8);
        let _a = ring.request_range(2).unwrap();
        let _b = ring.request_range(3).unwrap();
        let _c = ring.request_range(1).unwrap();
        assert_eq!(ring.back(), 6);

        ring.free_back();
        assert_eq!(ring.back(), 5);
        ring.free_back();
        assert_eq!(ring.back(), 2);
        assert_eq!(ring.used(), 2);

        assert_eq!(ring.request_range(4).unwrap().start, 2);
    }

    #[test]
    fn free_back_across_wrap() {
        let mut ring = RingDistributor::new(0, 6);
        let _a = ring.request_range(3).unwrap();
        let _b = ring.request_range(3).unwrap();
        ring.free_front();
        let c = ring.request_range(2).unwrap();
        assert_eq!(c.start, 0);

        ring.free_back();
        assert_eq!(ring.back(), 0);
        assert_eq!(ring.used(), 3);

        ring.free_back();
        assert!(ring.is_empty());
    }

    #[test]
    fn empty_ring_rebases() {
        let mut ring = RingDistributor::new(0, 8);
        let _a = ring.request_range(5).unwrap();
        ring.free_front();
        assert_eq!(ring.front(), 5);

        assert_eq!(ring.request_range(8).unwrap().start, 0);
    }

    #[test]
    fn free_all_resets() {
        let mut ring = RingDistributor::new(0, 8);
        let _a = ring.request_range(5).unwrap();
        ring.free_all();
        assert!(ring.is_empty());
        assert_eq!(ring.request_range(8).unwrap().start, 0);
    }

    #[test]
    #[should_panic]
    fn free_front_on_empty_panics() {
        let mut ring = RingDistributor::new(0, 8);
        ring.free_front();
    }
}
