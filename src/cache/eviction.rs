//! Eviction Heap Module
//!
//! Bounded top-K selection of the least recently accessed entries.

// == Eviction Candidate ==
/// A key paired with the moment it was last accessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate<K, T> {
    pub key: K,
    pub last_accessed: T,
}

impl<K, T> EvictionCandidate<K, T> {
    pub fn new(key: K, last_accessed: T) -> Self {
        Self { key, last_accessed }
    }
}

// == Eviction Heap ==
/// Retains the `bound` stalest candidates out of a stream.
///
/// Stored as a max-heap over access time: the root is the most recent
/// candidate among those retained, so a newcomer only has to beat the root
/// to get in. Feeding `n` candidates costs O(n log bound).
#[derive(Debug)]
pub struct EvictionHeap<K, T> {
    heap: Vec<EvictionCandidate<K, T>>,
    bound: usize,
}

impl<K, T: Ord> EvictionHeap<K, T> {
    // == Constructor ==
    /// Creates an empty heap retaining at most `bound` candidates.
    pub fn new(bound: usize) -> Self {
        Self {
            heap: Vec::with_capacity(bound),
            bound,
        }
    }

    // == Push ==
    /// Offers a candidate to the heap.
    ///
    /// Below the bound the candidate is always kept. At the bound it replaces
    /// the root only if it was accessed strictly earlier than the root.
    pub fn push(&mut self, candidate: EvictionCandidate<K, T>) {
        if self.bound == 0 {
            return;
        }
        if self.heap.len() < self.bound {
            self.heap.push(candidate);
            self.sift_up(self.heap.len() - 1);
        } else if candidate.last_accessed < self.heap[0].last_accessed {
            self.heap[0] = candidate;
            self.sift_down(0);
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[parent].last_accessed >= self.heap[index].last_accessed {
                return;
            }
            self.heap.swap(parent, index);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        while let Some(child) = self.latest_child(index) {
            if self.heap[index].last_accessed > self.heap[child].last_accessed {
                return;
            }
            self.heap.swap(index, child);
            index = child;
        }
    }

    /// Index of the child holding the more recent access time.
    fn latest_child(&self, index: usize) -> Option<usize> {
        let left = 2 * index + 1;
        let right = left + 1;
        if left >= self.heap.len() {
            return None;
        }
        if right >= self.heap.len() {
            return Some(left);
        }
        if self.heap[right].last_accessed < self.heap[left].last_accessed {
            Some(left)
        } else {
            Some(right)
        }
    }

    /// The most recently accessed of the retained candidates.
    pub fn root(&self) -> Option<&EvictionCandidate<K, T>> {
        self.heap.first()
    }

    /// Retained candidates in heap order.
    pub fn as_slice(&self) -> &[EvictionCandidate<K, T>] {
        &self.heap
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consumes the heap, yielding the retained keys.
    pub fn into_keys(self) -> Vec<K> {
        self.heap.into_iter().map(|candidate| candidate.key).collect()
    }
}

impl<K, T: Ord> Extend<EvictionCandidate<K, T>> for EvictionHeap<K, T> {
    fn extend<I: IntoIterator<Item = EvictionCandidate<K, T>>>(&mut self, iter: I) {
        for candidate in iter {
            self.push(candidate);
        }
    }
}
