//! Index-linked doubly-linked lists over a fixed arena
//!
//! Many lists share one `Links` table; each arena slot can sit on at most one
//! of them. Link, unlink and pop are O(1), with no pointers and no unsafe.
//!
//! Author: Moroya Sakamoto

/// Head/tail of one list whose nodes live in a [`Links`] table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListHead {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ListHead {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn first(&self) -> Option<usize> {
        self.head
    }

    pub fn last(&self) -> Option<usize> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Per-slot next/prev links for an arena of `N` slots
#[derive(Debug, Clone)]
pub struct Links<const N: usize> {
    next: [Option<usize>; N],
    prev: [Option<usize>; N],
}

impl<const N: usize> Links<N> {
    pub const fn new() -> Self {
        Self {
            next: [None; N],
            prev: [None; N],
        }
    }

    pub fn next(&self, idx: usize) -> Option<usize> {
        self.next[idx]
    }

    pub fn prev(&self, idx: usize) -> Option<usize> {
        self.prev[idx]
    }

    /// Append `idx` at the tail
    pub fn push_back(&mut self, list: &mut ListHead, idx: usize) {
        self.next[idx] = None;
        self.prev[idx] = list.tail;
        match list.tail {
            Some(t) => self.next[t] = Some(idx),
            None => list.head = Some(idx),
        }
        list.tail = Some(idx);
        list.len += 1;
    }

    /// Insert `idx` immediately before `before`, which must be on `list`
    pub fn insert_before(&mut self, list: &mut ListHead, before: usize, idx: usize) {
        let p = self.prev[before];
        self.prev[idx] = p;
        self.next[idx] = Some(before);
        self.prev[before] = Some(idx);
        match p {
            Some(p) => self.next[p] = Some(idx),
            None => list.head = Some(idx),
        }
        list.len += 1;
    }

    /// Unlink `idx`, which must be on `list`
    pub fn remove(&mut self, list: &mut ListHead, idx: usize) {
        let (p, n) = (self.prev[idx], self.next[idx]);
        match p {
            Some(p) => self.next[p] = n,
            None => list.head = n,
        }
        match n {
            Some(n) => self.prev[n] = p,
            None => list.tail = p,
        }
        self.next[idx] = None;
        self.prev[idx] = None;
        list.len -= 1;
    }

    /// Unlink and return the head
    pub fn pop_front(&mut self, list: &mut ListHead) -> Option<usize> {
        let idx = list.head?;
        self.remove(list, idx);
        Some(idx)
    }

    /// Walk `list` from head to tail
    pub fn iter<'a>(&'a self, list: &ListHead) -> Iter<'a, N> {
        Iter {
            links: self,
            cursor: list.head,
        }
    }
}

impl<const N: usize> Default for Links<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, const N: usize> {
    links: &'a Links<N>,
    cursor: Option<usize>,
}

impl<const N: usize> Iterator for Iter<'_, N> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.cursor?;
        self.cursor = self.links.next[idx];
        Some(idx)
    }
}
