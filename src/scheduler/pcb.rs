use core::ops::{Index, IndexMut};

use arrayvec::ArrayVec;

use crate::machine::{ProcessorState, NUM_TRAP_KINDS};

/// Fixed size of the process pool. Everything else in the kernel is
/// bounded by it.
pub const MAXPROC: usize = 20;

/// Slot index into the process pool. Stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pid(pub usize);

/// Where a process asked its trap of one kind to be reflected: the state
/// save slot and the handler state to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapVector {
    pub old_area: u32,
    pub new_area: u32,
}

/// A process control block.
///
/// `next`/`prev` tie the PCB into exactly one circular queue at a time,
/// either the ready queue or a semaphore's blocked queue. The sibling
/// chain hangs off `first_child` through `prev_sibling` and is
/// null-terminated; `next_sibling` walks back toward `first_child`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcb {
    pub next: Option<Pid>,
    pub prev: Option<Pid>,
    pub parent: Option<Pid>,
    pub first_child: Option<Pid>,
    pub next_sibling: Option<Pid>,
    pub prev_sibling: Option<Pid>,
    pub state: ProcessorState,
    /// Microseconds of CPU charged to this process across preemptions.
    pub cpu_time: u64,
    /// Semaphore this process is blocked on, if any.
    pub sem_addr: Option<u32>,
    pub vectors: [Option<TrapVector>; NUM_TRAP_KINDS],
}

/// The process pool: `MAXPROC` slots plus the free list.
pub struct PcbPool {
    slots: [Pcb; MAXPROC],
    free: ArrayVec<Pid, MAXPROC>,
}

impl PcbPool {
    pub fn new() -> PcbPool {
        PcbPool {
            slots: [Pcb::default(); MAXPROC],
            free: (0..MAXPROC).map(Pid).collect(),
        }
    }

    /// Hand out a zeroed PCB, or `None` when the pool is dry.
    pub fn alloc(&mut self) -> Option<Pid> {
        let p = self.free.pop()?;
        self.slots[p.0] = Pcb::default();
        Some(p)
    }

    /// Return `p` to the pool. The caller guarantees it is off every
    /// queue and tree.
    pub fn free(&mut self, p: Pid) {
        self.slots[p.0] = Pcb::default();
        self.free.push(p);
    }

    /// PCBs currently handed out.
    pub fn allocated(&self) -> usize {
        MAXPROC - self.free.len()
    }

    /// `p` becomes the parent's newest child and the new head of the
    /// sibling chain.
    pub fn insert_child(&mut self, parent: Pid, p: Pid) {
        let older = self.slots[parent.0].first_child;
        self.slots[p.0].parent = Some(parent);
        self.slots[p.0].prev_sibling = older;
        self.slots[p.0].next_sibling = None;
        if let Some(o) = older {
            self.slots[o.0].next_sibling = Some(p);
        }
        self.slots[parent.0].first_child = Some(p);
    }

    /// Detach and return the parent's newest child.
    pub fn remove_first_child(&mut self, parent: Pid) -> Option<Pid> {
        let c = self.slots[parent.0].first_child?;
        let older = self.slots[c.0].prev_sibling;
        self.slots[parent.0].first_child = older;
        if let Some(o) = older {
            self.slots[o.0].next_sibling = None;
        }
        let pcb = &mut self.slots[c.0];
        pcb.parent = None;
        pcb.prev_sibling = None;
        pcb.next_sibling = None;
        Some(c)
    }

    /// Detach `p` from its parent's child chain, wherever it sits.
    /// Returns `None` when `p` has no parent.
    pub fn remove_from_siblings(&mut self, p: Pid) -> Option<Pid> {
        let parent = self.slots[p.0].parent?;
        if self.slots[parent.0].first_child == Some(p) {
            return self.remove_first_child(parent);
        }
        let older = self.slots[p.0].prev_sibling;
        let newer = self.slots[p.0].next_sibling;
        if let Some(n) = newer {
            self.slots[n.0].prev_sibling = older;
        }
        if let Some(o) = older {
            self.slots[o.0].next_sibling = newer;
        }
        let pcb = &mut self.slots[p.0];
        pcb.parent = None;
        pcb.prev_sibling = None;
        pcb.next_sibling = None;
        Some(p)
    }
}

impl Index<Pid> for PcbPool {
    type Output = Pcb;

    fn index(&self, p: Pid) -> &Pcb {
        &self.slots[p.0]
    }
}

impl IndexMut<Pid> for PcbPool {
    fn index_mut(&mut self, p: Pid) -> &mut Pcb {
        &mut self.slots[p.0]
    }
}

/// A circular doubly-linked process queue, addressed by its tail.
/// `tail.next` is the head; a null tail means empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcQueue {
    tail: Option<Pid>,
}

impl ProcQueue {
    pub const fn new() -> ProcQueue {
        ProcQueue { tail: None }
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_none()
    }

    pub fn head(&self, pool: &PcbPool) -> Option<Pid> {
        self.tail.and_then(|t| pool[t].next)
    }

    /// Append `p` at the tail.
    pub fn insert(&mut self, pool: &mut PcbPool, p: Pid) {
        match self.tail {
            None => {
                pool[p].next = Some(p);
                pool[p].prev = Some(p);
            }
            Some(t) => {
                let head = pool[t].next;
                pool[p].next = head;
                pool[p].prev = Some(t);
                if let Some(h) = head {
                    pool[h].prev = Some(p);
                }
                pool[t].next = Some(p);
            }
        }
        self.tail = Some(p);
    }

    /// Pop the head. The returned PCB has its queue links cleared.
    pub fn remove_head(&mut self, pool: &mut PcbPool) -> Option<Pid> {
        let t = self.tail?;
        let h = pool[t].next?;
        if h == t {
            self.tail = None;
        } else {
            let after = pool[h].next;
            pool[t].next = after;
            if let Some(a) = after {
                pool[a].prev = Some(t);
            }
        }
        pool[h].next = None;
        pool[h].prev = None;
        Some(h)
    }

    /// Unlink `p` from anywhere in the queue, or `None` if it is not a
    /// member. Linear in the queue length.
    pub fn remove(&mut self, pool: &mut PcbPool, p: Pid) -> Option<Pid> {
        let t = self.tail?;
        let mut cur = pool[t].next?;
        loop {
            if cur == p {
                break;
            }
            if cur == t {
                return None;
            }
            cur = pool[cur].next?;
        }
        if pool[p].next == Some(p) {
            self.tail = None;
        } else {
            let prev = pool[p].prev?;
            let next = pool[p].next?;
            pool[prev].next = Some(next);
            pool[next].prev = Some(prev);
            if self.tail == Some(p) {
                self.tail = Some(prev);
            }
        }
        pool[p].next = None;
        pool[p].prev = None;
        Some(p)
    }

    pub fn len(&self, pool: &PcbPool) -> usize {
        let Some(t) = self.tail else {
            return 0;
        };
        let mut n = 0;
        let mut cur = pool[t].next;
        while let Some(c) = cur {
            n += 1;
            if c == t {
                break;
            }
            cur = pool[c].next;
        }
        n
    }
}
