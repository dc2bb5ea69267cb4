//! The active semaphore list: a sorted view of every semaphore that
//! currently has at least one blocked process.

use arrayvec::ArrayVec;

use super::pcb::{PcbPool, Pid, ProcQueue, MAXPROC};

/// Descriptor pool size: at most `MAXPROC` distinct semaphores can have
/// waiters at once, plus the two sentinels.
const SEMD_POOL: usize = MAXPROC + 2;

const HEAD_SENTINEL: usize = 0;
const TAIL_SENTINEL: usize = 1;

/// No free semaphore descriptor was left for a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

/// One active semaphore: its key (the semaphore word's address) and the
/// queue of processes blocked on it.
#[derive(Debug, Clone, Copy)]
struct Semd {
    sem_addr: u32,
    queue: ProcQueue,
    next: usize,
}

/// The list itself. Two permanent sentinels with keys 0 and `u32::MAX`
/// bracket the live descriptors, so every search is "find the
/// predecessor" with no edge cases; the tail sentinel points at itself.
pub struct Asl {
    slots: [Semd; SEMD_POOL],
    free: ArrayVec<usize, MAXPROC>,
}

impl Asl {
    pub fn new() -> Asl {
        let blank = Semd { sem_addr: 0, queue: ProcQueue::new(), next: TAIL_SENTINEL };
        let mut slots = [blank; SEMD_POOL];
        slots[HEAD_SENTINEL].next = TAIL_SENTINEL;
        slots[TAIL_SENTINEL].sem_addr = u32::MAX;
        slots[TAIL_SENTINEL].next = TAIL_SENTINEL;
        Asl { slots, free: (2..SEMD_POOL).collect() }
    }

    /// Last node with a key strictly below `key`. Thanks to the
    /// sentinels this always exists and always has a successor.
    fn find_pred(&self, key: u32) -> usize {
        let mut pred = HEAD_SENTINEL;
        loop {
            let next = self.slots[pred].next;
            if self.slots[next].sem_addr < key {
                pred = next;
            } else {
                return pred;
            }
        }
    }

    /// Queue `p` behind everyone already blocked on `sem_addr`,
    /// materializing the descriptor if this is the first waiter. On
    /// `PoolExhausted` nothing is changed and `p` is not enqueued.
    pub fn insert_blocked(
        &mut self,
        pool: &mut PcbPool,
        sem_addr: u32,
        p: Pid,
    ) -> Result<(), PoolExhausted> {
        let pred = self.find_pred(sem_addr);
        let succ = self.slots[pred].next;
        let semd = if self.slots[succ].sem_addr == sem_addr {
            succ
        } else {
            let idx = self.free.pop().ok_or(PoolExhausted)?;
            self.slots[idx] = Semd { sem_addr, queue: ProcQueue::new(), next: succ };
            self.slots[pred].next = idx;
            idx
        };
        self.slots[semd].queue.insert(pool, p);
        pool[p].sem_addr = Some(sem_addr);
        Ok(())
    }

    /// Pop the longest-waiting process blocked on `sem_addr`. The
    /// descriptor goes back to the free pool once its queue drains.
    pub fn remove_blocked(&mut self, pool: &mut PcbPool, sem_addr: u32) -> Option<Pid> {
        let pred = self.find_pred(sem_addr);
        let semd = self.slots[pred].next;
        if self.slots[semd].sem_addr != sem_addr {
            return None;
        }
        let p = self.slots[semd].queue.remove_head(pool)?;
        pool[p].sem_addr = None;
        self.release_if_drained(pred, semd);
        Some(p)
    }

    /// Yank `p` out of the queue it is blocked on, e.g. when its whole
    /// process tree is torn down. `None` when `p` is not actually there.
    pub fn out_blocked(&mut self, pool: &mut PcbPool, p: Pid) -> Option<Pid> {
        let sem_addr = pool[p].sem_addr?;
        let pred = self.find_pred(sem_addr);
        let semd = self.slots[pred].next;
        if self.slots[semd].sem_addr != sem_addr {
            return None;
        }
        self.slots[semd].queue.remove(pool, p)?;
        pool[p].sem_addr = None;
        self.release_if_drained(pred, semd);
        Some(p)
    }

    /// Peek at the next process `remove_blocked` would return.
    pub fn head_blocked(&self, pool: &PcbPool, sem_addr: u32) -> Option<Pid> {
        let pred = self.find_pred(sem_addr);
        let semd = self.slots[pred].next;
        if self.slots[semd].sem_addr != sem_addr {
            return None;
        }
        self.slots[semd].queue.head(pool)
    }

    fn release_if_drained(&mut self, pred: usize, semd: usize) {
        if self.slots[semd].queue.is_empty() {
            self.slots[pred].next = self.slots[semd].next;
            self.free.push(semd);
        }
    }

    /// Number of live descriptors.
    pub fn active_count(&self) -> usize {
        MAXPROC - self.free.len()
    }

    #[cfg(test)]
    fn keys(&self) -> std::vec::Vec<u32> {
        let mut out = std::vec::Vec::new();
        let mut cur = self.slots[HEAD_SENTINEL].next;
        while cur != TAIL_SENTINEL {
            out.push(self.slots[cur].sem_addr);
            cur = self.slots[cur].next;
        }
        out
    }

    #[cfg(test)]
    fn total_blocked(&self, pool: &PcbPool) -> usize {
        let mut n = 0;
        let mut cur = self.slots[HEAD_SENTINEL].next;
        while cur != TAIL_SENTINEL {
            n += self.slots[cur].queue.len(pool);
            cur = self.slots[cur].next;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(n: usize) -> (Asl, PcbPool, Vec<Pid>) {
        let mut pool = PcbPool::new();
        let pids = (0..n).map(|_| pool.alloc().unwrap()).collect();
        (Asl::new(), pool, pids)
    }

    #[test]
    fn keys_stay_sorted_regardless_of_insertion_order() {
        let (mut asl, mut pool, pids) = setup(4);
        for (i, &addr) in [0x700u32, 0x300, 0x500, 0x100].iter().enumerate() {
            asl.insert_blocked(&mut pool, addr, pids[i]).unwrap();
        }
        assert_eq!(asl.keys(), vec![0x100, 0x300, 0x500, 0x700]);
        assert_eq!(asl.active_count(), 4);
        assert_eq!(asl.total_blocked(&pool), 4);
    }

    #[test]
    fn descriptor_exists_only_while_its_queue_is_nonempty() {
        let (mut asl, mut pool, pids) = setup(2);
        asl.insert_blocked(&mut pool, 0x400, pids[0]).unwrap();
        asl.insert_blocked(&mut pool, 0x400, pids[1]).unwrap();
        assert_eq!(asl.active_count(), 1);

        assert_eq!(asl.remove_blocked(&mut pool, 0x400), Some(pids[0]));
        assert_eq!(asl.active_count(), 1);
        assert_eq!(asl.remove_blocked(&mut pool, 0x400), Some(pids[1]));
        assert_eq!(asl.active_count(), 0);
        assert_eq!(asl.remove_blocked(&mut pool, 0x400), None);
        assert_eq!(pool[pids[0]].sem_addr, None);
    }

    #[test]
    fn waiters_on_one_semaphore_are_fifo() {
        let (mut asl, mut pool, pids) = setup(3);
        for &p in &pids {
            asl.insert_blocked(&mut pool, 0x123_4560, p).unwrap();
        }
        assert_eq!(asl.head_blocked(&pool, 0x123_4560), Some(pids[0]));
        for &p in &pids {
            assert_eq!(asl.remove_blocked(&mut pool, 0x123_4560), Some(p));
        }
    }

    #[test]
    fn out_blocked_extracts_a_specific_waiter() {
        let (mut asl, mut pool, pids) = setup(3);
        for &p in &pids {
            asl.insert_blocked(&mut pool, 0x900, p).unwrap();
        }
        assert_eq!(asl.out_blocked(&mut pool, pids[1]), Some(pids[1]));
        assert_eq!(pool[pids[1]].sem_addr, None);
        assert_eq!(asl.remove_blocked(&mut pool, 0x900), Some(pids[0]));
        assert_eq!(asl.remove_blocked(&mut pool, 0x900), Some(pids[2]));
        assert_eq!(asl.active_count(), 0);
    }

    #[test]
    fn out_blocked_on_an_unblocked_process_is_an_error() {
        let (mut asl, mut pool, pids) = setup(1);
        assert_eq!(asl.out_blocked(&mut pool, pids[0]), None);
    }

    #[test]
    fn every_process_can_block_on_its_own_semaphore() {
        let (mut asl, mut pool, pids) = setup(MAXPROC);
        for (i, &p) in pids.iter().enumerate() {
            asl.insert_blocked(&mut pool, 0x1000 + 4 * i as u32, p).unwrap();
        }
        assert_eq!(asl.active_count(), MAXPROC);
        assert_eq!(asl.total_blocked(&pool), MAXPROC);
        for (i, _) in pids.iter().enumerate() {
            assert!(asl.remove_blocked(&mut pool, 0x1000 + 4 * i as u32).is_some());
        }
        assert_eq!(asl.active_count(), 0);
    }
}
