//! Write queue that keeps every queued write contiguous.
//!
//! Writes are carved from an inline FIFO region of `N` bytes whenever they
//! fit, so small writes (status lines, headers, chunk framing) never touch the
//! allocator. A new allocation that lands directly behind a pending one in the
//! FIFO is merged into it, so consecutive small writes leave in a single
//! `write` call. Writes that do not fit the FIFO go to heap buffers, which are
//! recycled through a free-list instead of being dropped.
//!
//! Every queued buffer moves through three states:
//!
//! ```text
//! allocate() -> Allocated --commit()--> Pending --pop()--> Writing --release()--> freed
//! ```
//!
//! Only one buffer may be `Allocated` at a time.

use std::collections::VecDeque;

/// New heap buffers are rounded up to a multiple of this many bytes.
const HEAP_GRANULARITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Allocated,
    Pending,
    Writing,
}

enum Region {
    Static { offset: usize },
    Heap(Box<[u8]>),
}

struct Slot {
    region: Region,
    len: usize,
    state: SlotState,
}

pub struct WriteQueue<const N: usize> {
    fifo: [u8; N],
    /// First free byte of the FIFO.
    free_begin: usize,
    /// First used byte of the FIFO.
    used_begin: usize,
    last_alloc_len: usize,

    slots: VecDeque<Slot>,
    spare: Vec<Box<[u8]>>,
}

impl<const N: usize> WriteQueue<N> {
    pub fn new() -> Self {
        Self {
            fifo: [0; N],
            free_begin: 0,
            used_begin: 0,
            last_alloc_len: 0,
            slots: VecDeque::with_capacity(8),
            spare: Vec::new(),
        }
    }

    /// Drops every queued buffer. Heap memory is either freed or kept for
    /// reuse.
    pub fn reset(&mut self, release_heap: bool) {
        self.free_begin = 0;
        self.used_begin = 0;
        self.last_alloc_len = 0;

        if release_heap {
            self.spare.clear();
            self.slots.clear();
        } else {
            for slot in self.slots.drain(..) {
                if let Region::Heap(buf) = slot.region {
                    self.spare.push(buf);
                }
            }
        }
    }

    /// True if nothing is queued, including buffers being written.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of spare heap buffers waiting for reuse.
    pub fn spare_count(&self) -> usize {
        self.spare.len()
    }

    /// Reserves `len` contiguous bytes at the end of the queue.
    ///
    /// The returned slice is not handed out by `pop` until `commit` is called.
    pub fn allocate(&mut self, len: usize) -> &mut [u8] {
        if len == 0 {
            return &mut [];
        }
        debug_assert!(
            self.slots.back().is_none_or(|slot| slot.state != SlotState::Allocated),
            "previous allocation was not committed"
        );

        self.last_alloc_len = len;

        if len < N {
            if let Some(offset) = self.take_fifo_space(len) {
                let last = self.slots.len().wrapping_sub(1);
                if let Some(slot) = self.slots.back_mut() {
                    if let Region::Static { offset: slot_offset } = slot.region {
                        if slot.state == SlotState::Pending && slot_offset + slot.len == offset {
                            let merged_from = slot.len;
                            slot.len += len;
                            slot.state = SlotState::Allocated;
                            return &mut self.slot_bytes_mut(last)[merged_from..];
                        }
                    }
                }

                self.slots.push_back(Slot {
                    region: Region::Static { offset },
                    len,
                    state: SlotState::Allocated,
                });
                return self.slot_bytes_mut(self.slots.len() - 1);
            }
        }

        let best_fit = self
            .spare
            .iter()
            .enumerate()
            .filter(|(_, buf)| buf.len() >= len)
            .min_by_key(|(_, buf)| buf.len())
            .map(|(index, _)| index);
        let buf = match best_fit {
            Some(index) => self.spare.swap_remove(index),
            None => vec![0u8; len.div_ceil(HEAP_GRANULARITY) * HEAP_GRANULARITY].into_boxed_slice(),
        };

        self.slots.push_back(Slot {
            region: Region::Heap(buf),
            len,
            state: SlotState::Allocated,
        });
        self.slot_bytes_mut(self.slots.len() - 1)
    }

    /// Queues the first `len` bytes of the allocated buffer. Committing 0
    /// bytes discards the allocation.
    pub fn commit(&mut self, len: usize) {
        let Some(index) = self.slots.len().checked_sub(1) else {
            return;
        };
        if self.slots[index].state != SlotState::Allocated {
            return;
        }

        let alloc_len = std::mem::take(&mut self.last_alloc_len);
        if len < alloc_len {
            let shrink = alloc_len - len;
            let is_static = matches!(self.slots[index].region, Region::Static { .. });

            if is_static {
                self.slots[index].len -= shrink;
                if self.free_begin != 0 {
                    self.free_begin -= shrink;
                } else {
                    self.free_begin = N - shrink;
                }

                if self.slots[index].len == 0 {
                    self.slots.pop_back();
                    self.reset_fifo_if_idle();
                    return;
                }
            } else if len == 0 {
                if let Some(Slot { region: Region::Heap(buf), .. }) = self.slots.pop_back() {
                    self.spare.push(buf);
                }
                return;
            } else {
                self.slots[index].len = len;
            }
        }

        self.slots[index].state = SlotState::Pending;
    }

    pub fn commit_all(&mut self) {
        self.commit(usize::MAX);
    }

    /// Allocates, copies and commits in one step.
    pub fn push(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.allocate(data.len()).copy_from_slice(data);
        self.commit_all();
    }

    /// Hands out the oldest pending buffer for writing.
    pub fn pop(&mut self) -> Option<&[u8]> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.state == SlotState::Pending)?;
        self.slots[index].state = SlotState::Writing;

        let slot = &self.slots[index];
        Some(match &slot.region {
            Region::Static { offset } => &self.fifo[*offset..*offset + slot.len],
            Region::Heap(buf) => &buf[..slot.len],
        })
    }

    /// Frees the oldest buffer returned by `pop`.
    pub fn release(&mut self) {
        if self.slots.front().is_none_or(|slot| slot.state != SlotState::Writing) {
            return;
        }
        let Some(slot) = self.slots.pop_front() else {
            return;
        };

        match slot.region {
            Region::Static { offset } => {
                self.used_begin = offset + slot.len;
                if self.used_begin >= N {
                    self.used_begin -= N;
                }
                self.reset_fifo_if_idle();
            }
            Region::Heap(buf) => self.spare.push(buf),
        }
    }

    fn slot_bytes_mut(&mut self, index: usize) -> &mut [u8] {
        let Slot { region, len, .. } = &mut self.slots[index];
        match region {
            Region::Static { offset } => &mut self.fifo[*offset..*offset + *len],
            Region::Heap(buf) => &mut buf[..*len],
        }
    }

    /// Claims `len` bytes of the FIFO, behind the free cursor or wrapped to
    /// the front.
    fn take_fifo_space(&mut self, len: usize) -> Option<usize> {
        let (at_end, at_front) = self.contiguous_free();

        if len <= at_end {
            let offset = self.free_begin;
            self.free_begin += len;
            if self.free_begin >= N {
                self.free_begin = 0;
            }
            Some(offset)
        } else if len <= at_front {
            self.free_begin = len;
            Some(0)
        } else {
            None
        }
    }

    /// Longest free runs after the free cursor and at the front of the FIFO.
    /// One byte before the used cursor is always kept free so a full FIFO
    /// never looks empty.
    fn contiguous_free(&self) -> (usize, usize) {
        if self.free_begin >= self.used_begin {
            let guard = usize::from(self.used_begin == 0);
            (N - self.free_begin - guard, self.used_begin.saturating_sub(1))
        } else {
            (self.used_begin - self.free_begin - 1, 0)
        }
    }

    fn reset_fifo_if_idle(&mut self) {
        let fifo_in_use = self
            .slots
            .iter()
            .any(|slot| matches!(slot.region, Region::Static { .. }));
        if !fifo_in_use {
            self.free_begin = 0;
            self.used_begin = 0;
        }
    }
}

impl<const N: usize> Default for WriteQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
