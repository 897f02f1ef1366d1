//! Growable read buffer for incremental protocol parsers.
//!
//! The buffer tracks three live regions over one contiguous store:
//!
//! ```text
//!  0        start of relevant    read_pos          data_end         capacity
//!  |  free (reclaimable)  |  relevant  |  available  |      free        |
//! ```
//!
//! *Relevant* bytes have already been consumed by the parser but are kept so
//! it can look back at them (a header line is scanned first and sliced out
//! later). *Available* bytes have been read from the socket and not consumed
//! yet. The store starts as an inline array of `N` bytes and is only moved to
//! the heap when a request cannot be satisfied by compaction. It never shrinks.

/// Heap growth is rounded up to a multiple of this many bytes.
const GROWTH_GRANULARITY: usize = 1024;

pub struct ReadBuffer<const N: usize> {
    inline: [u8; N],
    heap: Option<Box<[u8]>>,

    /// Next byte the parser will look at.
    read_pos: usize,
    /// Number of kept bytes directly before `read_pos`.
    relevant_len: usize,
    /// End of the bytes received so far.
    data_end: usize,
    /// End position the last `request_data` call asked for.
    required_end: usize,
}

impl<const N: usize> ReadBuffer<N> {
    pub fn new() -> Self {
        Self {
            inline: [0; N],
            heap: None,
            read_pos: 0,
            relevant_len: 0,
            data_end: 0,
            required_end: 0,
        }
    }

    fn storage(&self) -> &[u8] {
        match &self.heap {
            Some(heap) => heap,
            None => &self.inline,
        }
    }

    fn storage_mut(&mut self) -> &mut [u8] {
        match &mut self.heap {
            Some(heap) => heap,
            None => &mut self.inline,
        }
    }

    /// Discards the content and cursors. Heap growth is retained.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.relevant_len = 0;
        self.data_end = 0;
        self.required_end = 0;
    }

    pub fn capacity(&self) -> usize {
        self.storage().len()
    }

    pub fn available_len(&self) -> usize {
        self.data_end - self.read_pos
    }

    pub fn relevant_len(&self) -> usize {
        self.relevant_len
    }

    pub fn free_len(&self) -> usize {
        self.capacity() - self.data_end
    }

    /// Bytes that still have to arrive to satisfy the last `request_data`.
    pub fn required_len(&self) -> usize {
        self.required_end.saturating_sub(self.data_end)
    }

    /// Kept bytes, from the start of the relevant region up to the read position.
    pub fn relevant_data(&self) -> &[u8] {
        &self.storage()[self.read_pos - self.relevant_len..self.read_pos]
    }

    /// Bytes received but not consumed yet.
    pub fn available_data(&self) -> &[u8] {
        &self.storage()[self.read_pos..self.data_end]
    }

    pub fn available_data_mut(&mut self) -> &mut [u8] {
        let (begin, end) = (self.read_pos, self.data_end);
        &mut self.storage_mut()[begin..end]
    }

    /// Advances the read position by `len` bytes, optionally keeping them as
    /// relevant data.
    ///
    /// Returns `false` if `len` was larger than the available data; every
    /// available byte is consumed in that case.
    pub fn consume(&mut self, len: usize, keep_relevant: bool) -> bool {
        let available = self.available_len();
        let (len, in_bounds) = if len <= available {
            (len, true)
        } else {
            (available, false)
        };

        if keep_relevant {
            self.relevant_len += len;
        }
        self.read_pos += len;
        in_bounds
    }

    /// Forgets the relevant bytes so the next compaction can reclaim them.
    pub fn reset_relevant(&mut self) {
        self.relevant_len = 0;
    }

    /// Ensures `need` unconsumed bytes will fit in the buffer.
    ///
    /// Returns `true` if they are already available. Otherwise the requirement
    /// is recorded and the store is compacted, or grown, so that a following
    /// read can deliver the missing bytes. Relevant and available bytes keep
    /// their relative layout.
    pub fn request_data(&mut self, need: usize) -> bool {
        let available = self.available_len();
        if available >= need {
            return true;
        }

        let missing = need - available;
        self.required_end = self.data_end + missing;

        let capacity = self.capacity();
        if self.required_end > capacity {
            let front = self.read_pos - self.relevant_len;
            let tail = capacity - self.data_end;
            let data_end = self.data_end;

            if missing <= front + tail {
                self.storage_mut().copy_within(front..data_end, 0);
            } else {
                let retained = data_end - front;
                let grown_len = round_up(retained + missing, GROWTH_GRANULARITY);
                let mut grown = vec![0u8; grown_len].into_boxed_slice();
                grown[..retained].copy_from_slice(&self.storage()[front..data_end]);
                self.heap = Some(grown);
            }

            self.read_pos -= front;
            self.data_end -= front;
            self.required_end -= front;
        }

        false
    }

    /// Free space a socket read may fill.
    pub fn read_space(&mut self) -> &mut [u8] {
        let begin = self.data_end;
        &mut self.storage_mut()[begin..]
    }

    /// Records `len` freshly read bytes (clamped to the free space).
    ///
    /// Returns `true` once the last `request_data` requirement is satisfied.
    pub fn on_new_data(&mut self, len: usize) -> bool {
        self.data_end += len.min(self.free_len());
        if self.data_end >= self.required_end {
            self.required_end = self.data_end;
            true
        } else {
            false
        }
    }

    /// Appends bytes that were read elsewhere, growing as needed.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.request_data(self.available_len() + data.len());
        self.read_space()[..data.len()].copy_from_slice(data);
        self.on_new_data(data.len());
    }
}

impl<const N: usize> Default for ReadBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn round_up(value: usize, granularity: usize) -> usize {
    value.div_ceil(granularity) * granularity
}
