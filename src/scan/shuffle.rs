//! Color-shuffle post-processor
//!
//! The three color sensor rows sit at a fixed vertical offset, so the line
//! a color scan delivers is a composite: its green segment belongs to the
//! line itself, its red segment to the line `line_distance` earlier, and its
//! blue segment to the line `line_distance` later. This stage re-deals the
//! segments through a ring of `2 * line_distance + 1` line buffers and emits
//! a line only once all three contributions have landed. The first and last
//! `line_distance` lines of a capture never complete and are dropped.
//!
//! Wire lines are channel-segmented: `[red..][green..][blue..]`, each
//! segment `bytes_per_line / 3` long.

const CONTRIB_RED: u8 = 0b001;
const CONTRIB_GREEN: u8 = 0b010;
const CONTRIB_BLUE: u8 = 0b100;
const CONTRIB_ALL: u8 = 0b111;

/// Line-distance realignment window
pub struct ColorShuffle {
    line_distance: usize,
    bytes_per_line: usize,
    segment: usize,
    /// Ring of 2*line_distance+1 line buffers
    window: Vec<Vec<u8>>,
    /// Contribution mask per ring slot
    deposited: Vec<u8>,
    /// Wire lines consumed so far
    input_index: usize,
    /// Lines handed to the caller so far
    emitted: usize,
}

impl ColorShuffle {
    /// `bytes_per_line` must be divisible by 3 (RGB segments)
    pub fn new(line_distance: usize, bytes_per_line: usize) -> Self {
        debug_assert!(line_distance > 0);
        debug_assert_eq!(bytes_per_line % 3, 0);
        let slots = 2 * line_distance + 1;
        ColorShuffle {
            line_distance,
            bytes_per_line,
            segment: bytes_per_line / 3,
            window: vec![vec![0u8; bytes_per_line]; slots],
            deposited: vec![0u8; slots],
            input_index: 0,
            emitted: 0,
        }
    }

    pub fn lines_emitted(&self) -> usize {
        self.emitted
    }

    /// Feed one wire line; complete output lines are appended to `out`
    pub fn push_line(&mut self, line: &[u8], out: &mut Vec<u8>) {
        debug_assert_eq!(line.len(), self.bytes_per_line);
        let slots = self.window.len();
        let ld = self.line_distance;
        let i = self.input_index;
        let seg = self.segment;

        // Green lands on the line itself
        let green_slot = i % slots;
        self.window[green_slot][seg..2 * seg].copy_from_slice(&line[seg..2 * seg]);
        self.deposited[green_slot] |= CONTRIB_GREEN;

        // Red was captured line_distance lines ago
        if i >= ld {
            let red_slot = (i - ld) % slots;
            self.window[red_slot][..seg].copy_from_slice(&line[..seg]);
            self.deposited[red_slot] |= CONTRIB_RED;
        }

        // Blue belongs line_distance lines ahead; the slot it lands in was
        // emitted and recycled on the previous push
        let blue_slot = (i + ld) % slots;
        self.window[blue_slot][2 * seg..].copy_from_slice(&line[2 * seg..]);
        self.deposited[blue_slot] |= CONTRIB_BLUE;

        // The trailing-edge line received its red just now; emit it if every
        // contribution has landed (false only for the leading padding lines).
        if i >= ld {
            let trailing = (i - ld) % slots;
            if self.deposited[trailing] == CONTRIB_ALL {
                out.extend_from_slice(&self.window[trailing]);
                self.deposited[trailing] = 0;
                self.emitted += 1;
            }
        }

        self.input_index += 1;
    }
}

/// Swap the red and blue segments of one channel-segmented line in place.
///
/// Correction for models whose firmware emits the planes in reversed order.
/// Not idempotent: the caller must apply it exactly once per captured byte,
/// before the shuffle stage.
pub fn swap_red_blue(line: &mut [u8]) {
    debug_assert_eq!(line.len() % 3, 0);
    let seg = line.len() / 3;
    for k in 0..seg {
        line.swap(k, 2 * seg + k);
    }
}

/// Reassembles whole lines from arbitrarily sized payload chunks
pub struct LineAssembler {
    bytes_per_line: usize,
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new(bytes_per_line: usize) -> Self {
        LineAssembler {
            bytes_per_line,
            partial: Vec::with_capacity(bytes_per_line),
        }
    }

    /// Feed a chunk; `f` is called once per completed line
    pub fn push<F: FnMut(&mut [u8])>(&mut self, mut data: &[u8], mut f: F) {
        // Top up a pending partial line first
        if !self.partial.is_empty() {
            let need = self.bytes_per_line - self.partial.len();
            let take = need.min(data.len());
            self.partial.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.partial.len() < self.bytes_per_line {
                return;
            }
            let mut line = std::mem::take(&mut self.partial);
            f(&mut line);
        }
        let mut chunks = data.chunks_exact(self.bytes_per_line);
        for chunk in &mut chunks {
            let mut line = chunk.to_vec();
            f(&mut line);
        }
        self.partial.extend_from_slice(chunks.remainder());
    }

    /// Bytes of an incomplete trailing line still buffered
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}
