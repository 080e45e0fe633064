//! A producer that concatenates clips and blanks (spec §3.6, §4.10).

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::frame::{AudioBuffer, Frame, ImageBuffer, ImageFormat};
use crate::producer::{Cut, EofPolicy, Producer, ProducerState};
use crate::properties::{Properties, PropertiesHandle};
use crate::service::{FilterChain, Service, ServiceId, ServiceKind};

enum Entry {
    Clip(Arc<Mutex<Cut>>),
    Blank(i64),
}

impl Entry {
    fn length(&self) -> i64 {
        match self {
            Entry::Clip(cut) => cut.lock().length(),
            Entry::Blank(len) => *len,
        }
    }
}

pub struct Playlist {
    id: ServiceId,
    properties: Properties,
    properties_handle: PropertiesHandle,
    entries: Vec<Entry>,
    /// Prefix-sum start offset of each entry, same length as `entries`.
    clip_start: Vec<i64>,
    filter_chain: FilterChain,
    state: ProducerState,
}

impl Playlist {
    pub fn new() -> Self {
        let properties = Properties::new();
        let properties_handle = Arc::new(RwLock::new(Properties::new()));
        Self {
            id: ServiceId::new(),
            properties,
            properties_handle,
            entries: Vec::new(),
            clip_start: Vec::new(),
            filter_chain: FilterChain::new(),
            state: ProducerState::new(0),
        }
    }

    fn recompute_starts(&mut self) {
        self.clip_start.clear();
        let mut total = 0i64;
        for entry in &self.entries {
            self.clip_start.push(total);
            total += entry.length();
        }
        self.state.length = total;
        self.state.out_point = (total - 1).max(0);
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// O(1) amortized: appends to the end, extending the total length.
    pub fn append(&mut self, producer: Arc<Mutex<dyn Producer>>, in_point: i64, out_point: i64) {
        let cut = Arc::new(Mutex::new(Cut::new(producer, in_point, out_point)));
        self.entries.push(Entry::Clip(cut));
        self.recompute_starts();
    }

    /// Appends a gap producer emitting black image and silent audio.
    pub fn blank(&mut self, length: i64) {
        self.entries.push(Entry::Blank(length));
        self.recompute_starts();
    }

    pub fn insert(&mut self, index: usize, producer: Arc<Mutex<dyn Producer>>, in_point: i64, out_point: i64) -> Result<()> {
        if index > self.entries.len() {
            return Err(Error::InvalidArgument(format!("insert index {index} out of range")));
        }
        let cut = Arc::new(Mutex::new(Cut::new(producer, in_point, out_point)));
        self.entries.insert(index, Entry::Clip(cut));
        self.recompute_starts();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            return Err(Error::InvalidArgument(format!("remove index {index} out of range")));
        }
        self.entries.remove(index);
        self.recompute_starts();
        Ok(())
    }

    pub fn move_clip(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= self.entries.len() || to >= self.entries.len() {
            return Err(Error::InvalidArgument("move index out of range".into()));
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        self.recompute_starts();
        Ok(())
    }

    /// Every input index in `permutation` must be a unique value in
    /// `[0, count)`; on any duplicate or out-of-range index the operation
    /// fails and the playlist is left untouched (spec §4.10).
    pub fn reorder(&mut self, permutation: &[usize]) -> Result<()> {
        let n = self.entries.len();
        if permutation.len() != n {
            return Err(Error::InvalidArgument("permutation length mismatch".into()));
        }
        let mut seen = vec![false; n];
        for &idx in permutation {
            if idx >= n || seen[idx] {
                return Err(Error::InvalidArgument(format!("invalid permutation entry {idx}")));
            }
            seen[idx] = true;
        }

        // Build the new order without touching `self.entries` until every
        // index has been validated above.
        let mut taken: Vec<Option<Entry>> = self.entries.drain(..).map(Some).collect();
        let mut reordered = Vec::with_capacity(n);
        for &idx in permutation {
            reordered.push(taken[idx].take().expect("validated unique indices"));
        }
        self.entries = reordered;
        self.recompute_starts();
        Ok(())
    }

    /// Clamp into parent bounds; fails (leaving state unchanged) if
    /// `in_point > out_point` or `out_point >= parent.length`. The
    /// ambiguous equal-bounds case (`in_point == out_point`) is treated as
    /// a rejected zero-length resize rather than a single-frame clip — see
    /// DESIGN.md.
    pub fn resize_clip(&mut self, index: usize, in_point: i64, out_point: i64) -> Result<()> {
        let Some(Entry::Clip(cut)) = self.entries.get(index) else {
            return Err(Error::InvalidArgument(format!("no clip at index {index}")));
        };
        if in_point >= out_point {
            return Err(Error::InvalidArgument("resize_clip requires out_point > in_point".into()));
        }
        let parent_length = {
            let guard = cut.lock();
            guard.parent_length()
        };
        if out_point >= parent_length {
            return Err(Error::InvalidArgument("resize_clip out_point exceeds parent length".into()));
        }
        let parent = cut.lock().parent_handle();
        *cut.lock() = Cut::new(parent, in_point, out_point);
        self.recompute_starts();
        Ok(())
    }

    /// Binary search over `clip_start` for the entry owning `position`.
    pub fn get_clip_at(&self, position: i64) -> Option<(usize, i64)> {
        if self.clip_start.is_empty() || position < 0 {
            return None;
        }
        match self.clip_start.binary_search(&position) {
            Ok(i) => Some((i, 0)),
            Err(0) => None,
            Err(insert_at) => {
                let i = insert_at - 1;
                let local = position - self.clip_start[i];
                if local < self.entries[i].length() {
                    Some((i, local))
                } else {
                    None
                }
            }
        }
    }

    pub fn get_clip(&self, index: usize) -> Option<Arc<Mutex<Cut>>> {
        match self.entries.get(index) {
            Some(Entry::Clip(cut)) => Some(cut.clone()),
            _ => None,
        }
    }

    fn properties_handle(&self) -> PropertiesHandle {
        self.properties_handle.clone()
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for Playlist {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Playlist
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    fn filter_chain_mut(&mut self) -> &mut FilterChain {
        &mut self.filter_chain
    }

    fn get_frame(&mut self, index: i64) -> Result<Option<Frame>> {
        let Some((i, local)) = self.get_clip_at(index) else { return Ok(None) };
        let entry_length = self.entries[i].length();

        let mut frame = match &self.entries[i] {
            Entry::Blank(_) => {
                let mut frame = Frame::new(index, self.properties_handle());
                frame.set_image(ImageBuffer::black(ImageFormat::Rgb24, 1, 1));
                frame.set_audio(AudioBuffer::silence(48000, 2, 0));
                frame.properties.set_int("test_image", 1);
                frame.properties.set_int("test_audio", 1);
                frame
            }
            Entry::Clip(cut) => {
                let Some(frame) = cut.lock().get_frame(local)? else { return Ok(None) };
                frame
            }
        };

        frame.properties.set_int("meta.playlist.clip_position", local);
        frame.properties.set_int("meta.playlist.clip_length", entry_length);
        if local == 0 || local == entry_length - 1 {
            frame.properties.set_int("meta.playlist.at_seam", 1);
        }

        let mut count = self.filter_chain.filter_count();
        count = count.max(0);
        self.filter_chain.apply_filters(&mut frame, count)?;
        Ok(Some(frame))
    }
}

impl Producer for Playlist {
    fn state(&self) -> &ProducerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProducerState {
        &mut self.state
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}
