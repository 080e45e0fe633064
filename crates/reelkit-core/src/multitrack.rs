//! A producer that owns parallel tracks (spec §3.6, §4.11).

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::frame::Frame;
use crate::producer::{Producer, ProducerState};
use crate::properties::{Properties, PropertiesHandle};
use crate::service::{FilterChain, Service, ServiceId, ServiceKind};

pub struct Multitrack {
    id: ServiceId,
    properties: Properties,
    properties_handle: PropertiesHandle,
    state: ProducerState,
    filter_chain: FilterChain,
    tracks: Vec<Arc<Mutex<dyn Producer>>>,
}

impl Multitrack {
    pub fn new() -> Self {
        Self {
            id: ServiceId::new(),
            properties: Properties::new(),
            properties_handle: Arc::new(RwLock::new(Properties::new())),
            state: ProducerState::new(0),
            filter_chain: FilterChain::new(),
            tracks: Vec::new(),
        }
    }

    pub fn add_track(&mut self, producer: Arc<Mutex<dyn Producer>>) {
        self.tracks.push(producer);
        self.state.length = self.tracks.iter().map(|t| t.lock().length()).max().unwrap_or(0);
        self.state.out_point = (self.state.length - 1).max(0);
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<Arc<Mutex<dyn Producer>>> {
        self.tracks.get(index).cloned()
    }

    /// Pull every track's frame at `position` (spec §4.11 step 1). A track
    /// past its own length yields `None` for its slot without failing the
    /// whole call.
    pub fn get_track_frames(&mut self, position: i64) -> Result<Vec<Option<Frame>>> {
        self.tracks.iter().map(|t| t.lock().get_frame(position)).collect()
    }

    fn properties_handle(&self) -> PropertiesHandle {
        self.properties_handle.clone()
    }
}

impl Default for Multitrack {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for Multitrack {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Multitrack
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    fn filter_chain_mut(&mut self) -> &mut FilterChain {
        &mut self.filter_chain
    }

    /// Returns track 0's frame as the A-frame (spec §4.11 step 2); a bare
    /// multitrack (without a tractor/field above it) has nothing to
    /// side-load the other tracks onto, so they are simply dropped here.
    fn get_frame(&mut self, index: i64) -> Result<Option<Frame>> {
        let _ = self.properties_handle();
        let mut frames = self.get_track_frames(index)?;
        if frames.is_empty() {
            return Ok(None);
        }
        Ok(frames.remove(0))
    }
}

impl Producer for Multitrack {
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
