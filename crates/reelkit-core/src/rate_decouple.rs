//! Wraps a producer so it presents frames at a different frame rate than it
//! natively runs at (spec §4.14). The wrapped ("inner") producer keeps its
//! own profile; every `get_frame` call translates the requested outer-rate
//! position to the nearest inner-rate position before delegating.
//!
//! Audio needs more care than a position remap: a fixed per-frame sample
//! count would drift against the target frequency over a long enough run.
//! Instead each outer frame is forced to resolve exactly
//! `floor((i+1)·frequency/fps) - floor(i·frequency/fps)` samples, so the
//! running total after `n` frames is always `floor(n·frequency/fps)` with no
//! accumulated error (spec §4.14, property P6).

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::frame::{AudioFormat, Frame};
use crate::producer::{Producer, ProducerState};
use crate::profile::Profile;
use crate::properties::{Properties, PropertiesHandle};
use crate::service::{FilterChain, Service, ServiceId, ServiceKind};

pub struct RateDecoupler {
    id: ServiceId,
    properties: Properties,
    properties_handle: PropertiesHandle,
    state: ProducerState,
    filter_chain: FilterChain,
    inner: Arc<Mutex<dyn Producer>>,
    inner_fps: f64,
    outer_fps: f64,
    audio_frequency: u32,
    audio_channels: u16,
}

impl RateDecoupler {
    pub fn new(
        inner: Arc<Mutex<dyn Producer>>,
        inner_profile: &Profile,
        outer_profile: &Profile,
        audio_frequency: u32,
        audio_channels: u16,
    ) -> Self {
        let inner_fps = inner_profile.fps();
        let outer_fps = outer_profile.fps();
        let inner_length = inner.lock().length();
        let length = ((inner_length as f64) * outer_fps / inner_fps).round() as i64;
        Self {
            id: ServiceId::new(),
            properties: Properties::new(),
            properties_handle: Arc::new(RwLock::new(Properties::new())),
            state: ProducerState::new(length),
            filter_chain: FilterChain::new(),
            inner,
            inner_fps,
            outer_fps,
            audio_frequency,
            audio_channels,
        }
    }

    /// The exact sample count an outer frame at `index` must resolve to so
    /// that cumulative samples after `n` frames equal
    /// `floor(n·frequency/fps)` with no rounding drift (spec §4.14).
    pub fn samples_for_index(fps: f64, frequency: u32, index: i64) -> usize {
        let upto = |n: i64| ((n as f64) * frequency as f64 / fps).floor() as i64;
        (upto(index + 1) - upto(index)).max(0) as usize
    }

    fn inner_index_for(&self, outer_index: i64) -> i64 {
        (outer_index as f64 * self.inner_fps / self.outer_fps).round() as i64
    }
}

impl Service for RateDecoupler {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Producer
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    fn filter_chain_mut(&mut self) -> &mut FilterChain {
        &mut self.filter_chain
    }

    fn get_frame(&mut self, index: i64) -> Result<Option<Frame>> {
        let inner_index = self.inner_index_for(index);
        let Some(mut frame) = self.inner.lock().get_frame(inner_index)? else {
            return Ok(None);
        };

        let samples = Self::samples_for_index(self.outer_fps, self.audio_frequency, index);
        frame.get_audio(AudioFormat::F32, self.audio_frequency, self.audio_channels, samples)?;

        let count = self.filter_chain.filter_count();
        self.filter_chain.apply_filters(&mut frame, count)?;
        Ok(Some(frame))
    }
}

impl Producer for RateDecoupler {
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
