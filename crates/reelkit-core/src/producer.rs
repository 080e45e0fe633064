//! A service that emits frames at requested positions (spec §3.5, §4.6).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::properties::Properties;
use crate::service::{FilterChain, Service, ServiceId, ServiceKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EofPolicy {
    Pause,
    Loop,
    Continue,
}

/// Position/in/out/speed/eof cursor shared by every producer variant
/// (playlist, multitrack, tractor, cut, frame-rate decoupler, and the
/// concrete media producers in `reelkit-media`).
#[derive(Clone, Copy, Debug)]
pub struct ProducerState {
    pub position: i64,
    pub in_point: i64,
    pub out_point: i64,
    pub length: i64,
    pub speed: f64,
    pub eof: EofPolicy,
}

impl ProducerState {
    pub fn new(length: i64) -> Self {
        Self {
            position: 0,
            in_point: 0,
            out_point: (length - 1).max(0),
            length,
            speed: 1.0,
            eof: EofPolicy::Pause,
        }
    }

    /// Clamp `f` into `[0, length-1]`; wraps modulo length when the eof
    /// policy is `Loop` (spec §4.6.1).
    pub fn seek(&mut self, f: i64) {
        if self.length <= 0 {
            self.position = 0;
            return;
        }
        self.position = match self.eof {
            EofPolicy::Loop => f.rem_euclid(self.length),
            _ => f.clamp(0, self.length - 1),
        };
    }

    /// Advance `position` by `round(speed)` frames and apply the eof policy
    /// on overrun in either direction (spec §4.6.1).
    pub fn prepare_next(&mut self) {
        let step = self.speed.round() as i64;
        self.position += step;
        let span = (self.out_point - self.in_point + 1).max(1);

        if self.position > self.out_point {
            match self.eof {
                EofPolicy::Pause => {
                    self.position = self.out_point;
                    self.speed = 0.0;
                }
                EofPolicy::Loop => {
                    self.position = self.in_point + (self.position - self.in_point).rem_euclid(span);
                }
                EofPolicy::Continue => {
                    self.position = self.out_point + 1;
                }
            }
        } else if self.position < self.in_point {
            match self.eof {
                EofPolicy::Pause => {
                    self.position = self.in_point;
                    self.speed = 0.0;
                }
                EofPolicy::Loop => {
                    self.position = self.in_point + (self.position - self.in_point).rem_euclid(span);
                }
                EofPolicy::Continue => {
                    self.position = self.in_point - 1;
                }
            }
        }
    }
}

pub trait Producer: Service {
    fn state(&self) -> &ProducerState;
    fn state_mut(&mut self) -> &mut ProducerState;
    fn properties(&self) -> &Properties;
    fn properties_mut(&mut self) -> &mut Properties;

    fn length(&self) -> i64 {
        self.state().length
    }

    fn position(&self) -> i64 {
        self.state().position
    }

    fn seek(&mut self, f: i64) {
        self.state_mut().seek(f);
    }

    fn prepare_next(&mut self) {
        self.state_mut().prepare_next();
    }
}

/// A windowed view into a parent producer: its own `[in, out]` and
/// properties (overriding the parent's for the cut's lifetime), but every
/// `get_frame`/`seek` delegates to the parent after translating by the
/// cut's in-point (spec §4.6.2). The parent is never mutated except through
/// that delegation.
pub struct Cut {
    id: ServiceId,
    properties: Properties,
    parent: Arc<Mutex<dyn Producer>>,
    state: ProducerState,
    filter_chain: FilterChain,
}

impl Cut {
    pub fn new(parent: Arc<Mutex<dyn Producer>>, in_point: i64, out_point: i64) -> Self {
        let length = out_point - in_point + 1;
        let state = ProducerState { position: 0, in_point, out_point, length, speed: 1.0, eof: EofPolicy::Pause };
        Self { id: ServiceId::new(), properties: Properties::new(), parent, state, filter_chain: FilterChain::new() }
    }

    /// Seeking a cut seeks the parent, translated by the cut's in-point
    /// (spec §3.5).
    pub fn seek(&mut self, f: i64) {
        self.state.seek(f);
        self.parent.lock().seek(self.state.in_point + self.state.position);
    }

    /// The parent producer's total length, used by
    /// [`crate::playlist::Playlist::resize_clip`]'s bounds check.
    pub fn parent_length(&self) -> i64 {
        self.parent.lock().length()
    }

    pub fn parent_handle(&self) -> Arc<Mutex<dyn Producer>> {
        self.parent.clone()
    }
}

impl Service for Cut {
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

    fn get_frame(&mut self, index: i64) -> Result<Option<crate::frame::Frame>> {
        let parent_index = self.state.in_point + index;
        let Some(mut frame) = self.parent.lock().get_frame(parent_index)? else {
            return Ok(None);
        };
        let count = self.filter_chain.filter_count();
        self.filter_chain.apply_filters(&mut frame, count)?;
        Ok(Some(frame))
    }
}

impl Producer for Cut {
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
