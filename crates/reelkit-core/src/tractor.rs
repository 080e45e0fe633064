//! A producer that joins a [`Multitrack`] with a [`Field`] (spec §3.6,
//! §4.11).

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::field::Field;
use crate::frame::Frame;
use crate::multitrack::Multitrack;
use crate::producer::{Producer, ProducerState};
use crate::properties::{Properties, PropertiesHandle};
use crate::service::{FilterChain, Service, ServiceId, ServiceKind};

pub struct Tractor {
    id: ServiceId,
    properties: Properties,
    properties_handle: PropertiesHandle,
    state: ProducerState,
    filter_chain: FilterChain,
    pub multitrack: Multitrack,
    pub field: Field,
}

impl Tractor {
    pub fn new() -> Self {
        Self {
            id: ServiceId::new(),
            properties: Properties::new(),
            properties_handle: Arc::new(RwLock::new(Properties::new())),
            state: ProducerState::new(0),
            filter_chain: FilterChain::new(),
            multitrack: Multitrack::new(),
            field: Field::new(),
        }
    }

    /// Length tracks the multitrack's own (max-over-tracks) length; call
    /// after adding tracks.
    pub fn refresh_length(&mut self) {
        self.state.length = self.multitrack.state().length;
        self.state.out_point = self.multitrack.state().out_point;
    }
}

impl Default for Tractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for Tractor {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Tractor
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    fn filter_chain_mut(&mut self) -> &mut FilterChain {
        &mut self.filter_chain
    }

    /// Spec §4.11: pull every track's frame, apply field-scheduled
    /// transitions in insertion order (each mutating its A-track frame in
    /// place so later transitions compose on top), apply per-track field
    /// filters, then emit track 0 with the remaining track frames attached
    /// as destructor-owned data so they live until the emitted frame
    /// closes.
    fn get_frame(&mut self, index: i64) -> Result<Option<Frame>> {
        let mut tf = self.multitrack.get_track_frames(index)?;
        if tf.is_empty() || tf[0].is_none() {
            return Ok(None);
        }

        for sched in self.field.transitions_at(index) {
            if sched.track_a >= tf.len() || sched.track_b >= tf.len() {
                continue;
            }
            if let (Some(a), Some(b)) = (tf[sched.track_a].take(), tf[sched.track_b].take()) {
                let combined = sched.transition.lock().process(a, b)?;
                tf[sched.track_a] = Some(combined);
            }
        }

        for track_filter in self.field.track_filters() {
            if let Some(Some(frame)) = tf.get_mut(track_filter.track) {
                track_filter.filter.lock().process(frame)?;
            }
        }

        let mut result = tf.remove(0).expect("checked non-empty above");
        let siblings: Vec<Frame> = tf.into_iter().flatten().collect();
        if !siblings.is_empty() {
            let boxed: Arc<dyn Any + Send + Sync> = Arc::new(parking_lot::Mutex::new(siblings));
            result.properties.set_data("_tractor.sibling_frames", boxed);
        }

        Ok(Some(result))
    }
}

impl Producer for Tractor {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AudioBuffer, ImageBuffer, ImageFormat};
    use crate::transition::Transition;
    use parking_lot::Mutex;

    struct ColorTrack {
        id: ServiceId,
        properties: Properties,
        state: ProducerState,
        filter_chain: FilterChain,
        color: u8,
    }

    impl Service for ColorTrack {
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
            if index >= self.state.length {
                return Ok(None);
            }
            let handle = Arc::new(RwLock::new(Properties::new()));
            let mut frame = Frame::new(index, handle);
            frame.set_image(ImageBuffer::new(vec![self.color; 12], ImageFormat::Rgb24, 2, 2, 6));
            frame.set_audio(AudioBuffer::silence(48000, 2, 0));
            Ok(Some(frame))
        }
    }

    impl Producer for ColorTrack {
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

    fn color_track(length: i64, color: u8) -> Arc<Mutex<dyn Producer>> {
        Arc::new(Mutex::new(ColorTrack {
            id: ServiceId::new(),
            properties: Properties::new(),
            state: ProducerState::new(length),
            filter_chain: FilterChain::new(),
            color,
        }))
    }

    struct AverageTransition;
    impl Service for AverageTransition {
        fn id(&self) -> ServiceId {
            ServiceId::new()
        }
        fn kind(&self) -> ServiceKind {
            ServiceKind::Transition
        }
        fn filter_chain(&self) -> &FilterChain {
            unreachable!()
        }
        fn filter_chain_mut(&mut self) -> &mut FilterChain {
            unreachable!()
        }
        fn get_frame(&mut self, _index: i64) -> Result<Option<Frame>> {
            unreachable!()
        }
    }
    impl Transition for AverageTransition {
        fn properties(&self) -> &Properties {
            unreachable!()
        }
        fn properties_mut(&mut self) -> &mut Properties {
            unreachable!()
        }
        fn always_active(&self) -> bool {
            true
        }
        fn process(&mut self, mut a: Frame, mut b: Frame) -> Result<Frame> {
            let img_a = a.get_image(ImageFormat::Rgb24, 2, 2, true)?;
            let img_b = b.get_image(ImageFormat::Rgb24, 2, 2, false)?;
            let mut mixed = img_a.as_slice().to_vec();
            for (px, &pb) in mixed.iter_mut().zip(img_b.as_slice()) {
                *px = ((*px as u16 + pb as u16) / 2) as u8;
            }
            a.set_image(ImageBuffer::new(mixed, ImageFormat::Rgb24, 2, 2, 6));
            Ok(a)
        }
    }

    #[test]
    fn transition_combines_tracks_and_siblings_ride_along() {
        let mut tractor = Tractor::new();
        tractor.multitrack.add_track(color_track(50, 0));
        tractor.multitrack.add_track(color_track(50, 200));
        tractor.field.plant_transition(Arc::new(Mutex::new(AverageTransition)), 0, 1);

        let mut frame = tractor.get_frame(10).unwrap().unwrap();
        let img = frame.get_image(ImageFormat::Rgb24, 2, 2, false).unwrap();
        assert!(img.as_slice().iter().all(|&b| b == 100));
    }

    #[test]
    fn missing_transition_leaves_track_zero_unmixed() {
        let mut tractor = Tractor::new();
        tractor.multitrack.add_track(color_track(50, 10));
        tractor.multitrack.add_track(color_track(50, 250));

        let mut frame = tractor.get_frame(5).unwrap().unwrap();
        let img = frame.get_image(ImageFormat::Rgb24, 2, 2, false).unwrap();
        assert!(img.as_slice().iter().all(|&b| b == 10));
    }
}
