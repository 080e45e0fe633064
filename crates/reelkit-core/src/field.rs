//! The attachment surface for filters and transitions on a multitrack
//! (spec §3.6, §4.11).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::filter::Filter;
use crate::transition::Transition;

pub struct ScheduledTransition {
    pub transition: Arc<Mutex<dyn Transition>>,
    pub track_a: usize,
    pub track_b: usize,
}

pub struct TrackFilter {
    pub filter: Arc<Mutex<dyn Filter>>,
    pub track: usize,
}

/// Holds transitions and per-track filters in insertion order. Multiple
/// transitions covering the same track pair at the same position are
/// applied in the order they were planted (spec §4.8).
#[derive(Default)]
pub struct Field {
    transitions: Vec<ScheduledTransition>,
    track_filters: Vec<TrackFilter>,
}

impl Field {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plant_transition(&mut self, transition: Arc<Mutex<dyn Transition>>, track_a: usize, track_b: usize) {
        self.transitions.push(ScheduledTransition { transition, track_a, track_b });
    }

    pub fn plant_filter(&mut self, filter: Arc<Mutex<dyn Filter>>, track: usize) {
        self.track_filters.push(TrackFilter { filter, track });
    }

    /// Transitions scheduled for `position`, in the order they were
    /// planted.
    pub fn transitions_at(&self, position: i64) -> impl Iterator<Item = &ScheduledTransition> {
        self.transitions.iter().filter(move |t| t.transition.lock().is_active_at(position))
    }

    pub fn track_filters(&self) -> &[TrackFilter] {
        &self.track_filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::frame::Frame;
    use crate::properties::Properties;
    use crate::service::{FilterChain, Service, ServiceId, ServiceKind};

    struct AlwaysOn;
    impl Service for AlwaysOn {
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
    impl Transition for AlwaysOn {
        fn properties(&self) -> &Properties {
            unreachable!()
        }
        fn properties_mut(&mut self) -> &mut Properties {
            unreachable!()
        }
        fn always_active(&self) -> bool {
            true
        }
        fn process(&mut self, a: Frame, _b: Frame) -> Result<Frame> {
            Ok(a)
        }
    }

    #[test]
    fn always_active_transition_matches_every_position() {
        let mut field = Field::new();
        field.plant_transition(Arc::new(Mutex::new(AlwaysOn)), 0, 1);
        assert_eq!(field.transitions_at(0).count(), 1);
        assert_eq!(field.transitions_at(9999).count(), 1);
    }
}
