//! Common service interface: identity, the property bag, and the attached
//! filter chain every node in the graph carries (spec §3.3, §4.5).
//!
//! The original models a single polymorphic type with a tagged discriminant
//! and a capability table; the idiomatic Rust rendition is a small `Service`
//! trait object at the seam (producer/filter/transition/consumer all
//! implement it) plus [`ServiceKind`] as the explicit tag consumers use to
//! decide how to connect.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::filter::Filter;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

/// The closed set of service variants (spec §3.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    Producer,
    Playlist,
    Multitrack,
    Tractor,
    Filter,
    Transition,
    Consumer,
    Chain,
    Link,
}

/// A shared handle to an attached filter.
pub type FilterHandle = Arc<Mutex<dyn Filter>>;

struct AttachedFilter {
    filter: FilterHandle,
    /// Set by the loader when this filter is a normaliser (spec §4.13); user
    /// filters attached later are never tagged.
    is_loader: bool,
}

/// The ordered list of filters attached to a service. Every service variant
/// embeds one of these and exposes it through [`Service::filter_chain`] /
/// [`Service::filter_chain_mut`] so `attach`/`detach`/`apply_filters` have a
/// single implementation shared by producers, playlists, tracks, and so on.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<AttachedFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn attach(&mut self, filter: FilterHandle) {
        let id = filter.lock().id();
        tracing::debug!(?id, "attaching filter");
        self.filters.push(AttachedFilter { filter, is_loader: false });
    }

    /// Attach as used by the loader: tags the filter `_loader` so
    /// [`FilterChain::apply_filters`] can exclude it past a cutoff index.
    pub fn attach_loader(&mut self, filter: FilterHandle) {
        let id = filter.lock().id();
        tracing::debug!(?id, "attaching loader-internal filter");
        self.filters.push(AttachedFilter { filter, is_loader: true });
    }

    pub fn detach(&mut self, id: ServiceId) {
        tracing::debug!(?id, "detaching filter");
        self.filters.retain(|f| f.filter.lock().id() != id);
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn filter(&self, index: usize) -> Option<FilterHandle> {
        self.filters.get(index).map(|f| f.filter.clone())
    }

    pub fn move_filter(&mut self, from: usize, to: usize) {
        if from >= self.filters.len() || to >= self.filters.len() {
            return;
        }
        let entry = self.filters.remove(from);
        self.filters.insert(to, entry);
    }

    /// Run every attached filter's `process` against `frame`, in attach
    /// order, excluding `_loader`-tagged filters whose position exceeds
    /// `index` and any filter whose `[in, out]` range excludes the frame's
    /// position (spec §4.5, §4.7).
    pub fn apply_filters(&mut self, frame: &mut Frame, index: usize) -> Result<()> {
        for (i, entry) in self.filters.iter().enumerate() {
            if entry.is_loader && i > index {
                continue;
            }
            let mut filter = entry.filter.lock();
            let (in_pt, out_pt) = filter.in_out();
            let applies = (in_pt == 0 && out_pt == 0) || (in_pt <= frame.position() && frame.position() <= out_pt);
            if applies {
                filter.process(frame)?;
            }
        }
        Ok(())
    }
}

/// The interface every node in the pipeline implements.
pub trait Service: Send + Sync {
    fn id(&self) -> ServiceId;
    fn kind(&self) -> ServiceKind;
    fn filter_chain(&self) -> &FilterChain;
    fn filter_chain_mut(&mut self) -> &mut FilterChain;

    /// Produce the frame at `index`, or `Ok(None)` once the service has
    /// nothing left to emit (spec §4.9's "frame is null" end-of-stream
    /// signal, rendered the Rust way as an `Option` rather than a sentinel).
    /// The only call whose behaviour varies by service type (spec §4.5):
    /// producers advance position, filters pull downstream then push
    /// themselves onto the resolver stack, transitions fetch two frames and
    /// push themselves.
    fn get_frame(&mut self, index: i64) -> Result<Option<Frame>>;

    fn close(&mut self) {
        tracing::debug!(id = ?self.id(), kind = ?self.kind(), "closing service");
    }

    fn attach(&mut self, filter: FilterHandle) {
        self.filter_chain_mut().attach(filter);
    }

    fn detach(&mut self, id: ServiceId) {
        self.filter_chain_mut().detach(id);
    }

    fn filter_count(&self) -> usize {
        self.filter_chain().filter_count()
    }

    fn filter(&self, index: usize) -> Option<FilterHandle> {
        self.filter_chain().filter(index)
    }

    fn move_filter(&mut self, from: usize, to: usize) {
        self.filter_chain_mut().move_filter(from, to);
    }

    fn apply_filters(&mut self, frame: &mut Frame, index: usize) -> Result<()> {
        self.filter_chain_mut().apply_filters(frame, index)
    }
}

/// Returns `service`'s concrete type tag (spec §4.5's `identify`).
pub fn identify(service: &dyn Service) -> ServiceKind {
    service.kind()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{Properties, PropertiesHandle};
    use parking_lot::RwLock;

    struct NoopFilter {
        id: ServiceId,
        properties: Properties,
        in_out: (i64, i64),
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Service for NoopFilter {
        fn id(&self) -> ServiceId {
            self.id
        }
        fn kind(&self) -> ServiceKind {
            ServiceKind::Filter
        }
        fn filter_chain(&self) -> &FilterChain {
            unreachable!("leaf filter carries no nested chain in this test")
        }
        fn filter_chain_mut(&mut self) -> &mut FilterChain {
            unreachable!("leaf filter carries no nested chain in this test")
        }
        fn get_frame(&mut self, _index: i64) -> Result<Option<Frame>> {
            unreachable!("not exercised in this test")
        }
    }

    impl Filter for NoopFilter {
        fn properties(&self) -> &Properties {
            &self.properties
        }
        fn properties_mut(&mut self) -> &mut Properties {
            &mut self.properties
        }
        fn in_out(&self) -> (i64, i64) {
            self.in_out
        }
        fn process(&mut self, _frame: &mut Frame) -> Result<()> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn props_handle() -> PropertiesHandle {
        Arc::new(RwLock::new(Properties::new()))
    }

    #[test]
    fn out_of_range_filter_is_skipped() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut chain = FilterChain::new();
        chain.attach(Arc::new(Mutex::new(NoopFilter {
            id: ServiceId::new(),
            properties: Properties::new(),
            in_out: (10, 20),
            calls: calls.clone(),
        })));

        let mut frame = Frame::new(5, props_handle());
        chain.apply_filters(&mut frame, 0).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let mut frame_in_range = Frame::new(15, props_handle());
        chain.apply_filters(&mut frame_in_range, 0).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn loader_filters_above_cutoff_are_excluded() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut chain = FilterChain::new();
        chain.attach_loader(Arc::new(Mutex::new(NoopFilter {
            id: ServiceId::new(),
            properties: Properties::new(),
            in_out: (0, 0),
            calls: calls.clone(),
        })));
        chain.attach_loader(Arc::new(Mutex::new(NoopFilter {
            id: ServiceId::new(),
            properties: Properties::new(),
            in_out: (0, 0),
            calls: calls.clone(),
        })));

        let mut frame = Frame::new(0, props_handle());
        chain.apply_filters(&mut frame, 0).unwrap();
        // Only index 0 (<= cutoff) runs.
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn move_filter_reorders_attach_order() {
        let mut chain = FilterChain::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let a = ServiceId::new();
        let b = ServiceId::new();
        chain.attach(Arc::new(Mutex::new(NoopFilter {
            id: a,
            properties: Properties::new(),
            in_out: (0, 0),
            calls: calls.clone(),
        })));
        chain.attach(Arc::new(Mutex::new(NoopFilter {
            id: b,
            properties: Properties::new(),
            in_out: (0, 0),
            calls: calls.clone(),
        })));
        chain.move_filter(1, 0);
        assert_eq!(chain.filter(0).unwrap().lock().id(), b);
        assert_eq!(chain.filter(1).unwrap().lock().id(), a);
    }
}
