//! Plugin repository: discovers services by identifier (spec §4.12).
//!
//! Process-wide state in the original; here, an instance owned by whoever
//! bootstraps the pipeline (a `reelkit-media` registration function, a
//! test harness). `freeze()` makes later registration calls fail, mirroring
//! spec §9's "writes after initialisation are disallowed" for global state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::profile::Profile;
use crate::producer::Producer;
use crate::transition::Transition;

pub type ProducerCtor = Arc<dyn Fn(&Profile, &str, Option<&str>) -> Result<Arc<Mutex<dyn Producer>>> + Send + Sync>;
pub type FilterCtor = Arc<dyn Fn(&Profile, &str, Option<&str>) -> Result<Arc<Mutex<dyn Filter>>> + Send + Sync>;
pub type TransitionCtor = Arc<dyn Fn(&Profile, &str, Option<&str>) -> Result<Arc<Mutex<dyn Transition>>> + Send + Sync>;
pub type ConsumerCtor = Arc<dyn Fn(&Profile, &str, Option<&str>) -> Result<Arc<Mutex<dyn Consumer>>> + Send + Sync>;

#[derive(Default)]
pub struct Repository {
    producers: HashMap<String, ProducerCtor>,
    filters: HashMap<String, FilterCtor>,
    transitions: HashMap<String, TransitionCtor>,
    consumers: HashMap<String, ConsumerCtor>,
    frozen: bool,
}

macro_rules! register_fn {
    ($name:ident, $map:ident, $ctor:ty) => {
        pub fn $name(&mut self, id: impl Into<String>, ctor: $ctor) -> Result<()> {
            if self.frozen {
                return Err(Error::InvalidArgument("repository is frozen".into()));
            }
            let id = id.into();
            tracing::debug!(%id, concat!("registering ", stringify!($name)));
            self.$map.insert(id, ctor);
            Ok(())
        }
    };
}

macro_rules! factory_fn {
    ($name:ident, $map:ident, $trait_obj:ty) => {
        pub fn $name(&self, profile: &Profile, id: &str, arg: Option<&str>) -> Result<Arc<Mutex<$trait_obj>>> {
            let ctor = self.$map.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
            ctor(profile, id, arg)
        }
    };
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    register_fn!(register_producer, producers, ProducerCtor);
    register_fn!(register_filter, filters, FilterCtor);
    register_fn!(register_transition, transitions, TransitionCtor);
    register_fn!(register_consumer, consumers, ConsumerCtor);

    factory_fn!(factory_producer, producers, dyn Producer);
    factory_fn!(factory_filter, filters, dyn Filter);
    factory_fn!(factory_transition, transitions, dyn Transition);
    factory_fn!(factory_consumer, consumers, dyn Consumer);

    pub fn has_producer(&self, id: &str) -> bool {
        self.producers.contains_key(id)
    }

    pub fn has_filter(&self, id: &str) -> bool {
        self.filters.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::ProducerState;
    use crate::properties::Properties;
    use crate::service::{FilterChain, Service, ServiceId, ServiceKind};

    struct Stub {
        id: ServiceId,
        properties: Properties,
        state: ProducerState,
        filter_chain: FilterChain,
    }
    impl Service for Stub {
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
        fn get_frame(&mut self, _index: i64) -> Result<Option<crate::frame::Frame>> {
            Ok(None)
        }
    }
    impl Producer for Stub {
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

    #[test]
    fn unregistered_id_is_not_found() {
        let repo = Repository::new();
        let err = repo.factory_producer(&Profile::PROGRESSIVE_HD, "nope", None);
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[test]
    fn registered_constructor_is_invoked() {
        let mut repo = Repository::new();
        repo.register_producer(
            "stub",
            Arc::new(|_profile, _id, _arg| {
                Ok(Arc::new(Mutex::new(Stub {
                    id: ServiceId::new(),
                    properties: Properties::new(),
                    state: ProducerState::new(10),
                    filter_chain: FilterChain::new(),
                })) as Arc<Mutex<dyn Producer>>)
            }),
        )
        .unwrap();
        let p = repo.factory_producer(&Profile::PROGRESSIVE_HD, "stub", None).unwrap();
        assert_eq!(p.lock().length(), 10);
    }

    #[test]
    fn frozen_repository_rejects_new_registrations() {
        let mut repo = Repository::new();
        repo.freeze();
        let err = repo.register_producer(
            "late",
            Arc::new(|_, _, _| Err(Error::NotFound("unreachable".into()))),
        );
        assert!(err.is_err());
    }
}
