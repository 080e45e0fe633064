//! Concrete external collaborators for `reelkit-core`'s service graph:
//! the producers, filters, transitions, and consumer spec.md's Non-goals
//! push out of the core crate (codec/container I/O, pixel-format kernels,
//! a display sink) but that a running pipeline still needs. `register_all`
//! is the one place that wires every concrete `ctor` into a
//! `reelkit_core::factory::Repository`, mirroring the bootstrap step every
//! real application of the core graph (a CLI, a test harness) performs
//! once at startup before freezing the repository.

pub mod consumers;
pub mod filters;
pub mod producers;
pub mod transitions;

use reelkit_core::error::Result;
use reelkit_core::factory::Repository;

/// Register every producer, filter, transition, and consumer this crate
/// provides under their canonical ids. Idempotent only in the sense that
/// calling it twice on an unfrozen repository just re-inserts the same
/// entries; callers normally call this once, then `repo.freeze()`.
pub fn register_all(repo: &mut Repository) -> Result<()> {
    repo.register_producer("colour", std::sync::Arc::new(producers::color::ctor))?;
    repo.register_producer("color", std::sync::Arc::new(producers::color::ctor))?;
    repo.register_producer("avformat", std::sync::Arc::new(producers::avformat::ctor))?;

    repo.register_filter("colorspace", std::sync::Arc::new(filters::colorspace::ctor))?;
    repo.register_filter("rescale", std::sync::Arc::new(filters::rescale::ctor))?;
    repo.register_filter("resample", std::sync::Arc::new(filters::resample::ctor))?;
    repo.register_filter("deinterlace", std::sync::Arc::new(filters::deinterlace::ctor))?;
    repo.register_filter("channels", std::sync::Arc::new(filters::channels::ctor))?;
    repo.register_filter("loudness", std::sync::Arc::new(filters::loudness::ctor))?;

    repo.register_transition("crossfade", std::sync::Arc::new(transitions::crossfade_ctor))?;
    repo.register_transition("dip_to_black", std::sync::Arc::new(transitions::dip_to_black_ctor))?;
    repo.register_transition("iris", std::sync::Arc::new(transitions::iris_ctor))?;
    repo.register_transition("push", std::sync::Arc::new(transitions::push_ctor))?;
    repo.register_transition("wipe", std::sync::Arc::new(transitions::wipe_ctor))?;

    repo.register_consumer("file", std::sync::Arc::new(consumers::file::ctor))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_core::profile::Profile;

    #[test]
    fn every_registered_id_is_constructible() {
        let mut repo = Repository::new();
        register_all(&mut repo).unwrap();
        assert!(repo.has_producer("colour"));
        assert!(repo.has_producer("avformat"));
        assert!(repo.has_filter("colorspace"));
        assert!(repo.has_filter("loudness"));

        let colour = repo.factory_producer(&Profile::PROGRESSIVE_HD, "colour", Some("red")).unwrap();
        assert_eq!(colour.lock().properties().get_int("dummy_unset_key"), 0);
    }
}
