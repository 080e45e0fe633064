//! A single instant of pipeline output: a property bag, a position, and two
//! LIFO resolver stacks that lazily build the image/audio buffers a consumer
//! eventually reads (spec §3.4, §4.4).

use std::any::Any;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::properties::{Properties, PropertiesHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Rgb24,
    Rgba32,
    Yuv420p,
    Yuv422p,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioFormat {
    S16,
    S32,
    F32,
}

/// A reference-counted image buffer. Cloning is cheap (an `Arc` bump); two
/// clones alias the same bytes until one side asks for a writable copy.
#[derive(Clone)]
pub struct ImageBuffer {
    data: Arc<Vec<u8>>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl ImageBuffer {
    pub fn new(data: Vec<u8>, format: ImageFormat, width: u32, height: u32, stride: u32) -> Self {
        Self { data: Arc::new(data), format, width, height, stride }
    }

    /// A solid black frame of the requested geometry — the fallback when
    /// both the resolver stack and the cache are empty (spec §4.4 step 2).
    pub fn black(format: ImageFormat, width: u32, height: u32) -> Self {
        let bpp = match format {
            ImageFormat::Rgb24 => 3,
            ImageFormat::Rgba32 => 4,
            ImageFormat::Yuv420p => 1, // luma-plane-equivalent size; chroma appended by real codecs
            ImageFormat::Yuv422p => 1,
        };
        let stride = width * bpp;
        let size = (stride * height) as usize;
        Self::new(vec![0u8; size], format, width, height, stride)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Return a buffer guaranteed not to alias any other clone, duplicating
    /// the bytes only if necessary (spec §4.4 step 4).
    pub fn into_writable(self) -> Self {
        if self.is_shared() {
            Self { data: Arc::new((*self.data).clone()), ..self }
        } else {
            self
        }
    }
}

/// A width·height byte plane; absence means the frame is fully opaque.
#[derive(Clone)]
pub struct AlphaBuffer {
    data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl AlphaBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self { data: Arc::new(data), width, height }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Clone)]
pub struct AudioBuffer {
    data: Arc<Vec<f32>>,
    pub format: AudioFormat,
    pub frequency: u32,
    pub channels: u16,
    pub samples: usize,
}

impl AudioBuffer {
    pub fn new(data: Vec<f32>, format: AudioFormat, frequency: u32, channels: u16, samples: usize) -> Self {
        Self { data: Arc::new(data), format, frequency, channels, samples }
    }

    pub fn silence(frequency: u32, channels: u16, samples: usize) -> Self {
        Self::new(vec![0.0; samples * channels as usize], AudioFormat::F32, frequency, channels, samples)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    pub fn into_writable(self) -> Self {
        if self.is_shared() {
            Self { data: Arc::new((*self.data).clone()), ..self }
        } else {
            self
        }
    }
}

/// A resolver popped off `image_stack`. Each filter pushes one of these in
/// process order; because the stack is LIFO, execution runs in reverse —
/// the last-attached filter's resolver runs first and recurses down into
/// the producer's own resolver at the bottom.
pub type ImageResolver =
    Box<dyn FnMut(&mut Frame, ImageFormat, u32, u32, bool) -> Result<ImageBuffer> + Send>;

pub type AudioResolver =
    Box<dyn FnMut(&mut Frame, AudioFormat, u32, u16, usize) -> Result<AudioBuffer> + Send>;

/// Converts a resolved image to a different format. Registered by producers
/// that know their native format and the profile's target format differ;
/// absent, a format mismatch is a hard error rather than a silent identity
/// pass-through.
pub type ImageConverter = Box<dyn Fn(&ImageBuffer, ImageFormat) -> Result<ImageBuffer> + Send>;

pub struct Frame {
    pub properties: Properties,
    position: i64,
    image_stack: Vec<ImageResolver>,
    audio_stack: Vec<AudioResolver>,
    service_stack: Vec<Arc<dyn Any + Send + Sync>>,
    cached_image: Option<ImageBuffer>,
    cached_alpha: Option<AlphaBuffer>,
    cached_audio: Option<AudioBuffer>,
    convert_image: Option<ImageConverter>,
    image_resolved: bool,
    audio_resolved: bool,
    closed: bool,
    /// 0 means "same as consumer" (spec §3.4).
    aspect_ratio: f64,
}

impl Frame {
    /// A new frame at `position`, inheriting properties from the producing
    /// service.
    pub fn new(position: i64, service_properties: PropertiesHandle) -> Self {
        let mut properties = Properties::new();
        properties.inherit(service_properties);
        Self {
            properties,
            position,
            image_stack: Vec::new(),
            audio_stack: Vec::new(),
            service_stack: Vec::new(),
            cached_image: None,
            cached_alpha: None,
            cached_audio: None,
            convert_image: None,
            image_resolved: false,
            audio_resolved: false,
            closed: false,
            aspect_ratio: 0.0,
        }
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn set_aspect_ratio(&mut self, ratio: f64) {
        self.aspect_ratio = ratio;
    }

    pub fn set_convert_image(&mut self, converter: ImageConverter) {
        self.convert_image = Some(converter);
    }

    /// Register the next image resolver stage. Called by filters before any
    /// read of the frame happens, in process order (so the stack ends up
    /// reversed relative to attach order — see [`ImageResolver`]).
    pub fn push_get_image(&mut self, resolver: ImageResolver) {
        self.image_stack.push(resolver);
    }

    pub fn push_audio(&mut self, resolver: AudioResolver) {
        self.audio_stack.push(resolver);
    }

    pub fn push_service(&mut self, ctx: Arc<dyn Any + Send + Sync>) {
        self.service_stack.push(ctx);
    }

    pub fn pop_service(&mut self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.service_stack.pop()
    }

    /// Resolve the frame's image. Idempotent: once resolved, repeat calls
    /// return the same (refcount-shared) buffer regardless of the arguments
    /// passed the second time, per spec §3.4's invariant that downstream
    /// services may be holding the earlier pointer.
    pub fn get_image(&mut self, format: ImageFormat, w: u32, h: u32, writable: bool) -> Result<ImageBuffer> {
        if self.image_resolved {
            let img = self.cached_image.clone().expect("image_resolved implies a cached image");
            return Ok(if writable { img.into_writable() } else { img });
        }

        let raw = if let Some(mut resolver) = self.image_stack.pop() {
            resolver(self, format, w, h, writable)?
        } else if let Some(img) = self.cached_image.clone() {
            img
        } else {
            ImageBuffer::black(format, w, h)
        };

        let converted = if raw.format != format {
            match &self.convert_image {
                Some(conv) => conv(&raw, format)?,
                None => {
                    return Err(Error::FormatUnsupported(format!(
                        "no converter registered for {:?} -> {:?}",
                        raw.format, format
                    )))
                }
            }
        } else {
            raw
        };

        let result = if writable { converted.into_writable() } else { converted };
        self.cached_image = Some(result.clone());
        self.image_resolved = true;
        Ok(result)
    }

    /// Symmetric to [`Frame::get_image`] for the audio_stack.
    pub fn get_audio(&mut self, format: AudioFormat, freq: u32, channels: u16, samples: usize) -> Result<AudioBuffer> {
        if self.audio_resolved {
            return Ok(self.cached_audio.clone().expect("audio_resolved implies a cached buffer"));
        }

        let resolved = if let Some(mut resolver) = self.audio_stack.pop() {
            resolver(self, format, freq, channels, samples)?
        } else if let Some(buf) = self.cached_audio.clone() {
            buf
        } else {
            AudioBuffer::silence(freq, channels, samples)
        };

        self.cached_audio = Some(resolved.clone());
        self.audio_resolved = true;
        Ok(resolved)
    }

    /// Replace the cached image, dropping the previous buffer (which runs
    /// its destructor, i.e. frees its bytes, the moment nothing else holds
    /// it). This seeds the stack-empty fallback (spec §4.4 step 2); it does
    /// *not* mark the image resolved, so a filter attached after the
    /// producer calls this still gets a chance to push a resolver ahead of
    /// it before any consumer actually reads the image.
    pub fn set_image(&mut self, image: ImageBuffer) {
        self.cached_image = Some(image);
    }

    pub fn set_alpha(&mut self, alpha: AlphaBuffer) {
        self.cached_alpha = Some(alpha);
    }

    pub fn alpha(&self) -> Option<&AlphaBuffer> {
        self.cached_alpha.as_ref()
    }

    /// See [`Frame::set_image`]: seeds the fallback without marking the
    /// audio resolved.
    pub fn set_audio(&mut self, audio: AudioBuffer) {
        self.cached_audio = Some(audio);
    }

    /// Duplicate this frame. `deep = false` aliases the cached buffers
    /// (refcount bump); `deep = true` forces a fresh allocation for each.
    /// Either way the clone starts with empty resolver stacks — cloning is
    /// meant for an already-produced frame handed to more than one
    /// consumer, not for one still mid-resolution.
    pub fn clone_frame(&self, deep: bool) -> Frame {
        let mut properties = Properties::new();
        for (k, v) in self.properties.public_entries() {
            properties.set_string(k, v);
        }
        Frame {
            properties,
            position: self.position,
            image_stack: Vec::new(),
            audio_stack: Vec::new(),
            service_stack: Vec::new(),
            cached_image: if deep {
                self.cached_image.clone().map(ImageBuffer::into_writable)
            } else {
                self.cached_image.clone()
            },
            cached_alpha: self.cached_alpha.clone(),
            cached_audio: if deep {
                self.cached_audio.clone().map(AudioBuffer::into_writable)
            } else {
                self.cached_audio.clone()
            },
            convert_image: None,
            image_resolved: self.image_resolved,
            audio_resolved: self.audio_resolved,
            closed: false,
            aspect_ratio: self.aspect_ratio,
        }
    }

    /// `true` once the first `get_image` has resolved the image state.
    pub fn is_image_resolved(&self) -> bool {
        self.image_resolved
    }

    pub fn is_audio_resolved(&self) -> bool {
        self.audio_resolved
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Explicit, idempotent close: drops cached buffers now instead of
    /// waiting on the frame's own `Drop`. `IndexMap` already preserves
    /// insertion order, so draining the property bag here runs data
    /// destructors in the order spec'd without any extra bookkeeping.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.cached_image = None;
        self.cached_alpha = None;
        self.cached_audio = None;
        self.image_stack.clear();
        self.audio_stack.clear();
        self.service_stack.clear();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;

    fn service_props() -> PropertiesHandle {
        Arc::new(RwLock::new(Properties::new()))
    }

    #[test]
    fn empty_stack_and_no_cache_returns_black_image() {
        let mut frame = Frame::new(0, service_props());
        let img = frame.get_image(ImageFormat::Rgb24, 4, 2, false).unwrap();
        assert!(img.as_slice().iter().all(|&b| b == 0));
        assert_eq!(img.width, 4);
        assert_eq!(img.height, 2);
    }

    #[test]
    fn get_image_is_idempotent() {
        let mut frame = Frame::new(0, service_props());
        let first = frame.get_image(ImageFormat::Rgb24, 4, 2, false).unwrap();
        let second = frame.get_image(ImageFormat::Rgba32, 999, 999, false).unwrap();
        assert_eq!(first.width, second.width);
        assert_eq!(first.format, second.format);
    }

    #[test]
    fn resolver_stack_runs_lifo() {
        let mut frame = Frame::new(0, service_props());
        let order: Arc<parking_lot::Mutex<Vec<u32>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        frame.push_get_image(Box::new(move |f, fmt, w, h, writable| {
            o1.lock().push(1);
            f.get_image(fmt, w, h, writable)
        }));
        let o2 = order.clone();
        frame.push_get_image(Box::new(move |f, fmt, w, h, writable| {
            o2.lock().push(2);
            f.get_image(fmt, w, h, writable)
        }));

        let _ = frame.get_image(ImageFormat::Rgb24, 4, 2, false).unwrap();
        // Last pushed (2) runs first since the stack is LIFO.
        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[test]
    fn writable_request_on_shared_buffer_copies() {
        let mut frame = Frame::new(0, service_props());
        let first = frame.get_image(ImageFormat::Rgb24, 2, 2, false).unwrap();
        assert!(first.is_shared());
        let writable = frame.get_image(ImageFormat::Rgb24, 2, 2, true).unwrap();
        assert!(!Arc::ptr_eq(&first.data, &writable.data));
    }

    #[test]
    fn missing_converter_on_format_mismatch_is_an_error() {
        let mut frame = Frame::new(0, service_props());
        frame.push_get_image(Box::new(|_f, _fmt, w, h, _writable| {
            Ok(ImageBuffer::black(ImageFormat::Yuv420p, w, h))
        }));
        let result = frame.get_image(ImageFormat::Rgb24, 4, 2, false);
        assert!(matches!(result, Err(Error::FormatUnsupported(_))));
    }

    #[test]
    fn close_drops_cached_buffers_and_is_idempotent() {
        let mut frame = Frame::new(0, service_props());
        let _ = frame.get_image(ImageFormat::Rgb24, 2, 2, false).unwrap();
        frame.close();
        assert!(frame.is_closed());
        frame.close();
    }

    #[test]
    fn shallow_clone_aliases_deep_clone_copies() {
        let mut frame = Frame::new(0, service_props());
        let img = frame.get_image(ImageFormat::Rgb24, 2, 2, false).unwrap();
        drop(img);

        let shallow = frame.clone_frame(false);
        assert!(Arc::ptr_eq(
            &frame.cached_image.as_ref().unwrap().data,
            &shallow.cached_image.as_ref().unwrap().data
        ));

        let deep = frame.clone_frame(true);
        assert!(!Arc::ptr_eq(
            &frame.cached_image.as_ref().unwrap().data,
            &deep.cached_image.as_ref().unwrap().data
        ));
    }
}
