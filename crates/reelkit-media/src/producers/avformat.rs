//! `ffmpeg-the-third`-backed media producer. Thin adapter: demuxing,
//! decoding, and pixel-format conversion all stay inside `ffmpeg-the-third`
//! (spec.md §1's non-goals); this module only wraps its output in `Frame`
//! resolvers and a `Producer` that the rest of `reelkit-core` can pull from
//! by absolute frame index.
//!
//! Grounded on `velocut-media::decode::LiveDecoder`: the same
//! seek-then-burn-through-the-GOP strategy for per-index video decode, with
//! the audio track decoded once up front (§"Audio FIFO" in
//! `velocut-media::encode` does the equivalent buffering on the encode
//! side) and sliced per frame with the same sample-accounting
//! [`crate::rate_decouple::RateDecoupler::samples_for_index`] machinery
//! uses, so audio stays drift-free across the whole clip.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::resampling::{context::Context as ResampleContext};
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use parking_lot::{Mutex, RwLock};

use reelkit_core::error::{Error, Result};
use reelkit_core::frame::{AudioBuffer, AudioFormat, Frame, ImageBuffer, ImageFormat};
use reelkit_core::producer::{Producer, ProducerState};
use reelkit_core::profile::Profile;
use reelkit_core::properties::Properties;
use reelkit_core::rate_decouple::RateDecoupler;
use reelkit_core::service::{FilterChain, Service, ServiceId, ServiceKind};

/// Decoded audio for the whole clip, at the container's native rate, laid
/// out interleaved. Decoded once at open time (§"Audio FIFO" in
/// `velocut-media::encode` buffers incrementally during encode; a playback
/// producer can afford to do it eagerly since it isn't racing a disk
/// writer).
struct AudioTrack {
    samples: Vec<f32>,
    frequency: u32,
    channels: u16,
}

pub struct AvformatProducer {
    id: ServiceId,
    properties: Properties,
    state: ProducerState,
    filter_chain: FilterChain,
    path: PathBuf,
    ictx: ffmpeg::format::context::Input,
    video_idx: usize,
    tb_num: i32,
    tb_den: i32,
    native_w: u32,
    native_h: u32,
    scaler: SwsContext,
    fps: f64,
    last_pts: i64,
    audio: Option<AudioTrack>,
}

impl AvformatProducer {
    pub fn open(path: impl AsRef<Path>, fps: f64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ictx = input(&path).map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;

        let video_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| Error::NotFound(format!("{}: no video stream", path.display())))?
            .index();

        let (tb_num, tb_den, raw_w, raw_h, duration_secs) = {
            let stream = ictx.stream(video_idx).unwrap();
            let tb = stream.time_base();
            let (w, h) = unsafe {
                let p = stream.parameters().as_ptr();
                ((*p).width as u32, (*p).height as u32)
            };
            let duration = stream.duration() as f64 * tb.numerator() as f64 / tb.denominator() as f64;
            (tb.numerator(), tb.denominator(), w, h, duration.max(0.0))
        };

        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(ictx.stream(video_idx).unwrap().parameters())
            .map_err(|e| Error::Fatal(e.to_string()))?;
        let decoder = dec_ctx.decoder().video().map_err(|e| Error::Fatal(e.to_string()))?;

        let scaler = SwsContext::get(decoder.format(), decoder.width(), decoder.height(), Pixel::YUV420P, raw_w, raw_h, Flags::BILINEAR)
            .map_err(|e| Error::Fatal(e.to_string()))?;

        let audio = decode_audio_track(&path).ok();
        let length = ((duration_secs * fps).round() as i64).max(1);

        Ok(Self {
            id: ServiceId::new(),
            properties: Properties::new(),
            state: ProducerState::new(length),
            filter_chain: FilterChain::new(),
            path,
            ictx,
            video_idx,
            tb_num,
            tb_den,
            native_w: raw_w,
            native_h: raw_h,
            scaler,
            fps,
            last_pts: -1,
            audio,
        })
    }

    fn pts_for_index(&self, index: i64) -> i64 {
        let secs = index as f64 / self.fps;
        (secs * self.tb_den as f64 / self.tb_num as f64) as i64
    }

    /// Seek to the frame closest to `index` and decode forward to it,
    /// mirroring `LiveDecoder::next_frame`'s GOP burn-through (decode every
    /// frame until the target PTS, but only scale the one we keep).
    fn decode_video_at(&mut self, index: i64) -> Result<ImageBuffer> {
        let target_pts = self.pts_for_index(index);
        if target_pts < self.last_pts || target_pts - self.last_pts > 50 {
            let _ = self.ictx.seek(target_pts, ..=target_pts);
        }

        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(self.ictx.stream(self.video_idx).unwrap().parameters())
            .map_err(|e| Error::Fatal(e.to_string()))?;
        let mut decoder = dec_ctx.decoder().video().map_err(|e| Error::Fatal(e.to_string()))?;

        let mut last: Option<ffmpeg::util::frame::video::Video> = None;
        for (stream, packet) in self.ictx.packets().flatten() {
            if stream.index() != self.video_idx {
                continue;
            }
            if decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.pts().unwrap_or(self.last_pts + 1);
                self.last_pts = pts;
                last = Some(decoded.clone());
                if pts >= target_pts {
                    break;
                }
            }
            if self.last_pts >= target_pts {
                break;
            }
        }

        let Some(decoded) = last else {
            return Ok(ImageBuffer::black(ImageFormat::Yuv420p, self.native_w, self.native_h));
        };

        let mut scaled = ffmpeg::util::frame::video::Video::empty();
        self.scaler.run(&decoded, &mut scaled).map_err(|e| Error::Fatal(e.to_string()))?;

        let (w, h) = (scaled.plane_width(0), scaled.plane_height(0));
        let yl = (w * h) as usize;
        let cl = yl / 4;
        let mut data = Vec::with_capacity(yl + cl * 2);
        data.extend_from_slice(&scaled.data(0)[..yl]);
        data.extend_from_slice(&scaled.data(1)[..cl]);
        data.extend_from_slice(&scaled.data(2)[..cl]);
        Ok(ImageBuffer::new(data, ImageFormat::Yuv420p, w, h, w))
    }

    fn audio_slice_at(&self, index: i64) -> AudioBuffer {
        let Some(track) = &self.audio else {
            return AudioBuffer::silence(48_000, 2, 0);
        };
        let samples = RateDecoupler::samples_for_index(self.fps, track.frequency, index);
        let channels = track.channels as usize;
        let start_sample = ((index as f64) / self.fps * track.frequency as f64).floor() as usize;
        let start = start_sample.saturating_mul(channels).min(track.samples.len());
        let end = (start + samples * channels).min(track.samples.len());
        let slice = if start < end { track.samples[start..end].to_vec() } else { Vec::new() };
        let actual_samples = slice.len() / channels.max(1);
        AudioBuffer::new(slice, AudioFormat::F32, track.frequency, track.channels, actual_samples)
    }
}

/// Decode the whole audio stream into an interleaved f32 buffer at the
/// stream's native rate/layout; resampling to a consumer's target
/// frequency/channel count is the loader's job (spec §4.13 groups 4-5), not
/// this producer's.
fn decode_audio_track(path: &Path) -> anyhow::Result<AudioTrack> {
    let mut ictx = input(path)?;
    let audio_idx = ictx.streams().best(Type::Audio).ok_or_else(|| anyhow::anyhow!("no audio stream"))?.index();

    let dec_ctx = ffmpeg::codec::context::Context::from_parameters(ictx.stream(audio_idx).unwrap().parameters())?;
    let mut decoder = dec_ctx.decoder().audio()?;

    let frequency = decoder.rate();
    let channels = decoder.channels().max(1);
    let layout = decoder.channel_layout();
    let mut resampler = ResampleContext::get(
        decoder.format(),
        layout,
        frequency,
        ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
        layout,
        frequency,
    )?;

    let mut samples = Vec::new();
    for (stream, packet) in ictx.packets() {
        if stream.index() != audio_idx {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        let mut decoded = ffmpeg::util::frame::audio::Audio::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut resampled = ffmpeg::util::frame::audio::Audio::empty();
            if resampler.run(&decoded, &mut resampled).is_ok() {
                let bytes = resampled.data(0);
                let count = resampled.samples() * channels as usize;
                let floats: &[f32] = bytemuck_cast(bytes, count);
                samples.extend_from_slice(floats);
            }
        }
    }

    Ok(AudioTrack { samples, frequency, channels: channels as u16 })
}

/// Reinterpret a little-endian byte buffer as `count` packed `f32`s,
/// avoiding a `bytemuck` dependency for this one call site.
fn bytemuck_cast(bytes: &[u8], count: usize) -> &[f32] {
    let ptr = bytes.as_ptr() as *const f32;
    unsafe { std::slice::from_raw_parts(ptr, count.min(bytes.len() / 4)) }
}

impl Service for AvformatProducer {
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
        if index < 0 || index >= self.state.length {
            return Ok(None);
        }
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(index, handle);

        let image = match self.decode_video_at(index) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "transient decode failure, substituting black frame");
                frame.properties.set_int("meta.error", 1);
                ImageBuffer::black(ImageFormat::Yuv420p, self.native_w, self.native_h)
            }
        };
        frame.set_image(image);
        frame.set_audio(self.audio_slice_at(index));

        let count = self.filter_chain.filter_count();
        self.filter_chain.apply_filters(&mut frame, count)?;
        Ok(Some(frame))
    }
}

impl Producer for AvformatProducer {
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

/// Registry constructor (`reelkit-core::factory::ProducerCtor` signature).
/// `arg`/`id` (whichever carries the resource string) is the file path.
pub fn ctor(profile: &Profile, id: &str, arg: Option<&str>) -> Result<Arc<Mutex<dyn Producer>>> {
    let path = arg.unwrap_or(id);
    Ok(Arc::new(Mutex::new(AvformatProducer::open(path, profile.fps())?)) as Arc<Mutex<dyn Producer>>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let err = AvformatProducer::open("/nonexistent/reelkit-test-fixture.mp4", 25.0);
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    /// Needs a small real H.264+AAC fixture on disk; exercised only in an
    /// environment with one available, following `velocut-media`'s
    /// practice of integration-testing decode rather than unit-testing it.
    #[test]
    #[ignore = "needs tests/fixtures/clip.mp4, a short H.264+AAC sample"]
    fn decodes_frames_in_position_order() {
        let mut p = AvformatProducer::open("tests/fixtures/clip.mp4", 25.0).unwrap();
        let f0 = p.get_frame(0).unwrap().unwrap();
        let f1 = p.get_frame(1).unwrap().unwrap();
        assert!(f1.position() > f0.position());
    }
}
