//! Ordered, keyed, typed property store (spec §3.1, §4.1).
//!
//! Values coerce to/from strings the way the original framework does: a
//! property is always readable as a string, and reading it as `i64`/`f64`/
//! position/rect/color either returns the exact stored variant or parses the
//! string representation. Insertion order is preserved so "every key with
//! prefix X" iteration is stable — that's what backs [`Properties::pass_prefix`].

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

/// Shared handle to another property bag, used for one-way inheritance.
pub type PropertiesHandle = Arc<RwLock<Properties>>;

/// An opaque, reference-counted data value. Rust's `Drop` takes the place of
/// the original's explicit per-value destructor callback: the backing
/// allocation is freed exactly when the last `Arc` to it goes away, which
/// happens when the key is overwritten, the bag is dropped, or the value is
/// cleared explicitly.
pub type DataValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Hold,
    Linear,
    Smooth,
}

/// A keyframe position. Positions stored as a percentage resolve against the
/// animation's length at read time; negative frame positions count from the
/// end (spec §3.1.1 rule 3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyPosition {
    Frame(i64),
    Percent(f64),
}

impl KeyPosition {
    fn resolve(self, length: i64) -> i64 {
        match self {
            KeyPosition::Frame(f) if f < 0 => f + length,
            KeyPosition::Frame(f) => f,
            KeyPosition::Percent(p) => ((p / 100.0) * length as f64).round() as i64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keyframe {
    pub position: KeyPosition,
    pub value: f64,
    pub interpolation: Interpolation,
}

/// A sorted sequence of keyframes, evaluated per spec §3.1.1.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Animation {
    keyframes: Vec<Keyframe>,
}

impl Animation {
    pub fn new(keyframes: Vec<Keyframe>) -> Self {
        Self { keyframes }
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Evaluate the animation at frame `position` within a clip of `length`
    /// frames. `length` resolves percentage-positioned keyframes and the
    /// negative-position convention.
    pub fn value_at(&self, position: i64, length: i64) -> f64 {
        if self.keyframes.is_empty() {
            return 0.0;
        }
        if self.keyframes.len() == 1 {
            return self.keyframes[0].value;
        }
        let resolved: Vec<(i64, Interpolation, f64)> = self
            .keyframes
            .iter()
            .map(|k| (k.position.resolve(length), k.interpolation, k.value))
            .collect();
        interpolate_sequence(&resolved, position)
    }
}

/// Bracket `position` between two resolved `(position, interpolation, value)`
/// entries and apply the left entry's interpolation (spec §3.1.1 steps 2-4).
/// Shared by [`Animation::value_at`] and the per-component rect/colour
/// evaluators below so hold/linear/smooth semantics stay in exactly one
/// place.
fn interpolate_sequence(resolved: &[(i64, Interpolation, f64)], position: i64) -> f64 {
    if resolved.is_empty() {
        return 0.0;
    }
    if resolved.len() == 1 {
        return resolved[0].2;
    }

    let p = position.clamp(resolved.first().unwrap().0, resolved.last().unwrap().0);

    // Locate the bracketing pair (k_i, k_i+1) with k_i.pos <= p < k_i+1.pos.
    let mut idx = 0;
    for (i, w) in resolved.windows(2).enumerate() {
        if p >= w[0].0 && (p < w[1].0 || i == resolved.len() - 2) {
            idx = i;
            break;
        }
    }
    let (pos_i, interp_i, val_i) = resolved[idx];
    let (pos_next, _, val_next) = resolved[idx + 1];

    match interp_i {
        Interpolation::Hold => val_i,
        Interpolation::Linear => {
            if pos_next == pos_i {
                val_i
            } else {
                let t = (p - pos_i) as f64 / (pos_next - pos_i) as f64;
                val_i + (val_next - val_i) * t
            }
        }
        Interpolation::Smooth => {
            let p0 = if idx == 0 { resolved[idx].2 } else { resolved[idx - 1].2 };
            let p1 = val_i;
            let p2 = val_next;
            let p3 = if idx + 2 < resolved.len() { resolved[idx + 2].2 } else { val_next };
            let t = if pos_next == pos_i {
                0.0
            } else {
                (p - pos_i) as f64 / (pos_next - pos_i) as f64
            };
            catmull_rom(p0, p1, p2, p3, t)
        }
    }
}

fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

/// A rectangle with an opacity channel, as produced by `rect`-typed
/// properties (spec §4.1's `get_rect`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub opacity: f64,
}

/// An RGBA colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    fn named(name: &str) -> Option<Self> {
        match name {
            "white" => Some(Self::rgb(255, 255, 255)),
            "black" => Some(Self::rgb(0, 0, 0)),
            "red" => Some(Self::rgb(255, 0, 0)),
            "green" => Some(Self::rgb(0, 255, 0)),
            "blue" => Some(Self::rgb(0, 0, 255)),
            _ => None,
        }
    }
}

/// A rect-typed keyframe: every component (`x`, `y`, `w`, `h`, `opacity`)
/// shares one position/interpolation but is interpolated independently
/// (spec §3.1.1 step 5).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectKeyframe {
    pub position: KeyPosition,
    pub value: Rect,
    pub interpolation: Interpolation,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RectAnimation {
    keyframes: Vec<RectKeyframe>,
}

impl RectAnimation {
    pub fn new(keyframes: Vec<RectKeyframe>) -> Self {
        Self { keyframes }
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Evaluate each component independently, then clamp to the native
    /// range: `w`/`h` cannot go negative and `opacity` stays in `[0, 1]`
    /// regardless of what the bracketing keyframes or the smooth spline
    /// would otherwise produce (spec §3.1.1 step 5).
    pub fn value_at(&self, position: i64, length: i64) -> Rect {
        if self.keyframes.is_empty() {
            return Rect { x: 0.0, y: 0.0, w: 0.0, h: 0.0, opacity: 1.0 };
        }
        let component = |extract: fn(&Rect) -> f64| -> f64 {
            let resolved: Vec<(i64, Interpolation, f64)> = self
                .keyframes
                .iter()
                .map(|k| (k.position.resolve(length), k.interpolation, extract(&k.value)))
                .collect();
            interpolate_sequence(&resolved, position)
        };
        Rect {
            x: component(|r| r.x),
            y: component(|r| r.y),
            w: component(|r| r.w).max(0.0),
            h: component(|r| r.h).max(0.0),
            opacity: component(|r| r.opacity).clamp(0.0, 1.0),
        }
    }
}

/// A colour-typed keyframe, symmetric to [`RectKeyframe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorKeyframe {
    pub position: KeyPosition,
    pub value: Color,
    pub interpolation: Interpolation,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColorAnimation {
    keyframes: Vec<ColorKeyframe>,
}

impl ColorAnimation {
    pub fn new(keyframes: Vec<ColorKeyframe>) -> Self {
        Self { keyframes }
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Evaluate each channel independently as `f64`, then clamp and round
    /// to the native `0..=255` byte range (spec §3.1.1 step 5).
    pub fn value_at(&self, position: i64, length: i64) -> Color {
        if self.keyframes.is_empty() {
            return Color { r: 0, g: 0, b: 0, a: 255 };
        }
        let component = |extract: fn(&Color) -> f64| -> f64 {
            let resolved: Vec<(i64, Interpolation, f64)> = self
                .keyframes
                .iter()
                .map(|k| (k.position.resolve(length), k.interpolation, extract(&k.value)))
                .collect();
            interpolate_sequence(&resolved, position)
        };
        let byte = |v: f64| v.round().clamp(0.0, 255.0) as u8;
        Color {
            r: byte(component(|c| c.r as f64)),
            g: byte(component(|c| c.g as f64)),
            b: byte(component(|c| c.b as f64)),
            a: byte(component(|c| c.a as f64)),
        }
    }
}

fn format_rect(r: &Rect) -> String {
    format!("{} {} {} {} {}", r.x, r.y, r.w, r.h, r.opacity)
}

fn format_color(c: &Color) -> String {
    format!("#{:02X}{:02X}{:02X}{:02X}", c.a, c.r, c.g, c.b)
}

#[derive(Clone)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    /// A frame index, kept distinct from `Int` so `set(key, Value::Position)`
    /// round-trips through timecode formatting unambiguously.
    Position(i64),
    Data(DataValue),
    Animated(Animation),
    AnimatedRect(RectAnimation),
    AnimatedColor(ColorAnimation),
}

impl Value {
    /// Render the value as a string the way a freshly-parsed property would
    /// read back — numbers format in the POSIX `.`-decimal locale regardless
    /// of host locale (spec §3.1 invariant).
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f}"),
            Value::Position(p) => p.to_string(),
            Value::Data(_) => String::new(),
            Value::Animated(a) => a
                .keyframes
                .first()
                .map(|k| format!("{}", k.value))
                .unwrap_or_default(),
            Value::AnimatedRect(a) => a.keyframes.first().map(|k| format_rect(&k.value)).unwrap_or_default(),
            Value::AnimatedColor(a) => a.keyframes.first().map(|k| format_color(&k.value)).unwrap_or_default(),
        }
    }
}

type Listener = Box<dyn Fn(&str) + Send + Sync>;

/// A single property bag, as owned by every [`crate::service::Service`] and
/// every [`crate::frame::Frame`].
pub struct Properties {
    entries: IndexMap<String, Value>,
    parent: Option<PropertiesHandle>,
    listeners: Vec<Listener>,
    event_queue: VecDeque<String>,
    dispatching: bool,
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

impl Properties {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            parent: None,
            listeners: Vec::new(),
            event_queue: VecDeque::new(),
            dispatching: false,
        }
    }

    /// Point this bag at a parent for read-fallback. One-way: writes always
    /// land on `self`. The caller is responsible for not forming a cycle —
    /// `inherit` itself cannot detect one since the parent handle is opaque
    /// from here, but a bag can never become its own ancestor through this
    /// API alone (each call only ever sets one pointer, never composes two
    /// bags transitively on the caller's behalf).
    pub fn inherit(&mut self, parent: PropertiesHandle) {
        self.parent = Some(parent);
    }

    /// Alias for [`Properties::inherit`] — the name the original framework
    /// uses for this operation.
    pub fn mirror(&mut self, parent: PropertiesHandle) {
        self.inherit(parent);
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.entries.get_index(index).map(|(k, _)| k.as_str())
    }

    pub fn index_for_key(&self, key: &str) -> Option<usize> {
        self.entries.get_index_of(key)
    }

    fn fire(&mut self, key: &str) {
        self.event_queue.push_back(key.to_string());
        if self.dispatching {
            // Re-entrant write: queued, processed once the outer dispatch loop
            // drains back to us.
            return;
        }
        self.dispatching = true;
        while let Some(k) = self.event_queue.pop_front() {
            for listener in &self.listeners {
                listener(&k);
            }
        }
        self.dispatching = false;
    }

    pub fn on_property_changed(&mut self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Store `value` under `key`, overwriting any previous value (whose data
    /// destructor, if any, then drops) and firing a property-changed event.
    pub fn set(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
        self.fire(key);
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.set(key, Value::String(value.into()));
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.set(key, Value::Int(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.set(key, Value::Float(value));
    }

    pub fn set_position(&mut self, key: &str, value: i64) {
        self.set(key, Value::Position(value));
    }

    pub fn set_data(&mut self, key: &str, value: DataValue) {
        self.set(key, Value::Data(value));
    }

    pub fn set_animation(&mut self, key: &str, animation: Animation) {
        self.set(key, Value::Animated(animation));
    }

    pub fn set_rect_animation(&mut self, key: &str, animation: RectAnimation) {
        self.set(key, Value::AnimatedRect(animation));
    }

    pub fn set_color_animation(&mut self, key: &str, animation: ColorAnimation) {
        self.set(key, Value::AnimatedColor(animation));
    }

    /// Remove `key` from this bag (not the parent). Running a value's
    /// destructor early is just dropping the returned `Value`.
    pub fn clear(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.shift_remove(key);
        if removed.is_some() {
            self.fire(key);
        }
        removed
    }

    fn local(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Read `key` as a string, falling back to the parent bag if absent here
    /// and there is a parent (spec §3.1 inheritance). Returns `None` only
    /// when the key is absent along the whole chain.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.local(key) {
            return Some(v.to_display_string());
        }
        self.parent.as_ref().and_then(|p| p.read().get(key))
    }

    pub fn get_data(&self, key: &str) -> Option<DataValue> {
        match self.local(key) {
            Some(Value::Data(d)) => Some(d.clone()),
            Some(_) => None,
            None => self.parent.as_ref().and_then(|p| p.read().get_data(key)),
        }
    }

    /// Coerce to `i64`: accepts decimal (optionally signed), `0x`-prefixed
    /// hex, and trims whitespace; anything else (including absence) yields
    /// `0` (spec §4.1 failure semantics — missing properties never error).
    pub fn get_int(&self, key: &str) -> i64 {
        match self.get(key) {
            None => 0,
            Some(s) => parse_int(s.trim()),
        }
    }

    /// Coerce to `f64` using a locale-independent, `.`-decimal parse.
    pub fn get_float(&self, key: &str) -> f64 {
        match self.get(key) {
            None => 0.0,
            Some(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        }
    }

    /// Coerce to a frame position. `fps` is needed to convert `Ns`/`HH:MM:SS`
    /// forms; pass `1.0` when the key is already frame-denominated.
    pub fn get_position(&self, key: &str, fps: f64) -> i64 {
        match self.get(key) {
            None => 0,
            Some(s) => parse_position(s.trim(), fps),
        }
    }

    /// Coerce to a `Rect`, resolving `%`-suffixed components against
    /// `container_w`/`container_h`.
    pub fn get_rect(&self, key: &str, container_w: f64, container_h: f64) -> Rect {
        match self.get(key) {
            None => Rect { x: 0.0, y: 0.0, w: container_w, h: container_h, opacity: 1.0 },
            Some(s) => parse_rect(s.trim(), container_w, container_h),
        }
    }

    pub fn get_color(&self, key: &str) -> Color {
        match self.get(key) {
            None => Color::rgb(0, 0, 0),
            Some(s) => parse_color(s.trim()).unwrap_or(Color::rgb(0, 0, 0)),
        }
    }

    /// Evaluate `key` as an animated value at `position` within a clip of
    /// `length` frames. Non-animated values ignore `position`/`length` and
    /// coerce exactly like [`Properties::get_float`].
    pub fn get_animated(&self, key: &str, position: i64, length: i64) -> f64 {
        if let Some(Value::Animated(a)) = self.local(key) {
            return a.value_at(position, length);
        }
        if let Some(p) = &self.parent {
            if self.local(key).is_none() {
                return p.read().get_animated(key, position, length);
            }
        }
        self.get_float(key)
    }

    /// As [`Properties::get_animated`], but for rect-typed properties:
    /// consults a component-wise keyframe interpolation when `key` holds an
    /// [`AnimatedRect`](Value::AnimatedRect) value, falling back to the
    /// static [`Properties::get_rect`] parse otherwise.
    pub fn get_animated_rect(&self, key: &str, position: i64, length: i64, container_w: f64, container_h: f64) -> Rect {
        if let Some(Value::AnimatedRect(a)) = self.local(key) {
            return a.value_at(position, length);
        }
        if let Some(p) = &self.parent {
            if self.local(key).is_none() {
                return p.read().get_animated_rect(key, position, length, container_w, container_h);
            }
        }
        self.get_rect(key, container_w, container_h)
    }

    /// As [`Properties::get_animated`], but for colour-typed properties.
    pub fn get_animated_color(&self, key: &str, position: i64, length: i64) -> Color {
        if let Some(Value::AnimatedColor(a)) = self.local(key) {
            return a.value_at(position, length);
        }
        if let Some(p) = &self.parent {
            if self.local(key).is_none() {
                return p.read().get_animated_color(key, position, length);
            }
        }
        self.get_color(key)
    }

    /// Copy every key beginning with `prefix` from `donor` into `self`,
    /// optionally stripping the prefix from the destination key.
    pub fn pass_prefix(&mut self, donor: &Properties, prefix: &str, strip: bool) {
        for (k, v) in donor.entries.iter() {
            if let Some(rest) = k.strip_prefix(prefix) {
                let dest = if strip { rest } else { k.as_str() };
                self.set(dest, v.clone());
            }
        }
    }

    /// Copy a comma-separated list of keys from `donor` into `self`.
    pub fn pass_list(&mut self, donor: &Properties, keys: &str) {
        for key in keys.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            if let Some(v) = donor.local(key) {
                self.set(key, v.clone());
            }
        }
    }

    /// `true` if `key` is private (`_`-prefixed) and therefore never
    /// serialised.
    pub fn is_private(key: &str) -> bool {
        key.starts_with('_')
    }

    /// Iterate serialisable (key, string-value) pairs in insertion order,
    /// skipping private keys.
    pub fn public_entries(&self) -> impl Iterator<Item = (&str, String)> {
        self.entries
            .iter()
            .filter(|(k, _)| !Self::is_private(k))
            .map(|(k, v)| (k.as_str(), v.to_display_string()))
    }
}

fn parse_int(s: &str) -> i64 {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).unwrap_or(0);
    }
    s.parse::<i64>().unwrap_or(0)
}

fn parse_position(s: &str, fps: f64) -> i64 {
    if let Some(rest) = s.strip_suffix('s') {
        if let Ok(secs) = rest.trim().parse::<f64>() {
            return (secs * fps).round() as i64;
        }
    }
    if let Some(rest) = s.strip_suffix('f') {
        if let Ok(frames) = rest.trim().parse::<i64>() {
            return frames;
        }
    }
    if s.contains(':') {
        // HH:MM:SS[.ms]
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h: f64 = parts[0].parse().unwrap_or(0.0);
            let m: f64 = parts[1].parse().unwrap_or(0.0);
            let sec: f64 = parts[2].parse().unwrap_or(0.0);
            let total_secs = h * 3600.0 + m * 60.0 + sec;
            return (total_secs * fps).round() as i64;
        }
    }
    parse_int(s)
}

fn parse_rect(s: &str, container_w: f64, container_h: f64) -> Rect {
    // `x%/y%:wxh:o%` form.
    if s.contains('/') && s.contains(':') {
        let segments: Vec<&str> = s.split(':').collect();
        if segments.len() >= 2 {
            let xy: Vec<&str> = segments[0].split('/').collect();
            let wh: Vec<&str> = segments[1].split('x').collect();
            if xy.len() == 2 && wh.len() == 2 {
                let x = resolve_component(xy[0], container_w);
                let y = resolve_component(xy[1], container_h);
                let w = resolve_component(wh[0], container_w);
                let h = resolve_component(wh[1], container_h);
                let opacity = segments
                    .get(2)
                    .map(|o| resolve_component(o, 1.0))
                    .unwrap_or(1.0);
                return Rect { x, y, w, h, opacity };
            }
        }
    }
    // `x y w h [opacity]` form.
    let fields: Vec<&str> = s.split_whitespace().collect();
    if fields.len() >= 4 {
        let x = resolve_component(fields[0], container_w);
        let y = resolve_component(fields[1], container_h);
        let w = resolve_component(fields[2], container_w);
        let h = resolve_component(fields[3], container_h);
        let opacity = fields.get(4).map(|o| resolve_component(o, 1.0)).unwrap_or(1.0);
        return Rect { x, y, w, h, opacity };
    }
    Rect { x: 0.0, y: 0.0, w: container_w, h: container_h, opacity: 1.0 }
}

fn resolve_component(s: &str, container: f64) -> f64 {
    if let Some(pct) = s.strip_suffix('%') {
        pct.trim().parse::<f64>().unwrap_or(0.0) / 100.0 * container
    } else {
        s.trim().parse::<f64>().unwrap_or(0.0)
    }
}

fn parse_color(s: &str) -> Option<Color> {
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex_color(hex, false);
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return parse_hex_color(hex, true);
    }
    if let Some(named) = Color::named(&s.to_lowercase()) {
        return Some(named);
    }
    if let Ok(n) = s.parse::<u32>() {
        let bytes = n.to_be_bytes();
        return Some(Color { r: bytes[0], g: bytes[1], b: bytes[2], a: bytes[3] });
    }
    None
}

/// `rgbe_trailing` selects `0xRRGGBBAA` byte order; `#`-prefixed forms are
/// `#RRGGBB` or `#AARRGGBB`.
fn parse_hex_color(hex: &str, rgbe_trailing: bool) -> Option<Color> {
    match hex.len() {
        6 => {
            let v = u32::from_str_radix(hex, 16).ok()?;
            Some(Color { r: (v >> 16) as u8, g: (v >> 8) as u8, b: v as u8, a: 255 })
        }
        8 if rgbe_trailing => {
            let v = u32::from_str_radix(hex, 16).ok()?;
            Some(Color {
                r: (v >> 24) as u8,
                g: (v >> 16) as u8,
                b: (v >> 8) as u8,
                a: v as u8,
            })
        }
        8 => {
            let v = u32::from_str_radix(hex, 16).ok()?;
            Some(Color {
                a: (v >> 24) as u8,
                r: (v >> 16) as u8,
                g: (v >> 8) as u8,
                b: v as u8,
            })
        }
        _ => None,
    }
}
