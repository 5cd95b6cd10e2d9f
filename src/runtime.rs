use crate::shared_types::Color;
use crate::skeleton_data::animation::{RawAnimation, RawCurve};
use crate::skeleton_data::skin::{RawAttachment, RawMesh, RawRegion};
use crate::skeleton_data::RawSkeletonData;
use crate::LoadError;
use macroquad::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

const COLORS: &[macroquad::color::Color] = &[
    GOLD,
    ORANGE,
    PINK,
    RED,
    MAROON,
    GREEN,
    LIME,
    DARKGREEN,
    SKYBLUE,
    BLUE,
    DARKBLUE,
    PURPLE,
    VIOLET,
    DARKPURPLE,
    BEIGE,
    MAGENTA,
];

#[derive(Copy, Clone)]
pub enum DrawFlip {
    None,
    Flipped,
}

pub struct BufferedDrawBatcher {
    vertex_buffer: Vec<Vertex>,
    index_buffer: Vec<u16>,
}

impl BufferedDrawBatcher {
    pub fn new() -> Self {
        Self {
            vertex_buffer: Vec::new(),
            index_buffer: Vec::new(),
        }
    }

    pub fn render_triangles(
        &mut self,
        vertices: impl Iterator<Item = Vertex>,
        indices: impl Iterator<Item = u16>,
        texture: Option<Texture2D>,
    ) {
        self.vertex_buffer.clear();
        self.index_buffer.clear();
        self.vertex_buffer.extend(vertices);
        self.index_buffer.extend(indices);

        let quad_gl = unsafe {
            let InternalGlContext { quad_gl, .. } = get_internal_gl();
            quad_gl
        };

        quad_gl.texture(texture);
        quad_gl.draw_mode(DrawMode::Triangles);
        quad_gl.geometry(&self.vertex_buffer, &self.index_buffer);
    }
}

pub fn tween(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Maps an angle in degrees into `[-180, 180)`.
pub fn wrap_angle(mut angle: f32) -> f32 {
    while angle >= 180.0 {
        angle -= 360.0;
    }
    while angle < -180.0 {
        angle += 360.0;
    }
    angle
}

/// Interpolates along the shortest arc, so 350 -> 10 passes through 0
/// rather than sweeping backwards through 180.
pub fn tween_angle(a: f32, b: f32, t: f32) -> f32 {
    wrap_angle(a + wrap_angle(b - a) * t)
}

const BEZIER_SEGMENTS: usize = 10;

/// Cubic Bezier easing flattened into a forward-differencing table at
/// construction time, so evaluation is a table walk instead of a
/// Newton iteration.
#[derive(Clone, Debug)]
pub struct CubicBezier {
    curves: [f32; 6],
}

impl CubicBezier {
    pub fn new(cx1: f32, cy1: f32, cx2: f32, cy2: f32) -> Self {
        let subdiv_step = 1.0 / BEZIER_SEGMENTS as f32;
        let subdiv_step2 = subdiv_step * subdiv_step;
        let subdiv_step3 = subdiv_step2 * subdiv_step;
        let pre1 = 3.0 * subdiv_step;
        let pre2 = 3.0 * subdiv_step2;
        let pre4 = 6.0 * subdiv_step2;
        let pre5 = 6.0 * subdiv_step3;
        let tmp1x = -cx1 * 2.0 + cx2;
        let tmp1y = -cy1 * 2.0 + cy2;
        let tmp2x = (cx1 - cx2) * 3.0 + 1.0;
        let tmp2y = (cy1 - cy2) * 3.0 + 1.0;
        Self {
            curves: [
                cx1 * pre1 + tmp1x * pre2 + tmp2x * subdiv_step3,
                cy1 * pre1 + tmp1y * pre2 + tmp2y * subdiv_step3,
                tmp1x * pre4 + tmp2x * pre5,
                tmp1y * pre4 + tmp2y * pre5,
                tmp2x * pre5,
                tmp2y * pre5,
            ],
        }
    }

    pub fn evaluate(&self, percent: f32) -> f32 {
        let [mut dfx, mut dfy, mut ddfx, mut ddfy, dddfx, dddfy] = self.curves;
        let mut x = dfx;
        let mut y = dfy;
        let mut i = BEZIER_SEGMENTS - 2;
        loop {
            if x >= percent {
                let last_x = x - dfx;
                let last_y = y - dfy;
                return last_y + (y - last_y) * (percent - last_x) / (x - last_x);
            }
            if i == 0 {
                break;
            }
            i -= 1;
            dfx += ddfx;
            dfy += ddfy;
            ddfx += dddfx;
            ddfy += dddfy;
            x += dfx;
            y += dfy;
        }
        y + (1.0 - y) * (percent - x) / (1.0 - x)
    }
}

#[derive(Clone, Debug)]
pub enum Curve {
    Linear,
    Stepped,
    Bezier(CubicBezier),
}

impl Curve {
    fn parse(raw: Option<&RawCurve>) -> Self {
        match raw {
            None => Curve::Linear,
            Some(RawCurve::Named(name)) if name == "stepped" => Curve::Stepped,
            Some(RawCurve::Named(_)) => Curve::Linear,
            Some(RawCurve::Bezier(pts)) if pts.len() >= 4 => {
                Curve::Bezier(CubicBezier::new(pts[0], pts[1], pts[2], pts[3]))
            }
            Some(RawCurve::Bezier(_)) => Curve::Linear,
        }
    }

    pub fn evaluate(&self, percent: f32) -> f32 {
        match self {
            Curve::Linear => percent,
            Curve::Stepped => 0.0,
            Curve::Bezier(bezier) => bezier.evaluate(percent),
        }
    }
}

pub trait Keyframe {
    fn time(&self) -> f32;
}

/// Index of the keyframe at or before `time`. `None` when the track is
/// empty or `time` precedes the first keyframe.
pub fn find_keyframe<K: Keyframe>(frames: &[K], time: f32) -> Option<usize> {
    let last = frames.len().checked_sub(1)?;
    if time < frames[0].time() {
        return None;
    }
    if time >= frames[last].time() {
        return Some(last);
    }
    let mut lo = 0;
    let mut hi = last;
    let mut current = (lo + hi) >> 1;
    loop {
        if frames[current + 1].time() <= time {
            lo = current + 1;
        } else {
            hi = current;
        }
        if lo == hi {
            return Some(lo);
        }
        current = (lo + hi) >> 1;
    }
}

/// Eased progress inside the segment `[from, to]`. A degenerate segment
/// where `to <= from` counts as a discrete jump to the far keyframe.
fn segment_percent(time: f32, from: f32, to: f32, curve: &Curve) -> f32 {
    if to <= from {
        return 1.0;
    }
    curve.evaluate(((time - from) / (to - from)).clamp(0.0, 1.0))
}

#[derive(Clone, Debug)]
pub struct TranslateKeyframe {
    pub time: f32,
    pub x: f32,
    pub y: f32,
    pub curve: Curve,
}

#[derive(Clone, Debug)]
pub struct RotateKeyframe {
    pub time: f32,
    pub angle: f32,
    pub curve: Curve,
}

#[derive(Clone, Debug)]
pub struct ScaleKeyframe {
    pub time: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub curve: Curve,
}

#[derive(Clone, Debug)]
pub struct ColorKeyframe {
    pub time: f32,
    pub color: Color,
    pub curve: Curve,
}

#[derive(Clone, Debug)]
pub struct AttachmentKeyframe {
    pub time: f32,
    pub attachment: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EventKeyframe {
    pub time: f32,
    pub name: String,
    pub int_value: Option<i32>,
    pub float_value: Option<f32>,
    pub string_value: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SlotOffset {
    pub slot: usize,
    pub offset: i32,
}

#[derive(Clone, Debug)]
pub struct DrawOrderKeyframe {
    pub time: f32,
    pub offsets: Vec<SlotOffset>,
}

#[derive(Clone, Debug)]
pub struct FfdKeyframe {
    pub time: f32,
    pub offset: usize,
    pub vertices: Vec<f32>,
    pub curve: Curve,
}

macro_rules! impl_keyframe {
    ($($keyframe:ty),*) => {$(
        impl Keyframe for $keyframe {
            fn time(&self) -> f32 { self.time }
        }
    )*}
}

impl_keyframe!(
    TranslateKeyframe,
    RotateKeyframe,
    ScaleKeyframe,
    ColorKeyframe,
    AttachmentKeyframe,
    EventKeyframe,
    DrawOrderKeyframe,
    FfdKeyframe
);

#[derive(Clone, Debug, Default)]
pub struct BoneTimeline {
    pub translate: Vec<TranslateKeyframe>,
    pub rotate: Vec<RotateKeyframe>,
    pub scale: Vec<ScaleKeyframe>,
}

impl BoneTimeline {
    fn sample_translate(&self, time: f32) -> Option<(f32, f32)> {
        let index = find_keyframe(&self.translate, time)?;
        let keyframe = &self.translate[index];
        Some(match self.translate.get(index + 1) {
            None => (keyframe.x, keyframe.y),
            Some(next) => {
                let pct = segment_percent(time, keyframe.time, next.time, &keyframe.curve);
                (tween(keyframe.x, next.x, pct), tween(keyframe.y, next.y, pct))
            }
        })
    }

    fn sample_rotate(&self, time: f32) -> Option<f32> {
        let index = find_keyframe(&self.rotate, time)?;
        let keyframe = &self.rotate[index];
        Some(match self.rotate.get(index + 1) {
            None => wrap_angle(keyframe.angle),
            Some(next) => {
                let pct = segment_percent(time, keyframe.time, next.time, &keyframe.curve);
                tween_angle(keyframe.angle, next.angle, pct)
            }
        })
    }

    fn sample_scale(&self, time: f32) -> Option<(f32, f32)> {
        let index = find_keyframe(&self.scale, time)?;
        let keyframe = &self.scale[index];
        Some(match self.scale.get(index + 1) {
            None => (keyframe.scale_x, keyframe.scale_y),
            Some(next) => {
                let pct = segment_percent(time, keyframe.time, next.time, &keyframe.curve);
                (
                    tween(keyframe.scale_x, next.scale_x, pct),
                    tween(keyframe.scale_y, next.scale_y, pct),
                )
            }
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct SlotTimeline {
    pub color: Vec<ColorKeyframe>,
    pub attachment: Vec<AttachmentKeyframe>,
}

impl SlotTimeline {
    fn sample_color(&self, time: f32) -> Option<Color> {
        let index = find_keyframe(&self.color, time)?;
        let keyframe = &self.color[index];
        Some(match self.color.get(index + 1) {
            None => keyframe.color,
            Some(next) => {
                let pct = segment_percent(time, keyframe.time, next.time, &keyframe.curve);
                Color::from_channels(
                    tween(keyframe.color.r, next.color.r, pct),
                    tween(keyframe.color.g, next.color.g, pct),
                    tween(keyframe.color.b, next.color.b, pct),
                    tween(keyframe.color.a, next.color.a, pct),
                )
            }
        })
    }

    fn sample_attachment(&self, time: f32) -> Option<&AttachmentKeyframe> {
        find_keyframe(&self.attachment, time).map(|index| &self.attachment[index])
    }
}

#[derive(Clone, Debug, Default)]
pub struct FfdTimeline {
    pub keyframes: Vec<FfdKeyframe>,
}

/// Sparse keyframes store only the animated span of the vertex stream;
/// anything outside `[offset, offset + vertices.len())` is undeformed.
fn ffd_delta(keyframe: &FfdKeyframe, component: usize) -> f32 {
    component
        .checked_sub(keyframe.offset)
        .and_then(|local| keyframe.vertices.get(local))
        .copied()
        .unwrap_or(0.0)
}

#[derive(Clone, Debug)]
pub struct Event {
    pub name: String,
    pub int_value: i32,
    pub float_value: f32,
    pub string_value: Option<String>,
}

fn synthesize_event(templates: &HashMap<String, Event>, keyframe: &EventKeyframe) -> Event {
    let mut event = templates
        .get(&keyframe.name)
        .cloned()
        .unwrap_or_else(|| Event {
            name: keyframe.name.clone(),
            int_value: 0,
            float_value: 0.0,
            string_value: None,
        });
    event.name = keyframe.name.clone();
    if let Some(int_value) = keyframe.int_value {
        event.int_value = int_value;
    }
    if let Some(float_value) = keyframe.float_value {
        event.float_value = float_value;
    }
    if let Some(string_value) = &keyframe.string_value {
        event.string_value = Some(string_value.clone());
    }
    event
}

#[derive(Clone, Debug, Default)]
pub struct Animation {
    pub bone_timelines: HashMap<usize, BoneTimeline>,
    pub slot_timelines: HashMap<usize, SlotTimeline>,
    pub event_keyframes: Vec<EventKeyframe>,
    pub draw_order_keyframes: Vec<DrawOrderKeyframe>,
    /// Skin name -> slot id -> attachment name -> deformation track.
    pub ffd_timelines: HashMap<String, HashMap<usize, HashMap<String, FfdTimeline>>>,
    pub min_time: f32,
    pub max_time: f32,
}

impl Animation {
    pub fn length(&self) -> f32 {
        self.max_time - self.min_time
    }
}

#[derive(Copy, Clone, Debug)]
pub struct SkelBone {
    pub parent: Option<usize>,
    pub length: f32,
    pub x: f32,
    pub y: f32,
    /// Degrees, counter-clockwise.
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub inherit_rotation: bool,
    pub inherit_scale: bool,
}

#[derive(Clone, Debug)]
pub struct SkelSlot {
    pub bone: usize,
    pub color: Color,
    pub attachment: Option<String>,
    pub additive: bool,
}

#[derive(Clone, Debug)]
pub struct RegionAttachment {
    pub name: Option<String>,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug)]
pub struct MeshAttachment {
    pub name: Option<String>,
    pub vertices: Vec<f32>,
    pub uvs: Vec<f32>,
    pub triangles: Vec<u16>,
}

#[derive(Copy, Clone, Debug)]
pub struct VertexInfluence {
    pub bone: usize,
    pub x: f32,
    pub y: f32,
    pub weight: f32,
}

#[derive(Clone, Debug)]
pub struct SkinnedMeshAttachment {
    pub name: Option<String>,
    pub influences: Vec<Vec<VertexInfluence>>,
    pub uvs: Vec<f32>,
    pub triangles: Vec<u16>,
}

impl SkinnedMeshAttachment {
    pub fn vertex_count(&self) -> usize {
        self.uvs.len() / 2
    }
}

#[derive(Clone, Debug)]
pub enum Attachment {
    Region(RegionAttachment),
    AnimatedRegion {
        fps: f32,
        play_mode: String,
        region: RegionAttachment,
    },
    BoundingBox {
        vertices: Vec<f32>,
    },
    Mesh(MeshAttachment),
    SkinnedMesh(SkinnedMeshAttachment),
}

#[derive(Clone, Debug, Default)]
pub struct Skin {
    attachments: HashMap<usize, HashMap<String, Attachment>>,
}

impl Skin {
    pub fn get(&self, slot: usize, name: &str) -> Option<&Attachment> {
        self.attachments.get(&slot).and_then(|it| it.get(name))
    }
}

/// Splits the interleaved weight stream
/// `bone_count, (bone_index, x, y, weight)*` into per-vertex influence
/// lists.
fn parse_influences(stream: &[f32]) -> Vec<Vec<VertexInfluence>> {
    let mut influences = Vec::new();
    let mut cursor = 0;
    while cursor < stream.len() {
        let count = stream[cursor] as usize;
        cursor += 1;
        // count comes from an untrusted document; the stream can back
        // at most len / 4 influences
        let mut vertex = Vec::with_capacity(count.min(stream.len() / 4));
        for _ in 0..count {
            if cursor + 4 > stream.len() {
                log::warn!("truncated skinned mesh weight stream");
                break;
            }
            vertex.push(VertexInfluence {
                bone: stream[cursor] as usize,
                x: stream[cursor + 1],
                y: stream[cursor + 2],
                weight: stream[cursor + 3],
            });
            cursor += 4;
        }
        influences.push(vertex);
    }
    influences
}

fn sort_keyframes<K: Keyframe>(frames: &mut Vec<K>) {
    frames.sort_by(|lhs, rhs| {
        lhs.time()
            .partial_cmp(&rhs.time())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

pub struct SpineData {
    pub bones: Vec<SkelBone>,
    pub bone_keys: Vec<String>,
    bone_lookup: HashMap<String, usize>,
    pub slots: Vec<SkelSlot>,
    pub slot_keys: Vec<String>,
    slot_lookup: HashMap<String, usize>,
    pub skins: HashMap<String, Skin>,
    pub events: HashMap<String, Event>,
    pub animations: HashMap<String, Animation>,
    pub images_path: String,
}

impl SpineData {
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        let raw: RawSkeletonData = serde_json::from_slice(bytes)?;
        Ok(Self::extract(&raw))
    }

    pub fn bone_id(&self, name: &str) -> Option<usize> {
        self.bone_lookup.get(name).copied()
    }

    pub fn slot_id(&self, name: &str) -> Option<usize> {
        self.slot_lookup.get(name).copied()
    }

    /// Resolves every name reference in the document to an index, drops
    /// the parts that point nowhere and normalizes keyframe times from
    /// seconds to milliseconds.
    pub fn extract(raw: &RawSkeletonData) -> Self {
        let mut bones = Vec::with_capacity(raw.bones.len());
        let mut bone_keys = Vec::with_capacity(raw.bones.len());
        let mut bone_lookup = HashMap::new();
        for bone in raw.bones.iter() {
            let parent = match &bone.parent {
                None => None,
                Some(parent_name) => match bone_lookup.get(parent_name) {
                    Some(&parent_id) => Some(parent_id),
                    None => {
                        log::warn!("bone '{}' references unknown parent '{}'", bone.name, parent_name);
                        None
                    }
                },
            };
            bone_lookup.insert(bone.name.clone(), bones.len());
            bone_keys.push(bone.name.clone());
            bones.push(SkelBone {
                parent,
                length: bone.length,
                x: bone.x,
                y: bone.y,
                rotation: bone.rotation,
                scale_x: bone.scale_x,
                scale_y: bone.scale_y,
                inherit_rotation: bone.inherit_rotation,
                inherit_scale: bone.inherit_scale,
            });
        }

        let mut slots = Vec::with_capacity(raw.slots.len());
        let mut slot_keys = Vec::with_capacity(raw.slots.len());
        let mut slot_lookup = HashMap::new();
        for slot in raw.slots.iter() {
            let bone = match bone_lookup.get(&slot.bone) {
                Some(&bone_id) => bone_id,
                None => {
                    log::warn!("slot '{}' references unknown bone '{}'", slot.name, slot.bone);
                    continue;
                }
            };
            slot_lookup.insert(slot.name.clone(), slots.len());
            slot_keys.push(slot.name.clone());
            slots.push(SkelSlot {
                bone,
                color: slot.color,
                attachment: slot.attachment.clone(),
                additive: slot.additive,
            });
        }

        let mut skins = HashMap::new();
        for (skin_name, raw_skin) in raw.skins.iter() {
            let mut skin = Skin::default();
            for (slot_name, raw_attachments) in raw_skin.0.iter() {
                let slot_id = match slot_lookup.get(slot_name) {
                    Some(&slot_id) => slot_id,
                    None => {
                        log::warn!("skin '{}' references unknown slot '{}'", skin_name, slot_name);
                        continue;
                    }
                };
                let cooked = raw_attachments
                    .iter()
                    .map(|(name, attachment)| (name.clone(), cook_attachment(attachment)))
                    .collect();
                skin.attachments.insert(slot_id, cooked);
            }
            skins.insert(skin_name.clone(), skin);
        }

        let events = raw
            .events
            .iter()
            .map(|(name, event)| {
                (
                    name.clone(),
                    Event {
                        name: name.clone(),
                        int_value: event.int_value.unwrap_or(0),
                        float_value: event.float_value.unwrap_or(0.0),
                        string_value: event.string_value.clone(),
                    },
                )
            })
            .collect();

        let animations = raw
            .animations
            .iter()
            .map(|(name, animation)| {
                (
                    name.clone(),
                    cook_animation(animation, &bone_lookup, &slot_lookup),
                )
            })
            .collect();

        Self {
            bones,
            bone_keys,
            bone_lookup,
            slots,
            slot_keys,
            slot_lookup,
            skins,
            events,
            animations,
            images_path: raw.skeleton.images.clone(),
        }
    }
}

fn cook_region(raw: &RawRegion) -> RegionAttachment {
    RegionAttachment {
        name: raw.name.clone(),
        x: raw.x,
        y: raw.y,
        rotation: raw.rotation,
        scale_x: raw.scale_x,
        scale_y: raw.scale_y,
        width: raw.width,
        height: raw.height,
    }
}

fn cook_mesh(raw: &RawMesh) -> MeshAttachment {
    MeshAttachment {
        name: raw.name.clone(),
        vertices: raw.vertices.clone(),
        uvs: raw.uvs.clone(),
        triangles: raw.triangles.iter().map(|&it| it as u16).collect(),
    }
}

fn cook_attachment(raw: &RawAttachment) -> Attachment {
    match raw {
        RawAttachment::Region(region) => Attachment::Region(cook_region(region)),
        RawAttachment::AnimatedRegion {
            fps,
            play_mode,
            region,
        } => Attachment::AnimatedRegion {
            fps: *fps,
            play_mode: play_mode.clone(),
            region: cook_region(region),
        },
        RawAttachment::BoundingBox { vertices } => Attachment::BoundingBox {
            vertices: vertices.clone(),
        },
        RawAttachment::Mesh(mesh) => Attachment::Mesh(cook_mesh(mesh)),
        RawAttachment::SkinnedMesh(mesh) => Attachment::SkinnedMesh(SkinnedMeshAttachment {
            name: mesh.name.clone(),
            influences: parse_influences(&mesh.vertices),
            uvs: mesh.uvs.clone(),
            triangles: mesh.triangles.iter().map(|&it| it as u16).collect(),
        }),
    }
}

const MS_PER_SECOND: f32 = 1000.0;

fn cook_animation(
    raw: &RawAnimation,
    bone_lookup: &HashMap<String, usize>,
    slot_lookup: &HashMap<String, usize>,
) -> Animation {
    let mut animation = Animation::default();
    let mut min_time = 0.0f32;
    let mut max_time = 0.0f32;
    let mut note_time = |time: f32| {
        if time < min_time {
            min_time = time;
        }
        if time > max_time {
            max_time = time;
        }
        time
    };

    for (bone_name, raw_timeline) in raw.bones.iter() {
        let bone_id = match bone_lookup.get(bone_name) {
            Some(&bone_id) => bone_id,
            None => {
                log::warn!("animation timeline references unknown bone '{}'", bone_name);
                continue;
            }
        };
        let mut timeline = BoneTimeline::default();
        for frame in raw_timeline.translate.iter() {
            timeline.translate.push(TranslateKeyframe {
                time: note_time(frame.time * MS_PER_SECOND),
                x: frame.x,
                y: frame.y,
                curve: Curve::parse(frame.curve.as_ref()),
            });
        }
        for frame in raw_timeline.rotate.iter() {
            timeline.rotate.push(RotateKeyframe {
                time: note_time(frame.time * MS_PER_SECOND),
                angle: frame.angle,
                curve: Curve::parse(frame.curve.as_ref()),
            });
        }
        for frame in raw_timeline.scale.iter() {
            timeline.scale.push(ScaleKeyframe {
                time: note_time(frame.time * MS_PER_SECOND),
                scale_x: frame.x,
                scale_y: frame.y,
                curve: Curve::parse(frame.curve.as_ref()),
            });
        }
        sort_keyframes(&mut timeline.translate);
        sort_keyframes(&mut timeline.rotate);
        sort_keyframes(&mut timeline.scale);
        animation.bone_timelines.insert(bone_id, timeline);
    }

    for (slot_name, raw_timeline) in raw.slots.iter() {
        let slot_id = match slot_lookup.get(slot_name) {
            Some(&slot_id) => slot_id,
            None => {
                log::warn!("animation timeline references unknown slot '{}'", slot_name);
                continue;
            }
        };
        let mut timeline = SlotTimeline::default();
        for frame in raw_timeline.color.iter() {
            timeline.color.push(ColorKeyframe {
                time: note_time(frame.time * MS_PER_SECOND),
                color: frame.color,
                curve: Curve::parse(frame.curve.as_ref()),
            });
        }
        for frame in raw_timeline.attachment.iter() {
            timeline.attachment.push(AttachmentKeyframe {
                time: note_time(frame.time * MS_PER_SECOND),
                attachment: frame.name.clone(),
            });
        }
        sort_keyframes(&mut timeline.color);
        sort_keyframes(&mut timeline.attachment);
        animation.slot_timelines.insert(slot_id, timeline);
    }

    for frame in raw.events.iter() {
        animation.event_keyframes.push(EventKeyframe {
            time: note_time(frame.time * MS_PER_SECOND),
            name: frame.name.clone(),
            int_value: frame.int_value,
            float_value: frame.float_value,
            string_value: frame.string_value.clone(),
        });
    }
    sort_keyframes(&mut animation.event_keyframes);

    for frame in raw.draworder.iter() {
        let offsets = frame
            .offsets
            .iter()
            .filter_map(|it| match slot_lookup.get(&it.slot) {
                Some(&slot_id) => Some(SlotOffset {
                    slot: slot_id,
                    offset: it.offset,
                }),
                None => {
                    log::warn!("draw order offset references unknown slot '{}'", it.slot);
                    None
                }
            })
            .collect();
        animation.draw_order_keyframes.push(DrawOrderKeyframe {
            time: note_time(frame.time * MS_PER_SECOND),
            offsets,
        });
    }
    sort_keyframes(&mut animation.draw_order_keyframes);

    for (skin_name, raw_skin) in raw.ffd.iter() {
        let mut cooked_skin: HashMap<usize, HashMap<String, FfdTimeline>> = HashMap::new();
        for (slot_name, raw_attachments) in raw_skin.0.iter() {
            let slot_id = match slot_lookup.get(slot_name) {
                Some(&slot_id) => slot_id,
                None => {
                    log::warn!("ffd timeline references unknown slot '{}'", slot_name);
                    continue;
                }
            };
            let mut cooked_attachments = HashMap::new();
            for (attachment_name, raw_frames) in raw_attachments.iter() {
                let mut timeline = FfdTimeline::default();
                for frame in raw_frames.iter() {
                    timeline.keyframes.push(FfdKeyframe {
                        time: note_time(frame.time * MS_PER_SECOND),
                        offset: frame.offset,
                        vertices: frame.vertices.clone(),
                        curve: Curve::parse(frame.curve.as_ref()),
                    });
                }
                sort_keyframes(&mut timeline.keyframes);
                cooked_attachments.insert(attachment_name.clone(), timeline);
            }
            cooked_skin.insert(slot_id, cooked_attachments);
        }
        animation.ffd_timelines.insert(skin_name.clone(), cooked_skin);
    }

    animation.min_time = min_time;
    animation.max_time = max_time;
    animation
}

pub const DEFAULT_SKIN: &str = "default";

/// Mutable playback state over an immutable `SpineData`. Holds the
/// tweened copy of every bone and slot; `strike` recomputes them from
/// the setup pose when the pose went dirty.
pub struct Pose {
    data: Arc<SpineData>,
    skin_key: String,
    anim_key: Option<String>,
    time: f32,
    elapsed_time: f32,
    dirty: bool,
    tweened_bones: Vec<SkelBone>,
    tweened_slots: Vec<SkelSlot>,
    fired_events: Vec<Event>,
    draw_order: Vec<usize>,
}

impl Pose {
    pub fn new(data: Arc<SpineData>) -> Self {
        let tweened_bones = data.bones.clone();
        let tweened_slots = data.slots.clone();
        let draw_order = (0..data.slots.len()).collect();
        Self {
            data,
            skin_key: DEFAULT_SKIN.to_owned(),
            anim_key: None,
            time: 0.0,
            elapsed_time: 0.0,
            dirty: true,
            tweened_bones,
            tweened_slots,
            fired_events: Vec::new(),
            draw_order,
        }
    }

    pub fn data(&self) -> &Arc<SpineData> {
        &self.data
    }

    pub fn skin(&self) -> &str {
        &self.skin_key
    }

    pub fn animation(&self) -> Option<&str> {
        self.anim_key.as_deref()
    }

    /// Milliseconds, wrapped into the animation time range.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn bones(&self) -> &[SkelBone] {
        &self.tweened_bones
    }

    pub fn slots(&self) -> &[SkelSlot] {
        &self.tweened_slots
    }

    pub fn draw_order(&self) -> &[usize] {
        &self.draw_order
    }

    /// Events crossed by the last struck time step.
    pub fn fired_events(&self) -> &[Event] {
        &self.fired_events
    }

    pub fn set_skin(&mut self, skin: &str) {
        self.skin_key = skin.to_owned();
        self.dirty = true;
    }

    /// Keeps the current time, wrapped into the new animation's range.
    pub fn set_animation(&mut self, animation: &str) {
        self.anim_key = if self.data.animations.contains_key(animation) {
            Some(animation.to_owned())
        } else {
            log::warn!("unknown animation '{}'", animation);
            None
        };
        self.elapsed_time = 0.0;
        self.dirty = true;
        self.wrap_time();
    }

    pub fn set_time(&mut self, time: f32) {
        self.time = time;
        self.wrap_time();
        self.elapsed_time = 0.0;
        self.dirty = true;
    }

    /// Advances playback by `dt` milliseconds. Negative `dt` rewinds.
    pub fn update(&mut self, dt: f32) {
        self.time += dt;
        self.wrap_time();
        self.elapsed_time += dt;
        self.dirty = true;
    }

    fn wrap_time(&mut self) {
        let bounds = self
            .anim_key
            .as_ref()
            .and_then(|it| self.data.animations.get(it))
            .map(|anim| (anim.min_time, anim.max_time));
        let (min_time, max_time) = match bounds {
            Some(bounds) => bounds,
            None => return,
        };
        let length = max_time - min_time;
        if length > 0.0 {
            while self.time < min_time {
                self.time += length;
            }
            while self.time > max_time {
                self.time -= length;
            }
        } else {
            self.time = min_time;
        }
    }

    /// Recomputes the tweened pose from the setup pose and the current
    /// animation time. Does nothing when no mutation happened since the
    /// last strike, so the fired event list survives repeated calls.
    pub fn strike(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        let data = Arc::clone(&self.data);
        self.tweened_bones.clear();
        self.tweened_bones.extend_from_slice(&data.bones);
        self.tweened_slots.clear();
        self.tweened_slots.extend(data.slots.iter().cloned());
        self.draw_order.clear();
        self.draw_order.extend(0..data.slots.len());

        let elapsed = self.elapsed_time;
        self.elapsed_time = 0.0;
        self.fired_events.clear();

        let anim = match self.anim_key.as_ref().and_then(|it| data.animations.get(it)) {
            Some(anim) => anim,
            None => return,
        };
        let time = self.time;

        for (&bone_id, timeline) in anim.bone_timelines.iter() {
            let setup = data.bones[bone_id];
            let pose = &mut self.tweened_bones[bone_id];
            if let Some((x, y)) = timeline.sample_translate(time) {
                pose.x = setup.x + x;
                pose.y = setup.y + y;
            }
            if let Some(angle) = timeline.sample_rotate(time) {
                pose.rotation = setup.rotation + angle;
            }
            if let Some((scale_x, scale_y)) = timeline.sample_scale(time) {
                pose.scale_x = setup.scale_x + scale_x - 1.0;
                pose.scale_y = setup.scale_y + scale_y - 1.0;
            }
        }

        for (&slot_id, timeline) in anim.slot_timelines.iter() {
            let pose = &mut self.tweened_slots[slot_id];
            if let Some(color) = timeline.sample_color(time) {
                pose.color = color;
            }
            if let Some(keyframe) = timeline.sample_attachment(time) {
                pose.attachment = keyframe.attachment.clone();
            }
        }

        if !anim.event_keyframes.is_empty() && elapsed != 0.0 {
            let length = anim.length();
            let prev = time - elapsed;
            let fired = &mut self.fired_events;
            let mut fire = |keyframe: &EventKeyframe| {
                fired.push(synthesize_event(&data.events, keyframe));
            };
            // Intervals are closed at both ends in the traversal
            // direction, so an event sitting exactly at the previous
            // strike time still fires.
            if elapsed > 0.0 {
                if length > 0.0 && prev < anim.min_time {
                    // Playback wrapped past the end: the tail of the
                    // previous loop fires first, then the head of this one.
                    let tail_start = prev + length;
                    for keyframe in anim.event_keyframes.iter() {
                        if keyframe.time >= tail_start && keyframe.time <= anim.max_time {
                            fire(keyframe);
                        }
                    }
                    for keyframe in anim.event_keyframes.iter() {
                        if keyframe.time >= anim.min_time && keyframe.time <= time {
                            fire(keyframe);
                        }
                    }
                } else {
                    for keyframe in anim.event_keyframes.iter() {
                        if keyframe.time >= prev && keyframe.time <= time {
                            fire(keyframe);
                        }
                    }
                }
            } else if length > 0.0 && prev > anim.max_time {
                let tail_start = prev - length;
                for keyframe in anim.event_keyframes.iter() {
                    if keyframe.time <= tail_start && keyframe.time >= anim.min_time {
                        fire(keyframe);
                    }
                }
                for keyframe in anim.event_keyframes.iter() {
                    if keyframe.time <= anim.max_time && keyframe.time >= time {
                        fire(keyframe);
                    }
                }
            } else {
                for keyframe in anim.event_keyframes.iter() {
                    if keyframe.time <= prev && keyframe.time >= time {
                        fire(keyframe);
                    }
                }
            }
        }

        if let Some(index) = find_keyframe(&anim.draw_order_keyframes, time) {
            for slot_offset in anim.draw_order_keyframes[index].offsets.iter() {
                let position = match self.draw_order.iter().position(|&it| it == slot_offset.slot) {
                    Some(position) => position,
                    None => continue,
                };
                self.draw_order.remove(position);
                let target = (position as i32 + slot_offset.offset)
                    .clamp(0, self.draw_order.len() as i32) as usize;
                self.draw_order.insert(target, slot_offset.slot);
            }
        }
    }

    fn active_ffd(&self, slot_id: usize, attachment_key: &str) -> Option<&FfdTimeline> {
        let anim = self.data.animations.get(self.anim_key.as_ref()?)?;
        anim.ffd_timelines
            .get(&self.skin_key)?
            .get(&slot_id)?
            .get(attachment_key)
    }

    fn ffd_sample(&self, slot_id: usize, attachment_key: &str) -> Option<(&FfdKeyframe, Option<&FfdKeyframe>, f32)> {
        let timeline = self.active_ffd(slot_id, attachment_key)?;
        let index = find_keyframe(&timeline.keyframes, self.time)?;
        let keyframe = &timeline.keyframes[index];
        Some(match timeline.keyframes.get(index + 1) {
            None => (keyframe, None, 1.0),
            Some(next) => (
                keyframe,
                Some(next),
                segment_percent(self.time, keyframe.time, next.time, &keyframe.curve),
            ),
        })
    }

    /// Bone-local vertex positions of a mesh attachment with the active
    /// deformation applied. `attachment_key` is the name the attachment
    /// is stored under in the skin.
    pub fn mesh_vertices(
        &self,
        slot_id: usize,
        attachment_key: &str,
        mesh: &MeshAttachment,
    ) -> Vec<f32> {
        let mut vertices = mesh.vertices.clone();
        if let Some((keyframe, next, pct)) = self.ffd_sample(slot_id, attachment_key) {
            for (component, vertex) in vertices.iter_mut().enumerate() {
                *vertex += match next {
                    None => ffd_delta(keyframe, component),
                    Some(next) => tween(
                        ffd_delta(keyframe, component),
                        ffd_delta(next, component),
                        pct,
                    ),
                };
            }
        }
        vertices
    }

    /// World-space vertex positions of a skinned mesh: each vertex is
    /// the weighted blend of its influences pushed through the world
    /// matrix of the influencing bone.
    pub fn skinned_mesh_vertices(
        &self,
        world: &[nalgebra::Matrix3<f32>],
        slot_id: usize,
        attachment_key: &str,
        mesh: &SkinnedMeshAttachment,
    ) -> Vec<f32> {
        let sample = self.ffd_sample(slot_id, attachment_key);
        let deform = |component: usize| -> f32 {
            match &sample {
                None => 0.0,
                Some((keyframe, None, _)) => ffd_delta(keyframe, component),
                Some((keyframe, Some(next), pct)) => tween(
                    ffd_delta(keyframe, component),
                    ffd_delta(next, component),
                    *pct,
                ),
            }
        };
        let mut vertices = Vec::with_capacity(mesh.vertex_count() * 2);
        let mut ffd_index = 0;
        for influences in mesh.influences.iter() {
            let mut x = 0.0;
            let mut y = 0.0;
            for influence in influences.iter() {
                let local = nalgebra::Point3::new(
                    influence.x + deform(ffd_index),
                    influence.y + deform(ffd_index + 1),
                    1.0,
                );
                ffd_index += 2;
                let bone_matrix = match world.get(influence.bone) {
                    Some(matrix) => matrix,
                    None => continue,
                };
                let point = bone_matrix * local;
                x += point.x * influence.weight;
                y += point.y * influence.weight;
            }
            vertices.push(x);
            vertices.push(y);
        }
        vertices
    }
}

/// Composes local transforms down the hierarchy. Bones that opt out of
/// rotation or scale inheritance get the accumulated ancestor
/// contribution compensated away first. Parents must precede children
/// in the slice.
pub fn world_matrices(bones: &[SkelBone]) -> Vec<nalgebra::Matrix3<f32>> {
    let mut matrices = vec![nalgebra::Matrix3::identity(); bones.len()];
    for bone_id in 0..bones.len() {
        let bone = &bones[bone_id];
        let flattened_rotation = if bone.inherit_rotation {
            bone.rotation
        } else {
            let mut bone = bone;
            let mut rotation = bone.rotation;
            while let Some(parent_id) = bone.parent {
                bone = &bones[parent_id];
                rotation -= bone.rotation;
            }
            rotation
        };
        let flattened_scale = if bone.inherit_scale {
            (bone.scale_x, bone.scale_y)
        } else {
            let mut bone = bone;
            let mut scale = (bone.scale_x, bone.scale_y);
            while let Some(parent_id) = bone.parent {
                bone = &bones[parent_id];
                scale.0 /= bone.scale_x;
                scale.1 /= bone.scale_y;
            }
            scale
        };
        let parent_transform = match bone.parent {
            None => nalgebra::Matrix3::identity(),
            Some(parent_id) => matrices[parent_id],
        };
        let transition_local: nalgebra::Matrix3<f32> =
            nalgebra::Translation2::new(bone.x, bone.y).into();
        let rotation_matrix: nalgebra::Matrix3<f32> =
            nalgebra::Rotation2::new(flattened_rotation.to_radians()).into();
        let scale_matrix = nalgebra::Matrix3::new(
            flattened_scale.0, 0.0, 0.0,
            0.0, flattened_scale.1, 0.0,
            0.0, 0.0, 1.0,
        );
        matrices[bone_id] = parent_transform * transition_local * rotation_matrix * scale_matrix;
    }
    matrices
}

fn tint_to_color(tint: Color) -> macroquad::color::Color {
    macroquad::color::Color::new(tint.r, tint.g, tint.b, tint.a)
}

fn display_name<'a>(name: &'a Option<String>, key: &'a str) -> &'a str {
    name.as_deref().unwrap_or(key)
}

struct ImageHandle {
    texture: Option<Texture2D>,
}

/// Draws struck poses with macroquad. Textures are registered per
/// attachment image name; attachments whose image never arrived render
/// untextured.
pub struct PoseRenderer {
    images: HashMap<String, ImageHandle>,
    batcher: BufferedDrawBatcher,
}

impl PoseRenderer {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
            batcher: BufferedDrawBatcher::new(),
        }
    }

    pub fn load_image_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), LoadError> {
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        let texture = Texture2D::from_rgba8(
            decoded.width() as u16,
            decoded.height() as u16,
            &decoded.into_raw(),
        );
        self.set_image(name, texture);
        Ok(())
    }

    pub fn set_image(&mut self, name: &str, texture: Texture2D) {
        self.images.insert(
            name.to_owned(),
            ImageHandle {
                texture: Some(texture),
            },
        );
    }

    fn texture(&self, name: &str) -> Option<Texture2D> {
        self.images.get(name).and_then(|it| it.texture)
    }

    pub fn draw_pose(
        &mut self,
        pose: &Pose,
        position_x: f32,
        position_y: f32,
        scale: f32,
        x_flip: DrawFlip,
    ) {
        let x_scale = match x_flip {
            DrawFlip::None => scale,
            DrawFlip::Flipped => -scale,
        };
        let data = pose.data();
        let world = world_matrices(pose.bones());
        let skin = data.skins.get(pose.skin());
        let default_skin = data.skins.get(DEFAULT_SKIN);

        for &slot_id in pose.draw_order() {
            let slot = &pose.slots()[slot_id];
            let attachment_key = match &slot.attachment {
                Some(attachment_key) => attachment_key,
                None => continue,
            };
            let attachment = skin
                .and_then(|it| it.get(slot_id, attachment_key))
                .or_else(|| default_skin.and_then(|it| it.get(slot_id, attachment_key)));
            let tint = tint_to_color(slot.color);
            match attachment {
                Some(Attachment::Region(region))
                | Some(Attachment::AnimatedRegion { region, .. }) => {
                    let texture = self.texture(display_name(&region.name, attachment_key));
                    let transition_local: nalgebra::Matrix3<f32> =
                        nalgebra::Translation2::new(region.x, region.y).into();
                    let rotation_matrix: nalgebra::Matrix3<f32> =
                        nalgebra::Rotation2::new(region.rotation.to_radians()).into();
                    let scale_matrix = nalgebra::Matrix3::new(
                        region.scale_x, 0.0, 0.0,
                        0.0, region.scale_y, 0.0,
                        0.0, 0.0, 1.0,
                    );
                    let mat =
                        world[slot.bone] * transition_local * rotation_matrix * scale_matrix;
                    let half_w = region.width * 0.5;
                    let half_h = region.height * 0.5;
                    let corners = [
                        (-half_w, -half_h),
                        (half_w, -half_h),
                        (half_w, half_h),
                        (-half_w, half_h),
                    ];
                    let uvs = [(0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)];
                    let verts = corners.iter().zip(uvs.iter()).map(|(&(cx, cy), &(u, v))| {
                        let point = mat * nalgebra::Point3::new(cx, cy, 1.0);
                        Vertex::new(
                            position_x + point.x * x_scale,
                            position_y + point.y * scale,
                            0.0,
                            u,
                            v,
                            tint,
                        )
                    });
                    let indices = [0u16, 1, 2, 0, 2, 3];
                    self.batcher
                        .render_triangles(verts, indices.iter().copied(), texture);
                }
                Some(Attachment::Mesh(mesh)) => {
                    let texture = self.texture(display_name(&mesh.name, attachment_key));
                    let vertices = pose.mesh_vertices(slot_id, attachment_key, mesh);
                    let mat = world[slot.bone];
                    let verts = vertices
                        .chunks_exact(2)
                        .zip(mesh.uvs.chunks_exact(2))
                        .map(|(vertex, uv)| {
                            let point = mat * nalgebra::Point3::new(vertex[0], vertex[1], 1.0);
                            Vertex::new(
                                position_x + point.x * x_scale,
                                position_y + point.y * scale,
                                0.0,
                                uv[0],
                                uv[1],
                                tint,
                            )
                        });
                    self.batcher
                        .render_triangles(verts, mesh.triangles.iter().copied(), texture);
                }
                Some(Attachment::SkinnedMesh(mesh)) => {
                    let texture = self.texture(display_name(&mesh.name, attachment_key));
                    let vertices =
                        pose.skinned_mesh_vertices(&world, slot_id, attachment_key, mesh);
                    let verts = vertices
                        .chunks_exact(2)
                        .zip(mesh.uvs.chunks_exact(2))
                        .map(|(vertex, uv)| {
                            Vertex::new(
                                position_x + vertex[0] * x_scale,
                                position_y + vertex[1] * scale,
                                0.0,
                                uv[0],
                                uv[1],
                                tint,
                            )
                        });
                    self.batcher
                        .render_triangles(verts, mesh.triangles.iter().copied(), texture);
                }
                Some(Attachment::BoundingBox { .. }) | None => {}
            }
        }
    }
}

/// Debug overlay: one colored line per bone along its length.
pub fn draw_bones(pose: &Pose, position_x: f32, position_y: f32, scale: f32) {
    let world = world_matrices(pose.bones());
    for (bone_id, bone) in pose.bones().iter().enumerate() {
        let bone_color = COLORS[bone_id % COLORS.len()];
        let origin = world[bone_id] * nalgebra::Point3::new(0.0, 0.0, 1.0);
        let tip = world[bone_id] * nalgebra::Point3::new(bone.length, 0.0, 1.0);
        draw_line(
            position_x + origin.x * scale,
            position_y + origin.y * scale,
            position_x + tip.x * scale,
            position_y + tip.y * scale,
            3.0,
            bone_color,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_from(json: &str) -> Arc<SpineData> {
        Arc::new(SpineData::parse(json.as_bytes()).unwrap())
    }

    fn translate_frames(times: &[f32]) -> Vec<TranslateKeyframe> {
        times
            .iter()
            .map(|&time| TranslateKeyframe {
                time,
                x: 0.0,
                y: 0.0,
                curve: Curve::Linear,
            })
            .collect()
    }

    #[test]
    fn test_find_keyframe_policy() {
        let empty: Vec<TranslateKeyframe> = Vec::new();
        assert_eq!(find_keyframe(&empty, 0.0), None);

        let frames = translate_frames(&[0.0, 100.0, 250.0, 600.0]);
        assert_eq!(find_keyframe(&frames, -1.0), None);
        assert_eq!(find_keyframe(&frames, 0.0), Some(0));
        assert_eq!(find_keyframe(&frames, 99.9), Some(0));
        assert_eq!(find_keyframe(&frames, 100.0), Some(1));
        assert_eq!(find_keyframe(&frames, 300.0), Some(2));
        assert_eq!(find_keyframe(&frames, 600.0), Some(3));
        assert_eq!(find_keyframe(&frames, 10000.0), Some(3));

        let single = translate_frames(&[50.0]);
        assert_eq!(find_keyframe(&single, 0.0), None);
        assert_eq!(find_keyframe(&single, 50.0), Some(0));
        assert_eq!(find_keyframe(&single, 51.0), Some(0));
    }

    #[test]
    fn test_angle_tween_takes_short_arc() {
        assert!(tween_angle(350.0, 10.0, 0.5).abs() < 1e-4);
        assert!((tween_angle(10.0, 350.0, 0.5)).abs() < 1e-4);
        assert!((tween_angle(0.0, 90.0, 0.5) - 45.0).abs() < 1e-4);
        assert!((wrap_angle(540.0) + 180.0).abs() < 1e-4);
    }

    #[test]
    fn test_bezier_with_linear_handles_is_identity() {
        let bezier = CubicBezier::new(0.25, 0.25, 0.75, 0.75);
        for i in 0..=10 {
            let percent = i as f32 / 10.0;
            assert!((bezier.evaluate(percent) - percent).abs() < 0.02);
        }
    }

    #[test]
    fn test_bezier_ease_is_monotonic() {
        let bezier = CubicBezier::new(0.42, 0.0, 0.58, 1.0);
        let mut previous = 0.0;
        for i in 1..=20 {
            let value = bezier.evaluate(i as f32 / 20.0);
            assert!(value >= previous - 1e-4);
            previous = value;
        }
        assert!(bezier.evaluate(0.999) > 0.95);
    }

    const POSE_JSON: &str = r#"{
        "bones": [
            { "name": "root", "rotation": 30, "scaleX": 2 },
            { "name": "arm", "parent": "root", "x": 5 }
        ],
        "slots": [
            { "name": "a", "bone": "root", "attachment": "a" },
            { "name": "b", "bone": "root", "attachment": "b" },
            { "name": "c", "bone": "root" }
        ],
        "events": {
            "footstep": { "int": 3, "string": "left" }
        },
        "animations": {
            "walk": {
                "bones": {
                    "root": {
                        "translate": [
                            { "time": 0, "x": 0, "y": 0 },
                            { "time": 1, "x": 100, "y": -40 }
                        ],
                        "rotate": [
                            { "time": 0, "angle": 0 },
                            { "time": 1, "angle": 90 }
                        ],
                        "scale": [
                            { "time": 0, "x": 1, "y": 1 },
                            { "time": 1, "x": 1, "y": 1 }
                        ]
                    }
                },
                "slots": {
                    "a": {
                        "color": [
                            { "time": 0, "color": "ffffffff" },
                            { "time": 1, "color": "ff0000ff" }
                        ],
                        "attachment": [
                            { "time": 0, "name": "a" },
                            { "time": 0.5, "name": "a2" }
                        ]
                    }
                },
                "events": [
                    { "time": 0, "name": "start" },
                    { "time": 0.1, "name": "footstep", "int": 7 },
                    { "time": 1, "name": "end" }
                ],
                "draworder": [
                    { "time": 0.25, "offsets": [ { "slot": "a", "offset": 1 } ] }
                ]
            },
            "hold": {
                "bones": {
                    "root": {
                        "translate": [
                            { "time": 0, "x": 10, "y": 0, "curve": "stepped" },
                            { "time": 1, "x": 90, "y": 0 }
                        ]
                    }
                }
            },
            "blink": {
                "bones": {
                    "root": {
                        "translate": [
                            { "time": 0, "x": 0, "y": 0 },
                            { "time": 0.25, "x": 1, "y": 0 }
                        ]
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_bone_tween_is_additive_over_setup() {
        let data = data_from(POSE_JSON);
        let root = data.bone_id("root").unwrap();
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(500.0);
        pose.strike();

        let bone = pose.bones()[root];
        assert!((bone.x - 50.0).abs() < 1e-3);
        assert!((bone.y + 20.0).abs() < 1e-3);
        assert!((bone.rotation - 75.0).abs() < 1e-3);
        // identity scale keyframes must not drift a non-identity setup scale
        assert!((bone.scale_x - 2.0).abs() < 1e-6);
        assert!((bone.scale_y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_untracked_bone_keeps_setup_pose() {
        let data = data_from(POSE_JSON);
        let arm = data.bone_id("arm").unwrap();
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(700.0);
        pose.strike();
        assert!((pose.bones()[arm].x - 5.0).abs() < 1e-6);
        assert!((pose.bones()[arm].rotation).abs() < 1e-6);
    }

    #[test]
    fn test_stepped_curve_holds_value() {
        let data = data_from(POSE_JSON);
        let root = data.bone_id("root").unwrap();
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("hold");
        pose.set_time(999.0);
        pose.strike();
        assert!((pose.bones()[root].x - 10.0).abs() < 1e-3);
        pose.set_time(1000.0);
        pose.strike();
        assert!((pose.bones()[root].x - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_slot_color_overwrites_setup() {
        let data = data_from(POSE_JSON);
        let slot_a = data.slot_id("a").unwrap();
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(500.0);
        pose.strike();
        let color = pose.slots()[slot_a].color;
        assert!((color.r - 1.0).abs() < 1e-3);
        assert!((color.g - 0.5).abs() * 255.0 < 1.0);
        assert!((color.b - 0.5).abs() * 255.0 < 1.0);
        assert!((color.a - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_attachment_switch_is_discrete() {
        let data = data_from(POSE_JSON);
        let slot_a = data.slot_id("a").unwrap();
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(499.0);
        pose.strike();
        assert_eq!(pose.slots()[slot_a].attachment.as_deref(), Some("a"));
        pose.set_time(500.0);
        pose.strike();
        assert_eq!(pose.slots()[slot_a].attachment.as_deref(), Some("a2"));
    }

    #[test]
    fn test_draw_order_offset_moves_slot() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(100.0);
        pose.strike();
        assert_eq!(pose.draw_order(), &[0, 1, 2]);
        pose.set_time(300.0);
        pose.strike();
        assert_eq!(pose.draw_order(), &[1, 0, 2]);
    }

    #[test]
    fn test_events_fire_once_forward() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(90.0);
        pose.strike();
        assert!(pose.fired_events().is_empty());

        pose.update(20.0);
        pose.strike();
        assert_eq!(pose.fired_events().len(), 1);
        let event = &pose.fired_events()[0];
        assert_eq!(event.name, "footstep");
        // keyframe overrides the template int, template string survives
        assert_eq!(event.int_value, 7);
        assert_eq!(event.string_value.as_deref(), Some("left"));

        pose.update(20.0);
        pose.strike();
        assert!(pose.fired_events().is_empty());
    }

    #[test]
    fn test_time_wraps_into_animation_range() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(2500.0);
        assert!((pose.time() - 500.0).abs() < 1e-3);
        pose.set_time(-100.0);
        assert!((pose.time() - 900.0).abs() < 1e-3);
        pose.set_time(1000.0);
        assert!((pose.time() - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn test_set_animation_keeps_wrapped_time() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(700.0);
        // "blink" is 250ms long, so 700 wraps down into its range
        pose.set_animation("blink");
        assert!((pose.time() - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_event_at_resume_point_fires() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(100.0);
        pose.strike();
        assert!(pose.fired_events().is_empty());
        // the interval is closed, so the event sitting exactly at the
        // seek point is not lost
        pose.update(10.0);
        pose.strike();
        assert_eq!(pose.fired_events().len(), 1);
        assert_eq!(pose.fired_events()[0].name, "footstep");
    }

    #[test]
    fn test_events_fire_backward() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(110.0);
        pose.strike();
        pose.update(-20.0);
        pose.strike();
        assert_eq!(pose.fired_events().len(), 1);
        assert_eq!(pose.fired_events()[0].name, "footstep");
    }

    #[test]
    fn test_events_fire_across_loop_wrap() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(990.0);
        pose.strike();
        pose.update(20.0);
        assert!((pose.time() - 10.0).abs() < 1e-3);
        pose.strike();
        let names: Vec<&str> = pose.fired_events().iter().map(|it| it.name.as_str()).collect();
        assert_eq!(names, vec!["end", "start"]);
    }

    #[test]
    fn test_strike_memoizes_fired_events() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(90.0);
        pose.strike();
        pose.update(20.0);
        pose.strike();
        assert_eq!(pose.fired_events().len(), 1);
        // clean pose: a second strike must not clear or re-fire
        pose.strike();
        assert_eq!(pose.fired_events().len(), 1);
    }

    #[test]
    fn test_world_matrices_compose_down_the_chain() {
        let bones = [
            SkelBone {
                parent: None,
                length: 0.0,
                x: 10.0,
                y: 0.0,
                rotation: 90.0,
                scale_x: 1.0,
                scale_y: 1.0,
                inherit_rotation: true,
                inherit_scale: true,
            },
            SkelBone {
                parent: Some(0),
                length: 0.0,
                x: 5.0,
                y: 0.0,
                rotation: 0.0,
                scale_x: 1.0,
                scale_y: 1.0,
                inherit_rotation: true,
                inherit_scale: true,
            },
        ];
        let matrices = world_matrices(&bones);
        let child_origin = matrices[1] * nalgebra::Point3::new(0.0, 0.0, 1.0);
        assert!((child_origin.x - 10.0).abs() < 1e-4);
        assert!((child_origin.y - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_non_inheriting_bone_ignores_parent_rotation() {
        let bones = [
            SkelBone {
                parent: None,
                length: 0.0,
                x: 0.0,
                y: 0.0,
                rotation: 90.0,
                scale_x: 1.0,
                scale_y: 1.0,
                inherit_rotation: true,
                inherit_scale: true,
            },
            SkelBone {
                parent: Some(0),
                length: 10.0,
                x: 0.0,
                y: 0.0,
                rotation: 0.0,
                scale_x: 1.0,
                scale_y: 1.0,
                inherit_rotation: false,
                inherit_scale: true,
            },
        ];
        let matrices = world_matrices(&bones);
        let tip = matrices[1] * nalgebra::Point3::new(10.0, 0.0, 1.0);
        // the child cancels the parent rotation, so its tip stays on the x axis
        assert!((tip.x - 10.0).abs() < 1e-4);
        assert!(tip.y.abs() < 1e-4);
    }

    const MESH_JSON: &str = r#"{
        "bones": [ { "name": "root", "x": 2, "y": 3 } ],
        "slots": [
            { "name": "cape", "bone": "root", "attachment": "cape" },
            { "name": "cloth", "bone": "root", "attachment": "cloth" }
        ],
        "skins": {
            "default": {
                "cape": {
                    "cape": {
                        "type": "mesh",
                        "vertices": [0, 0, 10, 0, 10, 10, 0, 10],
                        "uvs": [0, 1, 1, 1, 1, 0, 0, 0],
                        "triangles": [0, 1, 2, 0, 2, 3]
                    }
                },
                "cloth": {
                    "cloth": {
                        "type": "skinnedmesh",
                        "vertices": [1, 0, 1, 0, 1, 1, 0, 4, 0, 1],
                        "uvs": [0, 0, 1, 0],
                        "triangles": [0, 1, 0]
                    }
                }
            }
        },
        "animations": {
            "flutter": {
                "ffd": {
                    "default": {
                        "cape": {
                            "cape": [
                                { "time": 0, "offset": 0, "vertices": [] },
                                { "time": 1, "offset": 2, "vertices": [5, 5] }
                            ]
                        },
                        "cloth": {
                            "cloth": [
                                { "time": 0, "vertices": [] },
                                { "time": 1, "offset": 0, "vertices": [2, 0] }
                            ]
                        }
                    }
                }
            }
        }
    }"#;

    fn mesh_attachment(data: &SpineData, slot: usize, key: &str) -> MeshAttachment {
        match data.skins.get("default").unwrap().get(slot, key).unwrap() {
            Attachment::Mesh(mesh) => mesh.clone(),
            other => panic!("expected mesh, got {:?}", other),
        }
    }

    fn skinned_attachment(data: &SpineData, slot: usize, key: &str) -> SkinnedMeshAttachment {
        match data.skins.get("default").unwrap().get(slot, key).unwrap() {
            Attachment::SkinnedMesh(mesh) => mesh.clone(),
            other => panic!("expected skinned mesh, got {:?}", other),
        }
    }

    #[test]
    fn test_ffd_at_rest_reproduces_setup_vertices() {
        let data = data_from(MESH_JSON);
        let cape = data.slot_id("cape").unwrap();
        let mesh = mesh_attachment(&data, cape, "cape");
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("flutter");
        pose.set_time(0.0);
        pose.strike();
        let vertices = pose.mesh_vertices(cape, "cape", &mesh);
        assert_eq!(vertices, mesh.vertices);
    }

    #[test]
    fn test_ffd_halfway_tween_respects_sparse_offset() {
        let data = data_from(MESH_JSON);
        let cape = data.slot_id("cape").unwrap();
        let mesh = mesh_attachment(&data, cape, "cape");
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("flutter");
        pose.set_time(500.0);
        pose.strike();
        let vertices = pose.mesh_vertices(cape, "cape", &mesh);
        assert!((vertices[0] - 0.0).abs() < 1e-4);
        assert!((vertices[1] - 0.0).abs() < 1e-4);
        // components 2 and 3 sit inside the keyframe's animated span
        assert!((vertices[2] - 12.5).abs() < 1e-4);
        assert!((vertices[3] - 2.5).abs() < 1e-4);
        assert!((vertices[4] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_skinned_mesh_follows_bone_world_transform() {
        let data = data_from(MESH_JSON);
        let cloth = data.slot_id("cloth").unwrap();
        let mesh = skinned_attachment(&data, cloth, "cloth");
        assert_eq!(mesh.influences.len(), 2);
        assert_eq!(mesh.influences[0].len(), 1);
        assert!((mesh.influences[1][0].x - 4.0).abs() < 1e-6);

        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("flutter");
        pose.set_time(0.0);
        pose.strike();
        let world = world_matrices(pose.bones());
        let vertices = pose.skinned_mesh_vertices(&world, cloth, "cloth", &mesh);
        // root sits at (2, 3), weight 1, local (1, 0) and (4, 0)
        assert!((vertices[0] - 3.0).abs() < 1e-4);
        assert!((vertices[1] - 3.0).abs() < 1e-4);
        assert!((vertices[2] - 6.0).abs() < 1e-4);
        assert!((vertices[3] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_skinned_mesh_ffd_deforms_in_bone_space() {
        let data = data_from(MESH_JSON);
        let cloth = data.slot_id("cloth").unwrap();
        let mesh = skinned_attachment(&data, cloth, "cloth");
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("flutter");
        pose.set_time(1000.0);
        pose.strike();
        let world = world_matrices(pose.bones());
        let vertices = pose.skinned_mesh_vertices(&world, cloth, "cloth", &mesh);
        assert!((vertices[0] - 5.0).abs() < 1e-4);
        assert!((vertices[1] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_weight_stream_with_absurd_count_is_bounded() {
        // a hostile bone count cannot demand more influences than the
        // stream itself carries
        let influences = parse_influences(&[1e12, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(influences.len(), 1);
        assert_eq!(influences[0].len(), 1);
        assert!((influences[0][0].weight - 1.0).abs() < 1e-6);

        let influences = parse_influences(&[3.0, 0.0, 2.0, 4.0, 0.5]);
        assert_eq!(influences.len(), 1);
        assert_eq!(influences[0].len(), 1);
        assert!((influences[0][0].x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_set_skin_marks_pose_dirty() {
        let data = data_from(POSE_JSON);
        let mut pose = Pose::new(Arc::clone(&data));
        pose.set_animation("walk");
        pose.set_time(90.0);
        pose.strike();
        pose.update(20.0);
        pose.strike();
        assert_eq!(pose.fired_events().len(), 1);
        // skin swap dirties the pose; the next strike recomputes and the
        // pending event list (now empty elapsed) clears
        pose.set_skin("default");
        pose.strike();
        assert!(pose.fired_events().is_empty());
    }
}
