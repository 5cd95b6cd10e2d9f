use crate::shared_types::{default_one, Color};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawAnimation {
    /// Bone name -> timelines for that bone.
    #[serde(default)]
    pub bones: HashMap<String, RawBoneTimeline>,

    /// Slot name -> timelines for that slot.
    #[serde(default)]
    pub slots: HashMap<String, RawSlotTimeline>,

    #[serde(default)]
    pub events: Vec<RawEventFrame>,

    #[serde(default)]
    pub draworder: Vec<RawDrawOrderFrame>,

    /// Skin name -> slot name -> attachment name -> deformation keyframes.
    #[serde(default)]
    pub ffd: HashMap<String, RawFfdSkin>,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawBoneTimeline {
    #[serde(default)]
    pub translate: Vec<RawTranslateFrame>,

    #[serde(default)]
    pub rotate: Vec<RawRotateFrame>,

    #[serde(default)]
    pub scale: Vec<RawScaleFrame>,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawSlotTimeline {
    #[serde(default)]
    pub color: Vec<RawColorFrame>,

    #[serde(default)]
    pub attachment: Vec<RawAttachmentFrame>,
}

/// Easing descriptor attached to the FROM keyframe of a segment: absent is
/// linear, "stepped" holds, four numbers are cubic Bezier control points.
#[derive(Clone, Deserialize, Debug)]
#[serde(untagged)]
pub enum RawCurve {
    Named(String),
    Bezier(Vec<f32>),
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawTranslateFrame {
    /// Seconds; normalized to milliseconds when cooked.
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub x: f32,

    #[serde(default)]
    pub y: f32,

    #[serde(default)]
    pub curve: Option<RawCurve>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawRotateFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub angle: f32,

    #[serde(default)]
    pub curve: Option<RawCurve>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawScaleFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default = "default_one")]
    pub x: f32,

    #[serde(default = "default_one")]
    pub y: f32,

    #[serde(default)]
    pub curve: Option<RawCurve>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawColorFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub color: Color,

    #[serde(default)]
    pub curve: Option<RawCurve>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawAttachmentFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawEventFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "int")]
    #[serde(default)]
    pub int_value: Option<i32>,

    #[serde(rename = "float")]
    #[serde(default)]
    pub float_value: Option<f32>,

    #[serde(rename = "string")]
    #[serde(default)]
    pub string_value: Option<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawDrawOrderFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub offsets: Vec<RawSlotOffset>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawSlotOffset {
    #[serde(default)]
    pub slot: String,

    #[serde(default)]
    pub offset: i32,
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(transparent)]
pub struct RawFfdSkin(pub HashMap<String, HashMap<String, Vec<RawFfdFrame>>>);

#[derive(Clone, Deserialize, Debug)]
pub struct RawFfdFrame {
    #[serde(default)]
    pub time: f32,

    /// First animated vertex component; entries before it are zero.
    #[serde(default)]
    pub offset: usize,

    #[serde(default)]
    pub vertices: Vec<f32>,

    #[serde(default)]
    pub curve: Option<RawCurve>,
}
