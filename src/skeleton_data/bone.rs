use crate::shared_types::{default_one, default_true};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct RawBone {
    pub name: String,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub length: f32,

    #[serde(default)]
    pub x: f32,

    #[serde(default)]
    pub y: f32,

    #[serde(default)]
    pub rotation: f32,

    #[serde(rename = "scaleX")]
    #[serde(default = "default_one")]
    pub scale_x: f32,

    #[serde(rename = "scaleY")]
    #[serde(default = "default_one")]
    pub scale_y: f32,

    #[serde(rename = "inheritRotation")]
    #[serde(default = "default_true")]
    pub inherit_rotation: bool,

    #[serde(rename = "inheritScale")]
    #[serde(default = "default_true")]
    pub inherit_scale: bool,
}
