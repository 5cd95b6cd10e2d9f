pub mod animation;
pub mod bone;
pub mod event;
pub mod skin;
pub mod slot;

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawSkeletonData {
    #[serde(default)]
    pub skeleton: RawSkeletonMeta,

    #[serde(default)]
    pub bones: Vec<bone::RawBone>,

    #[serde(default)]
    pub slots: Vec<slot::RawSlot>,

    #[serde(default)]
    pub skins: HashMap<String, skin::RawSkin>,

    #[serde(default)]
    pub events: HashMap<String, event::RawEvent>,

    #[serde(default)]
    pub animations: HashMap<String, animation::RawAnimation>,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawSkeletonMeta {
    #[serde(default)]
    pub hash: String,

    #[serde(default)]
    pub spine: String,

    #[serde(default)]
    pub width: f32,

    #[serde(default)]
    pub height: f32,

    /// Directory the per-attachment images live in, relative to the document.
    #[serde(default)]
    pub images: String,
}
