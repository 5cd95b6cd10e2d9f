use crate::shared_types::{default_forward, default_one};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

/// One skin: slot name -> attachment name -> attachment description.
#[derive(Clone, Deserialize, Debug, Default)]
#[serde(transparent)]
pub struct RawSkin(pub HashMap<String, HashMap<String, RawAttachment>>);

#[derive(Clone, Debug)]
pub enum RawAttachment {
    Region(RawRegion),
    AnimatedRegion {
        fps: f32,
        play_mode: String,
        region: RawRegion,
    },
    BoundingBox {
        vertices: Vec<f32>,
    },
    Mesh(RawMesh),
    /// Same geometry fields as a mesh, but `vertices` is the interleaved
    /// weight stream: `bone_count, (bone_index, x, y, weight)*` per vertex.
    SkinnedMesh(RawMesh),
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawRegion {
    #[serde(default)]
    pub name: Option<String>,

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

    #[serde(default)]
    pub width: f32,

    #[serde(default)]
    pub height: f32,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawMesh {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub vertices: Vec<f32>,

    #[serde(default)]
    pub uvs: Vec<f32>,

    #[serde(default)]
    pub triangles: Vec<u32>,

    #[serde(default)]
    pub hull: u32,

    #[serde(default)]
    pub edges: Vec<u32>,

    #[serde(default)]
    pub width: f32,

    #[serde(default)]
    pub height: f32,
}

#[derive(Deserialize)]
struct AnimatedRegionFields {
    #[serde(default)]
    fps: f32,

    #[serde(rename = "playMode")]
    #[serde(default = "default_forward")]
    play_mode: String,

    #[serde(flatten)]
    region: RawRegion,
}

#[derive(Deserialize)]
struct BoundingBoxFields {
    #[serde(default)]
    vertices: Vec<f32>,
}

// The document stores the variant in an optional "type" field and an absent
// tag means "region", which rules out serde's derived tagged enums.
impl<'de> Deserialize<'de> for RawAttachment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Value = Deserialize::deserialize(deserializer)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom(
                "Unexpected JSON field type! Object expected",
            ));
        }
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("region")
            .to_owned();
        match tag.as_str() {
            "region" => serde_json::from_value(value)
                .map(RawAttachment::Region)
                .map_err(serde::de::Error::custom),
            "animatedRegion" => serde_json::from_value::<AnimatedRegionFields>(value)
                .map(|fields| RawAttachment::AnimatedRegion {
                    fps: fields.fps,
                    play_mode: fields.play_mode,
                    region: fields.region,
                })
                .map_err(serde::de::Error::custom),
            "boundingbox" => serde_json::from_value::<BoundingBoxFields>(value)
                .map(|fields| RawAttachment::BoundingBox {
                    vertices: fields.vertices,
                })
                .map_err(serde::de::Error::custom),
            "mesh" => serde_json::from_value(value)
                .map(RawAttachment::Mesh)
                .map_err(serde::de::Error::custom),
            "skinnedmesh" => serde_json::from_value(value)
                .map(RawAttachment::SkinnedMesh)
                .map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "Unexpected attachment tag \"{}\"",
                other
            ))),
        }
    }
}
