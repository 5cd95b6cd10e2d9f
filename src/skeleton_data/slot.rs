use crate::shared_types::Color;
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct RawSlot {
    pub name: String,

    /// Name of the owning bone.
    #[serde(default)]
    pub bone: String,

    #[serde(default)]
    pub color: Color,

    /// Attachment visible in the setup pose, if any.
    #[serde(default)]
    pub attachment: Option<String>,

    #[serde(default)]
    pub additive: bool,
}
