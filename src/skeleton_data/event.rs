use serde::Deserialize;

/// Template payload for a named event; keyframes may override any field.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct RawEvent {
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
