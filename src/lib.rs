pub mod runtime;
pub mod shared_types;
pub mod skeleton_data;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to parse skeleton json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use crate::runtime::SpineData;
    use crate::skeleton_data::skin::RawAttachment;
    use crate::skeleton_data::RawSkeletonData;

    const HERO: &[u8] = include_bytes!("test_assets/hero_ske.json");

    #[test]
    fn test_raw_deserialization() {
        let raw: RawSkeletonData = serde_json::from_slice(HERO).unwrap();

        assert_eq!(raw.skeleton.images, "./images/");
        assert_eq!(raw.bones.len(), 3);

        let root = &raw.bones[0];
        assert_eq!(root.name, "root");
        assert!(root.parent.is_none());
        assert!((root.scale_x - 1.0).abs() < 1e-6);
        assert!(root.inherit_rotation);

        let weapon = &raw.bones[2];
        assert_eq!(weapon.parent.as_deref(), Some("arm"));
        assert!(!weapon.inherit_rotation);

        let arm_slot = raw.slots.iter().find(|it| it.name == "arm").unwrap();
        assert_eq!(arm_slot.bone, "arm");
        assert_eq!(arm_slot.color.rgba, 0xff0000ff);

        let fx_slot = raw.slots.iter().find(|it| it.name == "fx").unwrap();
        assert!(fx_slot.additive);
        assert!(fx_slot.attachment.is_none());
    }

    #[test]
    fn test_attachment_tag_dispatch() {
        let raw: RawSkeletonData = serde_json::from_slice(HERO).unwrap();
        let default_skin = raw.skins.get("default").unwrap();

        // "type" absent means an image region
        match &default_skin.0["body"]["body"] {
            RawAttachment::Region(region) => {
                assert!((region.width - 64.0).abs() < 1e-6);
                assert!((region.height - 96.0).abs() < 1e-6);
            }
            other => panic!("expected region attachment, got {:?}", other),
        }
        match &default_skin.0["cape"]["cape"] {
            RawAttachment::Mesh(mesh) => {
                assert_eq!(mesh.vertices.len(), 8);
                assert_eq!(mesh.triangles, vec![0, 1, 2, 0, 2, 3]);
            }
            other => panic!("expected mesh attachment, got {:?}", other),
        }
        match &default_skin.0["cloth"]["cloth"] {
            RawAttachment::SkinnedMesh(_) => {}
            other => panic!("expected skinned mesh attachment, got {:?}", other),
        }
        match &default_skin.0["hitbox"]["hitbox"] {
            RawAttachment::BoundingBox { vertices } => assert_eq!(vertices.len(), 8),
            other => panic!("expected bounding box attachment, got {:?}", other),
        }
    }

    #[test]
    fn test_cooked_model() {
        let data = SpineData::parse(HERO).unwrap();

        assert_eq!(data.bones.len(), 3);
        let arm_id = data.bone_id("arm").unwrap();
        assert_eq!(data.bones[arm_id].parent, Some(data.bone_id("root").unwrap()));

        let walk = data.animations.get("walk").unwrap();
        assert!(walk.max_time >= 1000.0);
        assert!(walk.min_time <= 0.0);
        assert!(walk.bone_timelines.contains_key(&arm_id));

        let footstep = data.events.get("footstep").unwrap();
        assert_eq!(footstep.int_value, 1);
        assert!((footstep.float_value - 2.5).abs() < 1e-6);
        assert_eq!(footstep.string_value.as_deref(), Some("left"));
    }
}
