use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InpaintingWhen {
    #[default]
    BeforeRestoreFace,
    AfterRestoreFace,
}

/// Settings for the final enhancement pass applied to every swapped image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingOptions {
    pub face_restorer_name: Option<String>,
    pub restorer_weight: f32,
    pub restorer_visibility: f32,

    pub upscaler_name: Option<String>,
    pub scale: f32,
    pub upscale_visibility: f32,

    pub inpainting_enabled: bool,
    pub inpainting_steps: u32,
    pub inpainting_denoising_strength: f32,
    pub inpainting_prompt: String,
    pub inpainting_negative_prompt: String,
    pub inpainting_when: InpaintingWhen,
}

impl Default for PostProcessingOptions {
    fn default() -> Self {
        Self {
            face_restorer_name: None,
            restorer_weight: 1.0,
            restorer_visibility: 1.0,
            upscaler_name: None,
            scale: 1.0,
            upscale_visibility: 1.0,
            inpainting_enabled: false,
            inpainting_steps: 20,
            inpainting_denoising_strength: 0.0,
            inpainting_prompt: "Portrait of a [gender]".to_string(),
            inpainting_negative_prompt: "blurry".to_string(),
            inpainting_when: InpaintingWhen::BeforeRestoreFace,
        }
    }
}

impl PostProcessingOptions {
    pub fn restorer(&self) -> Option<&str> {
        non_empty(self.face_restorer_name.as_deref())
    }

    pub fn upscaler(&self) -> Option<&str> {
        non_empty(self.upscaler_name.as_deref())
    }

    /// Inpainting only runs with a positive denoising strength.
    pub fn inpainting_active(&self) -> bool {
        self.inpainting_enabled && self.inpainting_denoising_strength > 0.0
    }
}

fn non_empty(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case("none"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let options: PostProcessingOptions = toml::from_str(
            r#"
            upscaler_name = "Lanczos"
            scale = 2.0
            inpainting_when = "after_restore_face"
            "#,
        )
        .unwrap();
        assert_eq!(options.upscaler(), Some("Lanczos"));
        assert_eq!(options.scale, 2.0);
        assert_eq!(options.restorer_visibility, 1.0);
        assert_eq!(options.inpainting_when, InpaintingWhen::AfterRestoreFace);
        assert!(!options.inpainting_active());
    }

    #[test]
    fn test_none_names_are_disabled() {
        let options = PostProcessingOptions {
            face_restorer_name: Some("None".into()),
            upscaler_name: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(options.restorer(), None);
        assert_eq!(options.upscaler(), None);
    }
}
