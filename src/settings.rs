use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// Color space of the final fragment color written to the default framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputColorSpace {
    Linear,
    #[default]
    Srgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapping {
    #[default]
    None,
    Linear,
    Reinhard,
    Cineon,
    AcesFilmic,
    Agx,
    Neutral,
    /// Calls a user-provided `CustomToneMapping` function.
    Custom,
}

impl ToneMapping {
    /// Name of the GLSL function implementing the curve.
    pub(crate) fn function_name(self) -> Option<&'static str> {
        match self {
            ToneMapping::None => None,
            ToneMapping::Linear => Some("LinearToneMapping"),
            ToneMapping::Reinhard => Some("ReinhardToneMapping"),
            ToneMapping::Cineon => Some("CineonToneMapping"),
            ToneMapping::AcesFilmic => Some("ACESFilmicToneMapping"),
            ToneMapping::Agx => Some("AgXToneMapping"),
            ToneMapping::Neutral => Some("NeutralToneMapping"),
            ToneMapping::Custom => Some("CustomToneMapping"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShadowType {
    Basic,
    #[default]
    Pcf,
    PcfSoft,
    Vsm,
}

impl ShadowType {
    pub(crate) fn define(self) -> &'static str {
        match self {
            ShadowType::Basic => "SHADOWMAP_TYPE_BASIC",
            ShadowType::Pcf => "SHADOWMAP_TYPE_PCF",
            ShadowType::PcfSoft => "SHADOWMAP_TYPE_PCF_SOFT",
            ShadowType::Vsm => "SHADOWMAP_TYPE_VSM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Lowp,
    Mediump,
    #[default]
    Highp,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Lowp => "lowp",
            Precision::Mediump => "mediump",
            Precision::Highp => "highp",
        }
    }

    /// Falls back to what the backend supports when `highp` is unavailable.
    pub(crate) fn supported(self, backend_precision: &str) -> Self {
        match (self, backend_precision) {
            (Precision::Highp, "mediump") | (Precision::Highp, "lowp") => {
                warn!("highp precision is not supported; using {}", backend_precision);
                if backend_precision == "lowp" {
                    Precision::Lowp
                } else {
                    Precision::Mediump
                }
            }
            _ => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShadowSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub kind: ShadowType,
    /// Re-render every shadow map each frame; otherwise only on light request.
    #[serde(default = "default_true")]
    pub auto_update: bool,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: ShadowType::default(),
            auto_update: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoClear {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub color: bool,
    #[serde(default = "default_true")]
    pub depth: bool,
    #[serde(default = "default_true")]
    pub stencil: bool,
}

impl Default for AutoClear {
    fn default() -> Self {
        Self {
            enabled: true,
            color: true,
            depth: true,
            stencil: true,
        }
    }
}

/// Renderer-wide options, typically read from `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererSettings {
    #[serde(default)]
    pub output_color_space: OutputColorSpace,
    #[serde(default)]
    pub tone_mapping: ToneMapping,
    #[serde(default = "RendererSettings::default_exposure")]
    pub tone_mapping_exposure: f32,
    #[serde(default)]
    pub shadows: ShadowSettings,
    #[serde(default = "RendererSettings::default_pixel_ratio")]
    pub pixel_ratio: f32,
    /// MSAA sample count of internal render targets; zero disables multisampling.
    #[serde(default)]
    pub antialias: u32,
    #[serde(default = "default_true")]
    pub sort_objects: bool,
    #[serde(default)]
    pub auto_clear: AutoClear,
    #[serde(default)]
    pub local_clipping: bool,
    /// Physically based light decay; the legacy mode scales punctual intensities by PI.
    #[serde(default = "default_true")]
    pub physically_correct_lights: bool,
    #[serde(default)]
    pub precision: Precision,
    /// Log each capability clamp once per resource instead of every time.
    #[serde(default = "default_true")]
    pub log_capability_once: bool,
    /// Warn when a non-power-of-two texture loses mipmapping or repeat wrapping.
    #[serde(default)]
    pub warn_on_npot: bool,
    /// Size of the transmission target relative to the drawing buffer.
    #[serde(default = "RendererSettings::default_transmission_scale")]
    pub transmission_resolution_scale: f32,
    #[serde(default = "RendererSettings::default_clear_color")]
    pub clear_color: [f32; 4],
}

const fn default_true() -> bool {
    true
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            output_color_space: OutputColorSpace::default(),
            tone_mapping: ToneMapping::default(),
            tone_mapping_exposure: Self::default_exposure(),
            shadows: ShadowSettings::default(),
            pixel_ratio: Self::default_pixel_ratio(),
            antialias: 0,
            sort_objects: true,
            auto_clear: AutoClear::default(),
            local_clipping: false,
            physically_correct_lights: true,
            precision: Precision::default(),
            log_capability_once: true,
            warn_on_npot: false,
            transmission_resolution_scale: Self::default_transmission_scale(),
            clear_color: Self::default_clear_color(),
        }
    }
}

impl RendererSettings {
    pub fn load() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            info!("Using default renderer settings for WebAssembly build");
            return Self::default();
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            Self::load_from_path("settings.json")
        }
    }

    /// Reads and validates a settings file. Any failure falls back to the defaults.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(settings) => {
                    info!("Loaded renderer settings from {:?}", path);
                    settings
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default renderer settings.",
                        path, err
                    );
                    RendererSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Renderer settings file {:?} not found. Using default settings.",
                    path
                );
                RendererSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default renderer settings.",
                    path, err
                );
                RendererSettings::default()
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self, RenderError> {
        let settings: RendererSettings =
            serde_json::from_str(json).map_err(|e| RenderError::Settings(e.to_string()))?;
        Ok(settings.validate())
    }

    pub fn to_json(&self) -> Result<String, RenderError> {
        serde_json::to_string_pretty(self).map_err(|e| RenderError::Settings(e.to_string()))
    }

    /// Replaces out-of-range values with defaults, warning about each one.
    pub fn validate(mut self) -> Self {
        if !self.pixel_ratio.is_finite() || self.pixel_ratio <= 0.0 {
            warn!(
                "Pixel ratio must be positive (got {}). Using 1 instead.",
                self.pixel_ratio
            );
            self.pixel_ratio = Self::default_pixel_ratio();
        }

        if !self.tone_mapping_exposure.is_finite() || self.tone_mapping_exposure < 0.0 {
            warn!("Tone mapping exposure must be non-negative. Using default value.");
            self.tone_mapping_exposure = Self::default_exposure();
        }

        if self.antialias > 16 {
            warn!("Antialias sample count {} is too high. Using 16.", self.antialias);
            self.antialias = 16;
        }

        if !(self.transmission_resolution_scale > 0.0 && self.transmission_resolution_scale <= 1.0) {
            warn!("Transmission resolution scale must be in (0, 1]. Using default value.");
            self.transmission_resolution_scale = Self::default_transmission_scale();
        }

        for channel in &mut self.clear_color {
            if !channel.is_finite() {
                warn!("Clear color has a non-finite channel. Using 0 instead.");
                *channel = 0.0;
            }
            *channel = channel.clamp(0.0, 1.0);
        }

        self
    }

    const fn default_exposure() -> f32 {
        1.0
    }

    const fn default_pixel_ratio() -> f32 {
        1.0
    }

    const fn default_transmission_scale() -> f32 {
        1.0
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> RendererSettings {
        RendererSettings {
            pixel_ratio: 0.0,
            tone_mapping_exposure: -2.0,
            antialias: 64,
            transmission_resolution_scale: 3.0,
            clear_color: [f32::NAN, 2.0, 0.5, 1.0],
            ..Default::default()
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = RendererSettings::default();

        assert_eq!(validated.pixel_ratio, defaults.pixel_ratio);
        assert_eq!(validated.tone_mapping_exposure, defaults.tone_mapping_exposure);
        assert_eq!(validated.antialias, 16);
        assert_eq!(
            validated.transmission_resolution_scale,
            defaults.transmission_resolution_scale
        );
        assert_eq!(validated.clear_color, [0.0, 1.0, 0.5, 1.0]);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let settings = RendererSettings::from_json(
            r#"{ "tone_mapping": "aces_filmic", "shadows": { "enabled": true, "kind": "vsm" } }"#,
        )
        .unwrap();
        assert_eq!(settings.tone_mapping, ToneMapping::AcesFilmic);
        assert!(settings.shadows.enabled);
        assert_eq!(settings.shadows.kind, ShadowType::Vsm);
        assert!(settings.shadows.auto_update);
        assert!(settings.auto_clear.color);
        assert_eq!(settings.output_color_space, OutputColorSpace::Srgb);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        let err = RendererSettings::from_json("{ not json").unwrap_err();
        assert!(matches!(err, RenderError::Settings(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = RendererSettings::load_from_path("definitely/not/here/settings.json");
        assert_eq!(settings, RendererSettings::default());
    }

    #[test]
    fn json_round_trip_keeps_values() {
        let mut settings = RendererSettings::default();
        settings.tone_mapping = ToneMapping::Neutral;
        settings.pixel_ratio = 2.0;
        let json = settings.to_json().unwrap();
        assert_eq!(RendererSettings::from_json(&json).unwrap(), settings);
    }
}
