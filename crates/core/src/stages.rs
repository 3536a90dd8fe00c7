//! Stage registry: the closed catalog of pipeline stage definitions.
//!
//! Each stage maps to one external worker script. The argument builder is
//! the only per-stage polymorphism: it receives the canonical
//! `(input, output, job, model)` tuple and returns the exact command the
//! worker expects. Everything else here is static configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::Job;

// ---------------------------------------------------------------------------
// Stage keys
// ---------------------------------------------------------------------------

/// The closed set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    Crop,
    Inpaint,
    SpotRemoval,
    ScratchRemoval,
    FaceRestore,
    Colorize,
    Upscale,
    OnlineRestore,
}

/// Catalog order, as presented to clients.
pub const ALL_STAGES: [StageKey; 8] = [
    StageKey::Crop,
    StageKey::Inpaint,
    StageKey::SpotRemoval,
    StageKey::ScratchRemoval,
    StageKey::FaceRestore,
    StageKey::Colorize,
    StageKey::Upscale,
    StageKey::OnlineRestore,
];

/// A model variant a stage can run with.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// A fully-built worker command: which script to run and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub script: &'static str,
    pub argv: Vec<String>,
}

impl StageKey {
    /// Wire key, identical to the serde representation.
    pub fn key(self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Inpaint => "inpaint",
            Self::SpotRemoval => "spot_removal",
            Self::ScratchRemoval => "scratch_removal",
            Self::FaceRestore => "face_restore",
            Self::Colorize => "colorize",
            Self::Upscale => "upscale",
            Self::OnlineRestore => "online_restore",
        }
    }

    pub fn human_name(self) -> &'static str {
        match self {
            Self::Crop => "Crop",
            Self::Inpaint => "Inpaint",
            Self::SpotRemoval => "Spot removal",
            Self::ScratchRemoval => "Scratch removal",
            Self::FaceRestore => "Face restoration",
            Self::Colorize => "Colorize",
            Self::Upscale => "Upscale",
            Self::OnlineRestore => "Online restoration",
        }
    }

    /// Manual stages cannot build their argv without user input.
    pub fn manual(self) -> bool {
        matches!(self, Self::Crop | Self::Inpaint)
    }

    /// Filename prefix for this stage's outputs.
    pub fn output_prefix(self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Inpaint => "inpaint",
            Self::SpotRemoval => "spots",
            Self::ScratchRemoval => "restore",
            Self::FaceRestore => "face",
            Self::Colorize => "color",
            Self::Upscale => "upscale",
            Self::OnlineRestore => "online",
        }
    }

    /// Model variants, empty for single-model stages.
    pub fn models(self) -> &'static [ModelInfo] {
        match self {
            Self::SpotRemoval => &[
                ModelInfo {
                    key: "lama",
                    name: "LaMa",
                    description: "Neural inpainting, best quality",
                },
                ModelInfo {
                    key: "opencv",
                    name: "OpenCV",
                    description: "Classical inpainting, fast",
                },
            ],
            Self::Colorize => &[
                ModelInfo {
                    key: "ddcolor",
                    name: "DDColor",
                    description: "Vivid modern colorization",
                },
                ModelInfo {
                    key: "siggraph17",
                    name: "SIGGRAPH 17",
                    description: "Interactive deep colorization",
                },
                ModelInfo {
                    key: "eccv16",
                    name: "ECCV 16",
                    description: "Classic colorful colorization",
                },
                ModelInfo {
                    key: "artistic",
                    name: "DeOldify artistic",
                    description: "Saturated, artistic render",
                },
                ModelInfo {
                    key: "stable",
                    name: "DeOldify stable",
                    description: "Conservative, fewer artifacts",
                },
            ],
            Self::Upscale => &[
                ModelInfo {
                    key: "x4plus",
                    name: "Real-ESRGAN x4plus",
                    description: "General purpose upscaling",
                },
                ModelInfo {
                    key: "x4plus-anime",
                    name: "Real-ESRGAN x4plus anime",
                    description: "Tuned for drawn images",
                },
                ModelInfo {
                    key: "x2plus",
                    name: "Real-ESRGAN x2plus",
                    description: "2x native upscaling",
                },
                ModelInfo {
                    key: "compact",
                    name: "Real-ESRGAN compact",
                    description: "Much faster, decent quality",
                },
                ModelInfo {
                    key: "lanczos",
                    name: "Lanczos",
                    description: "Non-AI resampling, instant",
                },
            ],
            _ => &[],
        }
    }

    pub fn default_model(self) -> Option<&'static str> {
        self.models().first().map(|m| m.key)
    }

    /// Environment variable that must be non-empty for this stage to be
    /// exposed.
    pub fn requires_api_key(self) -> Option<&'static str> {
        match self {
            Self::OnlineRestore => Some("OPENAI_API_KEY"),
            _ => None,
        }
    }

    /// Hidden from the catalog entirely when true.
    pub fn disabled(self) -> bool {
        false
    }

    /// Whether this stage still needs user input before it can run.
    pub fn needs_input(self, job: &Job) -> bool {
        match self {
            Self::Crop => job.crop_rect.is_none(),
            Self::Inpaint => job.mask_path.is_none(),
            _ => false,
        }
    }

    /// Build the worker command for this stage.
    ///
    /// `model` is the already-resolved selection (job option or stage
    /// default). For colorize the model picks the script itself.
    pub fn build_args(
        self,
        input: &Path,
        output: &Path,
        job: &Job,
        model: Option<&str>,
    ) -> Result<Invocation, CoreError> {
        let input = input.display().to_string();
        let output = output.display().to_string();

        let invocation = match self {
            Self::Crop => {
                let rect = job.crop_rect.clone().ok_or_else(|| {
                    CoreError::Internal("Crop stage dispatched without a crop rectangle".into())
                })?;
                Invocation {
                    script: "crop.py",
                    argv: vec![input, output, rect],
                }
            }
            Self::Inpaint => {
                let mask = job.mask_path.clone().ok_or_else(|| {
                    CoreError::Internal("Inpaint stage dispatched without a mask".into())
                })?;
                Invocation {
                    script: "inpaint.py",
                    argv: vec![input, mask.display().to_string(), output],
                }
            }
            Self::SpotRemoval => Invocation {
                script: "clean_spots.py",
                argv: vec![input, output, model.unwrap_or("lama").to_string()],
            },
            Self::ScratchRemoval => Invocation {
                script: "restore.py",
                argv: vec![input, output],
            },
            Self::FaceRestore => Invocation {
                script: "face_restore.py",
                argv: vec![input, output],
            },
            Self::Colorize => match model.unwrap_or("ddcolor") {
                "ddcolor" => Invocation {
                    script: "colorize_ddcolor.py",
                    argv: vec![input, output],
                },
                m @ ("siggraph17" | "eccv16") => Invocation {
                    script: "colorize.py",
                    argv: vec![input, output, m.to_string()],
                },
                m @ ("artistic" | "stable") => Invocation {
                    script: "colorize_deoldify.py",
                    argv: vec![input, output, m.to_string()],
                },
                other => {
                    return Err(CoreError::Validation(format!(
                        "Unknown colorize model '{other}'"
                    )))
                }
            },
            Self::Upscale => Invocation {
                script: "upscale.py",
                argv: vec![input, output, model.unwrap_or("x4plus").to_string()],
            },
            Self::OnlineRestore => Invocation {
                script: "restore_openai.py",
                argv: vec![input, output],
            },
        };
        Ok(invocation)
    }

    /// Release per-stage job input consumed by a successful run.
    ///
    /// Returns a file path the caller should delete, if any.
    pub fn on_complete(self, job: &mut Job) -> Option<PathBuf> {
        match self {
            Self::Crop => {
                job.crop_rect = None;
                None
            }
            Self::Inpaint => job.mask_path.take(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Option validation
// ---------------------------------------------------------------------------

/// Validate per-stage model selections against the stage catalog.
///
/// Rejects a selection for a stage with no variants, and unknown variant
/// keys. Stages not mentioned in `options` fall back to their default.
pub fn validate_options(options: &HashMap<StageKey, String>) -> Result<(), CoreError> {
    for (stage, model) in options {
        let known = stage.models().iter().any(|m| m.key == model);
        if !known {
            return Err(CoreError::Validation(format!(
                "Unknown model '{model}' for stage '{}'",
                stage.key()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public catalog
// ---------------------------------------------------------------------------

/// Public view of one stage: everything a client needs to build a
/// pipeline, nothing it could misuse.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicStageInfo {
    pub name: &'static str,
    pub manual: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<&'static str>,
}

/// Enumerate exposed stages in catalog order.
///
/// Drops disabled stages and stages whose required API key variable is
/// absent or empty in the process environment.
pub fn available_steps() -> Vec<(StageKey, PublicStageInfo)> {
    available_steps_with(|var| std::env::var(var).ok())
}

/// Catalog enumeration with an injectable environment, for tests.
pub fn available_steps_with(
    env: impl Fn(&str) -> Option<String>,
) -> Vec<(StageKey, PublicStageInfo)> {
    ALL_STAGES
        .iter()
        .copied()
        .filter(|stage| !stage.disabled())
        .filter(|stage| match stage.requires_api_key() {
            Some(var) => env(var).is_some_and(|v| !v.trim().is_empty()),
            None => true,
        })
        .map(|stage| {
            let models = stage.models();
            let models_map = (!models.is_empty()).then(|| {
                models
                    .iter()
                    .map(|m| {
                        (
                            m.key.to_string(),
                            serde_json::json!({ "name": m.name, "description": m.description }),
                        )
                    })
                    .collect()
            });
            (
                stage,
                PublicStageInfo {
                    name: stage.human_name(),
                    manual: stage.manual(),
                    models: models_map,
                    default_model: stage.default_model(),
                },
            )
        })
        .collect()
}
