//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::window::GrayWindow;
pub use crate::data::{Geometry, GeometryMismatch, Mask, PixelType, Volume, VolumeAttr, VolumeError};

pub use crate::consts::label::{BACKGROUND, LESION};

pub use crate::preprocess::{MaskInterpolation, Modality, NormalizeMethod, PreprocessOptions, Preprocessor};

pub use crate::extract::{FeatureExtractor, FeatureVector, OrderPolicy};

pub use crate::predict::{ClinicalRecord, Label, Manufacturer, PredictionInput, Predictor, Sex};

pub use crate::artifact::{ArtifactCache, ModelId, ModelRegistry};

pub use crate::pipeline::{Outcome, Pipeline, PipelineConfig, Request, Stage};
