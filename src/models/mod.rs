//! Core data types: key points, the playbook document, transcripts.

mod keypoint;
mod playbook;
mod transcript;

pub use keypoint::{
    DEFAULT_EFFECT_RATING, DEFAULT_INNOVATION_LEVEL, DEFAULT_RISK_LEVEL, KeyPoint, KeyPointBody,
    KeyPointName,
};
pub use playbook::{BodyShape, Playbook, SCHEMA_VERSION};
pub use transcript::{Role, Turn, load_transcript};
