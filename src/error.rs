use std::fmt;
use thiserror::Error;

/// Which of the two uploaded images an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Foreground,
    Background,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Foreground => f.write_str("foreground"),
            Role::Background => f.write_str("background"),
        }
    }
}

/// Terminal failures of a single compositing request
#[derive(Error, Debug)]
pub enum CompositeError {
    /// Input bytes are not a JPEG or PNG image
    #[error("failed to decode {role} image: {reason}")]
    Decode { role: Role, reason: String },

    /// Input decoded to a degenerate or mismatched geometry
    #[error("invalid {role} dimensions {width}x{height}: {reason}")]
    Dimension {
        role: Role,
        width: u32,
        height: u32,
        reason: String,
    },

    /// The segmentation backend failed or returned an unusable image
    #[error("background segmentation failed: {0:#}")]
    Segmentation(anyhow::Error),

    /// The composite could not be written as PNG
    #[error("failed to encode composite as PNG: {0}")]
    Encode(#[source] image::ImageError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CompositeError>;
