//! Generation parameters validated against closed allow-lists.
//!
//! Requests arrive from the web layer as loose string maps. They are turned
//! into [`GenerationParams`] once, at the boundary; everything downstream works
//! with the typed enums.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Raw request parameters as received from the caller.
pub type RequestParams = HashMap<String, String>;

macro_rules! allow_list {
    (
        $(#[$meta:meta])*
        $name:ident, $param:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every accepted value, in canonical spelling.
            pub const ALLOWED: &'static [&'static str] = &[$($value),+];

            /// Canonical lowercase name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $value ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = RagError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $( $value => Ok(Self::$variant), )+
                    other => Err(RagError::invalid(format!(
                        "unsupported {} '{}' (allowed: {})",
                        $param,
                        other,
                        Self::ALLOWED.join(", ")
                    ))),
                }
            }
        }
    };
}

allow_list! {
    /// Writing style of the generated post.
    Style, "style" {
        #[default]
        SatiricalWitty => "satirical_witty",
        Satirical => "satirical",
        Witty => "witty",
        Sharp => "sharp",
    }
}

allow_list! {
    /// Tone of voice.
    Tone, "tone" {
        #[default]
        Ironic => "ironic",
        Playful => "playful",
        Sarcastic => "sarcastic",
        Deadpan => "deadpan",
    }
}

allow_list! {
    /// Target length of the generated text.
    Length, "length" {
        Short => "short",
        #[default]
        Medium => "medium",
        Long => "long",
    }
}

allow_list! {
    /// Output language.
    Language, "language" {
        #[default]
        En => "en",
        Ru => "ru",
    }
}

allow_list! {
    /// Social platform the post is written for.
    Platform, "platform" {
        #[default]
        Instagram => "instagram",
        Tiktok => "tiktok",
        Facebook => "facebook",
        Youtube => "youtube",
    }
}

impl Length {
    /// Rough completion size, used to meter rate-limit cost.
    pub fn estimated_tokens(&self) -> u32 {
        match self {
            Self::Short => 120,
            Self::Medium => 350,
            Self::Long => 800,
        }
    }
}

/// Validated generation parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationParams {
    pub style: Style,
    pub tone: Tone,
    pub length: Length,
    pub language: Language,
    pub platform: Platform,
}

impl GenerationParams {
    /// Parameter names accepted by [`from_raw`](Self::from_raw).
    pub const KEYS: &'static [&'static str] = &["style", "tone", "length", "language", "platform"];

    /// Validate a raw parameter map.
    ///
    /// Names and values are trimmed and lowercased first. Missing names take
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown name, a name given twice
    /// (after normalization), or a value outside its allow-list.
    pub fn from_raw(raw: &RequestParams) -> Result<Self> {
        let mut params = Self::default();
        let mut seen: Vec<String> = Vec::with_capacity(raw.len());

        for (name, value) in raw {
            let name = name.trim().to_lowercase();
            if seen.contains(&name) {
                return Err(RagError::invalid(format!("parameter '{name}' given more than once")));
            }
            match name.as_str() {
                "style" => params.style = value.parse()?,
                "tone" => params.tone = value.parse()?,
                "length" => params.length = value.parse()?,
                "language" => params.language = value.parse()?,
                "platform" => params.platform = value.parse()?,
                _ => {
                    return Err(RagError::invalid(format!(
                        "unknown parameter '{name}' (expected one of: {})",
                        Self::KEYS.join(", ")
                    )));
                }
            }
            seen.push(name);
        }
        Ok(params)
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_length(mut self, length: Length) -> Self {
        self.length = length;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Canonical `(name, value)` pairs in name order.
    pub fn canonical_pairs(&self) -> [(&'static str, &'static str); 5] {
        [
            ("language", self.language.as_str()),
            ("length", self.length.as_str()),
            ("platform", self.platform.as_str()),
            ("style", self.style.as_str()),
            ("tone", self.tone.as_str()),
        ]
    }
}
