//! Per-stack limits shared by transports and codecs.
//!
//! A `Configuration` is built once per transport/codec stack and is immutable
//! afterwards; change limits by building a new one.

use serde::Deserialize;

use crate::error::{Result, WireError};

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16_384_000;
pub const DEFAULT_RECURSION_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 || self.max_message_size > i32::MAX as usize {
            return Err(WireError::Config(
                "max_message_size must be between 1 and i32::MAX".into(),
            ));
        }
        if self.max_frame_size == 0 || self.max_frame_size > self.max_message_size {
            return Err(WireError::Config(
                "max_frame_size must be between 1 and max_message_size".into(),
            ));
        }
        if self.recursion_limit == 0 {
            return Err(WireError::Config("recursion_limit must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    inner: Configuration,
}

impl ConfigurationBuilder {
    pub fn max_message_size(mut self, v: usize) -> Self {
        self.inner.max_message_size = v;
        self
    }

    pub fn max_frame_size(mut self, v: usize) -> Self {
        self.inner.max_frame_size = v;
        self
    }

    pub fn recursion_limit(mut self, v: usize) -> Self {
        self.inner.recursion_limit = v;
        self
    }

    pub fn build(self) -> Result<Configuration> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

/// String and container length limits enforced by codecs on read.
/// `None` means unlimited (the message budget still applies).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodecLimits {
    #[serde(default)]
    pub string_limit: Option<usize>,

    #[serde(default)]
    pub container_limit: Option<usize>,
}

impl CodecLimits {
    pub fn new(string_limit: Option<usize>, container_limit: Option<usize>) -> Self {
        Self {
            string_limit,
            container_limit,
        }
    }
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}
