//! Keys for binding slots and view caches.
//!
//! Equality and hashing are field-wise. Texture and buffer keys must be built
//! from resolved ranges and formats so that equivalent requests map to the
//! same cached view.

use std::collections::HashMap;

use crate::types::{BufferRange, Format, ResourceType, TextureSubresourceSet};

/// A binding slot of a given register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceBindingKey {
    pub slot: u32,
    pub resource_type: ResourceType,
}

impl ResourceBindingKey {
    pub fn new(slot: u32, resource_type: ResourceType) -> Self {
        Self {
            slot,
            resource_type,
        }
    }
}

/// Identity of a texture view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBindingKey {
    pub subresources: TextureSubresourceSet,
    pub format: Format,
    pub is_read_only_dsv: bool,
}

impl TextureBindingKey {
    pub fn new(subresources: TextureSubresourceSet, format: Format) -> Self {
        Self {
            subresources,
            format,
            is_read_only_dsv: false,
        }
    }

    pub fn read_only_dsv(mut self, read_only: bool) -> Self {
        self.is_read_only_dsv = read_only;
        self
    }
}

/// Identity of a buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBindingKey {
    pub range: BufferRange,
    pub format: Format,
}

impl BufferBindingKey {
    pub fn new(range: BufferRange, format: Format) -> Self {
        Self { range, format }
    }
}

pub type ResourceBindingMap<T> = HashMap<ResourceBindingKey, T>;
pub type TextureBindingMap<T> = HashMap<TextureBindingKey, T>;
pub type BufferBindingMap<T> = HashMap<BufferBindingKey, T>;
