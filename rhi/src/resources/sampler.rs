//! GPU sampler resource.

use std::sync::Arc;

use crate::backend::{NativeObject, SamplerHandle};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::types::{ResourceId, SamplerDescriptor};

/// A texture sampler.
pub struct Sampler {
    context: Arc<DeviceContext>,
    id: ResourceId,
    descriptor: SamplerDescriptor,
    native: SamplerHandle,
}

impl Sampler {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        descriptor: &SamplerDescriptor,
    ) -> Result<Arc<Self>, RhiError> {
        if descriptor.anisotropy_clamp == 0 {
            return Err(RhiError::InvalidParameter(
                "sampler anisotropy must be at least 1".to_string(),
            ));
        }
        if descriptor.lod_min_clamp > descriptor.lod_max_clamp {
            return Err(RhiError::InvalidParameter(format!(
                "sampler lod range {}..{} is inverted",
                descriptor.lod_min_clamp, descriptor.lod_max_clamp
            )));
        }
        let native = context.backend().create_sampler(descriptor)?;
        if let Some(label) = &descriptor.label {
            context.name_object(NativeObject::Sampler(native), label);
        }
        Ok(Arc::new(Self {
            context,
            id: ResourceId::next(),
            descriptor: descriptor.clone(),
            native,
        }))
    }

    /// Get the sampler descriptor.
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn native(&self) -> SamplerHandle {
        self.native
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.context.backend().destroy_sampler(self.native);
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("mag_filter", &self.descriptor.mag_filter)
            .field("min_filter", &self.descriptor.min_filter)
            .field("compare", &self.descriptor.compare)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);
