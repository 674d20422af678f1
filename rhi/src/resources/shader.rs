//! Precompiled shader modules.

use std::sync::Arc;

use crate::backend::{NativeObject, ShaderModuleHandle};
use crate::context::DeviceContext;
use crate::error::RhiError;
use crate::types::{ShaderDescriptor, ShaderStages};

/// A shader module for one pipeline stage.
///
/// Bytecode is consumed as-is (SPIR-V for Vulkan); no compilation happens
/// here.
pub struct Shader {
    context: Arc<DeviceContext>,
    descriptor: ShaderDescriptor,
    native: ShaderModuleHandle,
}

impl Shader {
    pub(crate) fn create(
        context: Arc<DeviceContext>,
        descriptor: &ShaderDescriptor,
        bytecode: &[u8],
    ) -> Result<Arc<Self>, RhiError> {
        if descriptor.stage.bits().count_ones() != 1 {
            return Err(RhiError::InvalidParameter(format!(
                "shader must target exactly one stage, got {:?}",
                descriptor.stage
            )));
        }
        if bytecode.is_empty() || bytecode.len() % 4 != 0 {
            return Err(RhiError::InvalidParameter(format!(
                "shader bytecode length {} is not a non-zero multiple of 4",
                bytecode.len()
            )));
        }
        if descriptor.entry_point.is_empty() {
            return Err(RhiError::InvalidParameter(
                "shader entry point is empty".to_string(),
            ));
        }

        let native = context
            .backend()
            .create_shader_module(descriptor.stage, bytecode)?;
        if let Some(label) = &descriptor.label {
            context.name_object(NativeObject::ShaderModule(native), label);
        }
        log::trace!(
            "Created {:?} shader {:?} ({} bytes)",
            descriptor.stage,
            descriptor.label,
            bytecode.len()
        );
        Ok(Arc::new(Self {
            context,
            descriptor: descriptor.clone(),
            native,
        }))
    }

    pub fn descriptor(&self) -> &ShaderDescriptor {
        &self.descriptor
    }

    pub fn stage(&self) -> ShaderStages {
        self.descriptor.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.descriptor.entry_point
    }

    pub fn native(&self) -> ShaderModuleHandle {
        self.native
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.context.backend().destroy_shader_module(self.native);
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("stage", &self.descriptor.stage)
            .field("entry_point", &self.descriptor.entry_point)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Shader: Send, Sync);
