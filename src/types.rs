use std::collections::HashMap;

use crate::codeview::{usize_to_u32_saturating, DEBUG_SECTION_VERSION, FIRST_USER_TYPE_INDEX};
use crate::object::{ObjectError, ObjectWriter};
use crate::symbol::TypeRef;

/// Type-index interning for the `.debug$T` section.
pub trait TypeTable {
    fn init(&mut self);

    fn intern(&mut self, ty: &TypeRef) -> u32;

    /// Flushes the type section.
    ///
    /// # Errors
    /// Returns `ObjectError` when the object writer rejects the output.
    fn term(&mut self, obj: &mut dyn ObjectWriter) -> Result<(), ObjectError>;
}

/// Assigns type indices in first-seen order.
///
/// Only the index space is managed here; encoding the type records behind
/// the indices belongs to the type-record encoder.
#[derive(Debug, Default)]
pub struct TypeInterner {
    indices: HashMap<TypeRef, u32>,
    order: Vec<TypeRef>,
}

impl TypeInterner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Types interned so far, in index order.
    #[must_use]
    pub fn types(&self) -> &[TypeRef] {
        &self.order
    }
}

impl TypeTable for TypeInterner {
    fn init(&mut self) {
        self.indices.clear();
        self.order.clear();
    }

    fn intern(&mut self, ty: &TypeRef) -> u32 {
        if let Some(idx) = self.indices.get(ty) {
            return *idx;
        }
        let idx = FIRST_USER_TYPE_INDEX + usize_to_u32_saturating(self.order.len());
        self.indices.insert(ty.clone(), idx);
        self.order.push(ty.clone());
        idx
    }

    fn term(&mut self, obj: &mut dyn ObjectWriter) -> Result<(), ObjectError> {
        let seg = obj.debug_t_segment();
        obj.write_bytes(seg, 0, &DEBUG_SECTION_VERSION.to_le_bytes())?;
        tracing::debug!(types = self.order.len(), "type section flushed");
        Ok(())
    }
}
