use crate::codeview::{usize_to_u32_saturating, SUBSECTION_HEADER_SIZE};
use crate::object::{ObjectError, ObjectWriter, SegmentId};

/// Appends one `{type, length, payload, pad}` subsection to `segment` and
/// returns the offset it was written at.
///
/// # Errors
/// Returns `ObjectError` when the object writer rejects `segment`.
pub fn write_section(
    obj: &mut dyn ObjectWriter,
    segment: SegmentId,
    kind: u32,
    payload: &[u8],
) -> Result<u32, ObjectError> {
    let off = obj.current_offset(segment)?;
    let length = usize_to_u32_saturating(payload.len());
    obj.write_bytes(segment, off, &kind.to_le_bytes())?;
    obj.write_bytes(segment, off + 4, &length.to_le_bytes())?;
    obj.write_bytes(segment, off + SUBSECTION_HEADER_SIZE, payload)?;
    let pad = padding(length);
    if pad != 0 {
        obj.reserve_zeroed(segment, off + SUBSECTION_HEADER_SIZE + length, pad)?;
    }
    Ok(off)
}

#[must_use]
pub fn padding(length: u32) -> u32 {
    ((length + 3) & !3) - length
}
