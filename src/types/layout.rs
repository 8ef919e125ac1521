//! Natural C alignment rules

/// Round `value` up to a multiple of `align` (`align` must be non-zero)
pub fn round_up(value: usize, align: usize) -> usize {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

/// Computed layout of a C struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub offsets: Vec<usize>,
    pub size: usize,
    pub alignment: usize,
}

/// Lay out fields given as `(size, alignment)` pairs, in declaration order
pub fn struct_layout<I>(fields: I) -> StructLayout
where
    I: IntoIterator<Item = (usize, usize)>,
{
    let mut offsets = Vec::new();
    let mut running = 0;
    let mut alignment = 1;
    for (size, align) in fields {
        let align = align.max(1);
        let offset = round_up(running, align);
        offsets.push(offset);
        running = offset + size;
        alignment = alignment.max(align);
    }
    StructLayout {
        offsets,
        size: round_up(running, alignment),
        alignment,
    }
}

pub const POINTER_SIZE: usize = std::mem::size_of::<*const ()>();
pub const POINTER_ALIGN: usize = std::mem::align_of::<*const ()>();

/// Layout of the `{uint32_t cap; uint32_t len; T *buf;}` sequence record
pub fn sequence_layout() -> StructLayout {
    struct_layout([(4, 4), (4, 4), (POINTER_SIZE, POINTER_ALIGN)])
}
