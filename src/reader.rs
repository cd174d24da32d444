//! The frame layout analyzer, iterator state, and basic-type extractor.
//!
//! Ported from `ell`'s `gvariant_iter_init_internal` / `next_item` /
//! `_gvariant_iter_next_entry_basic` / `_gvariant_iter_enter_*` family
//! (`examples/original_source/ell/gvariant-util.c`). The C code walks raw
//! pointers into a NUL-terminated signature buffer; this reimplementation
//! walks byte-slice indices, and every `NULL`-return failure path becomes a
//! `Result<_, GVariantError>`.

use crate::error::{GVariantError, Result};
use crate::offset::align_up;
use crate::signature;

/// Upper bound on how many top-level children a single frame's init pass
/// will track on the stack before giving up: the per-child scratch buffer is
/// a fixed-capacity array rather than a heap allocation, so it needs a cap.
const MAX_STACK_CHILDREN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Struct,
    DictEntry,
    Array,
    Variant,
}

#[derive(Clone, Copy)]
struct ChildInfo {
    alignment: u8,
    fixed_size: bool,
    end: usize,
}

fn offset_length(len: usize) -> usize {
    if len <= 0xFF {
        1
    } else if len <= 0xFFFF {
        2
    } else if len <= 0xFFFF_FFFF {
        4
    } else {
        8
    }
}

fn read_le(bytes: &[u8]) -> usize {
    match bytes.len() {
        1 => bytes[0] as usize,
        2 => u16::from_le_bytes(bytes.try_into().unwrap()) as usize,
        4 => u32::from_le_bytes(bytes.try_into().unwrap()) as usize,
        8 => u64::from_le_bytes(bytes.try_into().unwrap()) as usize,
        _ => unreachable!("offset width is always 1, 2, 4 or 8"),
    }
}

/// A zero-copy cursor over one GVariant frame.
///
/// `M` is an opaque handle the reader carries on behalf of its owner but
/// never inspects; use `Reader<'a, ()>` if you have nothing to carry. A
/// reader entered from a parent (via
/// [`Reader::enter_struct`], [`Reader::enter_array`], or
/// [`Reader::enter_variant`]) borrows `'a` from the same buffer as its
/// parent and may be used interleaved with it, but the parent must not be
/// advanced while a child derived from it is still alive.
pub struct Reader<'a, M = ()> {
    message: M,
    sig: &'a [u8],
    sig_pos: usize,
    data: &'a [u8],
    pos: usize,
    container_type: ContainerType,
    /// Byte index into `data` of the next framing offset to read, if this
    /// container has an offset table left to walk.
    offsets: Option<usize>,
}

impl<'a, M: Clone> Reader<'a, M> {
    /// Create a reader for a top-level struct: `sig` is the struct's own
    /// signature (e.g. `b"(si)"`, or `b"ii"` for a bare message body) and
    /// `data` is its complete frame.
    pub fn new_struct(message: M, sig: &'a [u8], data: &'a [u8]) -> Result<Self> {
        if !signature::valid_signature(sig) {
            return Err(GVariantError::InvalidSignature);
        }
        Self::init(message, ContainerType::Struct, sig, data)
    }

    fn init(message: M, container_type: ContainerType, sig: &'a [u8], data: &'a [u8]) -> Result<Self> {
        let len = data.len();
        let w = offset_length(len);

        // An empty window only ever arises from entering the contents of a
        // unit-type `()` field: zero children, nothing to validate.
        let n_children = if sig.is_empty() {
            0usize
        } else {
            let n = signature::num_children(sig).ok_or(GVariantError::InvalidSignature)?;
            if n <= 0 || n as usize > MAX_STACK_CHILDREN {
                return Err(GVariantError::InvalidSignature);
            }
            n as usize
        };

        let mut children = [ChildInfo {
            alignment: 1,
            fixed_size: false,
            end: 0,
        }; MAX_STACK_CHILDREN];

        let mut p = 0usize;
        let mut num_variable = 0usize;
        for i in 0..n_children {
            let (end, alignment) =
                signature::next_type(&sig[p..]).map_err(|_| GVariantError::InvalidSignature)?;
            let child_sig = &sig[p..p + end];
            let fixed_size = signature::is_fixed_size(child_sig);
            children[i] = ChildInfo {
                alignment,
                fixed_size,
                end: if fixed_size {
                    signature::get_fixed_size(child_sig)
                } else {
                    0
                },
            };
            if !fixed_size && i + 1 < n_children {
                num_variable += 1;
            }
            p += end;
        }

        if len < num_variable * w {
            return Err(GVariantError::TruncatedFrame);
        }
        let last_offset = len - num_variable * w;
        let initial_num_variable = num_variable;

        for i in 0..n_children {
            if children[i].fixed_size {
                if i == 0 {
                    continue;
                }
                let o = align_up(children[i - 1].end, children[i].alignment as usize);
                children[i].end = o + children[i].end;
                if children[i].end > len {
                    return Err(GVariantError::TruncatedFrame);
                }
                continue;
            }

            if num_variable == 0 {
                children[i].end = last_offset;
                continue;
            }

            num_variable -= 1;
            let v = initial_num_variable - num_variable;
            let off_pos = len
                .checked_sub(w * v)
                .ok_or(GVariantError::TruncatedFrame)?;
            let end = read_le(&data[off_pos..off_pos + w]);
            if end > len {
                return Err(GVariantError::OffsetOutOfRange);
            }
            children[i].end = end;
        }

        let mut offsets = if initial_num_variable > 0 {
            Some(len - w)
        } else {
            None
        };

        if container_type == ContainerType::Array && n_children > 0 && !children[0].fixed_size {
            if len < w {
                return Err(GVariantError::TruncatedFrame);
            }
            let table_start = read_le(&data[len - w..]);
            if table_start > len {
                return Err(GVariantError::OffsetOutOfRange);
            }
            offsets = Some(table_start);
        }

        Ok(Reader {
            message,
            sig,
            sig_pos: 0,
            data,
            pos: 0,
            container_type,
            offsets,
        })
    }

    /// Find, align to, and size the next complete type in the current
    /// container; returns the byte range of its frame.
    ///
    /// Every fallible step (offset-table lookup, bounds check) runs against
    /// local values before anything is written back to `self`, so a
    /// `Result::Err` out of this function leaves `sig_pos`/`pos`/`offsets`
    /// exactly as they were.
    fn next_item(&mut self) -> Result<(usize, usize)> {
        let remaining = &self.sig[self.sig_pos..];
        let (end, alignment) =
            signature::next_type(remaining).map_err(|_| GVariantError::TypeMismatch)?;
        let item_sig = &remaining[..end];
        let last = self.sig_pos + end == self.sig.len();

        let new_sig_pos = if self.container_type != ContainerType::Array {
            self.sig_pos + end
        } else {
            self.sig_pos
        };

        let start = align_up(self.pos, alignment as usize);

        let (size, new_offsets) = if signature::is_fixed_size(item_sig) {
            (signature::get_fixed_size(item_sig), self.offsets)
        } else if self.container_type != ContainerType::Array && last {
            let size = self
                .data
                .len()
                .checked_sub(start)
                .ok_or(GVariantError::TruncatedFrame)?;
            (size, self.offsets)
        } else {
            let offsets = self.offsets.ok_or(GVariantError::TruncatedFrame)?;
            let w = offset_length(self.data.len());
            if offsets.checked_add(w).ok_or(GVariantError::TruncatedFrame)? > self.data.len() {
                return Err(GVariantError::TruncatedFrame);
            }
            let next_end = read_le(&self.data[offsets..offsets + w]);
            if next_end > self.data.len() {
                return Err(GVariantError::OffsetOutOfRange);
            }
            let size = next_end
                .checked_sub(start)
                .ok_or(GVariantError::TruncatedFrame)?;
            let new_offsets = Some(if self.container_type == ContainerType::Array {
                offsets + w
            } else {
                offsets.checked_sub(w).ok_or(GVariantError::TruncatedFrame)?
            });
            (size, new_offsets)
        };

        if start > self.data.len() || start.checked_add(size).ok_or(GVariantError::TruncatedFrame)? > self.data.len() {
            return Err(GVariantError::TruncatedFrame);
        }
        if start >= self.data.len() && size == 0 && self.data.len() > 0 {
            // A zero-size item sitting exactly at the end of a non-empty
            // frame is still out of range per the upstream C check.
            return Err(GVariantError::TruncatedFrame);
        }

        self.sig_pos = new_sig_pos;
        self.pos = start + size;
        self.offsets = new_offsets;
        Ok((start, size))
    }

    fn next_basic_raw(&mut self, expected: u8) -> Result<&'a [u8]> {
        if self.pos >= self.data.len() {
            return Err(GVariantError::Overrun);
        }
        if self.sig.get(self.sig_pos) != Some(&expected) {
            return Err(GVariantError::TypeMismatch);
        }
        let (start, size) = self.next_item()?;
        Ok(&self.data[start..start + size])
    }

    fn next_string_like(&mut self, expected: u8) -> Result<&'a [u8]> {
        let bytes = self.next_basic_raw(expected)?;
        let nul = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(GVariantError::TruncatedFrame)?;
        Ok(&bytes[..nul])
    }

    pub fn next_bool(&mut self) -> Result<bool> {
        Ok(self.next_basic_raw(b'b')?[0] != 0)
    }
    pub fn next_u8(&mut self) -> Result<u8> {
        Ok(self.next_basic_raw(b'y')?[0])
    }
    pub fn next_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(
            self.next_basic_raw(b'n')?.try_into().unwrap(),
        ))
    }
    pub fn next_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(
            self.next_basic_raw(b'q')?.try_into().unwrap(),
        ))
    }
    pub fn next_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(
            self.next_basic_raw(b'i')?.try_into().unwrap(),
        ))
    }
    pub fn next_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(
            self.next_basic_raw(b'u')?.try_into().unwrap(),
        ))
    }
    /// `h` — a D-Bus file descriptor handle, wire-encoded like `i32`.
    pub fn next_handle(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(
            self.next_basic_raw(b'h')?.try_into().unwrap(),
        ))
    }
    pub fn next_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(
            self.next_basic_raw(b'x')?.try_into().unwrap(),
        ))
    }
    pub fn next_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(
            self.next_basic_raw(b't')?.try_into().unwrap(),
        ))
    }
    /// `d` — IEEE-754 double. The raw bit pattern is also available via
    /// [`Reader::next_f64_bits`] for callers that want `ell`'s literal
    /// integer-reinterpret behaviour instead of a parsed `f64`.
    pub fn next_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(
            self.next_basic_raw(b'd')?.try_into().unwrap(),
        ))
    }
    pub fn next_f64_bits(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(
            self.next_basic_raw(b'd')?.try_into().unwrap(),
        ))
    }

    /// `s` — a borrowed, NUL-terminated UTF-8 string (NUL excluded).
    pub fn next_string(&mut self) -> Result<&'a [u8]> {
        self.next_string_like(b's')
    }
    /// `o` — a borrowed object path.
    pub fn next_object_path(&mut self) -> Result<&'a [u8]> {
        self.next_string_like(b'o')
    }
    /// `g` — a borrowed type signature.
    pub fn next_signature(&mut self) -> Result<&'a [u8]> {
        self.next_string_like(b'g')
    }

    /// Signature window for a child entered via [`Reader::enter_struct`] or
    /// [`Reader::enter_array`], given the cursor position before the call.
    fn child_signature_window(&self, old_sig_pos: usize, strip_trailing: bool) -> &'a [u8] {
        let end = if self.container_type == ContainerType::Array {
            if strip_trailing {
                self.sig.len() - 1
            } else {
                self.sig.len()
            }
        } else if strip_trailing {
            self.sig_pos - 1
        } else {
            self.sig_pos
        };
        &self.sig[old_sig_pos + 1..end]
    }

    /// Enter a `(` struct `)` or `{` dict-entry `}` child.
    pub fn enter_struct(&mut self) -> Result<Reader<'a, M>> {
        if self.pos >= self.data.len() {
            return Err(GVariantError::Overrun);
        }
        let c = *self.sig.get(self.sig_pos).ok_or(GVariantError::TypeMismatch)?;
        let container_type = match c {
            b'(' => ContainerType::Struct,
            b'{' => ContainerType::DictEntry,
            _ => return Err(GVariantError::TypeMismatch),
        };
        let old_sig_pos = self.sig_pos;
        let (start, size) = self.next_item()?;
        let child_sig = self.child_signature_window(old_sig_pos, true);
        Reader::init(
            self.message.clone(),
            container_type,
            child_sig,
            &self.data[start..start + size],
        )
    }

    /// Enter an `a` array child.
    pub fn enter_array(&mut self) -> Result<Reader<'a, M>> {
        if self.pos >= self.data.len() {
            return Err(GVariantError::Overrun);
        }
        if self.sig.get(self.sig_pos) != Some(&b'a') {
            return Err(GVariantError::TypeMismatch);
        }
        let old_sig_pos = self.sig_pos;
        let (start, size) = self.next_item()?;
        let child_sig = self.child_signature_window(old_sig_pos, false);
        Reader::init(
            self.message.clone(),
            ContainerType::Array,
            child_sig,
            &self.data[start..start + size],
        )
    }

    /// Enter a `v` variant child, reading its trailing self-describing
    /// signature.
    pub fn enter_variant(&mut self) -> Result<Reader<'a, M>> {
        if self.pos >= self.data.len() {
            return Err(GVariantError::Overrun);
        }
        if self.sig.get(self.sig_pos) != Some(&b'v') {
            return Err(GVariantError::TypeMismatch);
        }
        let (start, size) = self.next_item()?;
        let frame = &self.data[start..start + size];
        let nul = frame
            .iter()
            .rposition(|&b| b == 0)
            .ok_or(GVariantError::TruncatedFrame)?;
        let sig_bytes = &frame[nul + 1..];
        if sig_bytes.len() > 255 {
            return Err(GVariantError::InvalidSignature);
        }
        if !signature::valid_signature(sig_bytes) || signature::num_children(sig_bytes) != Some(1) {
            return Err(GVariantError::InvalidSignature);
        }
        Reader::init(
            self.message.clone(),
            ContainerType::Variant,
            sig_bytes,
            &frame[..nul],
        )
    }

    /// `true` once every child of this container has been consumed (or, for
    /// an array, once the frame is exhausted).
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len() || (self.container_type != ContainerType::Array && self.sig_pos == self.sig.len())
    }
}
