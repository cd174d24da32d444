//! The signature-string mini-language: validation, alignment, and size
//! queries over a GVariant type signature.
//!
//! Ported from `ell`'s `gvariant-util.c` (`validate_next_type` and the
//! `_gvariant_*` family of free functions), translated from NUL-terminated
//! `char *` walking to index-based slicing over `&[u8]` and from
//! `NULL`-sentinel failure to `Result`/`Option`.

use crate::error::{GVariantError, Result};
use crate::offset::align_up;

/// Recursion/nesting depth above which a signature is rejected outright
/// rather than walked. Signatures are untrusted input and `ell`'s own
/// `validate_next_type` relies on the caller never handing it a
/// pathologically deep one; this crate enforces the bound itself instead.
pub const MAX_DEPTH: u32 = 255;

const SIMPLE_TYPES: &[u8] = b"sogybnqiuxtdh";
const VARIABLE_TYPES: &[u8] = b"sogav";

fn basic_alignment(c: u8) -> Option<u8> {
    Some(match c {
        b'b' | b'y' | b's' | b'o' | b'g' => 1,
        b'n' | b'q' => 2,
        b'i' | b'u' | b'h' => 4,
        b'x' | b't' | b'd' => 8,
        b'v' => 8,
        _ => return None,
    })
}

fn basic_fixed_size(c: u8) -> Option<usize> {
    Some(match c {
        b'b' | b'y' => 1,
        b'n' | b'q' => 2,
        b'i' | b'u' | b'h' => 4,
        b'x' | b't' | b'd' => 8,
        _ => return None,
    })
}

/// Scan a single complete type starting at `sig[pos]`.
///
/// Returns the index just past the type and its alignment, or
/// [`GVariantError::InvalidSignature`].
fn validate_next_type(sig: &[u8], pos: usize, depth: u32) -> Result<(usize, u8)> {
    if depth > MAX_DEPTH {
        return Err(GVariantError::InvalidSignature);
    }
    let c = *sig.get(pos).ok_or(GVariantError::InvalidSignature)?;

    if SIMPLE_TYPES.contains(&c) || c == b'v' {
        return Ok((pos + 1, basic_alignment(c).unwrap()));
    }

    match c {
        b'a' => validate_next_type(sig, pos + 1, depth + 1),
        b'{' => {
            let key = *sig.get(pos + 1).ok_or(GVariantError::InvalidSignature)?;
            if !SIMPLE_TYPES.contains(&key) {
                return Err(GVariantError::InvalidSignature);
            }
            let key_align = basic_alignment(key).unwrap();
            let (end, val_align) = validate_next_type(sig, pos + 2, depth + 1)?;
            if sig.get(end) != Some(&b'}') {
                return Err(GVariantError::InvalidSignature);
            }
            Ok((end + 1, key_align.max(val_align)))
        }
        b'(' => {
            let mut p = pos + 1;
            let mut max_alignment = 1u8;
            loop {
                if sig.get(p) == Some(&b')') {
                    break;
                }
                let (end, alignment) = validate_next_type(sig, p, depth + 1)?;
                max_alignment = max_alignment.max(alignment);
                p = end;
            }
            Ok((p + 1, max_alignment))
        }
        _ => Err(GVariantError::InvalidSignature),
    }
}

/// `true` iff `sig` is a non-empty sequence of complete types.
pub fn valid_signature(sig: &[u8]) -> bool {
    !sig.is_empty() && num_children(sig).is_some()
}

/// Number of top-level complete types in `sig`, or `None` if invalid.
pub fn num_children(sig: &[u8]) -> Option<i32> {
    if sig.is_empty() {
        return None;
    }
    let mut pos = 0;
    let mut count = 0i32;
    while pos < sig.len() {
        let (end, _) = validate_next_type(sig, pos, 0).ok()?;
        count += 1;
        pos = end;
    }
    Some(count)
}

/// Maximum alignment over the top-level children of `sig`, or `None` if
/// invalid. Short-circuits once the maximum possible alignment (8) is
/// reached, matching the upstream C implementation.
pub fn get_alignment(sig: &[u8]) -> Option<u8> {
    let mut pos = 0;
    let mut max_alignment = 1u8;
    while pos < sig.len() && max_alignment != 8 {
        let (end, alignment) = validate_next_type(sig, pos, 0).ok()?;
        max_alignment = max_alignment.max(alignment);
        pos = end;
    }
    Some(max_alignment)
}

/// `true` iff no top-level-or-nested character in `sig` denotes a
/// variable-size type (`s o g a v`).
///
/// Scanning the flat character sequence is sufficient: a variable-size
/// child anywhere inside a struct or dict-entry still appears literally in
/// the signature string.
pub fn is_fixed_size(sig: &[u8]) -> bool {
    !sig.iter().any(|c| VARIABLE_TYPES.contains(c))
}

fn fixed_size_from(sig: &[u8], start: usize, depth: u32) -> usize {
    if depth > MAX_DEPTH {
        return 0;
    }
    let mut s = start;
    let mut size = 0usize;
    let mut max_alignment = 1u8;

    while s < sig.len() {
        let c = sig[s];

        if VARIABLE_TYPES.contains(&c) {
            return 0;
        }

        if let Some(width) = basic_fixed_size(c) {
            let alignment = basic_alignment(c).unwrap();
            max_alignment = max_alignment.max(alignment);
            size = align_up(size, alignment as usize);
            size += width;
            s += 1;
            continue;
        }

        if c == b'}' || c == b')' {
            break;
        }

        let (end, alignment) = match validate_next_type(sig, s, depth) {
            Ok(v) => v,
            Err(_) => return 0,
        };
        max_alignment = max_alignment.max(alignment);
        size = align_up(size, alignment as usize);

        // The empty tuple `()` is a fixed size-1 type; every other struct
        // or dict-entry's size is the fixed size of its own children.
        let inner = if c == b'(' && sig.get(s + 1) == Some(&b')') {
            1
        } else {
            fixed_size_from(sig, s + 1, depth + 1)
        };
        if inner == 0 {
            return 0;
        }
        size += inner;
        s = end;
    }

    align_up(size, max_alignment as usize)
}

/// Total aligned size of `sig` assuming it is entirely fixed-size, or `0`
/// if any child is variable-size.
pub fn get_fixed_size(sig: &[u8]) -> usize {
    fixed_size_from(sig, 0, 0)
}

/// Find the end index (exclusive) and alignment of the single complete
/// type starting at `sig[0]`. Used by the reader to split a signature
/// window into one child at a time without re-validating the whole string.
pub(crate) fn next_type(sig: &[u8]) -> Result<(usize, u8)> {
    validate_next_type(sig, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_types_are_valid() {
        for c in b"bynqiuxthsogv" {
            assert!(valid_signature(&[*c]), "{} should be valid", *c as char);
        }
    }

    #[test]
    fn unit_type_is_valid() {
        assert!(valid_signature(b"()"));
        assert_eq!(get_fixed_size(b"()"), 1);
        assert_eq!(get_alignment(b"()"), Some(1));
    }

    #[test]
    fn rejects_unterminated_struct() {
        assert!(!valid_signature(b"(i"));
        assert_eq!(num_children(b"(i"), None);
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(!valid_signature(b"z"));
        assert!(!valid_signature(b"(iz)"));
    }

    #[test]
    fn dict_entry_requires_simple_key() {
        assert!(valid_signature(b"{si}"));
        assert!(!valid_signature(b"{(i)i}"));
    }

    #[test]
    fn num_children_counts_top_level_types() {
        assert_eq!(num_children(b"iii"), Some(3));
        assert_eq!(num_children(b"(ii)i"), Some(2));
        assert_eq!(num_children(b"ai"), Some(1));
    }

    #[test]
    fn alignment_is_max_of_children() {
        assert_eq!(get_alignment(b"i"), Some(4));
        assert_eq!(get_alignment(b"(iy)"), Some(4));
        assert_eq!(get_alignment(b"(yx)"), Some(8));
        assert_eq!(get_alignment(b"v"), Some(8));
    }

    #[test]
    fn fixed_size_detection() {
        assert!(is_fixed_size(b"(iu)"));
        assert!(!is_fixed_size(b"(si)"));
        assert!(!is_fixed_size(b"ai"));
        assert!(!is_fixed_size(b"v"));
    }

    #[test]
    fn fixed_size_struct_is_padded_to_its_alignment() {
        // i32 then u8: 4 + 1, padded up to the struct's 4-byte alignment.
        assert_eq!(get_fixed_size(b"(iy)"), 8);
        assert_eq!(get_fixed_size(b"(yx)"), 16);
        assert_eq!(get_fixed_size(b"iu"), 8);
    }

    #[test]
    fn fixed_size_is_zero_for_variable_signatures() {
        assert_eq!(get_fixed_size(b"s"), 0);
        assert_eq!(get_fixed_size(b"(si)"), 0);
    }

    #[test]
    fn fixed_size_is_a_multiple_of_alignment() {
        for sig in [b"(iu)".as_ref(), b"(yx)".as_ref(), b"b".as_ref(), b"(bbi)".as_ref()] {
            if is_fixed_size(sig) {
                let align = get_alignment(sig).unwrap() as usize;
                assert_eq!(get_fixed_size(sig) % align, 0);
            }
        }
    }

    #[test]
    fn deeply_nested_signature_is_rejected_not_stack_overflowed() {
        let mut sig = Vec::new();
        for _ in 0..2000 {
            sig.push(b'a');
        }
        sig.push(b'i');
        assert!(!valid_signature(&sig));
    }

    /// Every string the validator accepts must also be internally
    /// consistent: `num_children`/`get_alignment` succeed, and a fixed-size
    /// signature's size is a multiple of its alignment. Exhaustive over a
    /// small alphabet (covering a basic type, containers, and variants) up
    /// to a short length, rather than random sampling, so the sweep is
    /// deterministic and covers every malformed prefix/suffix combination at
    /// that length.
    fn check_well_formed_signature_is_self_consistent(sig: &[u8]) {
        if !valid_signature(sig) {
            return;
        }
        assert!(num_children(sig).is_some(), "{:?}", sig);
        let align = get_alignment(sig).expect("valid signature has an alignment");
        assert!(align.is_power_of_two(), "{:?}", sig);
        if is_fixed_size(sig) {
            assert_eq!(get_fixed_size(sig) % align as usize, 0, "{:?}", sig);
        } else {
            assert_eq!(get_fixed_size(sig), 0, "{:?}", sig);
        }
    }

    fn sweep_signatures(alphabet: &[u8], max_len: usize, prefix: &mut Vec<u8>) {
        check_well_formed_signature_is_self_consistent(prefix);
        if prefix.len() == max_len {
            return;
        }
        for &c in alphabet {
            prefix.push(c);
            sweep_signatures(alphabet, max_len, prefix);
            prefix.pop();
        }
    }

    #[test]
    fn bounded_exhaustive_signature_sweep() {
        // 'i' (a basic type), 'a'/'(' /')' (containers), 'v' (variant):
        // enough to exercise nesting, mismatched parens, and early
        // termination without the sweep blowing up combinatorially.
        let alphabet = [b'i', b'a', b'(', b')', b'v'];
        let mut prefix = Vec::with_capacity(5);
        sweep_signatures(&alphabet, 5, &mut prefix);
    }
}
