#![no_main]
use libfuzzer_sys::fuzz_target;

use gvariant::reader::Reader;

/// Walk every child of `r` out to its leaves. The only property under test
/// is "never panics" -- every malformed frame must surface as an `Err`.
fn walk(r: &mut Reader<'_, ()>, depth: u32) {
    if depth > 64 {
        return;
    }
    loop {
        if r.is_exhausted() {
            break;
        }
        // Try each extraction in turn; whichever matches the next
        // signature character will succeed, the rest fail harmlessly.
        if r.next_bool().is_ok() {
            continue;
        }
        if r.next_u8().is_ok() {
            continue;
        }
        if r.next_i16().is_ok() || r.next_u16().is_ok() {
            continue;
        }
        if r.next_i32().is_ok() || r.next_u32().is_ok() || r.next_handle().is_ok() {
            continue;
        }
        if r.next_i64().is_ok() || r.next_u64().is_ok() || r.next_f64().is_ok() {
            continue;
        }
        if r.next_string().is_ok() || r.next_object_path().is_ok() || r.next_signature().is_ok() {
            continue;
        }
        if let Ok(mut child) = r.enter_struct() {
            walk(&mut child, depth + 1);
            continue;
        }
        if let Ok(mut child) = r.enter_array() {
            walk(&mut child, depth + 1);
            continue;
        }
        if let Ok(mut child) = r.enter_variant() {
            walk(&mut child, depth + 1);
            continue;
        }
        break;
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let sig_len = data[0] as usize % 32;
    if data.len() < 1 + sig_len {
        return;
    }
    let sig = &data[1..1 + sig_len];
    let frame = &data[1 + sig_len..];

    if let Ok(mut r) = Reader::new_struct((), sig, frame) {
        walk(&mut r, 0);
    }
});
