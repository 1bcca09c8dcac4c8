//! Standard IEEE 802.3 CRC-32 (the same polynomial used by zip/gzip/
//! Ethernet FCS), table-driven with an optional carry-in so callers can
//! stream data across several calls (spec §4.h/§8).

const POLY: u32 = 0xEDB88320;

fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

// Built once at first use; 256 u32s is cheap enough to recompute lazily
// rather than spell out as a literal table.
fn table() -> &'static [u32; 256] {
    use spin::Once;
    static TABLE: Once<[u32; 256]> = Once::new();
    TABLE.call_once(make_table)
}

/// Computes the CRC-32 of `buf`, optionally continuing from a prior value
/// via `last_crc` (pass `None` to start fresh). On return, `*last_crc` (if
/// given) is updated so the caller can keep streaming.
pub fn crc32(buf: &[u8], last_crc: Option<&mut u32>) -> u32 {
    let table = table();
    let mut crc = match &last_crc {
        Some(v) => !**v,
        None => 0xFFFF_FFFFu32,
    };
    for &byte in buf {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = table[idx] ^ (crc >> 8);
    }
    let result = !crc;
    if let Some(v) = last_crc {
        *v = result;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_vector() {
        assert_eq!(crc32(b"123456789", None), 0xCBF4_3926);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let whole = crc32(b"123456789", None);
        let mut running = 0u32;
        crc32(b"1234", Some(&mut running));
        let streamed = crc32(b"56789", Some(&mut running));
        assert_eq!(whole, streamed);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc32(b"", None), 0);
    }
}
