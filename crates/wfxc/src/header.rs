//! C++ header emission: packs the compressed library archive into a
//! `constexpr uint64_t` array.

use std::fmt::Write;

use heck::ToUpperCamelCase;

/// Derives the C++ array identifier from an output file stem.
pub fn header_symbol(stem: &str) -> String {
    format!("s_FX_{}", stem.to_upper_camel_case())
}

/// Writes a header declaring `constexpr uint64_t <symbol>[N]`, little-endian
/// packed and zero-padded within the last word.
pub fn write_header(symbol: &str, bytes: &[u8]) -> String {
    let word_count = bytes.len().div_ceil(8);
    let mut out = String::with_capacity(word_count * 22 + 256);

    out.push_str("#pragma once\n#include <cstdint>\n\n");
    let _ = writeln!(out, "// Compressed shader library archive ({} bytes)", bytes.len());
    let _ = writeln!(out, "constexpr uint64_t {symbol}[{word_count}] =\n{{");

    for (i, chunk) in bytes.chunks(8).enumerate() {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        let value = u64::from_le_bytes(word);

        if i % 4 == 0 {
            out.push_str("    ");
        }
        let _ = write!(out, "0x{value:016x},");
        if i % 4 == 3 {
            out.push('\n');
        } else {
            out.push(' ');
        }
    }

    if word_count % 4 != 0 {
        out.push('\n');
    }
    out.push_str("};\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_from_stem() {
        assert_eq!(header_symbol("post_fx"), "s_FX_PostFx");
        assert_eq!(header_symbol("Bloom"), "s_FX_Bloom");
    }

    #[test]
    fn words_pack_little_endian_with_padding() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
        let out = write_header("s_FX_Test", &bytes);

        assert!(out.contains("constexpr uint64_t s_FX_Test[2]"), "{out}");
        assert!(out.contains("0x0807060504030201"), "{out}");
        // the tail byte is padded with zeros
        assert!(out.contains("0x0000000000000009"), "{out}");
    }
}
