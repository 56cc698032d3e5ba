//! Fixed-layout payload validation
//!
//! A profile describes where a structured record sits inside a demodulated
//! bitstream and which integrity checks it carries: a start sentinel, a run
//! of mirrored symbols, and a seeded XOR checksum. The engine is profile
//! driven so further card layouts slot in without touching the search or
//! check logic; `PARKING1` is the one profile currently documented.

use crate::error::Fault;

/// One card payload layout.
#[derive(Debug, Clone, Copy)]
pub struct CardProfile {
    pub name: &'static str,
    /// Bit pattern marking the start of the record.
    pub sentinel: &'static str,
    /// Fixed-width symbols in the record.
    pub symbol_count: usize,
    /// Bits per symbol.
    pub symbol_bits: usize,
    /// symbols[i] must equal symbols[count-1-i] for i in 1..=mirror_symbols.
    pub mirror_symbols: usize,
    /// XOR runs over symbols[1..=checksum_symbols].
    pub checksum_symbols: usize,
    /// Symbol index holding the checksum.
    pub checksum_symbol: usize,
    pub checksum_seed: u8,
}

/// Type 1 parking card layout. The checksum range (1..=10) is two symbols
/// narrower than the mirror range (1..=12): the two trailing data symbols
/// are mirrored but not checksummed. That asymmetry is the card's layout,
/// not an off-by-two.
pub const PARKING1: CardProfile = CardProfile {
    name: "parking1",
    sentinel: "11111110",
    symbol_count: 25,
    symbol_bits: 8,
    mirror_symbols: 12,
    checksum_symbols: 10,
    checksum_symbol: 13,
    checksum_seed: 0xFF,
};

fn symbol_value(symbol: &str) -> Result<u8, Fault> {
    u8::from_str_radix(symbol, 2)
        .map_err(|_| Fault::Validation(format!("non-binary symbol {symbol:?}")))
}

fn reversed(symbol: &str) -> String {
    symbol.chars().rev().collect()
}

fn inverted(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c == '0' { '1' } else { '0' })
        .collect()
}

/// Locate and verify a record in a demodulated bitstream, returning the
/// bit-inverted concatenation of its symbols. Any failed check aborts the
/// whole validation; no partial record is ever returned.
pub fn validate(bitstream: &str, profile: &CardProfile) -> Result<String, Fault> {
    let start = bitstream
        .find(profile.sentinel)
        .ok_or_else(|| Fault::Validation("start sentinel not found".into()))?;

    let record_bits = profile.symbol_count * profile.symbol_bits;
    if bitstream.len() - start < record_bits {
        return Err(Fault::Validation("incomplete data stream".into()));
    }

    let symbols: Vec<&str> = (0..profile.symbol_count)
        .map(|i| {
            let offset = start + i * profile.symbol_bits;
            &bitstream[offset..offset + profile.symbol_bits]
        })
        .collect();
    let last = profile.symbol_count - 1;

    if symbols[0] != reversed(symbols[last]) {
        return Err(Fault::Validation("end sentinel mismatch".into()));
    }
    for i in 1..=profile.mirror_symbols {
        if symbols[i] != symbols[last - i] {
            return Err(Fault::Validation(format!(
                "mirrored symbol mismatch at {i}"
            )));
        }
    }

    let mut check = profile.checksum_seed;
    for symbol in &symbols[1..=profile.checksum_symbols] {
        check ^= symbol_value(symbol)?;
    }
    if check != symbol_value(symbols[profile.checksum_symbol])? {
        return Err(Fault::Validation("checksum mismatch".into()));
    }

    Ok(symbols.iter().map(|s| inverted(s)).collect())
}
