/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Position-weighted partition checksum.
//!
//! `checksum = Σ byte[i] * (i + 1)  (mod 2^16)`, with `i` the offset of the
//! byte inside its partition.  Unlike a plain sum or XOR, swapping two
//! different bytes changes the result.
//!
//! Because every term is independent, a write of `new` over `old` at offset
//! `o` updates the checksum in O(len) without rescanning the partition:
//! `cs' = cs - weight(old, o) + weight(new, o)`.
//!
//! The sum wraps silently once the weighted mass exceeds 16 bits.

/// Weighted contribution of `data` located at partition offset `offset`.
pub fn weight(data: &[u8], offset: u32) -> u16 {
    data.iter().enumerate().fold(0u16, |acc, (i, &byte)| {
        let position = offset.wrapping_add(i as u32).wrapping_add(1) as u16;
        acc.wrapping_add((byte as u16).wrapping_mul(position))
    })
}

/// Checksum of a complete partition image.
pub fn checksum(content: &[u8]) -> u16 {
    weight(content, 0)
}

/// Checksum after overwriting `old` with `new` at `offset`.
pub fn update(current: u16, offset: u32, old: &[u8], new: &[u8]) -> u16 {
    current
        .wrapping_sub(weight(old, offset))
        .wrapping_add(weight(new, offset))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
