//! The outbound "wake up" payload.
//!
//! The console ROM parses this blob with fixed offsets, so it is a
//! fixed-size record format: every absent slot is padded to its full
//! width, and the total length depends only on the game variant.
//!
//! ```text
//! 0x000  change marker (4 random bytes)
//! 0x004  10 encounter slots, 8 bytes each
//! 0x054  gained levels (u16), 2 reserved, musical/cgear/dex DLC indexes,
//!        decor-present flag, 1 reserved
//! 0x05D  20 item ids (u16 each), then 20 item quantities (u8 each)
//! 0x099  5 decor slots (u16 id + 24-byte UTF-16LE name, 0xFF padded),
//!        2 reserved
//! 0x11D  (version 2 only) 12 visitor slots, 32 bytes each, then a 4-byte
//!        zero terminator
//! ```

use serde::{Deserialize, Serialize};

use crate::CodecError;

/// Encounter slot count.
pub const MAX_ENCOUNTERS: usize = 10;
/// Item slot count.
pub const MAX_ITEMS: usize = 20;
/// Visitor slot count (version 2 payloads only).
pub const MAX_VISITORS: usize = 12;
/// Decor slot count.
pub const MAX_DECOR: usize = 5;
/// Highest encodable gained-level count.
pub const MAX_GAINED_LEVELS: u8 = 99;

/// Total payload size for version-1 game variants.
pub const PAYLOAD_LEN_V1: usize = 285;
/// Total payload size for version-2 game variants.
pub const PAYLOAD_LEN_V2: usize = 673;

const DECOR_NAME_BYTES: usize = 24;
const VISITOR_NAME_BYTES: usize = 14;
const VISITOR_SLOT_BYTES: usize = 32;

/// Which branch of the title family a player's cartridge belongs to.
///
/// Version-2 cartridges understand the visitor section; version-1 firmware
/// reads a shorter record and would choke on the extra bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameVariant {
    Version1,
    Version2,
}

impl GameVariant {
    /// The fixed payload size for this variant.
    pub fn payload_len(self) -> usize {
        match self {
            Self::Version1 => PAYLOAD_LEN_V1,
            Self::Version2 => PAYLOAD_LEN_V2,
        }
    }
}

/// One dream encounter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub species: u16,
    pub held_item: u16,
    pub move_id: u16,
    pub gender: u8,
    pub form: u8,
}

/// One dream item slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DreamItem {
    pub id: u16,
    pub quantity: u8,
}

/// One decor slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decor {
    pub id: u16,
    pub name: String,
}

/// What a visitor is doing in the player's dream area. The wire bytes for
/// visitor type and shop type are derived from this, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitorKind {
    Passerby,
    ItemShop,
    BerryShop,
    SpecialGuest,
}

impl VisitorKind {
    fn type_byte(self) -> u8 {
        match self {
            Self::Passerby => 0,
            Self::ItemShop => 1,
            Self::BerryShop => 2,
            Self::SpecialGuest => 3,
        }
    }

    fn shop_byte(self) -> u8 {
        match self {
            Self::ItemShop => 1,
            Self::BerryShop => 2,
            Self::Passerby | Self::SpecialGuest => 0,
        }
    }
}

/// One visitor slot (version 2 only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    pub name: String,
    pub kind: VisitorKind,
    pub country: u8,
    pub region: u8,
    pub rom_code: u8,
    pub female: bool,
    pub dreamer_species: u16,
}

/// A player's configured dream content.
///
/// Collections are bounded by the payload's fixed slot counts; the bounds
/// are enforced at insertion so an encodable `DreamContent` can never
/// overflow its slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DreamContent {
    encounters: Vec<Encounter>,
    items: Vec<DreamItem>,
    decor: Vec<Decor>,
    visitors: Vec<Visitor>,
    gained_levels: u8,
    musical_index: u8,
    cgear_index: u8,
    dex_index: u8,
}

impl DreamContent {
    pub fn add_encounter(&mut self, encounter: Encounter) -> Result<(), CodecError> {
        push_bounded(&mut self.encounters, encounter, "encounters", MAX_ENCOUNTERS)
    }

    pub fn add_item(&mut self, item: DreamItem) -> Result<(), CodecError> {
        push_bounded(&mut self.items, item, "items", MAX_ITEMS)
    }

    pub fn add_decor(&mut self, decor: Decor) -> Result<(), CodecError> {
        push_bounded(&mut self.decor, decor, "decor entries", MAX_DECOR)
    }

    pub fn add_visitor(&mut self, visitor: Visitor) -> Result<(), CodecError> {
        push_bounded(&mut self.visitors, visitor, "visitors", MAX_VISITORS)
    }

    pub fn set_gained_levels(&mut self, levels: u8) -> Result<(), CodecError> {
        if levels > MAX_GAINED_LEVELS {
            return Err(CodecError::ValueTooLarge {
                what: "gained levels",
                value: u32::from(levels),
                max: u32::from(MAX_GAINED_LEVELS),
            });
        }
        self.gained_levels = levels;
        Ok(())
    }

    pub fn set_dlc_indexes(&mut self, musical: u8, cgear: u8, dex: u8) {
        self.musical_index = musical;
        self.cgear_index = cgear;
        self.dex_index = dex;
    }

    pub fn encounters(&self) -> &[Encounter] {
        &self.encounters
    }

    pub fn items(&self) -> &[DreamItem] {
        &self.items
    }

    pub fn decor(&self) -> &[Decor] {
        &self.decor
    }

    pub fn visitors(&self) -> &[Visitor] {
        &self.visitors
    }

    pub fn gained_levels(&self) -> u8 {
        self.gained_levels
    }

    /// Drops every selection and counter. Used by the player reset path.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn push_bounded<T>(
    vec: &mut Vec<T>,
    value: T,
    what: &'static str,
    max: usize,
) -> Result<(), CodecError> {
    if vec.len() >= max {
        return Err(CodecError::LimitExceeded { what, max });
    }
    vec.push(value);
    Ok(())
}

/// Serializes dream content into the byte blob the console downloads.
///
/// The change marker is freshly randomized on every call, so two encodings
/// of the same content differ in their first four bytes by design (the
/// client uses the marker to detect that new content arrived).
pub fn encode_download_payload(content: &DreamContent, variant: GameVariant) -> Vec<u8> {
    use rand::Rng;

    let mut out = Vec::with_capacity(variant.payload_len());

    let marker: [u8; 4] = rand::rng().random();
    out.extend_from_slice(&marker);

    for slot in 0..MAX_ENCOUNTERS {
        match content.encounters.get(slot) {
            Some(e) => {
                out.extend_from_slice(&e.species.to_le_bytes());
                out.extend_from_slice(&e.held_item.to_le_bytes());
                out.extend_from_slice(&e.move_id.to_le_bytes());
                out.push(e.gender);
                out.push(e.form);
            }
            None => out.extend_from_slice(&[0u8; 8]),
        }
    }

    out.extend_from_slice(&u16::from(content.gained_levels).to_le_bytes());
    out.extend_from_slice(&[0u8; 2]);
    out.push(content.musical_index);
    out.push(content.cgear_index);
    out.push(content.dex_index);
    out.push(u8::from(!content.decor.is_empty()));
    out.push(0);

    for slot in 0..MAX_ITEMS {
        let id = content.items.get(slot).map_or(0, |i| i.id);
        out.extend_from_slice(&id.to_le_bytes());
    }
    for slot in 0..MAX_ITEMS {
        out.push(content.items.get(slot).map_or(0, |i| i.quantity));
    }

    for slot in 0..MAX_DECOR {
        match content.decor.get(slot) {
            Some(d) => {
                out.extend_from_slice(&d.id.to_le_bytes());
                write_utf16_fixed(&mut out, &d.name, DECOR_NAME_BYTES, 0xFF);
            }
            None => out.extend_from_slice(&[0u8; 2 + DECOR_NAME_BYTES]),
        }
    }
    out.extend_from_slice(&[0u8; 2]);

    if variant == GameVariant::Version2 {
        for slot in 0..MAX_VISITORS {
            match content.visitors.get(slot) {
                Some(v) => {
                    let start = out.len();
                    write_utf16_fixed(&mut out, &v.name, VISITOR_NAME_BYTES, 0x00);
                    out.push(v.kind.type_byte());
                    out.push(v.kind.shop_byte());
                    out.push(v.country);
                    out.push(v.region);
                    out.push(v.rom_code);
                    out.push(u8::from(v.female));
                    out.extend_from_slice(&v.dreamer_species.to_le_bytes());
                    out.resize(start + VISITOR_SLOT_BYTES, 0);
                }
                None => out.extend_from_slice(&[0u8; VISITOR_SLOT_BYTES]),
            }
        }
        out.extend_from_slice(&[0u8; 4]);
    }

    debug_assert_eq!(out.len(), variant.payload_len());
    out
}

/// Writes a UTF-16LE string into exactly `byte_len` bytes, truncating long
/// names and filling the remainder with `pad`.
fn write_utf16_fixed(out: &mut Vec<u8>, s: &str, byte_len: usize, pad: u8) {
    let start = out.len();
    for unit in s.encode_utf16().take(byte_len / 2) {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.resize(start + byte_len, pad);
}

// =========================================================================
// Tests
// =========================================================================
