//! Binary codecs for the Dream World data the legacy clients exchange.
//!
//! Two byte-level transforms live here, both externally unverifiable in
//! the usual sense: the consuming client is immutable firmware, so the
//! only definition of "correct" is byte-exact reproduction.
//!
//! - **Decode**: [`read_pkmn_record`] recovers the creature a player
//!   tucked in from the encrypted, block-shuffled fragment embedded in
//!   their uploaded save data.
//! - **Encode**: [`encode_download_payload`] serializes a player's
//!   configured [`DreamContent`] into the fixed-layout blob the console
//!   downloads when the player wakes up.
//!
//! Both are pure transforms over byte buffers; nothing in this crate
//! touches the network or any store.

mod crypt;
mod error;
mod payload;
mod pkmn;

pub use crypt::decrypt_block;
pub use error::CodecError;
pub use payload::{
    encode_download_payload, Decor, DreamContent, DreamItem, Encounter, GameVariant,
    Visitor, VisitorKind, MAX_DECOR, MAX_ENCOUNTERS, MAX_GAINED_LEVELS, MAX_ITEMS,
    MAX_VISITORS, PAYLOAD_LEN_V1, PAYLOAD_LEN_V2,
};
pub use pkmn::{read_pkmn_record, Gender, PkmnRecord, PKMN_RECORD_LEN};
