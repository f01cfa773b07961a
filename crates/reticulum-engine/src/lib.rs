#[cfg(feature = "alloc")]
extern crate alloc;

pub mod buffer;
pub mod channel;
pub mod config;
pub mod crypt;
pub mod destination;
pub mod error;
pub mod hash;
pub mod identity;
pub mod iface;
pub mod packet;
pub mod ratchets;
pub mod receipt;
pub mod resource;
pub mod transport;

pub use crate::destination::{group_decrypt, group_encrypt};
pub use crate::hash::address_hash_from_hash;
pub use crate::identity::{sign_bytes, verify_bytes};
pub use crate::packet::{Packet, MAX_FRAGMENT_PAYLOAD};
pub use crate::transport::{DeliveryReceipt, ReceiptHandler};

mod serde;
pub mod utils;
