pub mod address;
pub mod message;
pub mod rlp;
pub mod transaction;
pub mod typed_data;
pub mod units;

pub use address::Address;
pub use message::{decode_message_param, hash_personal_message};
pub use transaction::{LegacyTransaction, SignedTransaction, TransactionRequest};
pub use typed_data::{TypedData, TypedDataVersion};
pub use units::{format_units, parse_quantity, parse_units, to_quantity};
