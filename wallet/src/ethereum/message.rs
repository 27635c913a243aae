//! Personal message hashing.
use crate::crypto::keccak256;

const PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// keccak256 of the prefixed message: `"\x19Ethereum Signed Message:\n" ‖ len ‖ message`.
pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    let mut buffer = Vec::with_capacity(PREFIX.len() + 20 + message.len());
    buffer.extend_from_slice(PREFIX.as_bytes());
    buffer.extend_from_slice(message.len().to_string().as_bytes());
    buffer.extend_from_slice(message);
    keccak256(&buffer)
}

/// Decode a signing parameter. Valid `0x` hex is taken as raw bytes,
/// anything else as UTF-8 text.
pub fn decode_message_param(param: &str) -> Vec<u8> {
    if let Some(body) = param.strip_prefix("0x") {
        if body.len() % 2 == 0 {
            if let Ok(bytes) = hex::decode(body) {
                return bytes;
            }
        }
    }
    param.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_hello_world() {
        assert_eq!(
            hex::encode(hash_personal_message(b"Hello World")),
            "a1de988600a42c4b4ab089b619297c17d53cffae5d5120d82d8a92d0bb3b78f2"
        );
    }

    #[test]
    fn hex_params_are_decoded() {
        assert_eq!(decode_message_param("0x48656c6c6f"), b"Hello".to_vec());
        assert_eq!(decode_message_param("Hello"), b"Hello".to_vec());
        assert_eq!(decode_message_param("0xnothex"), b"0xnothex".to_vec());
    }
}
