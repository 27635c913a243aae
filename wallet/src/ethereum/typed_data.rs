//! Structured data hashing for `eth_signTypedData_v3` / `_v4`.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Address;
use crate::crypto::keccak256;
use crate::errors::{WalletError, WalletResult};

const DOMAIN_TYPE: &str = "EIP712Domain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedDataVersion {
    /// No array support.
    V3,
    /// Arrays and null nested structs.
    V4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub types: BTreeMap<String, Vec<TypedField>>,
    pub primary_type: String,
    #[serde(default)]
    pub domain: Value,
    #[serde(default)]
    pub message: Value,
}

impl TypedData {
    /// Accepts either a JSON object or a JSON string containing one.
    pub fn from_param(param: &Value) -> WalletResult<Self> {
        let parsed = match param {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        };
        let mut typed: TypedData = parsed
            .map_err(|e| WalletError::InvalidParams(format!("malformed typed data: {}", e)))?;
        typed.ensure_domain_type();
        Ok(typed)
    }

    /// Fill in the domain type from the fields present when the page omits it.
    fn ensure_domain_type(&mut self) {
        if self.types.contains_key(DOMAIN_TYPE) {
            return;
        }
        let present = |key: &str| self.domain.get(key).map(|v| !v.is_null()).unwrap_or(false);
        let fields = [
            ("name", "string"),
            ("version", "string"),
            ("chainId", "uint256"),
            ("verifyingContract", "address"),
            ("salt", "bytes32"),
        ]
        .iter()
        .filter(|(name, _)| present(name))
        .map(|(name, kind)| TypedField {
            name: name.to_string(),
            kind: kind.to_string(),
        })
        .collect();
        self.types.insert(DOMAIN_TYPE.to_string(), fields);
    }

    pub fn domain_chain_id(&self) -> Option<u64> {
        match self.domain.get("chainId")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            },
            _ => None,
        }
    }

    pub fn encode_type(&self, primary: &str) -> WalletResult<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(primary, &mut deps)?;
        deps.remove(primary);

        let mut encoded = self.type_signature(primary)?;
        for dep in deps {
            encoded.push_str(&self.type_signature(&dep)?);
        }
        Ok(encoded)
    }

    pub fn type_hash(&self, primary: &str) -> WalletResult<[u8; 32]> {
        Ok(keccak256(self.encode_type(primary)?.as_bytes()))
    }

    pub fn hash_struct(
        &self,
        primary: &str,
        data: &Value,
        version: TypedDataVersion,
    ) -> WalletResult<[u8; 32]> {
        Ok(keccak256(&self.encode_data(primary, data, version)?))
    }

    pub fn domain_separator(&self, version: TypedDataVersion) -> WalletResult<[u8; 32]> {
        self.hash_struct(DOMAIN_TYPE, &self.domain, version)
    }

    /// `keccak256(0x19 0x01 ‖ domainSeparator ‖ hashStruct(message))`.
    pub fn signing_hash(&self, version: TypedDataVersion) -> WalletResult<[u8; 32]> {
        let mut buffer = Vec::with_capacity(66);
        buffer.extend_from_slice(&[0x19, 0x01]);
        buffer.extend_from_slice(&self.domain_separator(version)?);
        if self.primary_type != DOMAIN_TYPE {
            buffer.extend_from_slice(&self.hash_struct(
                &self.primary_type,
                &self.message,
                version,
            )?);
        }
        Ok(keccak256(&buffer))
    }

    fn fields(&self, type_name: &str) -> WalletResult<&Vec<TypedField>> {
        self.types
            .get(type_name)
            .ok_or_else(|| WalletError::InvalidParams(format!("unknown type {}", type_name)))
    }

    fn type_signature(&self, type_name: &str) -> WalletResult<String> {
        let members = self
            .fields(type_name)?
            .iter()
            .map(|field| format!("{} {}", field.kind, field.name))
            .collect::<Vec<_>>()
            .join(",");
        Ok(format!("{}({})", type_name, members))
    }

    fn collect_dependencies(&self, type_name: &str, found: &mut BTreeSet<String>) -> WalletResult<()> {
        let base = strip_array_suffix(type_name);
        if found.contains(base) || !self.types.contains_key(base) {
            return Ok(());
        }
        found.insert(base.to_string());
        for field in self.fields(base)? {
            self.collect_dependencies(&field.kind, found)?;
        }
        Ok(())
    }

    fn encode_data(
        &self,
        type_name: &str,
        data: &Value,
        version: TypedDataVersion,
    ) -> WalletResult<Vec<u8>> {
        let fields = self.fields(type_name)?;
        let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
        encoded.extend_from_slice(&self.type_hash(type_name)?);

        for field in fields {
            let value = data.get(&field.name).unwrap_or(&Value::Null);
            encoded.extend_from_slice(&self.encode_field(&field.name, &field.kind, value, version)?);
        }
        Ok(encoded)
    }

    fn encode_field(
        &self,
        name: &str,
        kind: &str,
        value: &Value,
        version: TypedDataVersion,
    ) -> WalletResult<[u8; 32]> {
        if self.types.contains_key(kind) {
            if value.is_null() {
                return match version {
                    TypedDataVersion::V4 => Ok([0u8; 32]),
                    TypedDataVersion::V3 => Err(missing(name)),
                };
            }
            return self.hash_struct(kind, value, version);
        }

        if let Some(element) = array_element_type(kind) {
            if version == TypedDataVersion::V3 {
                return Err(WalletError::InvalidParams(
                    "arrays are only supported by eth_signTypedData_v4".to_string(),
                ));
            }
            let items = value
                .as_array()
                .ok_or_else(|| WalletError::InvalidParams(format!("{} must be an array", name)))?;
            let mut concatenated = Vec::with_capacity(items.len() * 32);
            for item in items {
                concatenated.extend_from_slice(&self.encode_field(name, element, item, version)?);
            }
            return Ok(keccak256(&concatenated));
        }

        if value.is_null() {
            return Err(missing(name));
        }

        match kind {
            "string" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| invalid(name, "expected a string"))?;
                Ok(keccak256(text.as_bytes()))
            }
            "bytes" => Ok(keccak256(&bytes_value(name, value)?)),
            "address" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| invalid(name, "expected an address string"))?;
                let address = Address::parse(&raw.to_lowercase())?;
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(address.as_bytes());
                Ok(word)
            }
            "bool" => {
                let flag = match value {
                    Value::Bool(b) => *b,
                    Value::String(s) if s == "true" => true,
                    Value::String(s) if s == "false" => false,
                    _ => return Err(invalid(name, "expected a boolean")),
                };
                let mut word = [0u8; 32];
                word[31] = flag as u8;
                Ok(word)
            }
            _ if kind.starts_with("bytes") => {
                let size: usize = kind[5..]
                    .parse()
                    .map_err(|_| invalid(name, "unsupported bytes type"))?;
                let bytes = bytes_value(name, value)?;
                if size == 0 || size > 32 || bytes.len() > size {
                    return Err(invalid(name, "bytes value does not fit its type"));
                }
                let mut word = [0u8; 32];
                word[..bytes.len()].copy_from_slice(&bytes);
                Ok(word)
            }
            _ if kind.starts_with("uint") => int_word(name, value, false),
            _ if kind.starts_with("int") => int_word(name, value, true),
            other => Err(WalletError::InvalidParams(format!(
                "unsupported type {} for {}",
                other, name
            ))),
        }
    }
}

fn strip_array_suffix(kind: &str) -> &str {
    match kind.find('[') {
        Some(idx) => &kind[..idx],
        None => kind,
    }
}

/// `Foo[]` / `Foo[3]` → `Foo`; nested arrays peel one level.
fn array_element_type(kind: &str) -> Option<&str> {
    if !kind.ends_with(']') {
        return None;
    }
    kind.rfind('[').map(|idx| &kind[..idx])
}

fn missing(name: &str) -> WalletError {
    WalletError::InvalidParams(format!("missing value for field {}", name))
}

fn invalid(name: &str, reason: &str) -> WalletError {
    WalletError::InvalidParams(format!("{}: {}", name, reason))
}

fn bytes_value(name: &str, value: &Value) -> WalletResult<Vec<u8>> {
    let raw = value
        .as_str()
        .ok_or_else(|| invalid(name, "expected hex bytes"))?;
    match raw.strip_prefix("0x") {
        Some(body) => hex::decode(body).map_err(|_| invalid(name, "invalid hex")),
        None => Ok(raw.as_bytes().to_vec()),
    }
}

/// Encode an integer as a 32-byte big-endian two's-complement word.
fn int_word(name: &str, value: &Value, signed: bool) -> WalletResult<[u8; 32]> {
    let text = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u.to_string()
            } else if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                return Err(invalid(name, "expected an integer"));
            }
        }
        Value::String(s) => s.trim().to_string(),
        _ => return Err(invalid(name, "expected an integer")),
    };

    let (negative, magnitude) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };
    if negative && !signed {
        return Err(invalid(name, "negative value for unsigned type"));
    }

    let mut word = match magnitude.strip_prefix("0x") {
        Some(hex_digits) => hex_word(name, hex_digits)?,
        None => decimal_word(name, magnitude)?,
    };

    if negative {
        for byte in word.iter_mut() {
            *byte = !*byte;
        }
        for byte in word.iter_mut().rev() {
            let (sum, overflow) = byte.overflowing_add(1);
            *byte = sum;
            if !overflow {
                break;
            }
        }
    }
    Ok(word)
}

fn decimal_word(name: &str, digits: &str) -> WalletResult<[u8; 32]> {
    if digits.is_empty() {
        return Err(invalid(name, "empty integer"));
    }
    let mut word = [0u8; 32];
    for ch in digits.chars() {
        let digit = ch
            .to_digit(10)
            .ok_or_else(|| invalid(name, "invalid decimal integer"))?;
        let mut carry = digit as u16;
        for byte in word.iter_mut().rev() {
            let next = (*byte as u16) * 10 + carry;
            *byte = (next & 0xff) as u8;
            carry = next >> 8;
        }
        if carry != 0 {
            return Err(invalid(name, "integer exceeds 256 bits"));
        }
    }
    Ok(word)
}

fn hex_word(name: &str, digits: &str) -> WalletResult<[u8; 32]> {
    if digits.len() > 64 {
        return Err(invalid(name, "integer exceeds 256 bits"));
    }
    let padded = format!("{:0>64}", digits);
    let bytes = hex::decode(padded).map_err(|_| invalid(name, "invalid hex integer"))?;
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes);
    Ok(word)
}
