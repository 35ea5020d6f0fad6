use hex::{FromHex, ToHex};
use once_cell::sync::{Lazy, OnceCell};
use primitive_types::H256;
use serde::{
    de::{self, Deserialize, Deserializer, Visitor},
    Serialize, Serializer,
};

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Instant;

/// Blockchain position. Heights are dense and monotone; `0` is reserved for
/// "before genesis" in rollback targets.
pub type Height = u32;

/// Identifier of a block or micro-block as delivered by the updates stream.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct BlockId(H256);

/// Transaction identifier.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct TxId(H256);

/// Identifier of an issued asset.
#[derive(Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct AssetId(H256);

/// Account identifier: version byte, scheme byte, then the body; 26 bytes
/// total.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Address([u8; Address::LEN]);

/// Short account name that resolves to an [Address].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Alias(String);

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bytes(Vec<u8>);

/// The native asset or an issued one.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Asset {
    Waves,
    Issued(AssetId),
}

/// Request identifier used as a dependency tag: every state key a script
/// reads is tagged with the reader, and mutations of the key report the tag
/// set as affected. Tags are issued by the request registry and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RequestTag(pub u32);

// BlockId / TxId / AssetId

macro_rules! impl_wrapped_h256 {
    ($wrapper_name: ident) => {
        impl $wrapper_name {
            #[inline(always)]
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }

            #[inline(always)]
            pub fn from_slice(s: &[u8]) -> Self {
                Self(H256::from_slice(s))
            }

            #[inline]
            pub fn zero() -> &'static Self {
                static V: OnceCell<$wrapper_name> = OnceCell::new();
                V.get_or_init(|| Self(H256::zero()))
            }
        }

        impl From<[u8; 32]> for $wrapper_name {
            fn from(u: [u8; 32]) -> Self {
                Self(u.into())
            }
        }

        impl FromStr for $wrapper_name {
            type Err = ();
            fn from_str(s: &str) -> Result<Self, ()> {
                Ok(Self(H256::from_str(s).map_err(|_| ())?))
            }
        }

        impl fmt::Display for $wrapper_name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl Serialize for $wrapper_name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                BytesRef::serialize(&BytesRef(self.as_bytes()), serializer)
            }
        }

        impl<'de> Deserialize<'de> for $wrapper_name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                use serde::de::Error;
                let bytes =
                    deserializer.deserialize_identifier(BytesVisitor)?.0;
                if bytes.len() != 32 {
                    return Err(D::Error::invalid_length(
                        bytes.len(),
                        &"length of 32 bytes",
                    ))
                }
                Ok(Self::from_slice(&bytes))
            }
        }
    };
}

impl_wrapped_h256!(BlockId);
impl_wrapped_h256!(TxId);
impl_wrapped_h256!(AssetId);

// Address

impl Address {
    pub const LEN: usize = 26;

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline(always)]
    pub fn from_slice(s: &[u8]) -> Self {
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(s);
        Self(bytes)
    }

    /// Scheme byte baked into the address body.
    #[inline(always)]
    pub fn scheme_byte(&self) -> u8 {
        self.0[1]
    }
}

impl From<[u8; Address::LEN]> for Address {
    fn from(bytes: [u8; Address::LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Address {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = Vec::from_hex(s).map_err(|_| ())?;
        if bytes.len() != Self::LEN {
            return Err(())
        }
        Ok(Self::from_slice(&bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0.encode_hex::<String>())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        BytesRef::serialize(&BytesRef(self.as_bytes()), serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let bytes = deserializer.deserialize_identifier(BytesVisitor)?.0;
        if bytes.len() != Self::LEN {
            return Err(D::Error::invalid_length(
                bytes.len(),
                &"length of 26 bytes",
            ))
        }
        Ok(Address::from_slice(&bytes))
    }
}

// Alias

impl Alias {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alias:{}:{}", chain_id() as char, self.0)
    }
}

// Asset

impl Asset {
    #[inline(always)]
    pub fn is_waves(&self) -> bool {
        matches!(self, Asset::Waves)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Waves => write!(f, "WAVES"),
            Asset::Issued(id) => id.fmt(f),
        }
    }
}

// Bytes

impl Bytes {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Self(s.into())
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        <BytesRef as fmt::LowerHex>::fmt(&BytesRef(self), f)
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        <BytesRef as fmt::LowerHex>::fmt(&BytesRef(self), f)
    }
}

impl Serialize for Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        BytesRef::serialize(&BytesRef(self), serializer)
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_identifier(BytesVisitor)
    }
}

pub struct BytesRef<'a>(pub &'a [u8]);

impl<'a> fmt::LowerHex for BytesRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.encode_hex::<String>())
    }
}

impl<'a> Serialize for BytesRef<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:x}", &self))
    }
}

pub struct BytesVisitor;
impl<'de> Visitor<'de> for BytesVisitor {
    type Value = Bytes;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .write_str("starts with `0x` and has even number of hex digits")
    }

    fn visit_str<E>(self, value: &str) -> Result<Bytes, E>
    where
        E: de::Error,
    {
        if value.len() < 2 {
            return Err(de::Error::invalid_length(value.len(), &self))
        }
        let bytes = value.as_bytes();
        if bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
            match Vec::from_hex(&value[2..]) {
                Ok(v) => Ok(v.into()),
                Err(_) => Err(de::Error::invalid_value(
                    de::Unexpected::Str(value),
                    &self,
                )),
            }
        } else {
            Err(de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }
}

/// Typed account data entry; carries its key inline.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataEntry {
    Binary { key: String, value: Bytes },
    Boolean { key: String, value: bool },
    Integer { key: String, value: i64 },
    String { key: String, value: String },
}

impl DataEntry {
    pub fn key(&self) -> &str {
        match self {
            DataEntry::Binary { key, .. }
            | DataEntry::Boolean { key, .. }
            | DataEntry::Integer { key, .. }
            | DataEntry::String { key, .. } => key,
        }
    }
}

/// Account script together with what the evaluator needs to know about it.
#[derive(Clone, PartialEq, Debug)]
pub struct AccountScriptInfo {
    pub public_key: Bytes,
    pub script: Bytes,
    /// Per-callable complexity estimations keyed by function name.
    pub complexities: HashMap<String, u64>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct AssetDescription {
    pub issuer: Address,
    pub name: String,
    pub description: String,
    pub decimals: u8,
    pub reissuable: bool,
    pub total_volume: u64,
    /// Min sponsored fee; `0` means sponsorship is off.
    pub sponsorship: i64,
    pub script: Option<Bytes>,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct LeaseBalance {
    pub lease_in: i64,
    pub lease_out: i64,
}

/// Transfer-recognizable payload of a cached transaction.
#[derive(Clone, PartialEq, Debug)]
pub struct TransferPayload {
    pub sender: Address,
    pub recipient: Address,
    pub asset: Asset,
    pub amount: i64,
    pub fee_asset: Asset,
    pub fee: i64,
    pub attachment: Bytes,
    pub timestamp: u64,
}

/// What the caches remember about a transaction: where it landed and, when
/// the payload is transfer-like, the payload itself.
#[derive(Clone, PartialEq, Debug)]
pub struct TxMeta {
    pub height: Height,
    pub transfer: Option<TransferPayload>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct BlockHeader {
    pub id: BlockId,
    pub reference: BlockId,
    pub timestamp: u64,
    pub generator: Address,
    pub base_target: u64,
    pub generation_signature: Bytes,
}

/// VRF hit source attached to a block.
pub type HitSource = Bytes;

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct BalanceSnapshot {
    pub height: Height,
    pub regular_balance: i64,
    pub lease_in: i64,
    pub lease_out: i64,
}

// process-wide chain id

static CHAIN_ID: OnceCell<u8> = OnceCell::new();

/// Set the address-scheme byte, once, at startup. Later calls are ignored.
pub fn set_chain_id(byte: u8) {
    let _ = CHAIN_ID.set(byte);
}

/// The address-scheme byte; defaults to the integration-test scheme when
/// nothing was set.
pub fn chain_id() -> u8 {
    *CHAIN_ID.get_or_init(|| b'I')
}

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic milliseconds since process start; the `__lastUpdated` clock.
pub fn monotonic_ms() -> u64 {
    PROCESS_START.elapsed().as_millis() as u64
}

// errors

/// Failures that cross component seams. Per-script evaluation failures are
/// [EvalError]; invariant breaches panic instead of surfacing here.
#[derive(Debug)]
pub enum Error {
    /// The upstream transport failed (stream or point lookup).
    Transport(String),
    /// A distinguished transport failure: the updates stream timed out and
    /// the local liquid tail can no longer be trusted.
    Timeout,
    Db(rocksdb::Error),
    Codec(&'static str),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Timeout => write!(f, "upstream timeout"),
            Error::Db(e) => write!(f, "db error: {}", e),
            Error::Codec(what) => {
                write!(f, "stored record corrupted: {}", what)
            }
            Error::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Db(e)
    }
}

/// Per-script evaluation failure, stored and served as the result JSON.
#[derive(Clone, PartialEq, Debug)]
pub struct EvalError {
    pub error: i32,
    pub message: String,
}

/// Script-related validation failures share one API error code.
pub const API_ERR_CUSTOM_VALIDATION: i32 = 199;
/// Script ran but the expression failed or called an unsupported function.
pub const API_ERR_EVALUATION: i32 = 306;

impl EvalError {
    pub fn not_a_dapp(address: &Address) -> Self {
        Self {
            error: API_ERR_CUSTOM_VALIDATION,
            message: format!("address {} is not a dApp", address),
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self {
            error: API_ERR_EVALUATION,
            message: message.into(),
        }
    }

    pub fn transport(e: &Error) -> Self {
        Self {
            error: API_ERR_EVALUATION,
            message: format!("state unavailable: {}", e),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error,
            "message": self.message,
        })
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error {}: {}", self.error, self.message)
    }
}

#[test]
fn test_address_roundtrip() {
    let a = Address::from_str(
        "0x0149a41d4f2a5a7c6e5ddd2bd0e0f6c742e9f9a9b8c7d6e5f403",
    )
    .unwrap();
    assert_eq!(Address::from_str(&a.to_string()).unwrap(), a);
    assert_eq!(a.as_bytes().len(), Address::LEN);
}

#[test]
fn test_data_entry_json() {
    let e = DataEntry::Integer {
        key: "x".into(),
        value: 42,
    };
    let j = serde_json::to_value(&e).unwrap();
    assert_eq!(j["type"], "integer");
    assert_eq!(j["key"], "x");
    assert_eq!(j["value"], 42);
    let back: DataEntry = serde_json::from_value(j).unwrap();
    assert_eq!(back, e);
}

#[test]
fn test_monotonic_ms() {
    let a = monotonic_ms();
    let b = monotonic_ms();
    assert!(b >= a);
}
