//! Event layouts: a declared event signature, validated once, used to
//! decode every matching log.
//!
//! ```text
//! "Transfer(address indexed from, address indexed to, uint256 value)"
//!     → signature  Transfer(address,address,uint256)
//!     → topic0     0xddf252ad…b3ef
//!     → fields     [from: address (topic1), to: address (topic2), value: uint256 (data)]
//! ```
//!
//! Indexed value types are ABI-decoded from their topic word. Indexed
//! reference types (`string`, `bytes`, arrays) are stored on chain as a
//! keccak hash, so they decode to [`ArgValue::Topic`].

use alloy_dyn_abi::{DynSolType, DynSolValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tiny_keccak::{Hasher, Keccak};

use crate::error::SyncError;
use crate::types::Log;

const SENDER_NAMES: &[&str] = &["from", "sender", "src"];
const RECIPIENT_NAMES: &[&str] = &["to", "recipient", "dst"];
const VALUE_NAMES: &[&str] = &["value", "amount", "wad"];

/// One declared event parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: DynSolType,
    pub indexed: bool,
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ArgValue {
    /// Lowercase `0x…` address.
    Address(String),
    /// Decimal string.
    Uint(String),
    /// Decimal string.
    Int(String),
    Bool(bool),
    /// `0x…` hex.
    Bytes(String),
    Str(String),
    /// Hash of an indexed reference type; the original value is unrecoverable.
    Topic(String),
    List(Vec<ArgValue>),
}

impl ArgValue {
    /// Plain JSON rendering, as stored in `raw_args`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Address(s) | Self::Uint(s) | Self::Int(s) | Self::Bytes(s) | Self::Str(s) | Self::Topic(s) => {
                Value::String(s.clone())
            }
            Self::Bool(b) => Value::Bool(*b),
            Self::List(items) => Value::Array(items.iter().map(ArgValue::to_json).collect()),
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Address(s) | Self::Uint(s) => Some(s),
            _ => None,
        }
    }
}

/// Result of decoding one log against a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub name: String,
    /// Arguments in declaration order.
    pub args: Vec<(String, ArgValue)>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub value: Option<String>,
}

impl DecodedLog {
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Arguments as a JSON object keyed by field name.
    pub fn args_json(&self) -> Value {
        let map: Map<String, Value> = self
            .args
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Value::Object(map)
    }
}

/// A validated event declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLayout {
    name: String,
    fields: Vec<FieldSpec>,
    signature: String,
    topic0: String,
    sender: Option<usize>,
    recipient: Option<usize>,
    value: Option<usize>,
}

impl EventLayout {
    /// Parse a human-readable event declaration.
    ///
    /// Accepts an optional leading `event` keyword. Parameters without a
    /// name are called `arg0`, `arg1`, ….
    pub fn parse(declaration: &str) -> Result<Self, SyncError> {
        let decl = declaration.trim().trim_end_matches(';').trim();
        let decl = decl.strip_prefix("event ").unwrap_or(decl).trim();

        let open = decl
            .find('(')
            .ok_or_else(|| config_err(declaration, "missing '('"))?;
        if !decl.ends_with(')') {
            return Err(config_err(declaration, "missing closing ')'"));
        }
        let name = decl[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(config_err(declaration, "invalid event name"));
        }
        let params = &decl[open + 1..decl.len() - 1];
        if params.contains('(') || params.contains(')') {
            return Err(config_err(declaration, "tuple parameters are not supported"));
        }

        let mut fields = Vec::new();
        if !params.trim().is_empty() {
            for (i, param) in params.split(',').enumerate() {
                fields.push(parse_param(declaration, param, i)?);
            }
        }
        if fields.iter().filter(|f| f.indexed).count() > 3 {
            return Err(config_err(declaration, "at most 3 parameters can be indexed"));
        }

        let canonical: Vec<String> = fields.iter().map(|f| f.ty.sol_type_name().into_owned()).collect();
        let signature = format!("{name}({})", canonical.join(","));
        let topic0 = keccak256_hex(&signature);

        let sender = find_role(&fields, SENDER_NAMES, is_address, None);
        let recipient = find_role(&fields, RECIPIENT_NAMES, is_address, sender);
        let value = find_role(&fields, VALUE_NAMES, is_uint, None);

        Ok(Self {
            name: name.to_string(),
            fields,
            signature,
            topic0,
            sender,
            recipient,
            value,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// keccak-256 of the canonical signature (`0x…`).
    pub fn topic0(&self) -> &str {
        &self.topic0
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Decode a log emitted for this event.
    pub fn decode(&self, log: &Log) -> Result<DecodedLog, SyncError> {
        match log.topics.first() {
            Some(t) if t.eq_ignore_ascii_case(&self.topic0) => {}
            Some(t) => return Err(SyncError::Decode(format!("topic0 {t} is not {}", self.signature))),
            None => return Err(SyncError::Decode("log has no topics".into())),
        }

        let indexed = self.fields.iter().filter(|f| f.indexed).count();
        if log.topics.len() != indexed + 1 {
            return Err(SyncError::Decode(format!(
                "expected {} topics for {}, got {}",
                indexed + 1,
                self.signature,
                log.topics.len()
            )));
        }

        let mut topic_values = log.topics[1..].iter();
        let mut values: Vec<Option<ArgValue>> = vec![None; self.fields.len()];
        for (i, field) in self.fields.iter().enumerate().filter(|(_, f)| f.indexed) {
            if let Some(topic) = topic_values.next() {
                values[i] = Some(decode_topic(topic, &field.ty)?);
            }
        }

        let data_fields: Vec<usize> = (0..self.fields.len()).filter(|i| !self.fields[*i].indexed).collect();
        if !data_fields.is_empty() {
            let bytes = decode_hex(&log.data)?;
            let tuple = DynSolType::Tuple(data_fields.iter().map(|i| self.fields[*i].ty.clone()).collect());
            let decoded = tuple
                .abi_decode_params(&bytes)
                .map_err(|e| SyncError::Decode(format!("log data: {e}")))?;
            let items = match decoded {
                DynSolValue::Tuple(items) => items,
                other => vec![other],
            };
            if items.len() != data_fields.len() {
                return Err(SyncError::Decode("log data field count mismatch".into()));
            }
            for (i, item) in data_fields.into_iter().zip(items) {
                values[i] = Some(normalize(item));
            }
        }

        let args: Vec<(String, ArgValue)> = self
            .fields
            .iter()
            .zip(values)
            .map(|(f, v)| v.map(|v| (f.name.clone(), v)))
            .collect::<Option<_>>()
            .ok_or_else(|| SyncError::Decode("missing argument".into()))?;

        let role = |idx: Option<usize>| {
            idx.and_then(|i| args.get(i))
                .and_then(|(_, v)| v.as_text())
                .map(str::to_string)
        };
        let (sender, recipient, value) = (role(self.sender), role(self.recipient), role(self.value));

        Ok(DecodedLog {
            name: self.name.clone(),
            args,
            sender,
            recipient,
            value,
        })
    }
}

fn parse_param(declaration: &str, param: &str, position: usize) -> Result<FieldSpec, SyncError> {
    let tokens: Vec<&str> = param.split_whitespace().collect();
    let (ty, rest) = tokens
        .split_first()
        .ok_or_else(|| config_err(declaration, "empty parameter"))?;
    let (indexed, rest) = match rest.split_first() {
        Some((&"indexed", rest)) => (true, rest),
        _ => (false, rest),
    };
    let name = match rest {
        [] => format!("arg{position}"),
        [name] => (*name).to_string(),
        _ => return Err(config_err(declaration, &format!("cannot parse parameter '{}'", param.trim()))),
    };
    let ty = DynSolType::parse(ty)
        .map_err(|e| config_err(declaration, &format!("unknown type '{ty}': {e}")))?;
    if matches!(ty, DynSolType::Tuple(_)) {
        return Err(config_err(declaration, "tuple parameters are not supported"));
    }
    Ok(FieldSpec { name, ty, indexed })
}

fn find_role(
    fields: &[FieldSpec],
    names: &[&str],
    kind: fn(&DynSolType) -> bool,
    skip: Option<usize>,
) -> Option<usize> {
    let candidates = || {
        fields
            .iter()
            .enumerate()
            .filter(move |(i, f)| Some(*i) != skip && kind(&f.ty))
    };
    candidates()
        .find(|(_, f)| names.iter().any(|n| f.name.eq_ignore_ascii_case(n)))
        .or_else(|| candidates().next())
        .map(|(i, _)| i)
}

fn is_address(ty: &DynSolType) -> bool {
    matches!(ty, DynSolType::Address)
}

fn is_uint(ty: &DynSolType) -> bool {
    matches!(ty, DynSolType::Uint(_))
}

fn decode_topic(topic: &str, ty: &DynSolType) -> Result<ArgValue, SyncError> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != 32 {
        return Err(SyncError::Decode(format!("topic {topic} is not 32 bytes")));
    }
    match ty {
        DynSolType::String | DynSolType::Bytes | DynSolType::Array(_) | DynSolType::FixedArray(..) => {
            Ok(ArgValue::Topic(format!("0x{}", hex::encode(&bytes))))
        }
        _ => ty
            .abi_decode(&bytes)
            .map(normalize)
            .map_err(|e| SyncError::Decode(format!("topic decode: {e}"))),
    }
}

fn normalize(value: DynSolValue) -> ArgValue {
    match value {
        DynSolValue::Address(a) => ArgValue::Address(format!("{a:#x}")),
        DynSolValue::Uint(u, _) => ArgValue::Uint(u.to_string()),
        DynSolValue::Int(i, _) => ArgValue::Int(i.to_string()),
        DynSolValue::Bool(b) => ArgValue::Bool(b),
        DynSolValue::FixedBytes(word, size) => {
            ArgValue::Bytes(format!("0x{}", hex::encode(&word[..size])))
        }
        DynSolValue::Bytes(b) => ArgValue::Bytes(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => ArgValue::Str(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            ArgValue::List(items.into_iter().map(normalize).collect())
        }
        other => ArgValue::Str(format!("{other:?}")),
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, SyncError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| SyncError::Decode(format!("invalid hex '{s}': {e}")))
}

fn config_err(declaration: &str, reason: &str) -> SyncError {
    SyncError::Configuration(format!("event '{declaration}': {reason}"))
}

/// keccak-256 of `input`, `0x`-prefixed.
pub fn keccak256_hex(input: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(input.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}
