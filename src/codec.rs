//! Value decoding pipeline
//!
//! Turns raw register words (or coil bits widened to words) into typed
//! values under a [`DecodeRule`], and encodes typed values back into words
//! for writes. Rules are pure and deterministic; the only extension point
//! is the [`DecodeRegistry`], a closed set of named [`CustomRule`]
//! implementations the caller registers ahead of time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DecodeError, WriteError};

/// A typed value produced by the decode pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer (raw registers, bit values, scaled integers)
    Integer(i64),
    /// Floating point (scaled/fixed-point readings)
    Float(f64),
    /// Boolean (coils, discrete inputs)
    Bool(bool),
    /// Text assembled from registers
    String(String),
    /// Raw multi-word passthrough
    Words(Vec<u16>),
}

impl Value {
    /// Variant name, used in type-mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Words(_) => "words",
        }
    }
}

/// Decode rule attached to a MIB entry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum DecodeRule {
    /// Raw passthrough: one word decodes to an unsigned integer, several
    /// words to a word sequence
    #[default]
    None,
    /// Fixed-point scaling: raw (signed, 1 or 2 words) / 10^places * factor
    Scale { factor: f64, places: u8 },
    /// Each word holds two ASCII bytes, high byte first; trailing NULs
    /// are trimmed
    StringFromRegisters,
    /// Single bit-addressable value; non-zero is true
    BoolFromBit,
    /// Named rule resolved through the registry
    Custom {
        name: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

/// A caller-supplied named decode rule.
///
/// Implementations must be pure: same words and params, same value.
/// `encode` is optional; rules without it make their entries read-only.
pub trait CustomRule: Send + Sync {
    /// Decode raw words into a typed value
    fn decode(&self, words: &[u16], params: &serde_json::Value) -> Result<Value, DecodeError>;

    /// Encode a typed value back into `count` raw words
    fn encode(
        &self,
        _value: &Value,
        _params: &serde_json::Value,
        _count: u16,
    ) -> Result<Vec<u16>, WriteError> {
        Err(WriteError::NotWritable(
            "custom rule has no encoder".to_string(),
        ))
    }
}

/// Registry of named custom rules, populated before use
#[derive(Default, Clone)]
pub struct DecodeRegistry {
    rules: HashMap<String, Arc<dyn CustomRule>>,
}

impl DecodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule under `name`, replacing any previous registration
    pub fn register(&mut self, name: impl Into<String>, rule: Arc<dyn CustomRule>) {
        self.rules.insert(name.into(), rule);
    }

    /// Check whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn CustomRule>> {
        self.rules.get(name)
    }
}

impl std::fmt::Debug for DecodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeRegistry")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Decode raw words under `rule`
pub fn decode_words(
    words: &[u16],
    rule: &DecodeRule,
    registry: &DecodeRegistry,
) -> Result<Value, DecodeError> {
    match rule {
        DecodeRule::None => match words.len() {
            0 => Err(DecodeError::WordCountMismatch {
                expected: 1,
                actual: 0,
            }),
            1 => Ok(Value::Integer(i64::from(words[0]))),
            _ => Ok(Value::Words(words.to_vec())),
        },
        DecodeRule::Scale { factor, places } => {
            let raw = signed_raw(words)?;
            let value = raw / 10f64.powi(i32::from(*places)) * factor;
            trace!("Scale decode: raw={}, places={}, factor={}, value={}", raw, places, factor, value);
            Ok(Value::Float(value))
        }
        DecodeRule::StringFromRegisters => {
            if words.is_empty() {
                return Err(DecodeError::WordCountMismatch {
                    expected: 1,
                    actual: 0,
                });
            }
            let mut bytes = Vec::with_capacity(words.len() * 2);
            for &word in words {
                bytes.push((word >> 8) as u8);
                bytes.push((word & 0xFF) as u8);
            }
            while bytes.last() == Some(&0) {
                bytes.pop();
            }
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|e| DecodeError::InvalidString(e.to_string()))
        }
        DecodeRule::BoolFromBit => {
            if words.len() != 1 {
                return Err(DecodeError::WordCountMismatch {
                    expected: 1,
                    actual: words.len(),
                });
            }
            Ok(Value::Bool(words[0] != 0))
        }
        DecodeRule::Custom { name, params } => match registry.get(name) {
            Some(custom) => custom.decode(words, params),
            None => Err(DecodeError::UnknownRule(name.clone())),
        },
    }
}

/// Encode a typed value into `count` raw words, the inverse of
/// [`decode_words`]. Rules without an inverse fail with `NotWritable`.
pub fn encode_value(
    value: &Value,
    rule: &DecodeRule,
    count: u16,
    registry: &DecodeRegistry,
) -> Result<Vec<u16>, WriteError> {
    match rule {
        DecodeRule::None => encode_raw(value, count),
        DecodeRule::Scale { factor, places } => {
            if *factor == 0.0 {
                return Err(WriteError::NotWritable(
                    "scale factor 0 has no inverse".to_string(),
                ));
            }
            let v = match value {
                Value::Float(f) => *f,
                Value::Integer(i) => *i as f64,
                other => {
                    return Err(WriteError::TypeMismatch {
                        expected: "float",
                        actual: other.type_name(),
                    })
                }
            };
            let raw = (v / factor * 10f64.powi(i32::from(*places))).round();
            encode_signed_raw(raw, count)
        }
        DecodeRule::StringFromRegisters => {
            let s = match value {
                Value::String(s) => s,
                other => {
                    return Err(WriteError::TypeMismatch {
                        expected: "string",
                        actual: other.type_name(),
                    })
                }
            };
            let capacity = count as usize * 2;
            if s.len() > capacity {
                return Err(WriteError::ValueOutOfRange(format!(
                    "string of {} bytes exceeds {} registers",
                    s.len(),
                    count
                )));
            }
            let mut bytes = s.as_bytes().to_vec();
            bytes.resize(capacity, 0);
            Ok(bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        }
        DecodeRule::BoolFromBit => match value {
            Value::Bool(b) => Ok(vec![u16::from(*b)]),
            Value::Integer(i) => Ok(vec![u16::from(*i != 0)]),
            other => Err(WriteError::TypeMismatch {
                expected: "bool",
                actual: other.type_name(),
            }),
        },
        DecodeRule::Custom { name, params } => match registry.get(name) {
            Some(custom) => custom.encode(value, params, count),
            None => Err(WriteError::NotWritable(format!(
                "unknown decode rule: {name}"
            ))),
        },
    }
}

/// Interpret 1 word as i16 or 2 words (high first) as i32
fn signed_raw(words: &[u16]) -> Result<f64, DecodeError> {
    match words.len() {
        1 => Ok(f64::from(words[0] as i16)),
        2 => {
            let raw = ((u32::from(words[0]) << 16) | u32::from(words[1])) as i32;
            Ok(f64::from(raw))
        }
        actual => Err(DecodeError::WordCountMismatch {
            expected: if actual == 0 { 1 } else { 2 },
            actual,
        }),
    }
}

fn encode_signed_raw(raw: f64, count: u16) -> Result<Vec<u16>, WriteError> {
    match count {
        1 => {
            if raw < f64::from(i16::MIN) || raw > f64::from(i16::MAX) {
                return Err(WriteError::ValueOutOfRange(format!(
                    "{raw} does not fit a 16-bit register"
                )));
            }
            Ok(vec![(raw as i16) as u16])
        }
        2 => {
            if raw < f64::from(i32::MIN) || raw > f64::from(i32::MAX) {
                return Err(WriteError::ValueOutOfRange(format!(
                    "{raw} does not fit two 16-bit registers"
                )));
            }
            let bits = (raw as i32) as u32;
            Ok(vec![(bits >> 16) as u16, (bits & 0xFFFF) as u16])
        }
        _ => Err(WriteError::ValueOutOfRange(format!(
            "scaled values span 1 or 2 registers, entry spans {count}"
        ))),
    }
}

fn encode_raw(value: &Value, count: u16) -> Result<Vec<u16>, WriteError> {
    match value {
        Value::Integer(i) => {
            if count != 1 {
                return Err(WriteError::ValueOutOfRange(format!(
                    "integer value for an entry spanning {count} registers"
                )));
            }
            if *i < 0 || *i > i64::from(u16::MAX) {
                return Err(WriteError::ValueOutOfRange(format!(
                    "{i} does not fit a 16-bit register"
                )));
            }
            Ok(vec![*i as u16])
        }
        Value::Bool(b) => Ok(vec![u16::from(*b)]),
        Value::Words(words) => {
            if words.len() != count as usize {
                return Err(WriteError::ValueOutOfRange(format!(
                    "{} words for an entry spanning {} registers",
                    words.len(),
                    count
                )));
            }
            Ok(words.clone())
        }
        other => Err(WriteError::TypeMismatch {
            expected: "integer or words",
            actual: other.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DecodeRegistry {
        DecodeRegistry::new()
    }

    // ========================================================================
    // Raw passthrough
    // ========================================================================

    #[test]
    fn test_none_single_word_is_integer() {
        let v = decode_words(&[0x1234], &DecodeRule::None, &registry()).unwrap();
        assert_eq!(v, Value::Integer(0x1234));
    }

    #[test]
    fn test_none_multi_word_is_sequence() {
        let v = decode_words(&[1, 2, 3], &DecodeRule::None, &registry()).unwrap();
        assert_eq!(v, Value::Words(vec![1, 2, 3]));
    }

    #[test]
    fn test_none_empty_fails() {
        let err = decode_words(&[], &DecodeRule::None, &registry()).unwrap_err();
        assert!(matches!(err, DecodeError::WordCountMismatch { .. }));
    }

    #[test]
    fn test_none_encode_roundtrip() {
        let words = encode_value(&Value::Integer(0x1234), &DecodeRule::None, 1, &registry()).unwrap();
        assert_eq!(words, vec![0x1234]);

        let words =
            encode_value(&Value::Words(vec![1, 2, 3]), &DecodeRule::None, 3, &registry()).unwrap();
        assert_eq!(words, vec![1, 2, 3]);
    }

    #[test]
    fn test_none_encode_range_check() {
        let err =
            encode_value(&Value::Integer(70000), &DecodeRule::None, 1, &registry()).unwrap_err();
        assert!(matches!(err, WriteError::ValueOutOfRange(_)));
    }

    // ========================================================================
    // Scale
    // ========================================================================

    #[test]
    fn test_scale_basic() {
        // Raw 25 with one decimal place reads as 2.5
        let rule = DecodeRule::Scale {
            factor: 1.0,
            places: 1,
        };
        let v = decode_words(&[25], &rule, &registry()).unwrap();
        assert_eq!(v, Value::Float(2.5));
    }

    #[test]
    fn test_scale_encode_inverse() {
        let rule = DecodeRule::Scale {
            factor: 1.0,
            places: 1,
        };
        let words = encode_value(&Value::Float(2.5), &rule, 1, &registry()).unwrap();
        assert_eq!(words, vec![25]);
    }

    #[test]
    fn test_scale_negative_single_word() {
        let rule = DecodeRule::Scale {
            factor: 1.0,
            places: 0,
        };
        // 0xFFF6 as i16 = -10
        let v = decode_words(&[0xFFF6], &rule, &registry()).unwrap();
        assert_eq!(v, Value::Float(-10.0));

        let words = encode_value(&Value::Float(-10.0), &rule, 1, &registry()).unwrap();
        assert_eq!(words, vec![0xFFF6]);
    }

    #[test]
    fn test_scale_two_words_signed() {
        let rule = DecodeRule::Scale {
            factor: 1.0,
            places: 2,
        };
        // -123456 as i32 over two words, two decimal places
        let bits = (-123456i32) as u32;
        let words = [(bits >> 16) as u16, (bits & 0xFFFF) as u16];
        let v = decode_words(&words, &rule, &registry()).unwrap();
        assert_eq!(v, Value::Float(-1234.56));

        let encoded = encode_value(&Value::Float(-1234.56), &rule, 2, &registry()).unwrap();
        assert_eq!(encoded, words.to_vec());
    }

    #[test]
    fn test_scale_with_factor() {
        let rule = DecodeRule::Scale {
            factor: 0.5,
            places: 0,
        };
        let v = decode_words(&[100], &rule, &registry()).unwrap();
        assert_eq!(v, Value::Float(50.0));
    }

    #[test]
    fn test_scale_word_count_mismatch() {
        let rule = DecodeRule::Scale {
            factor: 1.0,
            places: 1,
        };
        assert!(matches!(
            decode_words(&[1, 2, 3], &rule, &registry()).unwrap_err(),
            DecodeError::WordCountMismatch { .. }
        ));
        assert!(matches!(
            decode_words(&[], &rule, &registry()).unwrap_err(),
            DecodeError::WordCountMismatch { .. }
        ));
    }

    #[test]
    fn test_scale_zero_factor_not_writable() {
        let rule = DecodeRule::Scale {
            factor: 0.0,
            places: 0,
        };
        let err = encode_value(&Value::Float(1.0), &rule, 1, &registry()).unwrap_err();
        assert!(matches!(err, WriteError::NotWritable(_)));
    }

    #[test]
    fn test_scale_encode_out_of_range() {
        let rule = DecodeRule::Scale {
            factor: 1.0,
            places: 2,
        };
        // 1000.0 scales to raw 100000, beyond i16
        let err = encode_value(&Value::Float(1000.0), &rule, 1, &registry()).unwrap_err();
        assert!(matches!(err, WriteError::ValueOutOfRange(_)));
    }

    // ========================================================================
    // StringFromRegisters
    // ========================================================================

    #[test]
    fn test_string_decode_trims_trailing_nulls() {
        // "AB", "CD", then a NUL-padded register
        let words = [0x4142, 0x4344, 0x4500];
        let v = decode_words(&words, &DecodeRule::StringFromRegisters, &registry()).unwrap();
        assert_eq!(v, Value::String("ABCDE".to_string()));
    }

    #[test]
    fn test_string_encode_pads_with_nulls() {
        let words = encode_value(
            &Value::String("ABC".to_string()),
            &DecodeRule::StringFromRegisters,
            2,
            &registry(),
        )
        .unwrap();
        assert_eq!(words, vec![0x4142, 0x4300]);
    }

    #[test]
    fn test_string_encode_too_long() {
        let err = encode_value(
            &Value::String("ABCDE".to_string()),
            &DecodeRule::StringFromRegisters,
            2,
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(err, WriteError::ValueOutOfRange(_)));
    }

    #[test]
    fn test_string_invalid_utf8() {
        let err =
            decode_words(&[0xFFFE], &DecodeRule::StringFromRegisters, &registry()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidString(_)));
    }

    // ========================================================================
    // BoolFromBit
    // ========================================================================

    #[test]
    fn test_bool_from_bit() {
        assert_eq!(
            decode_words(&[1], &DecodeRule::BoolFromBit, &registry()).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            decode_words(&[0], &DecodeRule::BoolFromBit, &registry()).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_bool_from_bit_requires_single_value() {
        let err = decode_words(&[1, 0], &DecodeRule::BoolFromBit, &registry()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::WordCountMismatch {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_bool_encode() {
        let words =
            encode_value(&Value::Bool(true), &DecodeRule::BoolFromBit, 1, &registry()).unwrap();
        assert_eq!(words, vec![1]);
    }

    // ========================================================================
    // Custom rules
    // ========================================================================

    /// Test rule: sums all words, optionally multiplied by params["gain"]
    struct SumRule;

    impl CustomRule for SumRule {
        fn decode(&self, words: &[u16], params: &serde_json::Value) -> Result<Value, DecodeError> {
            let gain = params.get("gain").and_then(|g| g.as_i64()).unwrap_or(1);
            let sum: i64 = words.iter().map(|&w| i64::from(w)).sum();
            Ok(Value::Integer(sum * gain))
        }
    }

    #[test]
    fn test_custom_rule_dispatch() {
        let mut reg = DecodeRegistry::new();
        reg.register("sum", Arc::new(SumRule));

        let rule = DecodeRule::Custom {
            name: "sum".to_string(),
            params: serde_json::json!({"gain": 2}),
        };
        let v = decode_words(&[10, 20], &rule, &reg).unwrap();
        assert_eq!(v, Value::Integer(60));
    }

    #[test]
    fn test_custom_rule_unregistered() {
        let rule = DecodeRule::Custom {
            name: "missing".to_string(),
            params: serde_json::Value::Null,
        };
        let err = decode_words(&[1], &rule, &registry()).unwrap_err();
        assert_eq!(err, DecodeError::UnknownRule("missing".to_string()));
    }

    #[test]
    fn test_custom_rule_default_encode_not_writable() {
        let mut reg = DecodeRegistry::new();
        reg.register("sum", Arc::new(SumRule));

        let rule = DecodeRule::Custom {
            name: "sum".to_string(),
            params: serde_json::Value::Null,
        };
        let err = encode_value(&Value::Integer(1), &rule, 1, &reg).unwrap_err();
        assert!(matches!(err, WriteError::NotWritable(_)));
    }

    // ========================================================================
    // Serde representation
    // ========================================================================

    #[test]
    fn test_decode_rule_serde_roundtrip() {
        let rules = vec![
            DecodeRule::None,
            DecodeRule::Scale {
                factor: 0.1,
                places: 2,
            },
            DecodeRule::StringFromRegisters,
            DecodeRule::BoolFromBit,
            DecodeRule::Custom {
                name: "sum".to_string(),
                params: serde_json::json!({"gain": 3}),
            },
        ];

        for rule in rules {
            let json = serde_json::to_string(&rule).unwrap();
            let restored: DecodeRule = serde_json::from_str(&json).unwrap();
            assert_eq!(restored, rule);
        }
    }
}
