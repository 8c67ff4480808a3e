//! # Params Codec
//!
//! The translation layer between an ordered list of value slots and the single
//! JSON fragment carried in `params` or `result`.
//!
//! ## Invariants
//! - **Fixed Arity**: `decode` always yields exactly `arity` slots.
//! - **Zero Fill**: a slot with no wire value is `Value::Null`. The typed
//!   layer turns that into the slot type's `Default`.
//! - **Setup Faults**: `check_arity` rejects impossible configurations before
//!   any message is served.

use std::collections::HashMap;

use serde_json::Map;
use serde_json::Value;

use crate::error::CodecError;
use crate::error::Result;

/// A strategy for mapping value slots to and from a JSON fragment.
pub trait ParamsCodec: Send + Sync {
    /// Encodes `values` into one fragment.
    fn encode(&self, values: Vec<Value>) -> Result<Value>;

    /// Decodes `raw` into exactly `arity` slots.
    fn decode(&self, raw: &Value, arity: usize) -> Result<Vec<Value>>;

    /// Rejects arities this codec can never serve.
    fn check_arity(&self, _arity: usize) -> Result<()> {
        Ok(())
    }
}

impl<C: ParamsCodec + ?Sized> ParamsCodec for Box<C> {
    fn encode(&self, values: Vec<Value>) -> Result<Value> {
        (**self).encode(values)
    }

    fn decode(&self, raw: &Value, arity: usize) -> Result<Vec<Value>> {
        (**self).decode(raw, arity)
    }

    fn check_arity(&self, arity: usize) -> Result<()> {
        (**self).check_arity(arity)
    }
}

/// Values as a JSON array, by position.
#[derive(Debug, Clone)]
pub struct Positional {
    allow_excessive: bool,
}

impl Positional {
    pub fn new() -> Self {
        Self { allow_excessive: true }
    }

    /// Whether surplus array elements are dropped (`true`) or rejected.
    pub fn with_allow_excessive(mut self, allow_excessive: bool) -> Self {
        self.allow_excessive = allow_excessive;
        self
    }

    pub fn allow_excessive(&self) -> bool {
        self.allow_excessive
    }
}

impl Default for Positional {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamsCodec for Positional {
    fn encode(&self, values: Vec<Value>) -> Result<Value> {
        Ok(Value::Array(values))
    }

    fn decode(&self, raw: &Value, arity: usize) -> Result<Vec<Value>> {
        let elements: &[Value] = match raw {
            Value::Null => &[],
            Value::Array(elements) => elements,
            _ => {
                return Err(CodecError::UnexpectedShape {
                    codec: "positional",
                    expected: "array or null",
                });
            }
        };

        if elements.len() > arity && !self.allow_excessive {
            return Err(CodecError::TooManyArguments {
                expected: arity,
                found: elements.len(),
            });
        }

        let mut slots: Vec<Value> = elements.iter().take(arity).cloned().collect();
        slots.resize(arity, Value::Null);
        Ok(slots)
    }
}

/// Values as a JSON object, keyed by a fixed list of names.
#[derive(Debug, Clone)]
pub struct Named {
    names: Vec<String>,
    index: HashMap<String, usize>,
    allow_excessive: bool,
}

impl Named {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.clone(), slot))
            .collect();

        Self {
            names,
            index,
            allow_excessive: true,
        }
    }

    /// Whether unknown keys are ignored (`true`) or rejected.
    pub fn with_allow_excessive(mut self, allow_excessive: bool) -> Self {
        self.allow_excessive = allow_excessive;
        self
    }

    pub fn allow_excessive(&self) -> bool {
        self.allow_excessive
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl ParamsCodec for Named {
    fn encode(&self, values: Vec<Value>) -> Result<Value> {
        if values.len() != self.names.len() {
            return Err(CodecError::ArityMismatch {
                expected: self.names.len(),
                found: values.len(),
            });
        }

        let object: Map<String, Value> = self.names.iter().cloned().zip(values).collect();
        Ok(Value::Object(object))
    }

    fn decode(&self, raw: &Value, arity: usize) -> Result<Vec<Value>> {
        let mut slots = vec![Value::Null; arity];

        let entries = match raw {
            Value::Null => return Ok(slots),
            Value::Object(entries) => entries,
            _ => {
                return Err(CodecError::UnexpectedShape {
                    codec: "named",
                    expected: "object or null",
                });
            }
        };

        for (key, value) in entries {
            match self.index.get(key) {
                Some(&slot) if slot < arity => slots[slot] = value.clone(),
                _ if self.allow_excessive => continue,
                _ => return Err(CodecError::UnknownName(key.clone())),
            }
        }

        Ok(slots)
    }

    fn check_arity(&self, arity: usize) -> Result<()> {
        if arity != self.names.len() {
            return Err(CodecError::ArityMismatch {
                expected: self.names.len(),
                found: arity,
            });
        }
        Ok(())
    }
}

/// Decodes either shape, encodes by name.
///
/// Both inner codecs share one `allow_excessive` setting; there is no way to
/// configure them apart.
#[derive(Debug, Clone)]
pub struct Mixed {
    named: Named,
    positional: Positional,
}

impl Mixed {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            named: Named::new(names),
            positional: Positional::new(),
        }
    }

    pub fn with_allow_excessive(self, allow_excessive: bool) -> Self {
        Self {
            named: self.named.with_allow_excessive(allow_excessive),
            positional: self.positional.with_allow_excessive(allow_excessive),
        }
    }

    pub fn allow_excessive(&self) -> bool {
        debug_assert_eq!(self.named.allow_excessive(), self.positional.allow_excessive());
        self.named.allow_excessive()
    }
}

impl ParamsCodec for Mixed {
    fn encode(&self, values: Vec<Value>) -> Result<Value> {
        self.named.encode(values)
    }

    fn decode(&self, raw: &Value, arity: usize) -> Result<Vec<Value>> {
        match raw {
            Value::Object(_) => self.named.decode(raw, arity),
            Value::Array(_) | Value::Null => self.positional.decode(raw, arity),
            _ => Err(CodecError::UnexpectedShape {
                codec: "mixed",
                expected: "array, object, or null",
            }),
        }
    }

    fn check_arity(&self, arity: usize) -> Result<()> {
        self.named.check_arity(arity)
    }
}

/// The bare fragment, for zero or one slot.
#[derive(Debug, Clone, Default)]
pub struct Original;

impl Original {
    pub fn new() -> Self {
        Self
    }
}

impl ParamsCodec for Original {
    fn encode(&self, values: Vec<Value>) -> Result<Value> {
        self.check_arity(values.len())?;
        Ok(values.into_iter().next().unwrap_or(Value::Null))
    }

    fn decode(&self, raw: &Value, arity: usize) -> Result<Vec<Value>> {
        self.check_arity(arity)?;
        match arity {
            0 => Ok(Vec::new()),
            _ => Ok(vec![raw.clone()]),
        }
    }

    fn check_arity(&self, arity: usize) -> Result<()> {
        if arity > 1 {
            return Err(CodecError::UnsupportedArity {
                codec: "original",
                arity,
            });
        }
        Ok(())
    }
}
