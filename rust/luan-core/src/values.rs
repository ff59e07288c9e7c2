//! Tagged values exchanged between the script VM and the host runtime.
//!
//! A [`TaggedValue`] is what both sides agree on. Scalars are plain data,
//! arrays own their elements, and every host-object-bearing variant owns a
//! strong [`HostRef`] that is given back when the value is dropped.

use std::borrow::Cow;
use std::fmt;
use std::num::NonZeroU32;

use strum::{Display, EnumIter};
use thiserror::Error;

use crate::host::{HostRef, ParamType};

/// Byte written over interior zero bytes of script strings.
pub const PLACEHOLDER: u8 = b'?';

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("array of length {len} exceeds the maximum of {max} elements")]
    ArrayTooLong { len: usize, max: usize },
}

/// Discriminant of a [`TaggedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    Null,
    Boolean,
    Integral,
    Floating,
    String,
    Array,
    HostObject,
    InternedFunction,
    HostLambdaFunction,
    HostReflectFunction,
    Globals,
}

/// Stable identity of an interned script function. Zero is reserved and
/// never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(NonZeroU32);

impl FunctionId {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(FunctionId)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Owned script string with an explicit, authoritative length.
///
/// The payload may hold arbitrary bytes except a zero byte before the last
/// position: those are replaced with [`PLACEHOLDER`] on construction. This
/// is a lossy transform, not a binary-safe path.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ScriptString {
    bytes: Vec<u8>,
}

impl ScriptString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let mut bytes = bytes.into();
        sanitize(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The payload as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Replace interior zero bytes, leaving the final byte untouched.
/// Returns the number of bytes rewritten.
fn sanitize(bytes: &mut [u8]) -> usize {
    let Some((_, body)) = bytes.split_last_mut() else {
        return 0;
    };
    let mut replaced = 0;
    for b in body.iter_mut().filter(|b| **b == 0) {
        *b = PLACEHOLDER;
        replaced += 1;
    }
    replaced
}

impl fmt::Debug for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl From<&str> for ScriptString {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for ScriptString {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

/// Ordered sequence of optional values. Absent slots cross into the VM as
/// nil.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptArray {
    slots: Vec<Option<TaggedValue>>,
}

impl ScriptArray {
    /// Largest array the bridge will carry. Conversion on the VM side walks
    /// integer keys, which are 16-bit counts.
    pub const MAX_LEN: usize = u16::MAX as usize;

    pub fn new(slots: Vec<Option<TaggedValue>>) -> Result<Self, ValueError> {
        if slots.len() > Self::MAX_LEN {
            return Err(ValueError::ArrayTooLong {
                len: slots.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Self { slots })
    }

    /// Build an array where every slot is present.
    pub fn from_values(values: impl IntoIterator<Item = TaggedValue>) -> Result<Self, ValueError> {
        Self::new(values.into_iter().map(Some).collect())
    }

    /// Build an array, dropping any slots past [`ScriptArray::MAX_LEN`].
    pub fn truncating(mut slots: Vec<Option<TaggedValue>>) -> Self {
        slots.truncate(Self::MAX_LEN);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Element at `index`; `None` for out-of-range and absent slots alike.
    pub fn get(&self, index: usize) -> Option<&TaggedValue> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slots(&self) -> &[Option<TaggedValue>] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<Option<TaggedValue>> {
        self.slots
    }

    pub fn push(&mut self, slot: Option<TaggedValue>) -> Result<(), ValueError> {
        if self.slots.len() >= Self::MAX_LEN {
            return Err(ValueError::ArrayTooLong {
                len: self.slots.len() + 1,
                max: Self::MAX_LEN,
            });
        }
        self.slots.push(slot);
        Ok(())
    }

    /// Nesting depth: 1 for a flat array, plus one per nested array level.
    pub fn depth(&self) -> usize {
        1 + self
            .slots
            .iter()
            .flatten()
            .map(|v| match v {
                TaggedValue::Array(inner) => inner.depth(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

/// Host closure together with its declared parameter types.
#[derive(Debug, Clone, PartialEq)]
pub struct HostLambda {
    pub closure: HostRef,
    pub signature: Vec<ParamType>,
}

/// Reflective method handle, bound to a receiver unless static.
#[derive(Debug, Clone, PartialEq)]
pub struct HostReflect {
    pub method: HostRef,
    pub receiver: Option<HostRef>,
}

/// A value crossing the script/host boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TaggedValue {
    #[default]
    Null,
    Boolean(bool),
    Integral(i64),
    Floating(f64),
    String(ScriptString),
    Array(ScriptArray),
    HostObject(HostRef),
    InternedFunction(FunctionId),
    HostLambdaFunction(HostLambda),
    HostReflectFunction(HostReflect),
    /// Stands for the VM's global namespace. Carries nothing.
    Globals,
}

impl TaggedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TaggedValue::Null => ValueKind::Null,
            TaggedValue::Boolean(_) => ValueKind::Boolean,
            TaggedValue::Integral(_) => ValueKind::Integral,
            TaggedValue::Floating(_) => ValueKind::Floating,
            TaggedValue::String(_) => ValueKind::String,
            TaggedValue::Array(_) => ValueKind::Array,
            TaggedValue::HostObject(_) => ValueKind::HostObject,
            TaggedValue::InternedFunction(_) => ValueKind::InternedFunction,
            TaggedValue::HostLambdaFunction(_) => ValueKind::HostLambdaFunction,
            TaggedValue::HostReflectFunction(_) => ValueKind::HostReflectFunction,
            TaggedValue::Globals => ValueKind::Globals,
        }
    }

    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        TaggedValue::String(ScriptString::new(bytes))
    }

    pub fn array(values: impl IntoIterator<Item = TaggedValue>) -> Result<Self, ValueError> {
        ScriptArray::from_values(values).map(TaggedValue::Array)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TaggedValue::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(
            self,
            TaggedValue::InternedFunction(_)
                | TaggedValue::HostLambdaFunction(_)
                | TaggedValue::HostReflectFunction(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TaggedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view of `Integral` and `Floating` values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TaggedValue::Floating(f) => Some(*f),
            TaggedValue::Integral(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// `Floating` values qualify only when integral and within `i64` range.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TaggedValue::Integral(i) => Some(*i),
            TaggedValue::Floating(f) if f.fract() == 0.0 => float_to_i64(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::String(s) => s.as_str(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ScriptArray> {
        match self {
            TaggedValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostRef> {
        match self {
            TaggedValue::HostObject(r) => Some(r),
            _ => None,
        }
    }

    pub fn function_id(&self) -> Option<FunctionId> {
        match self {
            TaggedValue::InternedFunction(id) => Some(*id),
            _ => None,
        }
    }

    /// Give back every host reference this value owns, recursively.
    ///
    /// Safe to call more than once; dropping the value afterwards releases
    /// nothing further.
    pub fn release(&self) {
        match self {
            TaggedValue::HostObject(r) => {
                r.release();
            }
            TaggedValue::HostLambdaFunction(l) => {
                l.closure.release();
            }
            TaggedValue::HostReflectFunction(r) => {
                r.method.release();
                if let Some(receiver) = &r.receiver {
                    receiver.release();
                }
            }
            TaggedValue::Array(a) => a.slots.iter().flatten().for_each(TaggedValue::release),
            _ => {}
        }
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedValue::Null => f.write_str("null"),
            TaggedValue::Boolean(b) => write!(f, "{b}"),
            TaggedValue::Integral(i) => write!(f, "{i}"),
            TaggedValue::Floating(x) => write!(f, "{x}"),
            TaggedValue::String(s) => write!(f, "{:?}", s.to_string_lossy()),
            TaggedValue::Array(a) => {
                f.write_str("[")?;
                for (i, slot) in a.slots.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match slot {
                        Some(v) => write!(f, "{v}")?,
                        None => f.write_str("null")?,
                    }
                }
                f.write_str("]")
            }
            TaggedValue::HostObject(r) => write!(f, "<object {}>", r.id()),
            TaggedValue::InternedFunction(id) => write!(f, "<function {id}>"),
            TaggedValue::HostLambdaFunction(l) => {
                write!(f, "<lambda {}/{}>", l.closure.id(), l.signature.len())
            }
            TaggedValue::HostReflectFunction(r) => write!(f, "<method {}>", r.method.id()),
            TaggedValue::Globals => f.write_str("<globals>"),
        }
    }
}

impl From<bool> for TaggedValue {
    fn from(b: bool) -> Self {
        TaggedValue::Boolean(b)
    }
}

macro_rules! integral_from {
    ($($t:ty),*) => {
        $(impl From<$t> for TaggedValue {
            fn from(v: $t) -> Self {
                TaggedValue::Integral(i64::from(v))
            }
        })*
    };
}

integral_from!(i8, i16, i32, i64);

impl From<f32> for TaggedValue {
    fn from(v: f32) -> Self {
        TaggedValue::Floating(f64::from(v))
    }
}

impl From<f64> for TaggedValue {
    fn from(v: f64) -> Self {
        TaggedValue::Floating(v)
    }
}

impl From<&str> for TaggedValue {
    fn from(s: &str) -> Self {
        TaggedValue::String(s.into())
    }
}

impl From<String> for TaggedValue {
    fn from(s: String) -> Self {
        TaggedValue::String(s.into())
    }
}

impl From<&[u8]> for TaggedValue {
    fn from(b: &[u8]) -> Self {
        TaggedValue::string(b)
    }
}

impl From<Vec<u8>> for TaggedValue {
    fn from(b: Vec<u8>) -> Self {
        TaggedValue::string(b)
    }
}

impl From<ScriptString> for TaggedValue {
    fn from(s: ScriptString) -> Self {
        TaggedValue::String(s)
    }
}

impl From<ScriptArray> for TaggedValue {
    fn from(a: ScriptArray) -> Self {
        TaggedValue::Array(a)
    }
}

impl From<HostRef> for TaggedValue {
    fn from(r: HostRef) -> Self {
        TaggedValue::HostObject(r)
    }
}

impl From<FunctionId> for TaggedValue {
    fn from(id: FunctionId) -> Self {
        TaggedValue::InternedFunction(id)
    }
}

impl<T: Into<TaggedValue>> From<Option<T>> for TaggedValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(TaggedValue::Null, Into::into)
    }
}

/// Truncating `f64 -> i64` conversion that refuses values `as` would
/// saturate. NaN and infinities are out of range.
pub(crate) fn float_to_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f >= -LIMIT && f < LIMIT).then(|| f as i64)
}
