//! Extracted request parameters and their typed conversions.
//!
//! Every lookup on a [`Context`](crate::Context) returns a [`ParamValue`]:
//! the raw string plus an optional extraction error. Nothing is escalated
//! automatically. The caller picks one of two conversion styles:
//!
//! ```rust
//! # use waypoint::ParamValue;
//! # fn demo(page: ParamValue, id: ParamValue) -> Result<(), waypoint::ParamError> {
//! let page = page.int_or(1);   // default on any failure, never errors
//! let id = id.int64()?;        // propagate the failure
//! # let _ = (page, id); Ok(()) }
//! ```
//!
//! Once `error` is set the raw value is never consulted again: the `_or`
//! variants return their default and the plain variants return the error.

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use crate::form::BodyError;

/// Why a parameter could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamError {
    /// The request body (or query string) could not be decoded.
    Body(BodyError),
    /// The value was present but did not parse as the requested type.
    Parse {
        key: String,
        value: String,
        target: &'static str,
        reason: String,
    },
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body(e) => write!(f, "request body: {e}"),
            Self::Parse { key, value, target, reason } => {
                write!(f, "parameter `{key}`: cannot parse {value:?} as {target}: {reason}")
            }
        }
    }
}

impl StdError for ParamError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Body(e) => Some(e),
            Self::Parse { .. } => None,
        }
    }
}

impl From<BodyError> for ParamError {
    fn from(e: BodyError) -> Self {
        Self::Body(e)
    }
}

/// A single extracted parameter: `(key, value, error)`.
#[derive(Debug, Clone)]
pub struct ParamValue {
    key: String,
    value: String,
    error: Option<ParamError>,
}

macro_rules! typed_accessors {
    ($($name:ident, $name_or:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Parses the value as `", stringify!($ty), "`.")]
            pub fn $name(&self) -> Result<$ty, ParamError> {
                self.parse_with(stringify!($ty), |s| s.parse::<$ty>().map_err(|e| e.to_string()))
            }

            #[doc = concat!("Parses the value as `", stringify!($ty), "`, falling back to `default`.")]
            pub fn $name_or(&self, default: $ty) -> $ty {
                self.$name().unwrap_or(default)
            }
        )*
    };
}

impl ParamValue {
    pub(crate) fn new(key: &str, value: impl Into<String>) -> Self {
        Self { key: key.to_owned(), value: value.into(), error: None }
    }

    pub(crate) fn failed(key: &str, error: ParamError) -> Self {
        Self { key: key.to_owned(), value: String::new(), error: Some(error) }
    }

    pub fn key(&self) -> &str { &self.key }

    /// The extraction error, if any.
    pub fn error(&self) -> Option<&ParamError> { self.error.as_ref() }

    pub fn is_ok(&self) -> bool { self.error.is_none() }

    /// The raw value, or `None` once an extraction error is recorded.
    pub fn raw(&self) -> Option<&str> {
        match self.error {
            Some(_) => None,
            None => Some(&self.value),
        }
    }

    typed_accessors! {
        int, int_or => isize;
        int32, int32_or => i32;
        int64, int64_or => i64;
        uint32, uint32_or => u32;
        uint64, uint64_or => u64;
        float32, float32_or => f32;
        float64, float64_or => f64;
    }

    /// Parses the value as a boolean.
    ///
    /// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
    pub fn bool(&self) -> Result<bool, ParamError> {
        self.parse_with("bool", |s| match s {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            _ => Err("invalid boolean literal".to_owned()),
        })
    }

    pub fn bool_or(&self, default: bool) -> bool {
        self.bool().unwrap_or(default)
    }

    /// The value as a string, optionally with surrounding whitespace trimmed.
    pub fn string(&self, trim: bool) -> Result<String, ParamError> {
        self.parse_with("string", |s| Ok(if trim { s.trim() } else { s }.to_owned()))
    }

    pub fn string_or(&self, default: &str, trim: bool) -> String {
        self.string(trim).unwrap_or_else(|_| default.to_owned())
    }

    /// Parses the value with any [`FromStr`] type.
    pub fn parse<T>(&self) -> Result<T, ParamError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.parse_with(std::any::type_name::<T>(), |s| s.parse::<T>().map_err(|e| e.to_string()))
    }

    fn parse_with<T>(
        &self,
        target: &'static str,
        f: impl FnOnce(&str) -> Result<T, String>,
    ) -> Result<T, ParamError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        f(&self.value).map_err(|reason| ParamError::Parse {
            key: self.key.clone(),
            value: self.value.clone(),
            target,
            reason,
        })
    }
}
