//! Named auxiliary values attached to frames.
//!
//! Ancillary entries are small, immutable, reference-counted byte values.
//! Adding the same [`AncillaryData`] to several frames shares it rather than
//! copying it; an optional cleaner runs once the last reference is gone.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Key under which SEI user data unregistered payloads are stored.
pub const USERDATA_SEI_KEY: &str = "mbuf.userdata_sei";

/// Callback run with `(name, value)` when an entry is destroyed.
pub type Cleaner = Box<dyn FnOnce(&str, &[u8]) + Send>;

struct AncillaryInner {
    name: String,
    value: Box<[u8]>,
    is_string: bool,
    cleaner: Mutex<Option<Cleaner>>,
}

impl Drop for AncillaryInner {
    fn drop(&mut self) {
        let cleaner = self
            .cleaner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cleaner) = cleaner {
            cleaner(&self.name, &self.value);
        }
    }
}

/// A shared, immutable named value.
#[derive(Clone)]
pub struct AncillaryData {
    inner: Arc<AncillaryInner>,
}

impl AncillaryData {
    fn build(
        name: &str,
        value: Box<[u8]>,
        is_string: bool,
        cleaner: Option<Cleaner>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("ancillary name is empty".into()));
        }
        Ok(Self {
            inner: Arc::new(AncillaryInner {
                name: name.to_owned(),
                value,
                is_string,
                cleaner: Mutex::new(cleaner),
            }),
        })
    }

    /// Create a string entry.
    pub fn new_string(name: &str, value: &str) -> Result<Self> {
        Self::build(name, value.as_bytes().into(), true, None)
    }

    /// Create a binary entry holding a copy of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` or `value` is empty.
    pub fn new_buffer(name: &str, value: &[u8]) -> Result<Self> {
        Self::binary(name, value, None)
    }

    /// Create a binary entry whose `cleaner` runs when it is destroyed.
    pub fn with_cleaner<F>(name: &str, value: &[u8], cleaner: F) -> Result<Self>
    where
        F: FnOnce(&str, &[u8]) + Send + 'static,
    {
        let cleaner: Cleaner = Box::new(cleaner);
        Self::binary(name, value, Some(cleaner))
    }

    fn binary(name: &str, value: &[u8], cleaner: Option<Cleaner>) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "ancillary '{name}': empty buffer"
            )));
        }
        Self::build(name, value.into(), false, cleaner)
    }

    /// Entry name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Raw value bytes.
    pub fn data(&self) -> &[u8] {
        &self.inner.value
    }

    /// Value length in bytes.
    pub fn len(&self) -> usize {
        self.inner.value.len()
    }

    /// Check if the value is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.value.is_empty()
    }

    /// Check if this entry was created from a string.
    pub fn is_string(&self) -> bool {
        self.inner.is_string
    }

    /// The value as a string, for string entries.
    pub fn as_str(&self) -> Option<&str> {
        if !self.inner.is_string {
            return None;
        }
        std::str::from_utf8(&self.inner.value).ok()
    }

    /// Number of live references (frames and handles).
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Check if two handles refer to the same entry.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AncillaryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("AncillaryData");
        s.field("name", &self.inner.name);
        match self.as_str() {
            Some(text) => s.field("value", &text),
            None => s.field("len", &self.len()),
        };
        s.finish()
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Build a key from a base name and a numeric id (`"name:0x<id>"`).
///
/// Id 0 yields the bare name.
pub fn build_key(name: &str, id: u64) -> String {
    if id == 0 {
        name.to_owned()
    } else {
        format!("{name}:{id:#x}")
    }
}

/// Split a key built by [`build_key`] into its name and id.
///
/// The id accepts `0x` hexadecimal, leading-zero octal or decimal.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the key is empty or the id is not
/// a number.
pub fn parse_key(key: &str) -> Result<(&str, Option<u64>)> {
    let (name, id) = match key.split_once(':') {
        Some((name, id)) => (name, Some(id)),
        None => (key, None),
    };
    if name.is_empty() {
        return Err(Error::InvalidArgument(format!("bad ancillary key '{key}'")));
    }
    let Some(id) = id else {
        return Ok((name, None));
    };
    let parsed = if let Some(hex) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if id.len() > 1 && id.starts_with('0') {
        u64::from_str_radix(&id[1..], 8)
    } else {
        id.parse()
    };
    let id = parsed.map_err(|_| Error::InvalidArgument(format!("bad ancillary id in '{key}'")))?;
    Ok((name, Some(id)))
}
