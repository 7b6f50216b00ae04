//! Reference table resolution: turning a dataset's opaque BAM header bytes
//! (§6, "Wire-compatible BAM header") into a `name -> refID` lookup, the
//! only thing [`crate::region::parse_region`] needs from the header.

use crate::error::{PamError, Result};
use noodles_sam as sam;
use std::str::FromStr;

/// The ordered reference sequence table embedded in a dataset's shard index
/// files. `refID`s are positions into this table; `refID = -1` means
/// unmapped and never indexes it.
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    names: Vec<String>,
}

impl ReferenceTable {
    /// Parse a dataset's stored SAM header text into its reference table.
    /// An empty (or unparseable) header yields an empty table rather than
    /// an error — region lookups against it simply fail with `NoDataset`-
    /// style context, since a shard written before this crate began
    /// embedding headers (DESIGN.md Open Question 2) carries no table at
    /// all.
    pub fn from_header_bytes(header: &[u8]) -> Result<Self> {
        if header.is_empty() {
            return Ok(ReferenceTable { names: Vec::new() });
        }
        let text = std::str::from_utf8(header).map_err(|e| PamError::format(format!("header is not valid UTF-8: {e}")))?;
        let parsed = sam::Header::from_str(text).map_err(|e| PamError::format(format!("malformed SAM header: {e}")))?;
        let names = parsed.reference_sequences().keys().map(|name| name.to_string()).collect();
        Ok(ReferenceTable { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Look up a reference's integer id by name, the inverse of
    /// [`Self::name`].
    pub fn ref_id(&self, name: &str) -> Option<i32> {
        self.names.iter().position(|n| n == name).map(|i| i as i32)
    }

    pub fn name(&self, ref_id: i32) -> Option<&str> {
        if ref_id < 0 {
            return None;
        }
        self.names.get(ref_id as usize).map(|s| s.as_str())
    }
}
