//! Opaque page cursor tokens.
//!
//! A cursor carries everything a follow-up page request needs: the true
//! first- and last-page boundary ids learned on the bootstrap request, the
//! backend search-after tuple of the edge record, and the fetch direction.
//! Tokens are serialized as `{firstId}:{lastId}:{score}_{id}_{asc|desc}` and
//! validated structurally at the parse boundary.

use crate::error::{AppError, AppResult};
use crate::store::{SearchAnchor, SortOrder, is_valid_record_id};

/// Sentinel token requesting the final page without a precomputed anchor.
pub const LAST_PAGE_CURSOR: &str = "last-page-cursor";

/// Decoded page cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// Tiebreak id of the very first record of the whole result set.
    pub first_page_id: String,

    /// Tiebreak id of the very last record of the whole result set.
    pub last_page_id: String,

    /// Search-after tuple of the edge record of the page that produced
    /// this cursor.
    pub anchor: SearchAnchor,

    /// Fetch direction: `desc` walks forward, `asc` walks backward.
    pub direction: SortOrder,
}

impl PageCursor {
    /// Serialize into the opaque token handed to callers.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}_{}",
            self.first_page_id,
            self.last_page_id,
            self.anchor.encode(),
            self.direction.as_str()
        )
    }

    /// Parse and validate a cursor token.
    pub fn parse(token: &str) -> AppResult<Self> {
        let segments: Vec<&str> = token.split(':').collect();
        let [first_page_id, last_page_id, tail] = segments[..] else {
            return Err(AppError::InvalidCursor(
                "expected three colon-delimited segments".to_string(),
            ));
        };

        if !is_valid_record_id(first_page_id) || !is_valid_record_id(last_page_id) {
            return Err(AppError::InvalidCursor(
                "boundary ids contain invalid characters".to_string(),
            ));
        }

        let (anchor, direction) = tail.rsplit_once('_').ok_or_else(|| {
            AppError::InvalidCursor("missing sort direction suffix".to_string())
        })?;

        Ok(Self {
            first_page_id: first_page_id.to_string(),
            last_page_id: last_page_id.to_string(),
            anchor: SearchAnchor::parse(anchor)?,
            direction: direction.parse()?,
        })
    }
}
