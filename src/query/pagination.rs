//! Cursor pagination shared by every listing.
//!
//! The cursor is the id of the last row of the previous page. One row more
//! than requested is fetched to learn whether another page exists.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{Error, Result};

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 50;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageRequest {
    /// Id of the last row already seen
    pub cursor: Option<String>,
    /// Page size, 1..=50, default 20
    pub limit: Option<u32>,
}

/// A validated [`PageRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub after: Option<i64>,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(cursor: Option<String>, limit: Option<u32>) -> Self {
        Self { cursor, limit }
    }

    pub fn validate(self) -> Result<Pagination> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        let after = match self.cursor.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(cursor) => Some(
                cursor
                    .parse::<i64>()
                    .map_err(|_| Error::Validation(format!("invalid cursor: {cursor}")))?,
            ),
        };
        Ok(Pagination {
            after,
            limit: i64::from(limit),
        })
    }
}

impl Pagination {
    pub fn fetch_limit(&self) -> i64 {
        self.limit + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    /// Build a page from at most `limit + 1` rows.
    pub fn from_rows(mut rows: Vec<T>, limit: i64, id: impl Fn(&T) -> i64) -> Self {
        let limit = usize::try_from(limit).unwrap_or(0);
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|row| id(row).to_string())
        } else {
            None
        };
        Self {
            data: rows,
            meta: PageMeta {
                next_cursor,
                has_more,
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}
