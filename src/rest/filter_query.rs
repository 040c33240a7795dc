//! Shared query-string → `Filter` parsing for the read routes (spec.md
//! §6). Lists are comma-separated since every downstream route uses the
//! same convention.

use crate::error::AppError;
use crate::model::{EventId, Filter, PubKey, TagFilter};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct FilterQuery {
    pub ids: Option<String>,
    pub authors: Option<String>,
    pub kinds: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u16>,
    /// `#e` / `#p` tag filters passed as `tag=e:id1,id2`.
    pub tag: Option<String>,
}

impl FilterQuery {
    pub fn into_filter(self) -> Result<Filter, AppError> {
        let ids = parse_list(self.ids.as_deref(), |s| {
            EventId::from_hex(s).map_err(|_| AppError::invalid(format!("bad id: {s}")))
        })?;
        let authors = parse_list(self.authors.as_deref(), |s| {
            PubKey::from_hex(s).map_err(|_| AppError::invalid(format!("bad author: {s}")))
        })?;
        let kinds = parse_list(self.kinds.as_deref(), |s| {
            s.parse::<u32>().map_err(|_| AppError::invalid(format!("bad kind: {s}")))
        })?;

        let tags = match self.tag {
            Some(raw) => {
                let (name, values) = raw
                    .split_once(':')
                    .ok_or_else(|| AppError::invalid("tag filter must be name:value1,value2"))?;
                vec![TagFilter { name: name.to_string(), values: values.split(',').map(str::to_string).collect() }]
            }
            None => vec![],
        };

        let filter = Filter {
            ids,
            authors,
            kinds,
            tags,
            since: self.since,
            until: self.until,
            limit: self.limit.unwrap_or(50),
        };
        filter.validate().map_err(|e| AppError::invalid(e.to_string()))?;
        Ok(filter)
    }
}

fn parse_list<T>(raw: Option<&str>, parse_one: impl Fn(&str) -> Result<T, AppError>) -> Result<Option<Vec<T>>, AppError> {
    match raw {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.split(',').map(parse_one).collect::<Result<Vec<_>, _>>().map(Some),
    }
}
