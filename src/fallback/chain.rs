//! Ordered engine fallback chain.

use crate::{Error, ErrorContext, Result};

/// Engine ids in fallback order, fixed at construction. The last id is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    ids: Vec<String>,
}

impl FallbackChain {
    pub fn new<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(Error::configuration_with_context(
                "fallback chain is empty",
                ErrorContext::new().with_field_path("fallback.chain"),
            ));
        }
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(Error::configuration_with_context(
                    format!("engine '{}' appears twice in the fallback chain", id),
                    ErrorContext::new().with_field_path("fallback.chain"),
                ));
            }
        }
        Ok(Self { ids })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|x| x == id)
    }

    /// Cursor for one request, starting at `active`.
    ///
    /// An engine outside the chain gets a cursor with nothing to fall back to.
    pub fn cursor(&self, active: &str) -> ChainCursor<'_> {
        ChainCursor {
            chain: self,
            index: self.position(active),
        }
    }
}

/// Walks a [`FallbackChain`] forward only.
#[derive(Debug)]
pub struct ChainCursor<'a> {
    chain: &'a FallbackChain,
    index: Option<usize>,
}

impl<'a> ChainCursor<'a> {
    /// The id after the current one, without moving.
    pub fn peek_next(&self) -> Option<&'a str> {
        self.index
            .and_then(|i| self.chain.ids.get(i + 1))
            .map(String::as_str)
    }

    /// Move forward one step. Never moves back.
    pub fn advance(&mut self) -> Option<&'a str> {
        let next = self.peek_next()?;
        self.index = self.index.map(|i| i + 1);
        Some(next)
    }
}
