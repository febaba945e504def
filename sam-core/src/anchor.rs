//! Span prompting.
//!
//! A span anchor tells the separator to extract (`+`) or exclude (`-`) the
//! sound found in a time range of the input, on top of the text description.

use std::fmt;

use serde::{ser::SerializeTuple, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorToken {
  Include,
  Exclude,
}

impl AnchorToken {
  pub fn as_str(&self) -> &'static str {
    match self {
      AnchorToken::Include => "+",
      AnchorToken::Exclude => "-",
    }
  }

  pub fn mode(&self) -> &'static str {
    match self {
      AnchorToken::Include => "extract",
      AnchorToken::Exclude => "exclude",
    }
  }
}

impl fmt::Display for AnchorToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One `(token, start, end)` instruction, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub token: AnchorToken,
  pub start: f64,
  pub end: f64,
}

impl Serialize for Anchor {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut tuple = serializer.serialize_tuple(3)?;
    tuple.serialize_element(self.token.as_str())?;
    tuple.serialize_element(&self.start)?;
    tuple.serialize_element(&self.end)?;
    tuple.end()
  }
}

/// Anchor groups, one per batch item.
pub type Anchors = Vec<Vec<Anchor>>;

/// The time-range part of a prompt as given on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpanPrompt {
  pub start: Option<f64>,
  pub end: Option<f64>,
  pub exclude: bool,
}

impl SpanPrompt {
  pub fn new(start: Option<f64>, end: Option<f64>, exclude: bool) -> Self {
    Self {
      start,
      end,
      exclude,
    }
  }

  /// Builds the anchor argument for a single input.
  ///
  /// Both bounds must be present; a lone bound is treated like no bound at
  /// all. Bounds are passed through as given, even when reversed, negative or
  /// past the end of the media.
  pub fn anchors(&self) -> Option<Anchors> {
    let (Some(start), Some(end)) = (self.start, self.end) else {
      return None;
    };

    let token = if self.exclude {
      AnchorToken::Exclude
    } else {
      AnchorToken::Include
    };

    tracing::info!(start, end, %token, mode = token.mode(), "Span prompting enabled");

    Some(vec![vec![Anchor { token, start, end }]])
  }
}
