//! Icon identifiers and modifier tags
//!
//! An [`IconId`] is the canonical, lowercase, hyphen separated name of an icon
//! (`arrow-right`). Modifier tags are the closed set of size, color and
//! position tokens a node can carry next to its identifier
//! (`sva-icon--l`, `sva-icon--primary`, `sva-icon--spin`).

use std::fmt;
use std::str::FromStr;

use heck::{ToKebabCase, ToUpperCamelCase};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IconError, IconResult};

static ICON_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("icon id pattern is valid"));

/// Canonical icon identifier, constructed only through validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IconId(String);

impl IconId {
    pub fn parse(raw: &str) -> IconResult<Self> {
        if ICON_ID_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(IconError::InvalidIdentifier(raw.to_string()))
        }
    }

    /// Canonical id of a registration name in either convention:
    /// `arrow-right` stays as is, `ArrowRight` becomes `arrow-right`.
    pub fn from_name(name: &str) -> IconResult<Self> {
        Self::parse(name).or_else(|_| Self::parse(&name.to_kebab_case()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Capitalized-concatenated form used by component style registries (`ArrowRight`)
    pub fn to_component_name(&self) -> String {
        self.0.to_upper_camel_case()
    }
}

impl fmt::Display for IconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IconId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for IconId {
    type Err = IconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for IconId {
    type Error = IconError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if ICON_ID_PATTERN.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(IconError::InvalidIdentifier(value))
        }
    }
}

impl From<IconId> for String {
    fn from(id: IconId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum IconSize {
    Xs,
    S,
    M,
    L,
    Xl,
    Xxl,
}

impl IconSize {
    pub const DEFAULT: IconSize = IconSize::M;

    pub fn pixels(self) -> u32 {
        match self {
            IconSize::Xs => 12,
            IconSize::S => 16,
            IconSize::M => 24,
            IconSize::L => 32,
            IconSize::Xl => 48,
            IconSize::Xxl => 64,
        }
    }

    fn token(self) -> &'static str {
        match self {
            IconSize::Xs => "xs",
            IconSize::S => "s",
            IconSize::M => "m",
            IconSize::L => "l",
            IconSize::Xl => "xl",
            IconSize::Xxl => "2xl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum IconColor {
    Primary,
    Secondary,
    Success,
    Warning,
    Danger,
    Info,
    Muted,
}

impl IconColor {
    fn token(self) -> &'static str {
        match self {
            IconColor::Primary => "primary",
            IconColor::Secondary => "secondary",
            IconColor::Success => "success",
            IconColor::Warning => "warning",
            IconColor::Danger => "danger",
            IconColor::Info => "info",
            IconColor::Muted => "muted",
        }
    }

    /// CSS value handed to renderers, resolved by the theme's custom properties
    pub fn css_value(self) -> String {
        format!("var(--sva-color-{})", self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum IconPosition {
    Spin,
    Pulse,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipH,
    FlipV,
    Start,
    End,
}

impl IconPosition {
    fn token(self) -> &'static str {
        match self {
            IconPosition::Spin => "spin",
            IconPosition::Pulse => "pulse",
            IconPosition::Rotate90 => "rotate-90",
            IconPosition::Rotate180 => "rotate-180",
            IconPosition::Rotate270 => "rotate-270",
            IconPosition::FlipH => "flip-h",
            IconPosition::FlipV => "flip-v",
            IconPosition::Start => "start",
            IconPosition::End => "end",
        }
    }
}

/// A presentation hint attached to a node, never to an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ModifierTag {
    Size(IconSize),
    Color(IconColor),
    Position(IconPosition),
}

impl ModifierTag {
    /// Parse the part of a modifier class after `<prefix>-`
    pub fn parse(token: &str) -> Option<Self> {
        let tag = match token {
            "xs" => ModifierTag::Size(IconSize::Xs),
            "s" => ModifierTag::Size(IconSize::S),
            "m" => ModifierTag::Size(IconSize::M),
            "l" => ModifierTag::Size(IconSize::L),
            "xl" => ModifierTag::Size(IconSize::Xl),
            "2xl" => ModifierTag::Size(IconSize::Xxl),
            "primary" => ModifierTag::Color(IconColor::Primary),
            "secondary" => ModifierTag::Color(IconColor::Secondary),
            "success" => ModifierTag::Color(IconColor::Success),
            "warning" => ModifierTag::Color(IconColor::Warning),
            "danger" => ModifierTag::Color(IconColor::Danger),
            "info" => ModifierTag::Color(IconColor::Info),
            "muted" => ModifierTag::Color(IconColor::Muted),
            "spin" => ModifierTag::Position(IconPosition::Spin),
            "pulse" => ModifierTag::Position(IconPosition::Pulse),
            "rotate-90" => ModifierTag::Position(IconPosition::Rotate90),
            "rotate-180" => ModifierTag::Position(IconPosition::Rotate180),
            "rotate-270" => ModifierTag::Position(IconPosition::Rotate270),
            "flip-h" => ModifierTag::Position(IconPosition::FlipH),
            "flip-v" => ModifierTag::Position(IconPosition::FlipV),
            "start" => ModifierTag::Position(IconPosition::Start),
            "end" => ModifierTag::Position(IconPosition::End),
            _ => return None,
        };
        Some(tag)
    }

    pub fn token(self) -> &'static str {
        match self {
            ModifierTag::Size(size) => size.token(),
            ModifierTag::Color(color) => color.token(),
            ModifierTag::Position(position) => position.token(),
        }
    }

    /// Class form of the tag, e.g. `sva-icon--l` for prefix `sva-icon-`
    pub fn class_name(self, prefix: &str) -> String {
        format!("{prefix}-{}", self.token())
    }
}

impl fmt::Display for ModifierTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Canonical form of a modifier list: the last size, color, rotation and
/// placement win, flags are kept, and the result is sorted and deduplicated.
///
/// Two lists with the same canonical form render identically.
pub fn normalize_modifiers(modifiers: &[ModifierTag]) -> Vec<ModifierTag> {
    let mut canonical: Vec<ModifierTag> = Vec::with_capacity(modifiers.len());
    for &modifier in modifiers {
        if let Some(group) = modifier.exclusive_group() {
            canonical.retain(|kept| kept.exclusive_group() != Some(group));
        }
        canonical.push(modifier);
    }
    canonical.sort_unstable();
    canonical.dedup();
    canonical
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExclusiveGroup {
    Size,
    Color,
    Rotation,
    Placement,
}

impl ModifierTag {
    /// Tags in the same group overwrite each other when rendering
    fn exclusive_group(self) -> Option<ExclusiveGroup> {
        match self {
            ModifierTag::Size(_) => Some(ExclusiveGroup::Size),
            ModifierTag::Color(_) => Some(ExclusiveGroup::Color),
            ModifierTag::Position(
                IconPosition::Rotate90 | IconPosition::Rotate180 | IconPosition::Rotate270,
            ) => Some(ExclusiveGroup::Rotation),
            ModifierTag::Position(IconPosition::Start | IconPosition::End) => {
                Some(ExclusiveGroup::Placement)
            }
            ModifierTag::Position(_) => None,
        }
    }
}

/// A class token that starts with the configured prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrefixedToken<'a> {
    /// `sva-icon-<rest>`: an identifier candidate
    Identifier(&'a str),
    /// `sva-icon--<rest>`: a modifier candidate
    Modifier(&'a str),
}

pub(crate) fn classify_token<'a>(prefix: &str, class: &'a str) -> Option<PrefixedToken<'a>> {
    let rest = class.strip_prefix(prefix)?;
    match rest.strip_prefix('-') {
        Some(modifier) => Some(PrefixedToken::Modifier(modifier)),
        None => Some(PrefixedToken::Identifier(rest)),
    }
}

/// Options handed to an icon's content function, derived from the node's modifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOptions {
    /// Edge length in pixels
    pub size: u32,
    /// CSS color value
    pub color: String,
    /// Clockwise rotation in degrees
    pub rotate: Option<u16>,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub spin: bool,
    pub pulse: bool,
    /// Inline placement (`start` / `end`) if requested
    pub placement: Option<IconPosition>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            size: IconSize::DEFAULT.pixels(),
            color: "currentColor".to_string(),
            rotate: None,
            flip_horizontal: false,
            flip_vertical: false,
            spin: false,
            pulse: false,
            placement: None,
        }
    }
}

impl RenderOptions {
    /// Later tags of the same kind win
    pub fn from_modifiers(modifiers: &[ModifierTag]) -> Self {
        let mut options = RenderOptions::default();
        for modifier in modifiers {
            match *modifier {
                ModifierTag::Size(size) => options.size = size.pixels(),
                ModifierTag::Color(color) => options.color = color.css_value(),
                ModifierTag::Position(position) => match position {
                    IconPosition::Spin => options.spin = true,
                    IconPosition::Pulse => options.pulse = true,
                    IconPosition::Rotate90 => options.rotate = Some(90),
                    IconPosition::Rotate180 => options.rotate = Some(180),
                    IconPosition::Rotate270 => options.rotate = Some(270),
                    IconPosition::FlipH => options.flip_horizontal = true,
                    IconPosition::FlipV => options.flip_vertical = true,
                    IconPosition::Start | IconPosition::End => options.placement = Some(position),
                },
            }
        }
        options
    }

    /// SVG `transform` value for rotation and flips, centred on a 24 unit view box
    pub fn transform(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(degrees) = self.rotate {
            parts.push(format!("rotate({degrees} 12 12)"));
        }
        match (self.flip_horizontal, self.flip_vertical) {
            (true, true) => parts.push("matrix(-1 0 0 -1 24 24)".to_string()),
            (true, false) => parts.push("matrix(-1 0 0 1 24 0)".to_string()),
            (false, true) => parts.push("matrix(1 0 0 -1 0 24)".to_string()),
            (false, false) => {}
        }
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation() {
        for ok in ["plus", "arrow-right", "chevron-2x", "a1-b2-c3"] {
            assert!(IconId::parse(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "Plus", "arrow--right", "-plus", "plus-", "arrow_right", "ça"] {
            assert_eq!(
                IconId::parse(bad),
                Err(IconError::InvalidIdentifier(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn component_name_round_trip() {
        let id = IconId::parse("arrow-right").unwrap();
        assert_eq!(id.to_component_name(), "ArrowRight");
        assert_eq!(IconId::from_name("ArrowRight").unwrap(), id);
        assert_eq!(IconId::from_name("arrow-right").unwrap(), id);
    }

    #[test]
    fn modifier_closed_set() {
        assert_eq!(ModifierTag::parse("l"), Some(ModifierTag::Size(IconSize::L)));
        assert_eq!(ModifierTag::parse("2xl"), Some(ModifierTag::Size(IconSize::Xxl)));
        assert_eq!(
            ModifierTag::parse("rotate-90"),
            Some(ModifierTag::Position(IconPosition::Rotate90))
        );
        assert_eq!(ModifierTag::parse("huge"), None);
        assert_eq!(
            ModifierTag::Color(IconColor::Primary).class_name("sva-icon-"),
            "sva-icon--primary"
        );
    }

    #[test]
    fn classify_prefixed_tokens() {
        assert_eq!(
            classify_token("sva-icon-", "sva-icon-plus"),
            Some(PrefixedToken::Identifier("plus"))
        );
        assert_eq!(
            classify_token("sva-icon-", "sva-icon--xl"),
            Some(PrefixedToken::Modifier("xl"))
        );
        assert_eq!(classify_token("sva-icon-", "button"), None);
    }

    #[test]
    fn render_options_from_modifiers() {
        let options = RenderOptions::from_modifiers(&[
            ModifierTag::Size(IconSize::S),
            ModifierTag::Color(IconColor::Danger),
            ModifierTag::Position(IconPosition::Rotate180),
            ModifierTag::Size(IconSize::Xl),
        ]);
        assert_eq!(options.size, 48);
        assert_eq!(options.color, "var(--sva-color-danger)");
        assert_eq!(options.transform().as_deref(), Some("rotate(180 12 12)"));
        assert_eq!(RenderOptions::default().color, "currentColor");
        assert_eq!(RenderOptions::default().transform(), None);
    }

    #[test]
    fn normalized_modifiers_are_order_independent() {
        let a = normalize_modifiers(&[
            ModifierTag::Color(IconColor::Info),
            ModifierTag::Size(IconSize::L),
            ModifierTag::Size(IconSize::L),
        ]);
        let b = normalize_modifiers(&[
            ModifierTag::Size(IconSize::L),
            ModifierTag::Color(IconColor::Info),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn normalized_modifiers_keep_the_winning_tag_per_kind() {
        let small_then_large = [
            ModifierTag::Size(IconSize::S),
            ModifierTag::Position(IconPosition::Rotate90),
            ModifierTag::Position(IconPosition::Spin),
            ModifierTag::Size(IconSize::Xl),
            ModifierTag::Position(IconPosition::Rotate180),
            ModifierTag::Position(IconPosition::FlipH),
        ];
        let canonical = normalize_modifiers(&small_then_large);
        assert_eq!(
            canonical,
            vec![
                ModifierTag::Size(IconSize::Xl),
                ModifierTag::Position(IconPosition::Spin),
                ModifierTag::Position(IconPosition::Rotate180),
                ModifierTag::Position(IconPosition::FlipH),
            ]
        );
        assert_eq!(
            RenderOptions::from_modifiers(&canonical),
            RenderOptions::from_modifiers(&small_then_large)
        );

        let large_then_small = normalize_modifiers(&[
            ModifierTag::Size(IconSize::Xl),
            ModifierTag::Size(IconSize::S),
        ]);
        assert_eq!(large_then_small, vec![ModifierTag::Size(IconSize::S)]);
    }
}
