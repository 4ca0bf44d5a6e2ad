//! Display preferences and how they are written onto the document root.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
    /// Follow the platform preference.
    Auto,
}

impl Theme {
    pub fn is_light(self, prefers_dark: bool) -> bool {
        match self {
            Theme::Dark => false,
            Theme::Light => true,
            Theme::Auto => !prefers_dark,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccentColor {
    #[default]
    Violet,
    Blue,
    Green,
    Pink,
    Orange,
    Red,
}

impl AccentColor {
    pub const ALL: [AccentColor; 6] = [
        AccentColor::Violet,
        AccentColor::Blue,
        AccentColor::Green,
        AccentColor::Pink,
        AccentColor::Orange,
        AccentColor::Red,
    ];

    /// HSL triple in the `H S% L%` form the stylesheet expects.
    pub fn hsl(self) -> &'static str {
        match self {
            AccentColor::Violet => "263 83% 58%",
            AccentColor::Blue => "217 91% 60%",
            AccentColor::Green => "142 76% 36%",
            AccentColor::Pink => "330 81% 60%",
            AccentColor::Orange => "25 95% 53%",
            AccentColor::Red => "0 84% 60%",
        }
    }

    /// Start colour of the accent gradient.
    pub fn gradient(self) -> &'static str {
        match self {
            AccentColor::Violet => "239 84% 67%",
            AccentColor::Blue => "220 91% 54%",
            AccentColor::Green => "160 84% 39%",
            AccentColor::Pink => "340 82% 52%",
            AccentColor::Orange => "15 90% 50%",
            AccentColor::Red => "10 80% 55%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
    XLarge,
}

impl FontSize {
    pub fn css(self) -> &'static str {
        match self {
            FontSize::Small => "13px",
            FontSize::Medium => "14px",
            FontSize::Large => "16px",
            FontSize::XLarge => "18px",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleStyle {
    #[default]
    Rounded,
    Sharp,
    Round,
}

impl BubbleStyle {
    /// Corner radii of an outgoing bubble.
    pub fn radius(self) -> &'static str {
        match self {
            BubbleStyle::Rounded => "18px 18px 4px 18px",
            BubbleStyle::Sharp => "8px 8px 2px 8px",
            BubbleStyle::Round => "24px 24px 4px 24px",
        }
    }

    /// Incoming bubbles mirror the outgoing corners.
    pub fn incoming_radius(self) -> String {
        self.radius().split(' ').rev().collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleColor {
    #[default]
    Gradient,
    Solid,
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    pub theme: Theme,
    pub accent: AccentColor,
    pub font_size: FontSize,
    pub bubble_style: BubbleStyle,
    pub bubble_color: BubbleColor,
}

/// Whatever holds the root styles: a DOM root, a native theme, or a [`StyleSheet`].
pub trait StyleTarget {
    fn set_class(&mut self, class: &str, enabled: bool);
    fn set_property(&mut self, name: &str, value: &str);
    fn set_font_size(&mut self, size: &str);
}

pub const LIGHT_CLASS: &str = "light";

const ACCENT_PROPERTIES: [&str; 6] = [
    "--primary",
    "--accent",
    "--ring",
    "--gradient-end",
    "--sidebar-primary",
    "--sidebar-ring",
];

/// Write `config` onto `target`. Every call sets the same keys, so applying
/// a config twice leaves the target as applying it once.
pub fn apply(config: &AppearanceConfig, target: &mut impl StyleTarget, prefers_dark: bool) {
    target.set_class(LIGHT_CLASS, config.theme.is_light(prefers_dark));

    let accent = config.accent;
    for property in ACCENT_PROPERTIES {
        target.set_property(property, accent.hsl());
    }
    target.set_property("--gradient-start", accent.gradient());

    target.set_font_size(config.font_size.css());
}

/// In-memory [`StyleTarget`], also what the console renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSheet {
    pub classes: BTreeSet<String>,
    pub properties: BTreeMap<String, String>,
    pub font_size: Option<String>,
}

impl StyleTarget for StyleSheet {
    fn set_class(&mut self, class: &str, enabled: bool) {
        if enabled {
            self.classes.insert(class.to_string());
        } else {
            self.classes.remove(class);
        }
    }

    fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }

    fn set_font_size(&mut self, size: &str) {
        self.font_size = Some(size.to_string());
    }
}

impl StyleSheet {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn is_light(&self) -> bool {
        self.classes.contains(LIGHT_CLASS)
    }
}
