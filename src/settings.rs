// src/settings.rs

use crate::payslip::{Category, CustomCategories, ParserConfig};
use serde::{Deserialize, Serialize};

/// A user-defined item name and the category it always belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomItem {
    pub name: String,
    pub category: Category,
}

/// User preferences. Passed around explicitly; persisted through a
/// [`SettingsStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub theme_color: String,
    pub dark_mode: bool,
    pub items: Vec<CustomItem>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme_color: "#319795".to_string(),
            dark_mode: false,
            items: Vec::new(),
        }
    }
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub theme_color: Option<String>,
    pub dark_mode: Option<bool>,
    pub items: Option<Vec<CustomItem>>,
}

impl Settings {
    pub fn apply(mut self, update: SettingsUpdate) -> Self {
        if let Some(theme_color) = update.theme_color {
            self.theme_color = theme_color;
        }
        if let Some(dark_mode) = update.dark_mode {
            self.dark_mode = dark_mode;
        }
        if let Some(items) = update.items {
            self.items = items;
        }
        self
    }

    pub fn custom_categories(&self) -> CustomCategories {
        self.items
            .iter()
            .map(|item| (item.name.clone(), item.category))
            .collect()
    }

    /// Layer the user's category rules onto a parser configuration.
    pub fn parser_config(&self, base: ParserConfig) -> ParserConfig {
        ParserConfig {
            custom_categories: self.custom_categories(),
            ..base
        }
    }
}

/// Parse `NAME=CATEGORY` as given on the command line.
pub fn parse_custom_item(arg: &str) -> Result<CustomItem, String> {
    let (name, category) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=CATEGORY, got {arg:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty item name in {arg:?}"));
    }
    Ok(CustomItem {
        name: name.to_string(),
        category: category.parse()?,
    })
}

/// Persistence seam for [`Settings`].
pub trait SettingsStore {
    type Error;

    fn load_settings(&self) -> Result<Settings, Self::Error>;
    fn save_settings(&self, settings: &Settings) -> Result<(), Self::Error>;

    /// Load, apply a partial update, save, and return the result.
    fn update_settings(&self, update: SettingsUpdate) -> Result<Settings, Self::Error> {
        let settings = self.load_settings()?.apply(update);
        self.save_settings(&settings)?;
        Ok(settings)
    }
}
