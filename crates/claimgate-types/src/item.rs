//! Content items and their normalized form.
//!
//! Upstream clients send ingredients either as one free-text string or as a
//! list. [`normalize`] coerces both (and absence) into an ordered list of
//! trimmed, non-empty strings. Normalization is total and idempotent.

use serde::{Deserialize, Serialize};

/// Raw ingredient / claim payload as received from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ingredients {
    /// A single string, split on comma, semicolon or newline.
    Text(String),
    /// Already a list; each entry is trimmed but never split.
    List(Vec<String>),
}

/// A menu / product entry entering the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identifier.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Ingredient / claim strings in whatever shape the client sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<Ingredients>,
}

impl Item {
    /// Create an item with no ingredients.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ingredients: None,
        }
    }

    /// Builder: attach a free-text ingredient string.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.ingredients = Some(Ingredients::Text(text.into()));
        self
    }

    /// Builder: attach an ingredient list.
    pub fn with_list<I, S>(mut self, list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ingredients = Some(Ingredients::List(
            list.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Normalize this item.
    pub fn normalize(&self) -> NormalizedItem {
        NormalizedItem {
            id: self.id.clone(),
            name: self.name.trim().to_string(),
            ingredients: normalize(self.ingredients.as_ref()),
        }
    }
}

/// An [`Item`] whose ingredients are an ordered list of clean strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: String,
    pub name: String,
    pub ingredients: Vec<String>,
}

impl NormalizedItem {
    /// The working text handed to the first transform.
    ///
    /// Ingredients joined by `", "`; the display name when there are none.
    pub fn text(&self) -> String {
        if self.ingredients.is_empty() {
            self.name.clone()
        } else {
            self.ingredients.join(", ")
        }
    }
}

const SEPARATORS: [char; 3] = [',', ';', '\n'];

/// Coerce a raw ingredient payload into a list of trimmed, non-empty strings.
pub fn normalize(raw: Option<&Ingredients>) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(Ingredients::Text(text)) => text
            .split(SEPARATORS)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Ingredients::List(list)) => list
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_mixed_separators() {
        let raw = Ingredients::Text("flour, sugar; eggs\nsalt".into());
        assert_eq!(normalize(Some(&raw)), vec!["flour", "sugar", "eggs", "salt"]);
    }

    #[test]
    fn list_passes_through() {
        let raw = Ingredients::List(vec!["a".into(), "b".into()]);
        assert_eq!(normalize(Some(&raw)), vec!["a", "b"]);
    }

    #[test]
    fn list_entries_are_not_split() {
        let raw = Ingredients::List(vec!["salt, pepper".into()]);
        assert_eq!(normalize(Some(&raw)), vec!["salt, pepper"]);
    }

    #[test]
    fn absent_is_empty() {
        assert!(normalize(None).is_empty());
    }

    #[test]
    fn drops_blank_fragments() {
        let raw = Ingredients::Text(" , ;\n\r\n  milk ,,".into());
        assert_eq!(normalize(Some(&raw)), vec!["milk"]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let item = Item::new("i-1", " Pancakes ").with_text("flour;  milk , eggs");
        let once = item.normalize();
        let again = Item::new(once.id.clone(), once.name.clone())
            .with_list(once.ingredients.clone())
            .normalize();
        assert_eq!(once, again);
        assert_eq!(once.name, "Pancakes");
    }

    #[test]
    fn text_falls_back_to_name() {
        let item = Item::new("i-2", "Water").normalize();
        assert_eq!(item.text(), "Water");
        let item = Item::new("i-3", "Toast").with_list(["bread", "butter"]).normalize();
        assert_eq!(item.text(), "bread, butter");
    }

    #[test]
    fn deserializes_both_shapes() {
        let a: Item =
            serde_json::from_str(r#"{"id":"1","name":"x","ingredients":"a;b"}"#).unwrap();
        assert_eq!(a.normalize().ingredients, vec!["a", "b"]);
        let b: Item =
            serde_json::from_str(r#"{"id":"2","name":"y","ingredients":["c"]}"#).unwrap();
        assert_eq!(b.normalize().ingredients, vec!["c"]);
        let c: Item = serde_json::from_str(r#"{"id":"3"}"#).unwrap();
        assert!(c.normalize().ingredients.is_empty());
    }
}
