use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Closed set of labels a message can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Interested,
    MeetingBooked,
    NotInterested,
    Spam,
    OutOfOffice,
    Uncategorized,
}

impl Category {
    /// Every label the classifier is asked to choose from.
    pub const LABELED: [Category; 5] = [
        Category::Interested,
        Category::MeetingBooked,
        Category::NotInterested,
        Category::Spam,
        Category::OutOfOffice,
    ];

    /// Maps free text returned by a model to a category.
    ///
    /// Trims whitespace, surrounding quotes and trailing punctuation, then
    /// compares case-insensitively ignoring inner whitespace, `-` and `_`.
    /// Anything unrecognised becomes [`Category::Uncategorized`].
    pub fn parse_label(raw: &str) -> Category {
        let trimmed = raw
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '.' | ':' | '!'))
            .trim();
        let key: String = trimmed
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "interested" => Category::Interested,
            "meetingbooked" => Category::MeetingBooked,
            "notinterested" => Category::NotInterested,
            "spam" => Category::Spam,
            "outofoffice" => Category::OutOfOffice,
            _ => Category::Uncategorized,
        }
    }

    /// Display name as presented to the model, e.g. `Meeting Booked`.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Interested => "Interested",
            Category::MeetingBooked => "Meeting Booked",
            Category::NotInterested => "Not Interested",
            Category::Spam => "Spam",
            Category::OutOfOffice => "Out of Office",
            Category::Uncategorized => "Uncategorized",
        }
    }

    /// Canonical lowercase label stored in the index, e.g. `meeting booked`.
    pub fn label(&self) -> String {
        self.display_name().to_lowercase()
    }

    /// Default destination folder: the label with whitespace removed.
    pub fn folder_slug(&self) -> String {
        self.label().split_whitespace().collect()
    }

    /// Event name used in webhook payloads, e.g. `InterestedEmail`.
    pub fn event_name(&self) -> String {
        let compact: String = self.display_name().split_whitespace().collect();
        format!("{}Email", compact)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Category::parse_label(&raw))
    }
}
