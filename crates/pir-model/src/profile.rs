//! Search subjects and the records found for them.

use chrono::{DateTime, Datelike, Utc};
use pir_core::{ExtractedProfileId, ProfileQueryId};
use serde::{Deserialize, Serialize};

/// The person a scan searches for.
///
/// Supplied by the host and never modified by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileQuery {
    /// Stable identifier
    pub id: ProfileQueryId,
    /// Given name
    pub first_name: String,
    /// Middle name, if known
    #[serde(default)]
    pub middle_name: Option<String>,
    /// Family name
    pub last_name: String,
    /// City of residence
    pub city: String,
    /// Two-letter state code
    pub state: String,
    /// Year of birth, used to derive the age brokers display
    pub birth_year: i32,
}

impl ProfileQuery {
    /// First, middle and last name joined by spaces.
    #[must_use]
    pub fn full_name(&self) -> String {
        [
            Some(self.first_name.as_str()),
            self.middle_name.as_deref(),
            Some(self.last_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Age in the year of `now`.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> i32 {
        now.year() - self.birth_year
    }
}

/// A record matching a profile query, as extracted from a broker page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedProfile {
    /// Identifier scoped to the (broker, profile query) pair; set once stored
    pub id: Option<ExtractedProfileId>,
    /// Displayed name
    pub name: Option<String>,
    /// Aliases
    pub alternative_names: Vec<String>,
    /// Age as displayed by the broker
    pub age: Option<String>,
    /// Addresses
    pub addresses: Vec<String>,
    /// Phone numbers
    pub phone_numbers: Vec<String>,
    /// Relatives
    pub relatives: Vec<String>,
    /// Link to the record's detail page
    pub profile_url: Option<String>,
    /// Broker-side report identifier
    pub report_id: Option<String>,
    /// Email used for this record's opt-out
    pub email: Option<String>,
    /// When the record was seen removed
    pub removed_date: Option<DateTime<Utc>>,
}

impl ExtractedProfile {
    /// Key used to recognise the same record across scans.
    ///
    /// Prefers the detail URL, then the report id, then name and age.
    #[must_use]
    pub fn identifier(&self) -> String {
        if let Some(url) = self.profile_url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        if let Some(report_id) = self.report_id.as_deref().filter(|r| !r.is_empty()) {
            return report_id.to_string();
        }
        format!(
            "{}|{}",
            self.name.as_deref().unwrap_or_default().to_lowercase(),
            self.age.as_deref().unwrap_or_default()
        )
    }

    /// Whether both profiles describe the same broker record.
    #[must_use]
    pub fn is_same_record(&self, other: &Self) -> bool {
        self.identifier() == other.identifier()
    }

    /// Copy of the profile carrying the given id.
    #[must_use]
    pub fn with_id(mut self, id: ExtractedProfileId) -> Self {
        self.id = Some(id);
        self
    }
}
