//! Scripted browser actions.
//!
//! An ordered list of actions makes up one [`Step`](crate::Step). How an
//! action finds or clicks an element is up to the automation backend; the
//! catalog only describes what should happen.

use serde::{Deserialize, Serialize};

/// One scripted browser-automation primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "camelCase")]
pub enum Action {
    /// Load a URL. The template may contain profile placeholders such as `{first}`.
    Navigate {
        /// Action identifier, unique within the step
        id: String,
        /// URL template
        url: String,
    },

    /// Click one of the listed elements.
    Click {
        /// Action identifier, unique within the step
        id: String,
        /// Candidate elements, tried in order
        elements: Vec<PageElement>,
    },

    /// Fill form fields from the profile query, extracted profile or generated email.
    Fill {
        /// Action identifier, unique within the step
        id: String,
        /// Fields to fill
        elements: Vec<PageElement>,
    },

    /// Assert something about the current page.
    Expectation {
        /// Action identifier, unique within the step
        id: String,
        /// Conditions that must all hold
        expectations: Vec<ExpectationItem>,
    },

    /// Extract matching records from the result page.
    Extract {
        /// Action identifier, unique within the step
        id: String,
        /// Selector of one result card
        selector: String,
        /// Selectors of the fields inside a result card
        profile: ExtractSelectors,
    },

    /// Ask the email service for an address to use in the opt-out form.
    GetEmail {
        /// Action identifier, unique within the step
        id: String,
    },

    /// Wait for the confirmation email and open its link.
    EmailConfirmation {
        /// Action identifier, unique within the step
        id: String,
        /// Overrides the configured polling interval, in seconds
        #[serde(default)]
        polling_time_secs: Option<u64>,
    },

    /// Read the captcha site key and page URL.
    GetCaptchaInfo {
        /// Action identifier, unique within the step
        id: String,
        /// Selector of the captcha widget
        selector: String,
    },

    /// Inject a solved captcha token.
    SolveCaptcha {
        /// Action identifier, unique within the step
        id: String,
        /// Selector of the captcha widget
        selector: String,
    },
}

impl Action {
    /// The action identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Navigate { id, .. }
            | Self::Click { id, .. }
            | Self::Fill { id, .. }
            | Self::Expectation { id, .. }
            | Self::Extract { id, .. }
            | Self::GetEmail { id }
            | Self::EmailConfirmation { id, .. }
            | Self::GetCaptchaInfo { id, .. }
            | Self::SolveCaptcha { id, .. } => id,
        }
    }

    /// The action type as written in the catalog.
    #[must_use]
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Fill { .. } => "fill",
            Self::Expectation { .. } => "expectation",
            Self::Extract { .. } => "extract",
            Self::GetEmail { .. } => "getEmail",
            Self::EmailConfirmation { .. } => "emailConfirmation",
            Self::GetCaptchaInfo { .. } => "getCaptchaInfo",
            Self::SolveCaptcha { .. } => "solveCaptcha",
        }
    }

    /// Whether this is an expectation action.
    #[must_use]
    pub fn is_expectation(&self) -> bool {
        matches!(self, Self::Expectation { .. })
    }

    /// Whether running this action requires an email address.
    #[must_use]
    pub fn needs_email(&self) -> bool {
        match self {
            Self::GetEmail { .. } | Self::EmailConfirmation { .. } => true,
            Self::Fill { elements, .. } => elements
                .iter()
                .any(|element| element.element_type == ElementType::Email),
            _ => false,
        }
    }

    /// Whether running this action requires the captcha service.
    #[must_use]
    pub fn needs_captcha(&self) -> bool {
        matches!(self, Self::GetCaptchaInfo { .. } | Self::SolveCaptcha { .. })
    }
}

/// An element on the page an action operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageElement {
    /// What the element represents; decides the value used by `fill`
    #[serde(rename = "type")]
    pub element_type: ElementType,
    /// CSS selector
    pub selector: String,
}

/// What a page element represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementType {
    /// First name input
    FirstName,
    /// Middle name input
    MiddleName,
    /// Last name input
    LastName,
    /// Full name input
    FullName,
    /// City input
    City,
    /// State input
    State,
    /// Age input
    Age,
    /// Email input
    Email,
    /// Input taking the URL of the extracted profile
    ProfileUrl,
    /// Clickable button
    Button,
    /// Clickable link
    Link,
}

/// One condition checked by an expectation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationItem {
    /// What is checked
    #[serde(rename = "type")]
    pub kind: ExpectationKind,
    /// Element the condition applies to
    #[serde(default)]
    pub selector: Option<String>,
    /// Expected text or URL fragment
    #[serde(default)]
    pub expect: Option<String>,
}

/// Kind of expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpectationKind {
    /// The element's text contains `expect`
    Text,
    /// The current URL contains `expect`
    Url,
    /// The element exists
    Element,
}

/// Selectors of the fields of one result card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSelectors {
    /// Full name
    pub name: Option<String>,
    /// Alternative names / aliases
    pub alternative_names: Option<String>,
    /// Age
    pub age: Option<String>,
    /// Addresses
    pub addresses: Option<String>,
    /// Phone numbers
    pub phone_numbers: Option<String>,
    /// Relatives
    pub relatives: Option<String>,
    /// Link to the record's detail page
    pub profile_url: Option<String>,
    /// Broker-side report identifier
    pub report_id: Option<String>,
}
