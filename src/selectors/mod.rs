//! Selector fallback chains for the booking site's UI controls
//!
//! Every logical control the checker touches (the email field, the consular
//! busy banner, the datepicker "next" arrow, ...) is described by a
//! [`SelectorSet`]: an ordered list of alternative ways to locate it. The
//! first strategy that yields a visible element wins, so markup drift on the
//! site only breaks the checker once every alternative is gone.
//!
//! Sets are immutable. A [`SelectorRegistry`] is built once at startup from
//! the built-in defaults, optionally merged with an override file, and then
//! shared read-only with the resolver.

mod overrides;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

pub use overrides::{load_overrides, SelectorOverrides};

use crate::error::ConfigError;

/// How a selector target is interpreted by the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    Id,
    Name,
    CssSelector,
    Xpath,
    TagName,
    ClassName,
    LinkText,
    PartialLinkText,
}

impl Strategy {
    /// Parse a strategy name as written in override files (`"css_selector"`, `"XPATH"`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "ID" => Some(Self::Id),
            "NAME" => Some(Self::Name),
            "CSS" | "CSS_SELECTOR" => Some(Self::CssSelector),
            "XPATH" => Some(Self::Xpath),
            "TAG" | "TAG_NAME" => Some(Self::TagName),
            "CLASS" | "CLASS_NAME" => Some(Self::ClassName),
            "LINK_TEXT" => Some(Self::LinkText),
            "PARTIAL_LINK_TEXT" => Some(Self::PartialLinkText),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::CssSelector => "css",
            Self::Xpath => "xpath",
            Self::TagName => "tag",
            Self::ClassName => "class",
            Self::LinkText => "link_text",
            Self::PartialLinkText => "partial_link_text",
        }
    }
}

/// A single (strategy, target) locator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    pub by: Strategy,
    pub target: String,
}

impl Selector {
    pub fn new(by: Strategy, target: impl Into<String>) -> Self {
        Self {
            by,
            target: target.into(),
        }
    }

    pub fn id(target: impl Into<String>) -> Self {
        Self::new(Strategy::Id, target)
    }

    pub fn name(target: impl Into<String>) -> Self {
        Self::new(Strategy::Name, target)
    }

    pub fn css(target: impl Into<String>) -> Self {
        Self::new(Strategy::CssSelector, target)
    }

    pub fn xpath(target: impl Into<String>) -> Self {
        Self::new(Strategy::Xpath, target)
    }

    pub fn tag(target: impl Into<String>) -> Self {
        Self::new(Strategy::TagName, target)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.by.as_str(), self.target)
    }
}

/// Ordered, non-empty fallback chain for one logical control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSet {
    selectors: Vec<Selector>,
}

impl SelectorSet {
    /// Build a set, dropping duplicates while keeping first-seen order
    ///
    /// Returns `None` when no selector is given.
    pub fn new(selectors: impl IntoIterator<Item = Selector>) -> Option<Self> {
        let mut unique: Vec<Selector> = Vec::new();
        for selector in selectors {
            if !unique.contains(&selector) {
                unique.push(selector);
            }
        }
        if unique.is_empty() {
            None
        } else {
            Some(Self { selectors: unique })
        }
    }

    /// Merge overrides in front of this set; defaults remain as fallback
    #[must_use]
    pub fn with_overrides(&self, overrides: &[Selector]) -> Self {
        let merged = overrides.iter().chain(self.selectors.iter()).cloned();
        // self is non-empty, so the merge is too
        Self::new(merged).unwrap_or_else(|| self.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.selectors.iter()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, selector: &Selector) -> bool {
        self.selectors.contains(selector)
    }

    pub fn first(&self) -> &Selector {
        &self.selectors[0]
    }
}

impl<'a> IntoIterator for &'a SelectorSet {
    type Item = &'a Selector;
    type IntoIter = std::slice::Iter<'a, Selector>;

    fn into_iter(self) -> Self::IntoIter {
        self.selectors.iter()
    }
}

/// Logical UI controls the checker knows how to find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKey {
    Email,
    Password,
    SignIn,
    CookieConsent,
    Alert,
    PrivacyCheckbox,
    PrivacyLabel,
    GroupContinue,
    RescheduleToggle,
    RescheduleButton,
    AppointmentForm,
    Location,
    ConsulateBusy,
    ConsulateDateInput,
    ConsulateDateIcon,
    ConsulateTime,
    DatepickerContainer,
    DatepickerTitle,
    DatepickerDay,
    DatepickerNext,
    CaptchaWidget,
}

impl ElementKey {
    pub const ALL: [ElementKey; 21] = [
        Self::Email,
        Self::Password,
        Self::SignIn,
        Self::CookieConsent,
        Self::Alert,
        Self::PrivacyCheckbox,
        Self::PrivacyLabel,
        Self::GroupContinue,
        Self::RescheduleToggle,
        Self::RescheduleButton,
        Self::AppointmentForm,
        Self::Location,
        Self::ConsulateBusy,
        Self::ConsulateDateInput,
        Self::ConsulateDateIcon,
        Self::ConsulateTime,
        Self::DatepickerContainer,
        Self::DatepickerTitle,
        Self::DatepickerDay,
        Self::DatepickerNext,
        Self::CaptchaWidget,
    ];

    /// Name used in override files and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Password => "password",
            Self::SignIn => "sign_in",
            Self::CookieConsent => "cookie_consent",
            Self::Alert => "alert",
            Self::PrivacyCheckbox => "privacy_checkbox",
            Self::PrivacyLabel => "privacy_label",
            Self::GroupContinue => "group_continue",
            Self::RescheduleToggle => "reschedule_toggle",
            Self::RescheduleButton => "reschedule_button",
            Self::AppointmentForm => "appointment_form",
            Self::Location => "location",
            Self::ConsulateBusy => "consulate_busy",
            Self::ConsulateDateInput => "consulate_date_input",
            Self::ConsulateDateIcon => "consulate_date_icon",
            Self::ConsulateTime => "consulate_time",
            Self::DatepickerContainer => "datepicker_container",
            Self::DatepickerTitle => "datepicker_title",
            Self::DatepickerDay => "datepicker_day",
            Self::DatepickerNext => "datepicker_next",
            Self::CaptchaWidget => "captcha_widget",
        }
    }

    /// Human readable description for error messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::Email => "email field",
            Self::Password => "password field",
            Self::SignIn => "sign in button",
            Self::CookieConsent => "cookie consent button",
            Self::Alert => "page alert",
            Self::PrivacyCheckbox => "privacy policy checkbox",
            Self::PrivacyLabel => "privacy policy label",
            Self::GroupContinue => "group continue button",
            Self::RescheduleToggle => "reschedule accordion",
            Self::RescheduleButton => "reschedule button",
            Self::AppointmentForm => "appointment form",
            Self::Location => "location selector",
            Self::ConsulateBusy => "consulate busy banner",
            Self::ConsulateDateInput => "consulate date input",
            Self::ConsulateDateIcon => "consulate date icon",
            Self::ConsulateTime => "consulate time selector",
            Self::DatepickerContainer => "datepicker",
            Self::DatepickerTitle => "datepicker title",
            Self::DatepickerDay => "datepicker day",
            Self::DatepickerNext => "datepicker next button",
            Self::CaptchaWidget => "captcha widget",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        // Also accept the legacy upper-case list names, e.g. EMAIL_SELECTORS
        let wanted = wanted.strip_suffix("_selectors").unwrap_or(&wanted);
        Self::ALL.iter().copied().find(|key| key.as_str() == wanted)
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// XPath fragment matching `expr` case-insensitively against `needle`
fn ci_contains(expr: &str, needle: &str) -> String {
    format!("contains(translate({expr}, '{UPPER}', '{LOWER}'), '{needle}')")
}

fn set(selectors: Vec<Selector>) -> SelectorSet {
    SelectorSet::new(selectors).expect("built-in selector sets are non-empty")
}

fn default_set(key: ElementKey) -> SelectorSet {
    match key {
        ElementKey::Email => set(vec![
            Selector::id("user_email"),
            Selector::name("user[email]"),
            Selector::css("form input[type='email']"),
            Selector::css("input[name*='email']"),
            Selector::css("input[autocomplete='email']"),
            Selector::xpath(format!("//input[{}]", ci_contains("@placeholder", "email"))),
            Selector::xpath(format!("//input[{}]", ci_contains("@aria-label", "email"))),
        ]),
        ElementKey::Password => set(vec![
            Selector::id("user_password"),
            Selector::name("user[password]"),
            Selector::css("form input[type='password']"),
            Selector::xpath(format!("//input[{}]", ci_contains("@placeholder", "password"))),
            Selector::xpath(format!("//input[{}]", ci_contains("@aria-label", "password"))),
        ]),
        ElementKey::SignIn => set(vec![
            Selector::name("commit"),
            Selector::css("input[type='submit']"),
            Selector::css("button[type='submit']"),
            Selector::xpath(format!("//button[{}]", ci_contains(".", "sign in"))),
            Selector::xpath("//input[@value='Sign In']"),
        ]),
        ElementKey::CookieConsent => set(vec![
            Selector::id("onetrust-accept-btn-handler"),
            Selector::css("button[aria-label='Accept all']"),
            Selector::xpath(format!("//button[{}]", ci_contains(".", "accept"))),
            Selector::css("button[data-cookiebanner='accept']"),
        ]),
        ElementKey::Alert => set(vec![
            Selector::css(".alert"),
            Selector::css("[role='alert']"),
            Selector::css(".flash"),
            Selector::css(".error, .errors"),
        ]),
        ElementKey::PrivacyCheckbox => set(vec![
            Selector::id("policy_confirmed"),
            Selector::name("policy_confirmed"),
            Selector::css("input[name='policy_confirmed']"),
            Selector::css("input[id='policy_confirmed']"),
            Selector::xpath(
                "//input[@type='checkbox' and (contains(@name, 'policy') or contains(@id, 'policy'))]",
            ),
            Selector::xpath(format!(
                "//input[@type='checkbox' and {}]",
                ci_contains("@aria-label", "privacy")
            )),
        ]),
        ElementKey::PrivacyLabel => set(vec![
            Selector::css("label[for='policy_confirmed']"),
            Selector::xpath(format!("//label[{}]", ci_contains(".", "privacy policy"))),
        ]),
        ElementKey::GroupContinue => set(vec![
            Selector::css("a.button.primary[href*='continue_actions']"),
            Selector::xpath(format!(
                "//a[contains(@class, 'button') and contains(@href, 'continue_actions') and {}]",
                ci_contains(".", "continue")
            )),
        ]),
        ElementKey::RescheduleToggle => set(vec![Selector::xpath(format!(
            "//a[contains(@class, 'accordion-title') and {}]",
            ci_contains(".", "reschedule appointment")
        ))]),
        ElementKey::RescheduleButton => set(vec![
            Selector::xpath(format!(
                "//a[contains(@href, '/appointment') and {}]",
                ci_contains(".", "reschedule")
            )),
            Selector::css("a[href*='/appointment']"),
        ]),
        ElementKey::AppointmentForm => set(vec![
            Selector::id("appointment-form"),
            Selector::css("form#appointment-form"),
        ]),
        ElementKey::Location => set(vec![
            Selector::id("appointments_consulate_appointment_facility_id"),
            Selector::css("select#appointments_consulate_appointment_facility_id"),
            Selector::css("select[id*='consulate_appointment_facility']"),
            Selector::name("appointments[consulate_appointment][facility_id]"),
            Selector::id("location"),
            Selector::name("location"),
            Selector::css("select[name*='location']"),
        ]),
        ElementKey::ConsulateBusy => set(vec![
            Selector::id("consulate_date_time_not_available"),
            Selector::css("#consulate_date_time_not_available small"),
        ]),
        ElementKey::ConsulateDateInput => set(vec![
            Selector::id("appointments_consulate_appointment_date"),
            Selector::css("input[id*='consulate_appointment_date']"),
        ]),
        ElementKey::ConsulateDateIcon => set(vec![
            Selector::css("#appointments_consulate_appointment_date_input .ui-datepicker-trigger"),
            Selector::css("img.ui-datepicker-trigger"),
            Selector::css("[id*='consulate_appointment_date'] ~ .ui-datepicker-trigger"),
        ]),
        ElementKey::ConsulateTime => set(vec![
            Selector::id("appointments_consulate_appointment_time"),
            Selector::css("select[id*='consulate_appointment_time']"),
        ]),
        ElementKey::DatepickerContainer => set(vec![
            Selector::id("ui-datepicker-div"),
            Selector::css("#ui-datepicker-div"),
        ]),
        ElementKey::DatepickerTitle => set(vec![Selector::css(".ui-datepicker-title")]),
        ElementKey::DatepickerDay => set(vec![Selector::css(
            "table.ui-datepicker-calendar td:not(.ui-state-disabled) a",
        )]),
        ElementKey::DatepickerNext => {
            set(vec![Selector::css(".ui-datepicker-next:not(.ui-state-disabled)")])
        }
        ElementKey::CaptchaWidget => set(vec![
            Selector::css(".g-recaptcha"),
            Selector::css(".grecaptcha-badge"),
            Selector::css(".h-captcha"),
            Selector::css(".cf-turnstile"),
            Selector::css("[data-sitekey][class*='captcha']"),
            Selector::css("div[aria-label*='captcha']"),
        ]),
    }
}

/// Immutable lookup from logical control to its fallback chain
#[derive(Debug, Clone)]
pub struct SelectorRegistry {
    sets: HashMap<ElementKey, SelectorSet>,
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        let sets = ElementKey::ALL
            .iter()
            .map(|key| (*key, default_set(*key)))
            .collect();
        Self { sets }
    }
}

impl SelectorRegistry {
    /// Built-in defaults merged with the given overrides
    pub fn with_overrides(overrides: &SelectorOverrides) -> Self {
        let mut registry = Self::default();
        for (key, extra) in overrides.iter() {
            let Some(current) = registry.sets.get(key) else {
                continue;
            };
            let merged = current.with_overrides(extra);
            tracing::info!(
                element = %key,
                overrides = extra.len(),
                defaults = current.len(),
                "Selector overrides applied"
            );
            registry.sets.insert(*key, merged);
        }
        registry
    }

    /// Load defaults plus the override file at `path`, if it exists
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => {
                let overrides = load_overrides(path)?;
                Ok(Self::with_overrides(&overrides))
            }
            Some(path) => {
                tracing::debug!(path = %path.display(), "No selector override file; using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn get(&self, key: ElementKey) -> &SelectorSet {
        // Every key is populated by Default and overrides never remove one
        &self.sets[&key]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_set_rejects_empty() {
        assert!(SelectorSet::new(Vec::new()).is_none());
    }

    #[test]
    fn test_selector_set_dedups_preserving_order() {
        let set = SelectorSet::new(vec![
            Selector::id("a"),
            Selector::css("b"),
            Selector::id("a"),
        ])
        .unwrap();
        let targets: Vec<_> = set.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b"]);
    }

    #[test]
    fn test_overrides_prepend_and_keep_defaults() {
        let defaults = SelectorSet::new(vec![Selector::id("user_email"), Selector::name("email")]).unwrap();
        let merged = defaults.with_overrides(&[Selector::css("#new-email"), Selector::name("email")]);

        let order: Vec<String> = merged.iter().map(ToString::to_string).collect();
        assert_eq!(order, vec!["css=#new-email", "name=email", "id=user_email"]);
    }

    #[test]
    fn test_registry_has_every_key() {
        let registry = SelectorRegistry::default();
        for key in ElementKey::ALL {
            assert!(!registry.get(key).is_empty());
        }
        assert!(registry.get(ElementKey::Email).contains(&Selector::id("user_email")));
        assert!(registry.get(ElementKey::Password).contains(&Selector::id("user_password")));
        assert_eq!(registry.get(ElementKey::SignIn).first(), &Selector::name("commit"));
    }

    #[test]
    fn test_element_key_parse() {
        assert_eq!(ElementKey::parse("email"), Some(ElementKey::Email));
        assert_eq!(ElementKey::parse("LOCATION_SELECTORS"), Some(ElementKey::Location));
        assert_eq!(ElementKey::parse("datepicker_next"), Some(ElementKey::DatepickerNext));
        assert_eq!(ElementKey::parse("nope"), None);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::parse("css_selector"), Some(Strategy::CssSelector));
        assert_eq!(Strategy::parse("XPATH"), Some(Strategy::Xpath));
        assert_eq!(Strategy::parse("by_magic"), None);
    }

    #[test]
    fn test_xpath_case_folding() {
        let fragment = ci_contains("@placeholder", "email");
        assert!(fragment.starts_with("contains(translate(@placeholder"));
        assert!(fragment.ends_with("'email')"));
    }
}
