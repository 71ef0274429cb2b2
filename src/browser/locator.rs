//! Element locators used by flows.
//!
//! Locators are written as strings in flow files: `text=Add to cart` matches
//! an element by its visible text, `css=#buy` or a bare selector matches by
//! CSS.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    Css(String),
    Text(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text(text.into())
    }

    /// JavaScript expression evaluating to the located element or `null`
    pub fn js_lookup(&self) -> String {
        match self {
            Locator::Css(selector) => {
                format!("document.querySelector({})", js_string(selector))
            }
            Locator::Text(text) => format!(
                r#"(() => {{
                    const wanted = {};
                    const nodes = Array.from(document.querySelectorAll(
                        'button, a, label, li, span, div, p, h1, h2, h3, h4, td, option, input[type=submit], input[type=button], [role=button], [role=option], [role=tab]'
                    ));
                    const label = el => (el.innerText || el.value || '').trim();
                    return nodes.find(el => label(el) === wanted)
                        || nodes.find(el => el.children.length === 0 && label(el).includes(wanted))
                        || null;
                }})()"#,
                js_string(text)
            ),
        }
    }
}

impl FromStr for Locator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let locator = if let Some(text) = s.strip_prefix("text=") {
            Locator::Text(text.trim().to_string())
        } else if let Some(css) = s.strip_prefix("css=") {
            Locator::Css(css.trim().to_string())
        } else {
            Locator::Css(s.to_string())
        };

        match &locator {
            Locator::Css(v) | Locator::Text(v) if v.is_empty() => {
                Err(format!("empty locator '{}'", s))
            }
            _ => Ok(locator),
        }
    }
}

impl TryFrom<String> for Locator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "{}", selector),
            Locator::Text(text) => write!(f, "text={}", text),
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
