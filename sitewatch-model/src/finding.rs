use crate::severity::Severity;

/// One raw problem reported by an analyzer during a single scan attempt.
///
/// Only `url`, `message`, `element` and the scan type contribute to issue
/// identity. Everything else may drift between observations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Finding {
    pub url: String,
    pub message: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub element: Option<String>,
    pub severity: Severity,
    #[cfg_attr(feature = "serde", serde(default))]
    pub help: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub tags: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub element_path: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub details: Option<serde_json::Value>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub category: Option<String>,
}

impl Finding {
    pub fn new(
        url: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Finding {
            url: url.into(),
            message: message.into(),
            element: None,
            severity,
            help: None,
            tags: Vec::new(),
            element_path: None,
            details: None,
            category: None,
        }
    }

    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_element_path(mut self, path: impl Into<String>) -> Self {
        self.element_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}
