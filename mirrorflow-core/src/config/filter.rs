use regex::Regex;

use crate::error::{Error, Result};

/// Topics whose name starts with this prefix belong to the cluster itself and are never mirrored.
const INTERNAL_TOPIC_PREFIX: &str = "__";

/// Selects the topics to mirror. A filter is a comma separated list of regular expressions, each
/// matched against the whole topic name.
#[derive(Debug, Clone)]
pub enum TopicFilter {
    /// Mirror only the topics that match.
    Include(FilterPattern),
    /// Mirror every topic that does not match.
    Exclude(FilterPattern),
}

#[derive(Debug, Clone)]
pub struct FilterPattern {
    body: String,
    regex: Regex,
}

impl FilterPattern {
    fn parse(list: &str) -> Result<Self> {
        let body: String = list
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c == ',' { '|' } else { c })
            .collect();
        if body.is_empty() || body.split('|').all(str::is_empty) {
            return Err(Error::Config(format!("empty topic filter {list:?}")));
        }
        let regex = Regex::new(&format!("^(?:{body})$"))
            .map_err(|e| Error::Config(format!("invalid topic filter {list:?}: {e}")))?;
        Ok(Self { body, regex })
    }

    fn is_match(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

impl TopicFilter {
    /// Exactly one of `include` and `exclude` must be given.
    pub fn from_options(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        match (include, exclude) {
            (Some(include), None) => Ok(Self::Include(FilterPattern::parse(include)?)),
            (None, Some(exclude)) => Ok(Self::Exclude(FilterPattern::parse(exclude)?)),
            (Some(_), Some(_)) => Err(Error::Config(
                "exactly one of the inclusion and exclusion filters may be set, both are"
                    .to_string(),
            )),
            (None, None) => Err(Error::Config(
                "exactly one of the inclusion and exclusion filters must be set, neither is"
                    .to_string(),
            )),
        }
    }

    pub fn is_allowed(&self, topic: &str) -> bool {
        if topic.starts_with(INTERNAL_TOPIC_PREFIX) {
            return false;
        }
        match self {
            TopicFilter::Include(pattern) => pattern.is_match(topic),
            TopicFilter::Exclude(pattern) => !pattern.is_match(topic),
        }
    }

    /// The inclusion filter as a librdkafka regex subscription, `None` for an exclusion filter
    /// since those cannot be expressed as a subscription.
    pub(crate) fn subscription_pattern(&self) -> Option<String> {
        match self {
            TopicFilter::Include(pattern) => Some(format!("^({})$", pattern.body)),
            TopicFilter::Exclude(_) => None,
        }
    }
}
