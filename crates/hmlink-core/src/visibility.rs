// ── Parameter visibility engine ──
//
// Compiles configured override lines into match rules and answers which
// parameters surface as first-class entities. Parsing is fail-open:
// malformed lines are logged and dropped, startup never aborts.
//
// Rule grammar, one rule per line:
//
//     PARAMETER[:PARAMSET_KEY]@DEVICE_TYPE[:CHANNEL_NO]
//
// `PARAMSET_KEY` defaults to VALUES. `DEVICE_TYPE` and `CHANNEL_NO`
// accept the wildcard `all`; a rule without a channel segment matches
// only device-level (channel-absent) lookups. Matching is exact and
// case-sensitive, OR'd across all compiled rules.
//
// Lines of the literal form `ignore_<DEVICE_TYPE>` suppress composite
// entity creation for that exact device type instead.

use std::collections::HashSet;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::model::{
    EntityUsage, PARAM_CONFIG_PENDING, PARAM_STICKY_UNREACH, PARAM_UNREACH,
    PARAM_UPDATE_PENDING, ParamsetKey,
};

/// Parameters suppressed from consumers unless an override names them.
/// They still get entities so availability tracking keeps working.
const DEFAULT_HIDDEN_PARAMETERS: &[&str] = &[
    PARAM_CONFIG_PENDING,
    PARAM_STICKY_UNREACH,
    PARAM_UNREACH,
    PARAM_UPDATE_PENDING,
];

const IGNORE_PREFIX: &str = "ignore_";
const WILDCARD: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("expected exactly one '@' separator")]
    Separator,
    #[error("empty parameter name")]
    EmptyParameter,
    #[error("invalid paramset segment {0:?}")]
    ParamsetSegment(String),
    #[error("empty device type")]
    EmptyDeviceType,
    #[error("invalid channel segment {0:?}")]
    ChannelSegment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DeviceTypePattern {
    Any,
    Exact(String),
}

impl DeviceTypePattern {
    fn matches(&self, device_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(t) => t == device_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChannelPattern {
    /// No channel segment: device-level lookups only.
    DeviceOnly,
    /// Wildcard: any present channel number, never a device-level lookup.
    Any,
    Exact(u32),
}

impl ChannelPattern {
    fn matches(&self, channel_no: Option<u32>) -> bool {
        match (self, channel_no) {
            (Self::DeviceOnly, None) => true,
            (Self::Any, Some(_)) => true,
            (Self::Exact(want), Some(got)) => *want == got,
            _ => false,
        }
    }
}

/// One compiled visibility-override rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnignoreRule {
    parameter: String,
    paramset_key: ParamsetKey,
    device_type: DeviceTypePattern,
    channel: ChannelPattern,
}

impl UnignoreRule {
    /// Parse one configured line into a validated rule.
    pub fn parse(line: &str) -> Result<Self, RuleParseError> {
        let mut sides = line.split('@');
        let (Some(parameter_side), Some(device_side), None) =
            (sides.next(), sides.next(), sides.next())
        else {
            return Err(RuleParseError::Separator);
        };

        let (parameter, paramset_key) = Self::parse_parameter_side(parameter_side)?;
        let (device_type, channel) = Self::parse_device_side(device_side)?;

        Ok(Self {
            parameter,
            paramset_key,
            device_type,
            channel,
        })
    }

    fn parse_parameter_side(side: &str) -> Result<(String, ParamsetKey), RuleParseError> {
        let segments: Vec<&str> = side.split(':').collect();
        match segments.as_slice() {
            [parameter] if !parameter.is_empty() => {
                Ok(((*parameter).to_owned(), ParamsetKey::Values))
            }
            [parameter, key] if !parameter.is_empty() => {
                let paramset_key = ParamsetKey::from_str(key)
                    .map_err(|_| RuleParseError::ParamsetSegment((*key).to_owned()))?;
                Ok(((*parameter).to_owned(), paramset_key))
            }
            [parameter, ..] if parameter.is_empty() => Err(RuleParseError::EmptyParameter),
            _ => Err(RuleParseError::ParamsetSegment(side.to_owned())),
        }
    }

    fn parse_device_side(
        side: &str,
    ) -> Result<(DeviceTypePattern, ChannelPattern), RuleParseError> {
        let segments: Vec<&str> = side.split(':').collect();
        let (device_type, channel_segment) = match segments.as_slice() {
            [device_type] => (*device_type, None),
            [device_type, channel] => (*device_type, Some(*channel)),
            _ => return Err(RuleParseError::ChannelSegment(side.to_owned())),
        };

        if device_type.is_empty() {
            return Err(RuleParseError::EmptyDeviceType);
        }
        let device_type = if device_type == WILDCARD {
            DeviceTypePattern::Any
        } else {
            DeviceTypePattern::Exact(device_type.to_owned())
        };

        let channel = match channel_segment {
            None => ChannelPattern::DeviceOnly,
            Some(WILDCARD) => ChannelPattern::Any,
            Some(raw) => ChannelPattern::Exact(
                raw.parse()
                    .map_err(|_| RuleParseError::ChannelSegment(raw.to_owned()))?,
            ),
        };

        Ok((device_type, channel))
    }

    pub fn matches(
        &self,
        device_type: &str,
        channel_no: Option<u32>,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> bool {
        self.parameter == parameter
            && self.paramset_key == paramset_key
            && self.device_type.matches(device_type)
            && self.channel.matches(channel_no)
    }
}

/// Compiled visibility configuration for one central.
#[derive(Debug, Default)]
pub struct ParameterVisibility {
    rules: Vec<UnignoreRule>,
    ignored_device_types: HashSet<String>,
}

impl ParameterVisibility {
    /// Compile configured lines. Malformed lines are dropped with a warning.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut rules = Vec::new();
        let mut ignored_device_types = HashSet::new();

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(device_type) = line.strip_prefix(IGNORE_PREFIX) {
                if device_type.is_empty() {
                    warn!(line, "dropping ignore line without a device type");
                } else {
                    ignored_device_types.insert(device_type.to_owned());
                }
                continue;
            }
            match UnignoreRule::parse(line) {
                Ok(rule) => rules.push(rule),
                Err(err) => warn!(line, %err, "dropping malformed un-ignore line"),
            }
        }

        Self {
            rules,
            ignored_device_types,
        }
    }

    /// Whether an override forces this parameter to surface as an entity.
    pub fn parameter_is_un_ignored(
        &self,
        device_type: &str,
        channel_no: Option<u32>,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.matches(device_type, channel_no, paramset_key, parameter))
    }

    /// Whether composite entities are suppressed for this exact device type.
    pub fn device_type_is_ignored(&self, device_type: &str) -> bool {
        self.ignored_device_types.contains(device_type)
    }

    pub fn parameter_is_hidden(&self, parameter: &str) -> bool {
        DEFAULT_HIDDEN_PARAMETERS.contains(&parameter)
    }

    /// Usage classification applied at device-build time.
    pub fn usage_for(
        &self,
        device_type: &str,
        channel_no: Option<u32>,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> EntityUsage {
        if self.parameter_is_hidden(parameter)
            && !self.parameter_is_un_ignored(device_type, channel_no, paramset_key, parameter)
        {
            EntityUsage::NoCreate
        } else {
            EntityUsage::Entity
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
